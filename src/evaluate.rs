//! Sandboxed evaluation of logic sections.
//!
//! Each logic section runs in a fresh Lua state with the filesystem,
//! debug and code-loading facilities removed. The section sees:
//!
//! - `exports` / `module.exports`: the table it fills in
//! - `...`: the exports table again, as the chunk's receiver
//! - `require(name)`: a named dependency, `nil` when unknown
//! - `load_component(ref[, name])`: a marker string deferring a nested load
//!
//! A chunk may `return` a table to replace `module.exports`, or a coroutine
//! that is resumed to completion before its final value is used. Errors are
//! reported with lines counted from the top of the component document.

use std::cell::RefCell;
use std::rc::Rc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use mlua::{DeserializeOptions, Lua, LuaSerdeExt, Table, Thread, ThreadStatus, Value as LuaValue};
use regex::Regex;
use serde_json::{Map, Value};

use crate::error::{LoaderError, Result, ScriptError, ScriptErrorKind};
use crate::registry::Dependencies;
use crate::resolve::{join_relative, resolve};

/// Name the chunk reports itself as in error messages.
const CHUNK_NAME: &str = "logic";

/// Prefix of the string `load_component` returns.
pub const COMPONENT_MARKER: &str = "url:";

lazy_static! {
    static ref SCRIPT_OPEN_RE: Regex = Regex::new(r"(?i)<script\b[^>]*>").unwrap();
}

/// Post-processes the exports a logic section produced.
#[async_trait(?Send)]
pub trait ExportsHandler {
    async fn handle(&self, exports: Value) -> Result<Value>;
}

/// Passes exports through untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityExports;

#[async_trait(?Send)]
impl ExportsHandler for IdentityExports {
    async fn handle(&self, exports: Value) -> Result<Value> {
        Ok(exports)
    }
}

/// Where a logic section lives.
#[derive(Clone, Copy)]
pub struct ScriptContext<'a> {
    pub url: &'a str,
    pub base_uri: &'a str,
    /// The whole component document, line endings normalized.
    pub document: &'a str,
    pub dependencies: &'a Rc<RefCell<Dependencies>>,
}

/// Evaluate `source` and return its exports object.
pub async fn evaluate(
    source: &str,
    ctx: &ScriptContext<'_>,
    handler: &dyn ExportsHandler,
) -> Result<Map<String, Value>> {
    let doc_line = document_line(ctx.document, source);
    let remap = |err: mlua::Error| LoaderError::from(script_error(&err, ctx.url, doc_line));

    let lua = Lua::new();
    let module = prepare(&lua, ctx).map_err(remap)?;
    let exports: Table = module.get("exports").map_err(remap)?;

    let chunk = lua
        .load(source)
        .set_name(format!("={}", CHUNK_NAME))
        .into_function()
        .map_err(remap)?;

    let mut value: LuaValue = chunk.call(exports).map_err(remap)?;
    if let LuaValue::Thread(thread) = value {
        value = drive(thread).await.map_err(remap)?;
    }
    if value.is_nil() {
        value = module.get("exports").map_err(remap)?;
    }

    let json = match value {
        LuaValue::Table(_) => lua
            .from_value_with::<Value>(
                value,
                DeserializeOptions::new().deny_unsupported_types(false),
            )
            .map_err(remap)?,
        other => {
            return Err(LoaderError::InvalidExports {
                url: ctx.url.to_string(),
                found: other.type_name(),
            })
        }
    };

    match handler.handle(json).await? {
        Value::Object(map) => {
            tracing::debug!(url = ctx.url, keys = map.len(), "Logic section evaluated");
            Ok(map)
        }
        other => Err(LoaderError::InvalidExports {
            url: ctx.url.to_string(),
            found: json_type_name(&other),
        }),
    }
}

/// Resume a returned coroutine until it finishes, yielding to the runtime
/// between steps. The last produced value wins.
async fn drive(thread: Thread<'_>) -> mlua::Result<LuaValue<'_>> {
    let mut last = LuaValue::Nil;
    while thread.status() == ThreadStatus::Resumable {
        last = thread.resume(())?;
        tokio::task::yield_now().await;
    }
    Ok(last)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENVIRONMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Sandbox the fresh state and install the section's globals. Returns `module`.
fn prepare<'lua>(lua: &'lua Lua, ctx: &ScriptContext<'_>) -> mlua::Result<Table<'lua>> {
    let globals = lua.globals();

    let os_table: Table = globals.get("os")?;
    let safe_os = lua.create_table()?;
    for name in ["date", "time", "clock", "difftime"] {
        safe_os.set(name, os_table.get::<_, LuaValue>(name)?)?;
    }
    globals.set("os", safe_os)?;

    for name in ["io", "debug", "package", "load", "loadstring", "loadfile", "dofile"] {
        globals.set(name, LuaValue::Nil)?;
    }

    let exports = lua.create_table()?;
    let module = lua.create_table()?;
    module.set("exports", exports.clone())?;
    globals.set("exports", exports)?;
    globals.set("module", module.clone())?;

    let deps = Rc::clone(ctx.dependencies);
    let base = ctx.base_uri.to_string();
    globals.set(
        "require",
        lua.create_function(move |lua, name: String| {
            let key = join_relative(&base, &name);
            match deps.borrow().get(&key) {
                Some(value) => lua.to_value(value),
                None => {
                    tracing::debug!(dependency = %key, "Unknown dependency required");
                    Ok(LuaValue::Nil)
                }
            }
        })?,
    )?;

    let base = ctx.base_uri.to_string();
    globals.set(
        "load_component",
        lua.create_function(move |_, (reference, _name): (String, Option<String>)| {
            let target = resolve(&join_relative(&base, &reference));
            Ok(format!("{}{}", COMPONENT_MARKER, target.url))
        })?,
    )?;

    Ok(module)
}

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR REMAPPING
// ═══════════════════════════════════════════════════════════════════════════════

/// 1-based document line on which `source` begins, or 1 when the source is
/// not part of the document (fetched through `src`, or processed).
///
/// The source is anchored at the last `<script>` opening tag it directly
/// follows, so identical text earlier in the markup is not mistaken for it.
pub fn document_line(document: &str, source: &str) -> usize {
    if source.is_empty() {
        return 1;
    }
    SCRIPT_OPEN_RE
        .find_iter(document)
        .filter(|open| document[open.end()..].starts_with(source))
        .last()
        .map_or(1, |open| 1 + document[..open.end()].matches('\n').count())
}

fn script_error(err: &mlua::Error, url: &str, doc_line: usize) -> ScriptError {
    let (kind, message) = match err {
        mlua::Error::SyntaxError { message, .. } => (ScriptErrorKind::Syntax, message.clone()),
        mlua::Error::RuntimeError(message) => (ScriptErrorKind::Runtime, message.clone()),
        mlua::Error::CallbackError { cause, .. } => return script_error(cause, url, doc_line),
        other => (ScriptErrorKind::Runtime, other.to_string()),
    };

    match split_chunk_line(&message) {
        Some((line, rest)) => ScriptError {
            url: url.to_string(),
            kind,
            line: Some(doc_line + line - 1),
            message: rest,
        },
        None => ScriptError {
            url: url.to_string(),
            kind,
            line: None,
            message,
        },
    }
}

/// Split `logic:3: boom` into `(3, "boom")`, dropping any traceback.
fn split_chunk_line(message: &str) -> Option<(usize, String)> {
    let first = message.split("\nstack traceback").next().unwrap_or(message);
    let rest = first.strip_prefix(CHUNK_NAME)?.strip_prefix(':')?;
    let digits = rest.chars().take_while(char::is_ascii_digit).count();
    if digits == 0 {
        return None;
    }
    let line: usize = rest[..digits].parse().ok()?;
    let text = rest[digits..].strip_prefix(':')?;
    Some((line.max(1), text.trim().to_string()))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
