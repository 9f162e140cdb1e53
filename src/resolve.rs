//! Component reference resolution.
//!
//! A reference names either a component document (`widgets/button.sfc`) or a
//! directory holding one (`widgets/button`, which loads
//! `widgets/button/index.sfc`). Nested references written relative to the
//! referencing component are joined onto that component's base URI.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Suffix recognized as a component document.
pub const COMPONENT_EXTENSION: &str = ".sfc";

/// Document loaded when a reference names a directory.
pub const INDEX_DOCUMENT: &str = "index.sfc";

lazy_static! {
    /// prefix, bare name, optional suffix, optional query/fragment tail
    static ref REFERENCE_RE: Regex =
        Regex::new(r"(.*?)([^/]+?)/?(\.sfc)?(\?.*|#.*|$)").unwrap();
}

/// A resolved component reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentRef {
    /// Last path segment, used as the registration name.
    pub name: String,
    /// Full load target.
    pub url: String,
}

/// Resolve a reference into its registration name and load target.
pub fn resolve(reference: &str) -> ComponentRef {
    let Some(caps) = REFERENCE_RE.captures(reference) else {
        // Nothing but slashes: treat it as a directory.
        return ComponentRef {
            name: String::new(),
            url: format!("{}{}", reference, INDEX_DOCUMENT),
        };
    };

    let prefix = caps.get(1).map_or("", |m| m.as_str());
    let name = caps.get(2).map_or("", |m| m.as_str());
    let tail = caps.get(4).map_or("", |m| m.as_str());

    let url = match caps.get(3) {
        Some(ext) => format!("{}{}{}{}", prefix, name, ext.as_str(), tail),
        None => format!("{}{}/{}{}", prefix, name, INDEX_DOCUMENT, tail),
    };

    ComponentRef {
        name: name.to_string(),
        url,
    }
}

/// Registration name for an already resolved load target.
///
/// `ui/card/index.sfc` is named after its directory, `ui/card.sfc` after
/// the file.
pub fn component_name(url: &str) -> String {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let index_suffix = format!("/{}", INDEX_DOCUMENT);
    match path.strip_suffix(&index_suffix) {
        Some(dir) if !dir.is_empty() => resolve(dir).name,
        _ => resolve(path).name,
    }
}

/// Join a nested reference onto the referencing component's base URI.
///
/// Only `./` and `../` references are joined; anything else is already
/// absolute or rooted and is returned unchanged.
pub fn join_relative(base: &str, reference: &str) -> String {
    if is_relative(reference) {
        format!("{}{}", base, reference)
    } else {
        reference.to_string()
    }
}

/// `./x` and `../x` references.
pub fn is_relative(reference: &str) -> bool {
    reference.starts_with("./") || reference.starts_with("../")
}

/// Directory part of a fetched URL, trailing slash included.
pub fn base_uri(url: &str) -> String {
    match url.rfind('/') {
        Some(idx) => url[..=idx].to_string(),
        None => String::new(),
    }
}
