//! # Loader
//!
//! Entry points: lazy component factories, registration into a host
//! registry, and the install hook that turns `load_component` markers found
//! in component options into factories.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use serde_json::Value;

use crate::component::{Component, ComponentDefinition};
use crate::config::{CachePolicy, LoaderConfig};
use crate::error::Result;
use crate::evaluate::{ExportsHandler, IdentityExports, COMPONENT_MARKER};
use crate::fetch::{CachedFetcher, Fetcher, HttpFetcher};
use crate::head::Head;
use crate::registry::{Dependencies, LanguageProcessor, LanguageProcessors};
use crate::resolve::{component_name, join_relative, resolve};

struct LoaderInner {
    config: LoaderConfig,
    fetcher: Box<dyn Fetcher>,
    languages: LanguageProcessors,
    dependencies: Rc<RefCell<Dependencies>>,
    exports_handler: Box<dyn ExportsHandler>,
    head: Head,
    scope_counter: Cell<u64>,
}

/// Loads component documents. Cheap to clone; clones share registries,
/// head and scope counter.
#[derive(Clone)]
pub struct Loader {
    inner: Rc<LoaderInner>,
}

impl fmt::Debug for Loader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Loader")
            .field("config", &self.inner.config)
            .field("languages", &self.inner.languages)
            .field("styles", &self.inner.head.len())
            .finish()
    }
}

impl Loader {
    pub fn new(config: LoaderConfig) -> Self {
        LoaderBuilder::new(config).build()
    }

    pub fn builder() -> LoaderBuilder {
        LoaderBuilder::new(LoaderConfig::default())
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.inner.config
    }

    pub fn head(&self) -> &Head {
        &self.inner.head
    }

    pub fn languages(&self) -> &LanguageProcessors {
        &self.inner.languages
    }

    pub fn dependencies(&self) -> &Rc<RefCell<Dependencies>> {
        &self.inner.dependencies
    }

    pub fn exports_handler(&self) -> &dyn ExportsHandler {
        self.inner.exports_handler.as_ref()
    }

    /// Add or replace a named dependency visible to later evaluations.
    pub fn define(&self, name: impl Into<String>, value: Value) {
        self.inner.dependencies.borrow_mut().define(name, value);
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String> {
        self.inner.fetcher.fetch(url).await
    }

    /// Next scope attribute name: the configured prefix plus a base-36 counter.
    pub fn next_scope_id(&self) -> String {
        let n = self.inner.scope_counter.get();
        self.inner.scope_counter.set(n + 1);
        format!("{}{}", self.inner.config.scope_prefix, to_base36(n))
    }

    /// Factory for the component at `url`. Nothing is fetched until the
    /// factory is awaited.
    pub fn load(&self, url: &str, name: &str) -> ComponentFactory {
        ComponentFactory {
            loader: self.clone(),
            url: url.to_string(),
            name: name.to_string(),
        }
    }

    /// Resolve a reference, then [`Loader::load`] it.
    pub fn component(&self, reference: &str, name: Option<&str>) -> ComponentFactory {
        let resolved = resolve(reference);
        let name = name.unwrap_or(&resolved.name);
        self.load(&resolved.url, name)
    }

    /// Register the referenced component under its resolved name.
    pub fn register(&self, registry: &dyn ComponentRegistry, reference: &str) {
        let resolved = resolve(reference);
        tracing::debug!(name = %resolved.name, url = %resolved.url, "Registering component");
        registry.component(&resolved.name, self.load(&resolved.url, &resolved.name));
    }

    /// Hook the loader into a host's component creation.
    pub fn install(&self, registry: Rc<dyn ComponentRegistry>) -> LoaderPlugin {
        LoaderPlugin {
            loader: self.clone(),
            registry,
        }
    }
}

fn to_base36(mut n: u64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if n == 0 {
        return "0".to_string();
    }
    let mut out = Vec::new();
    while n > 0 {
        out.push(DIGITS[(n % 36) as usize]);
        n /= 36;
    }
    out.reverse();
    String::from_utf8_lossy(&out).into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// BUILDER
// ═══════════════════════════════════════════════════════════════════════════════

pub struct LoaderBuilder {
    config: LoaderConfig,
    fetcher: Option<Box<dyn Fetcher>>,
    languages: LanguageProcessors,
    dependencies: Dependencies,
    exports_handler: Option<Box<dyn ExportsHandler>>,
    head: Option<Head>,
}

impl LoaderBuilder {
    pub fn new(config: LoaderConfig) -> Self {
        let dependencies = config
            .dependencies
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        Self {
            config,
            fetcher: None,
            languages: LanguageProcessors::default(),
            dependencies,
            exports_handler: None,
            head: None,
        }
    }

    pub fn with_fetcher(mut self, fetcher: impl Fetcher + 'static) -> Self {
        self.fetcher = Some(Box::new(fetcher));
        self
    }

    pub fn with_language(mut self, lang: &str, processor: impl LanguageProcessor + 'static) -> Self {
        self.languages.register(lang, processor);
        self
    }

    pub fn with_dependency(mut self, name: impl Into<String>, value: Value) -> Self {
        self.dependencies.define(name, value);
        self
    }

    pub fn with_exports_handler(mut self, handler: impl ExportsHandler + 'static) -> Self {
        self.exports_handler = Some(Box::new(handler));
        self
    }

    pub fn with_head(mut self, head: Head) -> Self {
        self.head = Some(head);
        self
    }

    pub fn build(self) -> Loader {
        let config = self.config;
        let fetcher = self.fetcher.unwrap_or_else(|| {
            Box::new(HttpFetcher::new(
                config.root.clone(),
                Duration::from_millis(config.timeout_ms),
            ))
        });
        let fetcher: Box<dyn Fetcher> = match config.cache {
            CachePolicy::None => fetcher,
            CachePolicy::PerUrl => Box::new(CachedFetcher::new(fetcher)),
        };

        Loader {
            inner: Rc::new(LoaderInner {
                config,
                fetcher,
                languages: self.languages,
                dependencies: Rc::new(RefCell::new(self.dependencies)),
                exports_handler: self
                    .exports_handler
                    .unwrap_or_else(|| Box::new(IdentityExports)),
                head: self.head.unwrap_or_default(),
                scope_counter: Cell::new(0),
            }),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// FACTORIES
// ═══════════════════════════════════════════════════════════════════════════════

/// A deferred component load.
#[derive(Debug, Clone)]
pub struct ComponentFactory {
    loader: Loader,
    url: String,
    name: String,
}

impl ComponentFactory {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the full pipeline. Each call loads independently.
    pub async fn load(&self) -> Result<ComponentDefinition> {
        let loader = &self.loader;
        let mut component = Component::fetch(loader, &self.url, &self.name).await?;
        component.normalize(loader).await?;
        component.compile(loader).await?;
        let definition = component.definition();
        tracing::info!(
            url = %self.url,
            name = definition.name().unwrap_or_default(),
            scope_id = component.scope_id().unwrap_or_default(),
            "Component loaded"
        );
        Ok(definition)
    }
}

/// A host's global component registry.
pub trait ComponentRegistry {
    fn component(&self, name: &str, factory: ComponentFactory);
}

/// One entry of a component's `components` option.
#[derive(Debug, Clone)]
pub enum ComponentDecl {
    /// A string reference, possibly a `load_component` marker.
    Reference(String),
    /// Loaded on first use.
    Lazy(ComponentFactory),
    /// Registered globally under this name.
    Registered(String),
    /// Anything else, passed through.
    Inline(Value),
}

/// The parts of a host's component options the install hook looks at.
#[derive(Debug, Clone, Default)]
pub struct ComponentOptions {
    pub components: BTreeMap<String, ComponentDecl>,
    pub base_uri: Option<String>,
}

impl ComponentOptions {
    /// Options for instantiating a loaded definition. An array of
    /// components yields numeric keys.
    pub fn from_definition(definition: &ComponentDefinition) -> Self {
        let components = match definition.exports.get("components") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(key, value)| (key.clone(), ComponentDecl::from(value)))
                .collect(),
            Some(Value::Array(items)) => items
                .iter()
                .enumerate()
                .map(|(index, value)| (index.to_string(), ComponentDecl::from(value)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Self {
            components,
            base_uri: Some(definition.base_uri.clone()),
        }
    }
}

impl From<&Value> for ComponentDecl {
    fn from(value: &Value) -> Self {
        match value {
            Value::String(reference) => Self::Reference(reference.clone()),
            other => Self::Inline(other.clone()),
        }
    }
}

/// Installed loader: rewrites markers before a component is created.
pub struct LoaderPlugin {
    loader: Loader,
    registry: Rc<dyn ComponentRegistry>,
}

impl LoaderPlugin {
    pub fn before_create(&self, options: &mut ComponentOptions) {
        let base = options.base_uri.as_deref();
        for (key, decl) in options.components.iter_mut() {
            let ComponentDecl::Reference(reference) = decl else {
                continue;
            };
            let Some(target) = reference.strip_prefix(COMPONENT_MARKER) else {
                continue;
            };
            let resolved = resolve(target);
            let url = match base {
                Some(base) => join_relative(base, &resolved.url),
                None => resolved.url,
            };

            if key.parse::<usize>().is_ok() {
                let name = component_name(&url);
                self.registry
                    .component(&name, self.loader.load(&url, &name));
                *decl = ComponentDecl::Registered(name);
            } else {
                *decl = ComponentDecl::Lazy(self.loader.load(&url, key));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingRegistry {
        entries: RefCell<Vec<(String, String)>>,
    }

    impl ComponentRegistry for RecordingRegistry {
        fn component(&self, name: &str, factory: ComponentFactory) {
            self.entries
                .borrow_mut()
                .push((name.to_string(), factory.url().to_string()));
        }
    }

    fn loader() -> Loader {
        Loader::builder().with_fetcher(MemoryFetcher::new()).build()
    }

    #[test]
    fn test_scope_ids_count_in_base36() {
        let loader = loader();
        let ids: Vec<_> = (0..37).map(|_| loader.next_scope_id()).collect();
        assert_eq!(ids[0], "data-s-0");
        assert_eq!(ids[10], "data-s-a");
        assert_eq!(ids[36], "data-s-10");
    }

    #[test]
    fn test_load_is_lazy() {
        let fetcher = MemoryFetcher::new();
        let loader = Loader::builder().with_fetcher(fetcher.clone()).build();
        let factory = loader.component("ui/card", None);
        assert_eq!(factory.url(), "ui/card/index.sfc");
        assert_eq!(factory.name(), "card");
        assert!(fetcher.requests().is_empty());
    }

    #[test]
    fn test_register_uses_resolved_name() {
        let registry = RecordingRegistry::default();
        loader().register(&registry, "widgets/button");
        assert_eq!(
            registry.entries.borrow().as_slice(),
            &[("button".to_string(), "widgets/button/index.sfc".to_string())]
        );
    }

    #[test]
    fn test_before_create_rewrites_markers() {
        let registry = Rc::new(RecordingRegistry::default());
        let plugin = loader().install(registry.clone());

        let mut options = ComponentOptions {
            base_uri: Some("ui/".to_string()),
            ..Default::default()
        };
        options.components.insert(
            "child".to_string(),
            ComponentDecl::Reference("url:ui/child/index.sfc".to_string()),
        );
        options.components.insert(
            "0".to_string(),
            ComponentDecl::Reference("url:./btn.sfc".to_string()),
        );
        options.components.insert(
            "plain".to_string(),
            ComponentDecl::Reference("my-registered-thing".to_string()),
        );

        plugin.before_create(&mut options);

        match &options.components["child"] {
            ComponentDecl::Lazy(factory) => {
                assert_eq!(factory.url(), "ui/child/index.sfc");
                assert_eq!(factory.name(), "child");
            }
            other => panic!("expected lazy factory, got {:?}", other),
        }
        match &options.components["0"] {
            ComponentDecl::Registered(name) => assert_eq!(name, "btn"),
            other => panic!("expected registration, got {:?}", other),
        }
        assert!(matches!(
            &options.components["plain"],
            ComponentDecl::Reference(r) if r == "my-registered-thing"
        ));
        assert_eq!(
            registry.entries.borrow().as_slice(),
            &[("btn".to_string(), "ui/./btn.sfc".to_string())]
        );
    }

    #[test]
    fn test_before_create_resolves_directory_markers() {
        let registry = Rc::new(RecordingRegistry::default());
        let plugin = loader().install(registry.clone());

        let mut options = ComponentOptions {
            base_uri: Some("ui/".to_string()),
            ..Default::default()
        };
        options.components.insert(
            "child".to_string(),
            ComponentDecl::Reference("url:./child".to_string()),
        );
        options.components.insert(
            "0".to_string(),
            ComponentDecl::Reference("url:./btn".to_string()),
        );

        plugin.before_create(&mut options);

        match &options.components["child"] {
            ComponentDecl::Lazy(factory) => {
                assert_eq!(factory.url(), "ui/./child/index.sfc");
                assert_eq!(factory.name(), "child");
            }
            other => panic!("expected lazy factory, got {:?}", other),
        }
        assert!(matches!(&options.components["0"], ComponentDecl::Registered(name) if name == "btn"));
        assert_eq!(
            registry.entries.borrow().as_slice(),
            &[("btn".to_string(), "ui/./btn/index.sfc".to_string())]
        );
    }

    #[test]
    fn test_options_from_definition() {
        let mut exports = serde_json::Map::new();
        exports.insert("components".to_string(), json!(["url:a.sfc", { "inline": true }]));
        let definition = ComponentDefinition::new(exports, None, "x", "base/");
        let options = ComponentOptions::from_definition(&definition);
        assert_eq!(options.base_uri.as_deref(), Some("base/"));
        assert!(matches!(&options.components["0"], ComponentDecl::Reference(r) if r == "url:a.sfc"));
        assert!(matches!(&options.components["1"], ComponentDecl::Inline(_)));
    }

    #[test]
    fn test_config_dependencies_are_defined() {
        let mut config = LoaderConfig::default();
        config.dependencies.insert("version".to_string(), json!("1.0"));
        let loader = LoaderBuilder::new(config)
            .with_fetcher(MemoryFetcher::new())
            .build();
        assert_eq!(
            loader.dependencies().borrow().get("version"),
            Some(&json!("1.0"))
        );
        loader.define("extra", json!(2));
        assert_eq!(loader.dependencies().borrow().len(), 2);
    }
}
