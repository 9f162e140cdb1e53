//! Language processors and named dependencies.

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::error::{LoaderError, Result};

/// Transforms a section's content declared with `lang="..."`.
pub trait LanguageProcessor {
    fn process(&self, source: &str) -> Result<String>;
}

impl<F> LanguageProcessor for F
where
    F: Fn(&str) -> Result<String>,
{
    fn process(&self, source: &str) -> Result<String> {
        self(source)
    }
}

fn identity(source: &str) -> Result<String> {
    Ok(source.to_string())
}

/// Case-insensitive registry of language processors.
#[derive(Clone)]
pub struct LanguageProcessors {
    processors: HashMap<String, Rc<dyn LanguageProcessor>>,
}

impl Default for LanguageProcessors {
    fn default() -> Self {
        let mut registry = Self {
            processors: HashMap::new(),
        };
        registry.register("html", identity);
        registry.register("lua", identity);
        registry.register("css", identity);
        registry
    }
}

impl fmt::Debug for LanguageProcessors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut langs: Vec<_> = self.processors.keys().collect();
        langs.sort();
        f.debug_struct("LanguageProcessors")
            .field("langs", &langs)
            .finish()
    }
}

impl LanguageProcessors {
    /// Registry holding the identity processors for `html`, `lua` and `css`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no processors at all.
    pub fn empty() -> Self {
        Self {
            processors: HashMap::new(),
        }
    }

    pub fn register(&mut self, lang: &str, processor: impl LanguageProcessor + 'static) {
        self.processors
            .insert(lang.to_ascii_lowercase(), Rc::new(processor));
    }

    pub fn get(&self, lang: &str) -> Result<Rc<dyn LanguageProcessor>> {
        self.processors
            .get(&lang.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| LoaderError::UnrecognizedLanguage {
                lang: lang.to_string(),
            })
    }

    /// Run the processor registered for `lang`.
    pub fn process(&self, lang: &str, source: &str) -> Result<String> {
        self.get(lang)?.process(source)
    }
}

/// Values a logic section can pull in with `require(name)`.
#[derive(Debug, Clone, Default)]
pub struct Dependencies {
    values: HashMap<String, Value>,
}

impl Dependencies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl FromIterator<(String, Value)> for Dependencies {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
