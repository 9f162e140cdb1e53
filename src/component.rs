//! # Component Record
//!
//! One component moving through the pipeline:
//! fetched → normalized → compiled → exported.

use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dom::{split_document, stamp_root_attribute};
use crate::error::Result;
use crate::loader::Loader;
use crate::resolve::base_uri;
use crate::section::{
    normalize_section, AnySection, CompileEnv, LogicSection, MarkupSection, Section, StyleSection,
};

/// What a loaded component hands to its consumer: the exports of its logic
/// section plus `template`, `name` and `_baseURI`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Present only when the exports did not name the component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "_baseURI")]
    pub base_uri: String,
    #[serde(flatten)]
    pub exports: Map<String, Value>,
}

impl ComponentDefinition {
    pub fn new(
        mut exports: Map<String, Value>,
        template: Option<String>,
        default_name: &str,
        base_uri: &str,
    ) -> Self {
        exports.remove("_baseURI");
        if template.is_some() {
            exports.remove("template");
        }
        let name = if exports.contains_key("name") {
            None
        } else {
            Some(default_name.to_string())
        };

        Self {
            template,
            name,
            base_uri: base_uri.to_string(),
            exports,
        }
    }

    /// Component name, from the exports when they carry a string `name`.
    pub fn name(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or_else(|| self.exports.get("name").and_then(Value::as_str))
    }

    /// Markup, from the markup section or a string `template` export.
    pub fn template(&self) -> Option<&str> {
        self.template
            .as_deref()
            .or_else(|| self.exports.get("template").and_then(Value::as_str))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// A component document split into its sections.
#[derive(Debug)]
pub struct Component {
    url: String,
    name: String,
    base_uri: String,
    document: String,
    template: Option<MarkupSection>,
    script: Option<LogicSection>,
    styles: Vec<StyleSection>,
    scope_id: Option<String>,
}

impl Component {
    /// Split an already fetched document. Of several markup or logic
    /// sections the last one wins; styles accumulate.
    pub fn from_document(url: &str, name: &str, text: &str) -> Self {
        let document = text.replace("\r\n", "\n").replace('\r', "\n");

        let mut template = None;
        let mut script = None;
        let mut styles = Vec::new();
        for raw in split_document(&document) {
            match AnySection::from(raw) {
                AnySection::Markup(section) => template = Some(section),
                AnySection::Logic(section) => script = Some(section),
                AnySection::Style(section) => styles.push(section),
            }
        }

        Self {
            url: url.to_string(),
            name: name.to_string(),
            base_uri: base_uri(url),
            document,
            template,
            script,
            styles,
            scope_id: None,
        }
    }

    /// Fetch `url` and split it.
    pub async fn fetch(loader: &Loader, url: &str, name: &str) -> Result<Self> {
        let text = loader.fetch_text(url).await?;
        let component = Self::from_document(url, name, &text);
        tracing::debug!(
            url,
            template = component.template.is_some(),
            script = component.script.is_some(),
            styles = component.styles.len(),
            "Component fetched"
        );
        Ok(component)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_uri(&self) -> &str {
        &self.base_uri
    }

    pub fn template(&self) -> Option<&str> {
        self.template.as_ref().map(|t| t.content())
    }

    pub fn script(&self) -> Option<&LogicSection> {
        self.script.as_ref()
    }

    pub fn styles(&self) -> &[StyleSection] {
        &self.styles
    }

    pub fn scope_id(&self) -> Option<&str> {
        self.scope_id.as_deref()
    }

    /// Resolve `src` and `lang` on every section concurrently.
    pub async fn normalize(&mut self, loader: &Loader) -> Result<()> {
        let sections = sections_mut(&mut self.template, &mut self.script, &mut self.styles);
        let base = self.base_uri.as_str();
        try_join_all(
            sections
                .into_iter()
                .map(|section| normalize_section(loader, base, section)),
        )
        .await?;
        Ok(())
    }

    /// Assign the scope identifier and stamp it onto the markup root.
    /// Runs at most once per component.
    fn assign_scope_id(&mut self, loader: &Loader) {
        if self.scope_id.is_some() {
            return;
        }
        let scope_id = loader.next_scope_id();
        if let Some(template) = self.template.as_mut() {
            match stamp_root_attribute(template.content(), &scope_id) {
                Some(stamped) => template.set_content(stamped),
                None => tracing::warn!(
                    url = %self.url,
                    scope_id = %scope_id,
                    "Markup has no element to carry the scope attribute"
                ),
            }
        }
        self.scope_id = Some(scope_id);
    }

    /// Compile the logic section, then markup and styles concurrently.
    /// Styles inserted by a compile that fails are removed from the head.
    pub async fn compile(&mut self, loader: &Loader) -> Result<()> {
        let has_template = self.template.is_some();
        if has_template && self.styles.iter().any(StyleSection::is_scoped) {
            self.assign_scope_id(loader);
        }

        let env = CompileEnv {
            loader,
            url: &self.url,
            base_uri: &self.base_uri,
            document: &self.document,
            scope_id: self.scope_id.as_deref(),
            has_template,
        };

        if let Some(script) = self.script.as_mut() {
            script.compile(&env).await?;
        }

        let mut sections: Vec<&mut dyn Section> = Vec::new();
        if let Some(template) = self.template.as_mut() {
            sections.push(template);
        }
        for style in self.styles.iter_mut() {
            sections.push(style);
        }
        let compiled = try_join_all(sections.into_iter().map(|section| section.compile(&env))).await;
        if let Err(err) = compiled {
            for style in self.styles.iter_mut() {
                if let Some(element) = style.take_element() {
                    loader.head().remove(&element);
                }
            }
            tracing::debug!(url = %self.url, error = %err, "Compile failed, inserted styles removed");
            return Err(err);
        }
        Ok(())
    }

    /// Assemble the definition from the compiled sections.
    pub fn definition(&mut self) -> ComponentDefinition {
        let exports = self
            .script
            .as_mut()
            .and_then(LogicSection::take_exports)
            .unwrap_or_default();
        let template = self.template.as_ref().map(|t| t.content().to_string());
        ComponentDefinition::new(exports, template, &self.name, &self.base_uri)
    }
}

fn sections_mut<'a>(
    template: &'a mut Option<MarkupSection>,
    script: &'a mut Option<LogicSection>,
    styles: &'a mut [StyleSection],
) -> Vec<&'a mut dyn Section> {
    let mut sections: Vec<&'a mut dyn Section> = Vec::new();
    if let Some(template) = template.as_mut() {
        sections.push(template);
    }
    if let Some(script) = script.as_mut() {
        sections.push(script);
    }
    for style in styles.iter_mut() {
        sections.push(style);
    }
    sections
}
