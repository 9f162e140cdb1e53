//! Component sections: normalization and compilation.

use std::rc::Rc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::css::rebase_urls;
use crate::dom::{Attributes, RawSection, SectionKind};
use crate::error::Result;
use crate::evaluate::{evaluate, ScriptContext};
use crate::head::{scope_styles, StyleElement};
use crate::loader::Loader;
use crate::resolve::join_relative;

/// Everything a section needs from its component while compiling.
pub struct CompileEnv<'a> {
    pub loader: &'a Loader,
    pub url: &'a str,
    pub base_uri: &'a str,
    /// Full component document, line endings normalized.
    pub document: &'a str,
    /// Set when the component has scoped styles and a markup section.
    pub scope_id: Option<&'a str>,
    pub has_template: bool,
}

#[async_trait(?Send)]
pub trait Section {
    fn kind(&self) -> SectionKind;
    fn attributes(&self) -> &Attributes;
    fn attributes_mut(&mut self) -> &mut Attributes;
    fn content(&self) -> &str;
    fn set_content(&mut self, content: String);
    async fn compile(&mut self, env: &CompileEnv<'_>) -> Result<()>;
}

/// Resolve `src` and `lang` on one section.
///
/// `src` is fetched relative to the component, then `lang` runs its
/// processor over the fetched text (or the inline content). Both
/// attributes are consumed.
pub async fn normalize_section(
    loader: &Loader,
    base_uri: &str,
    section: &mut dyn Section,
) -> Result<()> {
    let src = section.attributes_mut().remove("src");
    let fetched = match src {
        Some(src) => {
            let target = join_relative(base_uri, &src);
            tracing::debug!(kind = ?section.kind(), src = %target, "Fetching section source");
            Some(loader.fetch_text(&target).await?)
        }
        None => None,
    };

    let lang = section.attributes_mut().remove("lang");
    let processed = match lang {
        Some(lang) => {
            let source = fetched.as_deref().unwrap_or(section.content());
            Some(loader.languages().process(&lang, source)?)
        }
        None => fetched,
    };

    if let Some(content) = processed {
        section.set_content(content);
    }
    Ok(())
}

// ═══════════════════════════════════════════════════════════════════════════════
// MARKUP
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct MarkupSection {
    attributes: Attributes,
    content: String,
}

impl MarkupSection {
    pub fn new(attributes: Attributes, content: String) -> Self {
        Self {
            attributes,
            content,
        }
    }
}

#[async_trait(?Send)]
impl Section for MarkupSection {
    fn kind(&self) -> SectionKind {
        SectionKind::Markup
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }

    async fn compile(&mut self, _env: &CompileEnv<'_>) -> Result<()> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// LOGIC
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct LogicSection {
    attributes: Attributes,
    content: String,
    exports: Option<Map<String, Value>>,
}

impl LogicSection {
    pub fn new(attributes: Attributes, content: String) -> Self {
        Self {
            attributes,
            content,
            exports: None,
        }
    }

    /// Exports produced by the last successful compile.
    pub fn exports(&self) -> Option<&Map<String, Value>> {
        self.exports.as_ref()
    }

    pub fn take_exports(&mut self) -> Option<Map<String, Value>> {
        self.exports.take()
    }
}

#[async_trait(?Send)]
impl Section for LogicSection {
    fn kind(&self) -> SectionKind {
        SectionKind::Logic
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }

    async fn compile(&mut self, env: &CompileEnv<'_>) -> Result<()> {
        let ctx = ScriptContext {
            url: env.url,
            base_uri: env.base_uri,
            document: env.document,
            dependencies: env.loader.dependencies(),
        };
        let exports = evaluate(&self.content, &ctx, env.loader.exports_handler()).await?;
        self.exports = Some(exports);
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STYLE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default)]
pub struct StyleSection {
    attributes: Attributes,
    content: String,
    element: Option<Rc<StyleElement>>,
}

impl StyleSection {
    pub fn new(attributes: Attributes, content: String) -> Self {
        Self {
            attributes,
            content,
            element: None,
        }
    }

    pub fn is_scoped(&self) -> bool {
        self.attributes.contains("scoped")
    }

    /// Head element inserted by compile, if the style was not skipped.
    pub fn element(&self) -> Option<&Rc<StyleElement>> {
        self.element.as_ref()
    }

    pub fn take_element(&mut self) -> Option<Rc<StyleElement>> {
        self.element.take()
    }
}

#[async_trait(?Send)]
impl Section for StyleSection {
    fn kind(&self) -> SectionKind {
        SectionKind::Style
    }

    fn attributes(&self) -> &Attributes {
        &self.attributes
    }

    fn attributes_mut(&mut self) -> &mut Attributes {
        &mut self.attributes
    }

    fn content(&self) -> &str {
        &self.content
    }

    fn set_content(&mut self, content: String) {
        self.content = content;
    }

    async fn compile(&mut self, env: &CompileEnv<'_>) -> Result<()> {
        let scoped = self.attributes.remove("scoped").is_some();
        if scoped && !env.has_template {
            tracing::debug!(url = env.url, "Scoped style without markup skipped");
            return Ok(());
        }

        let text = rebase_urls(&self.content, env.base_uri);
        let element = env
            .loader
            .head()
            .append_style(self.attributes.clone(), text, env.url);
        self.element = Some(Rc::clone(&element));

        if scoped {
            if let Some(scope_id) = env.scope_id {
                scope_styles(&element, &format!("[{}]", scope_id)).await?;
            }
        }
        Ok(())
    }
}

/// Build the typed section for a raw split result.
pub enum AnySection {
    Markup(MarkupSection),
    Logic(LogicSection),
    Style(StyleSection),
}

impl From<RawSection> for AnySection {
    fn from(raw: RawSection) -> Self {
        match raw.kind {
            SectionKind::Markup => Self::Markup(MarkupSection::new(raw.attributes, raw.content)),
            SectionKind::Logic => Self::Logic(LogicSection::new(raw.attributes, raw.content)),
            SectionKind::Style => Self::Style(StyleSection::new(raw.attributes, raw.content)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::MemoryFetcher;
    use crate::head::Head;
    use crate::error::LoaderError;

    fn loader_with(fetcher: MemoryFetcher) -> Loader {
        Loader::builder().with_fetcher(fetcher).build()
    }

    fn env<'a>(loader: &'a Loader, scope_id: Option<&'a str>, has_template: bool) -> CompileEnv<'a> {
        CompileEnv {
            loader,
            url: "ui/card/index.sfc",
            base_uri: "ui/card/",
            document: "",
            scope_id,
            has_template,
        }
    }

    #[tokio::test]
    async fn test_normalize_fetches_src_relative_to_component() {
        let fetcher = MemoryFetcher::new().with_document("ui/card/./logic.lua", "exports.x = 1");
        let loader = loader_with(fetcher.clone());
        let attrs: Attributes = vec![("src", "./logic.lua")].into_iter().collect();
        let mut section = LogicSection::new(attrs, String::new());

        normalize_section(&loader, "ui/card/", &mut section).await.unwrap();
        assert_eq!(section.content(), "exports.x = 1");
        assert!(!section.attributes().contains("src"));
        assert_eq!(fetcher.requests(), vec!["ui/card/./logic.lua".to_string()]);
    }

    #[tokio::test]
    async fn test_normalize_runs_language_processor() {
        let loader = Loader::builder()
            .with_fetcher(MemoryFetcher::new())
            .with_language("shout", |s: &str| -> Result<String> { Ok(s.to_uppercase()) })
            .build();
        let attrs: Attributes = vec![("lang", "SHOUT")].into_iter().collect();
        let mut section = MarkupSection::new(attrs, "<p>hi</p>".to_string());

        normalize_section(&loader, "", &mut section).await.unwrap();
        assert_eq!(section.content(), "<P>HI</P>");
        assert!(section.attributes().is_empty());
    }

    #[tokio::test]
    async fn test_normalize_unknown_language() {
        let loader = loader_with(MemoryFetcher::new());
        let attrs: Attributes = vec![("lang", "sass")].into_iter().collect();
        let mut section = StyleSection::new(attrs, "a{}".to_string());
        let err = normalize_section(&loader, "", &mut section).await.unwrap_err();
        assert!(matches!(err, LoaderError::UnrecognizedLanguage { .. }));
    }

    #[tokio::test]
    async fn test_scoped_style_is_scoped_and_unmarked() {
        let head = Head::new();
        let loader = Loader::builder()
            .with_fetcher(MemoryFetcher::new())
            .with_head(head.clone())
            .build();
        let attrs: Attributes = vec![("scoped", ""), ("media", "screen")].into_iter().collect();
        let mut section = StyleSection::new(attrs, ".btn { color: red }".to_string());

        section.compile(&env(&loader, Some("data-s-0"), true)).await.unwrap();
        let element = section.element().unwrap();
        assert!(!element.attributes().contains("scoped"));
        assert_eq!(element.attributes().get("media"), Some("screen"));
        assert!(element.css_text().starts_with("[data-s-0] .btn,.btn[data-s-0]"));
        assert_eq!(head.len(), 1);
    }

    #[tokio::test]
    async fn test_scoped_style_without_markup_is_skipped() {
        let head = Head::new();
        let loader = Loader::builder()
            .with_fetcher(MemoryFetcher::new())
            .with_head(head.clone())
            .build();
        let attrs: Attributes = vec![("scoped", "")].into_iter().collect();
        let mut section = StyleSection::new(attrs, ".a{}".to_string());

        section.compile(&env(&loader, None, false)).await.unwrap();
        assert!(section.element().is_none());
        assert!(head.is_empty());
    }

    #[tokio::test]
    async fn test_plain_style_rebases_urls() {
        let head = Head::new();
        let loader = Loader::builder()
            .with_fetcher(MemoryFetcher::new())
            .with_head(head.clone())
            .build();
        let mut section = StyleSection::new(Attributes::new(), ".a { background: url(./bg.png) }".to_string());

        section.compile(&env(&loader, None, false)).await.unwrap();
        assert_eq!(
            head.styles()[0].text(),
            ".a { background: url(ui/card/./bg.png) }"
        );
    }
}
