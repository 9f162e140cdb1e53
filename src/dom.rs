//! Document splitting on top of html5ever.
//!
//! A component document is parsed the way a browser parses `innerHTML` of a
//! `<body>`: as a fragment. Only its immediate `<template>`, `<script>` and
//! `<style>` children are kept; everything else at the top level is ignored.

use std::io;

use html5ever::serialize::{serialize, Serialize, SerializeOpts, Serializer, TraversalScope};
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{parse_fragment, Attribute, LocalName, Namespace, QualName};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

const HTML_NAMESPACE: &str = "http://www.w3.org/1999/xhtml";

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTES
// ═══════════════════════════════════════════════════════════════════════════════

/// Ordered attribute list of a section element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes(Vec<(String, String)>);

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.iter().any(|(key, _)| key == name)
    }

    /// Set or replace an attribute.
    pub fn set(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(key, _)| key == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.0.push((name.to_string(), value.to_string())),
        }
    }

    /// Remove an attribute, returning its value.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let idx = self.0.iter().position(|(key, _)| key == name)?;
        Some(self.0.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Attributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RAW SECTIONS
// ═══════════════════════════════════════════════════════════════════════════════

/// Which part of a component a top-level element holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionKind {
    Markup,
    Logic,
    Style,
}

impl SectionKind {
    fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "template" => Some(Self::Markup),
            "script" => Some(Self::Logic),
            "style" => Some(Self::Style),
            _ => None,
        }
    }
}

/// A recognized top-level element, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSection {
    pub kind: SectionKind,
    pub attributes: Attributes,
    /// Inner HTML for markup, text content for logic and style.
    pub content: String,
}

fn html_name(local: &str) -> QualName {
    QualName::new(None, Namespace::from(HTML_NAMESPACE), LocalName::from(local))
}

fn parse_as_fragment(text: &str, context: &str) -> RcDom {
    parse_fragment(RcDom::default(), Default::default(), html_name(context), vec![]).one(text)
}

/// Children of the synthetic `<html>` root html5ever builds for fragments.
fn fragment_root(dom: &RcDom) -> Option<Handle> {
    let document = dom.document.children.borrow();
    document
        .iter()
        .find(|node| matches!(node.data, NodeData::Element { .. }))
        .cloned()
}

/// Split a component document into its recognized sections, in document order.
pub fn split_document(text: &str) -> Vec<RawSection> {
    let dom = parse_as_fragment(text, "body");
    let Some(root) = fragment_root(&dom) else {
        return Vec::new();
    };

    let mut sections = Vec::new();
    for child in root.children.borrow().iter() {
        let NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } = &child.data
        else {
            continue;
        };
        let Some(kind) = SectionKind::from_tag(&name.local) else {
            continue;
        };

        let attributes = attrs
            .borrow()
            .iter()
            .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
            .collect();

        let content = match kind {
            SectionKind::Markup => {
                let contents = template_contents.borrow();
                inner_html(contents.as_ref().unwrap_or(child))
            }
            SectionKind::Logic | SectionKind::Style => text_content(child),
        };

        sections.push(RawSection {
            kind,
            attributes,
            content,
        });
    }
    sections
}

fn text_content(node: &Handle) -> String {
    let mut text = String::new();
    for child in node.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => text.push_str(&contents.borrow()),
            NodeData::Element { .. } => text.push_str(&text_content(child)),
            _ => {}
        }
    }
    text
}

// ═══════════════════════════════════════════════════════════════════════════════
// SERIALIZATION
// ═══════════════════════════════════════════════════════════════════════════════

/// Serializes a node's children, descending into `<template>` contents that
/// html5ever keeps outside the regular child list.
struct InnerHtml<'a>(&'a Handle);

impl Serialize for InnerHtml<'_> {
    fn serialize<S: Serializer>(&self, serializer: &mut S, _: TraversalScope) -> io::Result<()> {
        for child in self.0.children.borrow().iter() {
            write_node(serializer, child)?;
        }
        Ok(())
    }
}

fn write_node<S: Serializer>(serializer: &mut S, node: &Handle) -> io::Result<()> {
    match &node.data {
        NodeData::Element {
            name,
            attrs,
            template_contents,
            ..
        } => {
            let attrs = attrs.borrow();
            serializer.start_elem(
                name.clone(),
                attrs.iter().map(|attr| (&attr.name, &attr.value[..])),
            )?;
            let contents = template_contents.borrow();
            let holder = contents.as_ref().unwrap_or(node);
            for child in holder.children.borrow().iter() {
                write_node(serializer, child)?;
            }
            serializer.end_elem(name.clone())
        }
        NodeData::Text { contents } => serializer.write_text(&contents.borrow()),
        NodeData::Comment { contents } => serializer.write_comment(contents),
        NodeData::Doctype { name, .. } => serializer.write_doctype(name),
        NodeData::ProcessingInstruction { target, contents } => {
            serializer.write_processing_instruction(target, contents)
        }
        NodeData::Document => Ok(()),
    }
}

fn inner_html(node: &Handle) -> String {
    let mut out = Vec::new();
    if serialize(&mut out, &InnerHtml(node), SerializeOpts::default()).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ═══════════════════════════════════════════════════════════════════════════════
// ROOT ELEMENT
// ═══════════════════════════════════════════════════════════════════════════════

/// Add an empty attribute to the first element of a markup fragment.
///
/// Returns the re-serialized markup, or `None` when the fragment has no
/// element to carry the attribute.
pub fn stamp_root_attribute(markup: &str, attribute: &str) -> Option<String> {
    let dom = parse_as_fragment(markup, "template");
    let root = fragment_root(&dom)?;

    let first = root
        .children
        .borrow()
        .iter()
        .find(|node| matches!(node.data, NodeData::Element { .. }))
        .cloned()?;

    if let NodeData::Element { attrs, .. } = &first.data {
        let mut attrs = attrs.borrow_mut();
        if !attrs.iter().any(|attr| &*attr.name.local == attribute) {
            attrs.push(Attribute {
                name: QualName::new(None, Namespace::from(""), LocalName::from(attribute)),
                value: StrTendril::new(),
            });
        }
    }

    Some(inner_html(&root))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_recognizes_sections() {
        let doc = r#"<template><p>hi</p></template>
<script lang="lua">exports.name = "x"</script>
<style scoped>.a { color: red }</style>
<style>.b { color: blue }</style>"#;

        let sections = split_document(doc);
        let kinds: Vec<_> = sections.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SectionKind::Markup,
                SectionKind::Logic,
                SectionKind::Style,
                SectionKind::Style
            ]
        );
        assert_eq!(sections[0].content, "<p>hi</p>");
        assert_eq!(sections[1].content, "exports.name = \"x\"");
        assert_eq!(sections[1].attributes.get("lang"), Some("lua"));
        assert!(sections[2].attributes.contains("scoped"));
        assert_eq!(sections[3].content, ".b { color: blue }");
    }

    #[test]
    fn test_split_ignores_other_top_level_nodes() {
        let doc = "<!-- note --><div>ignored</div>text<template><b>x</b></template>";
        let sections = split_document(doc);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].content, "<b>x</b>");
    }

    #[test]
    fn test_split_keeps_nested_template_contents() {
        let doc = "<template><ul><template><li>a</li></template></ul></template>";
        let sections = split_document(doc);
        assert_eq!(sections.len(), 1);
        assert!(sections[0].content.contains("<li>a</li>"));
    }

    #[test]
    fn test_script_text_is_raw() {
        let doc = "<script>if a < b then x = '&amp;' end</script>";
        let sections = split_document(doc);
        assert_eq!(sections[0].content, "if a < b then x = '&amp;' end");
    }

    #[test]
    fn test_stamp_root_attribute() {
        let stamped = stamp_root_attribute("\n  <div class=\"card\"><span>x</span></div>\n", "data-s-0")
            .unwrap();
        assert!(stamped.contains("<div class=\"card\" data-s-0=\"\">"));
        assert!(stamped.contains("<span>x</span>"));
    }

    #[test]
    fn test_stamp_without_element() {
        assert_eq!(stamp_root_attribute("just text", "data-s-0"), None);
    }

    #[test]
    fn test_attributes() {
        let mut attrs: Attributes = vec![("src", "./a.lua"), ("lang", "LUA")]
            .into_iter()
            .collect();
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs.remove("src").as_deref(), Some("./a.lua"));
        assert!(!attrs.contains("src"));
        attrs.set("lang", "lua");
        assert_eq!(attrs.get("lang"), Some("lua"));
    }
}
