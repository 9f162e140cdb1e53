//! Style sheet model and selector scoping.
//!
//! The rule list is parsed only as deep as scoping needs: top-level style
//! rules are split into selector text and declaration block, everything else
//! (at-rules, their nested blocks) is kept verbatim.

use lazy_static::lazy_static;
use regex::Regex;

use crate::resolve::join_relative;

lazy_static! {
    static ref CSS_URL_RE: Regex =
        Regex::new(r#"url\(\s*(['"]?)([^'")]+)(['"]?)\s*\)"#).unwrap();
    static ref IMPORT_RE: Regex =
        Regex::new(r#"@import\s+(['"])([^'"]+)(['"])"#).unwrap();
}

/// One top-level rule of a style sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CssRule {
    /// `selector { declarations }`
    Style {
        selector: String,
        declarations: String,
    },
    /// At-rules and anything else, kept as written.
    Other(String),
}

impl CssRule {
    pub fn css_text(&self) -> String {
        match self {
            Self::Style {
                selector,
                declarations,
            } => format!("{} {{{}}}", selector, declarations),
            Self::Other(text) => text.clone(),
        }
    }

    pub fn is_style(&self) -> bool {
        matches!(self, Self::Style { .. })
    }
}

/// Parsed rule list of an inserted style element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSheet {
    rules: Vec<CssRule>,
}

impl StyleSheet {
    pub fn parse(text: &str) -> Self {
        Self {
            rules: parse_rules(text),
        }
    }

    pub fn rules(&self) -> &[CssRule] {
        &self.rules
    }

    /// Replace the rule at `index`, keeping its position in the list.
    pub fn replace_rule(&mut self, index: usize, rule: CssRule) {
        if let Some(slot) = self.rules.get_mut(index) {
            *slot = rule;
        }
    }

    pub fn css_text(&self) -> String {
        self.rules
            .iter()
            .map(CssRule::css_text)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// RULE PARSING
// ═══════════════════════════════════════════════════════════════════════════════

fn strip_comments(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("/*") {
        out.push_str(&rest[..start]);
        match rest[start + 2..].find("*/") {
            Some(end) => rest = &rest[start + 2 + end + 2..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Index just past the block closing the `{` at `open`, honoring strings.
fn find_block_end(bytes: &[u8], open: usize) -> usize {
    let mut depth = 0usize;
    let mut i = open;
    let mut quote: Option<u8> = None;
    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' => quote = Some(b),
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        return i + 1;
                    }
                }
                _ => {}
            }
        }
        i += 1;
    }
    bytes.len()
}

/// Split style sheet text into top-level rules.
pub fn parse_rules(text: &str) -> Vec<CssRule> {
    let source = strip_comments(text);
    let bytes = source.as_bytes();
    let mut rules = Vec::new();
    let mut start = 0;
    let mut i = 0;
    let mut quote: Option<u8> = None;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == b'\\' {
                i += 2;
                continue;
            }
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }

        match b {
            b'"' | b'\'' => quote = Some(b),
            b';' if source[start..i].trim_start().starts_with('@') => {
                // Statement at-rule: @import, @charset, @namespace
                rules.push(CssRule::Other(source[start..=i].trim().to_string()));
                start = i + 1;
            }
            b'{' => {
                let end = find_block_end(bytes, i);
                let prelude = source[start..i].trim();
                if prelude.starts_with('@') {
                    rules.push(CssRule::Other(source[start..end].trim().to_string()));
                } else if !prelude.is_empty() {
                    let inner_end = end.saturating_sub(1).max(i + 1);
                    rules.push(CssRule::Style {
                        selector: prelude.to_string(),
                        declarations: source[i + 1..inner_end].to_string(),
                    });
                }
                start = end;
                i = end;
                continue;
            }
            _ => {}
        }
        i += 1;
    }

    rules
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPING
// ═══════════════════════════════════════════════════════════════════════════════

/// Index just past the escape sequence starting at the backslash at `i`.
/// Hex escapes take up to six digits and one trailing whitespace.
fn escape_end(bytes: &[u8], i: usize) -> usize {
    let mut j = i + 1;
    let hex_start = j;
    while j < bytes.len() && j - hex_start < 6 && bytes[j].is_ascii_hexdigit() {
        j += 1;
    }
    if j == hex_start {
        return (j + 1).min(bytes.len());
    }
    if j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    j
}

/// Walk `selector` at nesting depth zero, outside strings and escapes,
/// stopping at the first byte `stop` accepts.
fn scan_top_level(selector: &str, mut stop: impl FnMut(u8) -> bool) -> Option<usize> {
    let bytes = selector.as_bytes();
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if b == b'\\' {
            i = escape_end(bytes, i);
            continue;
        }
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
        } else {
            match b {
                b'"' | b'\'' => quote = Some(b),
                b'(' | b'[' => depth += 1,
                b')' | b']' => depth = depth.saturating_sub(1),
                _ if depth == 0 && stop(b) => return Some(i),
                _ => {}
            }
        }
        i += 1;
    }
    None
}

/// Split a selector list at its top-level commas; commas inside `:is()`,
/// `:not()`, attribute values and strings stay with their selector.
fn split_selector_list(selector_text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0;
    let mut rest = selector_text;
    while let Some(comma) = scan_top_level(rest, |b| b == b',') {
        parts.push(&selector_text[start..start + comma]);
        start += comma + 1;
        rest = &selector_text[start..];
    }
    parts.push(&selector_text[start..]);
    parts.into_iter().map(str::trim).filter(|s| !s.is_empty()).collect()
}

/// Rewrite one selector into its two scoped variants: descendant of the
/// scoped root, and the scoped root itself.
fn scope_selector(selector: &str, scope: &str) -> [String; 2] {
    let descendant = format!("{} {}", scope, selector);

    let head_end = scan_top_level(selector, |b| {
        b.is_ascii_whitespace() || matches!(b, b':' | b'>' | b'+' | b'~')
    })
    .unwrap_or(selector.len());
    let same_node = format!("{}{}{}", &selector[..head_end], scope, &selector[head_end..]);

    [descendant, same_node]
}

/// Rewrite a comma-separated selector list for `scope` (an attribute selector).
pub fn scope_selector_list(selector_text: &str, scope: &str) -> String {
    split_selector_list(selector_text.trim())
        .into_iter()
        .flat_map(|s| scope_selector(s, scope))
        .collect::<Vec<_>>()
        .join(",")
}

/// Scope every top-level style rule of `sheet` in place.
pub fn scope_rules(sheet: &mut StyleSheet, scope: &str) {
    for index in 0..sheet.rules().len() {
        let CssRule::Style {
            selector,
            declarations,
        } = &sheet.rules()[index]
        else {
            continue;
        };
        let rewritten = CssRule::Style {
            selector: scope_selector_list(selector, scope),
            declarations: declarations.clone(),
        };
        sheet.replace_rule(index, rewritten);
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BASE URI
// ═══════════════════════════════════════════════════════════════════════════════

/// Rebase relative `url(...)` and `@import` targets onto the component's
/// base URI, so they resolve against the component rather than the page.
pub fn rebase_urls(css: &str, base_uri: &str) -> String {
    if base_uri.is_empty() {
        return css.to_string();
    }

    let rebased = CSS_URL_RE.replace_all(css, |caps: &regex::Captures| {
        let open = &caps[1];
        let target = caps[2].trim();
        let close = &caps[3];
        format!("url({}{}{})", open, join_relative(base_uri, target), close)
    });

    IMPORT_RE
        .replace_all(&rebased, |caps: &regex::Captures| {
            format!(
                "@import {}{}{}",
                &caps[1],
                join_relative(base_uri, &caps[2]),
                &caps[3]
            )
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_single_selector() {
        assert_eq!(
            scope_selector_list(".btn", "[data-s-0]"),
            "[data-s-0] .btn,.btn[data-s-0]"
        );
    }

    #[test]
    fn test_scope_selector_list() {
        assert_eq!(
            scope_selector_list("h1 , .title > span", "[data-s-1]"),
            "[data-s-1] h1,h1[data-s-1],[data-s-1] .title > span,.title[data-s-1] > span"
        );
    }

    #[test]
    fn test_scope_pseudo_selectors() {
        assert_eq!(
            scope_selector_list("a:hover", "[s]"),
            "[s] a:hover,a[s]:hover"
        );
        assert_eq!(
            scope_selector_list(":root", "[s]"),
            "[s] :root,[s]:root"
        );
    }

    #[test]
    fn test_scope_attribute_and_escaped_selectors() {
        assert_eq!(
            scope_selector_list("[data-x=\"a b\"]", "[s]"),
            "[s] [data-x=\"a b\"],[data-x=\"a b\"][s]"
        );
        assert_eq!(
            scope_selector_list("a[href^=\"http:\"] > b", "[s]"),
            "[s] a[href^=\"http:\"] > b,a[href^=\"http:\"][s] > b"
        );
        assert_eq!(
            scope_selector_list(".md\\:flex:hover", "[s]"),
            "[s] .md\\:flex:hover,.md\\:flex[s]:hover"
        );
        assert_eq!(
            scope_selector_list(".\\31 0 span", "[s]"),
            "[s] .\\31 0 span,.\\31 0[s] span"
        );
    }

    #[test]
    fn test_scope_keeps_functional_pseudo_arguments_together() {
        assert_eq!(
            scope_selector_list(":not(.a, .b)", "[s]"),
            "[s] :not(.a, .b),[s]:not(.a, .b)"
        );
        assert_eq!(
            scope_selector_list("li:is(.x, .y), p", "[s]"),
            "[s] li:is(.x, .y),li[s]:is(.x, .y),[s] p,p[s]"
        );
    }

    #[test]
    fn test_split_selector_list() {
        assert_eq!(
            split_selector_list(" a , [t=\",\"] ,, b:not(c, d) "),
            vec!["a", "[t=\",\"]", "b:not(c, d)"]
        );
    }

    #[test]
    fn test_parse_rules() {
        let rules = parse_rules(
            "/* c */ @import 'x.css';\n.a { color: red }\n@media (max-width: 10px) { .b { color: blue } }\n.c{content:\"}\"}",
        );
        assert_eq!(rules.len(), 4);
        assert_eq!(rules[0], CssRule::Other("@import 'x.css';".to_string()));
        assert_eq!(
            rules[1],
            CssRule::Style {
                selector: ".a".to_string(),
                declarations: " color: red ".to_string(),
            }
        );
        assert!(matches!(&rules[2], CssRule::Other(t) if t.starts_with("@media")));
        assert_eq!(
            rules[3],
            CssRule::Style {
                selector: ".c".to_string(),
                declarations: "content:\"}\"".to_string(),
            }
        );
    }

    #[test]
    fn test_scope_rules_keeps_order_and_at_rules() {
        let mut sheet = StyleSheet::parse(".a { x: 1 }\n@media print { .b { y: 2 } }\n.c, .d { z: 3 }");
        scope_rules(&mut sheet, "[data-s-2]");
        let rules = sheet.rules();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[0].css_text(), "[data-s-2] .a,.a[data-s-2] { x: 1 }");
        assert!(!rules[1].is_style());
        assert_eq!(
            rules[2].css_text(),
            "[data-s-2] .c,.c[data-s-2],[data-s-2] .d,.d[data-s-2] { z: 3 }"
        );
    }

    #[test]
    fn test_rebase_urls() {
        let css = ".a { background: url('./img/a.png') } .b { background: url(/abs.png) } @import \"../theme.css\";";
        let out = rebase_urls(css, "https://h/ui/");
        assert!(out.contains("url('https://h/ui/./img/a.png')"));
        assert!(out.contains("url(/abs.png)"));
        assert!(out.contains("@import \"https://h/ui/../theme.css\""));
    }
}
