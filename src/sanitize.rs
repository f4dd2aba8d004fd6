//! Text escaping for display and diagram input, and scrubbing of exported
//! SVG markup.

use roxmltree::{Document, Node};
use thiserror::Error;

/// Default upper bound on markup accepted for export (10 MiB).
pub const DEFAULT_MAX_MARKUP_BYTES: usize = 10 * 1024 * 1024;

const FORBIDDEN_ELEMENTS: [&str; 6] = ["script", "object", "embed", "iframe", "form", "input"];
const XML_NAMESPACE: &str = "http://www.w3.org/XML/1998/namespace";

#[derive(Debug, Error)]
pub enum SanitizeError {
    #[error("markup is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: usize },
    #[error("markup could not be parsed: {0}")]
    Parse(#[from] roxmltree::Error),
}

/// Escapes text for insertion into HTML.
pub fn escape_for_display(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            '/' => out.push_str("&#x2F;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escapes the subset of characters that would inject markup, leaving
/// `>`, `'` and `/` alone so arrows (`-->`) and paths keep parsing.
pub fn escape_for_diagram_source(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => out.push_str("&lt;"),
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Sanitizes markup with the default size limit.
pub fn sanitize_exported_markup(markup: &str) -> Result<String, SanitizeError> {
    Sanitizer::default().sanitize_markup(markup)
}

#[derive(Debug, Clone, Copy)]
pub struct Sanitizer {
    pub max_bytes: usize,
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self {
            max_bytes: DEFAULT_MAX_MARKUP_BYTES,
        }
    }
}

impl Sanitizer {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    /// Parses `markup`, removes active content and serializes it again.
    ///
    /// Elements that can execute or submit anything (`script`, `object`,
    /// `embed`, `iframe`, `form`, `input`) are dropped with their subtrees.
    /// Event-handler attributes (`on*`) and attributes whose value mentions
    /// `javascript:` are dropped from the remaining elements. Comments and
    /// processing instructions are not carried over.
    pub fn sanitize_markup(&self, markup: &str) -> Result<String, SanitizeError> {
        if markup.len() > self.max_bytes {
            return Err(SanitizeError::TooLarge {
                size: markup.len(),
                limit: self.max_bytes,
            });
        }
        let doc = Document::parse(markup)?;
        let mut out = String::with_capacity(markup.len());
        for child in doc.root().children() {
            write_node(&mut out, child);
        }
        Ok(out)
    }
}

fn write_node(out: &mut String, node: Node) {
    if node.is_element() {
        write_element(out, node);
    } else if node.is_text() {
        out.push_str(&escape_text(node.text().unwrap_or_default()));
    }
}

fn write_element(out: &mut String, node: Node) {
    let local = node.tag_name().name();
    if is_forbidden_element(local) {
        return;
    }
    let name = qualified_element_name(node);
    out.push('<');
    out.push_str(&name);

    for ns in node.namespaces() {
        if ns.uri() == XML_NAMESPACE || inherited_namespace(node, ns.name(), ns.uri()) {
            continue;
        }
        match ns.name() {
            Some(prefix) => out.push_str(&format!(" xmlns:{prefix}=\"{}\"", escape_attr(ns.uri()))),
            None => out.push_str(&format!(" xmlns=\"{}\"", escape_attr(ns.uri()))),
        }
    }

    for attr in node.attributes() {
        if is_unsafe_attribute(attr.name(), attr.value()) {
            continue;
        }
        let attr_name = match attr.namespace() {
            Some(XML_NAMESPACE) => format!("xml:{}", attr.name()),
            Some(uri) => match namespace_prefix(node, uri) {
                Some(prefix) => format!("{prefix}:{}", attr.name()),
                None => attr.name().to_string(),
            },
            None => attr.name().to_string(),
        };
        out.push_str(&format!(" {attr_name}=\"{}\"", escape_attr(attr.value())));
    }

    let kept: Vec<Node> = node.children().filter(|child| is_kept(*child)).collect();
    if kept.is_empty() {
        out.push_str("/>");
        return;
    }
    out.push('>');
    for child in kept {
        write_node(out, child);
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

fn is_kept(node: Node) -> bool {
    node.is_text() || (node.is_element() && !is_forbidden_element(node.tag_name().name()))
}

fn is_forbidden_element(name: &str) -> bool {
    FORBIDDEN_ELEMENTS
        .iter()
        .any(|forbidden| forbidden.eq_ignore_ascii_case(name))
}

fn is_unsafe_attribute(name: &str, value: &str) -> bool {
    let lowered = name.to_ascii_lowercase();
    lowered.starts_with("on") || value.to_ascii_lowercase().contains("javascript:")
}

fn inherited_namespace(node: Node, prefix: Option<&str>, uri: &str) -> bool {
    let Some(parent) = node.parent_element() else {
        return false;
    };
    parent
        .namespaces()
        .any(|ns| ns.name() == prefix && ns.uri() == uri)
}

fn qualified_element_name(node: Node) -> String {
    let local = node.tag_name().name();
    let Some(uri) = node.tag_name().namespace() else {
        return local.to_string();
    };
    let default_matches = node
        .namespaces()
        .any(|ns| ns.name().is_none() && ns.uri() == uri);
    if default_matches {
        return local.to_string();
    }
    match namespace_prefix(node, uri) {
        Some(prefix) => format!("{prefix}:{local}"),
        None => local.to_string(),
    }
}

fn namespace_prefix<'input>(node: Node<'_, 'input>, uri: &str) -> Option<&'input str> {
    node.namespaces()
        .find(|ns| ns.uri() == uri && ns.name().is_some())
        .and_then(|ns| ns.name())
}

fn escape_text(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\r', "&#13;")
}

fn escape_attr(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('"', "&quot;")
        .replace('\n', "&#10;")
        .replace('\r', "&#13;")
        .replace('\t', "&#9;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const SVG_NS: &str = "http://www.w3.org/2000/svg";

    fn count_elements(markup: &str, name: &str) -> usize {
        let doc = Document::parse(markup).expect("sanitized output parses");
        doc.descendants()
            .filter(|n| n.is_element() && n.tag_name().name() == name)
            .count()
    }

    #[test]
    fn display_escape_covers_markup_characters() {
        assert_eq!(
            escape_for_display(r#"<a href="x">'b' & c/d</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&apos;b&apos; &amp; c&#x2F;d&lt;&#x2F;a&gt;"
        );
    }

    #[test]
    fn diagram_escape_keeps_arrows_and_paths() {
        let source = "graph TD\n A-->B\n B-.->C['x/y']";
        assert_eq!(escape_for_diagram_source(source), source);
    }

    #[test]
    fn diagram_escape_never_leaves_raw_markup() {
        let escaped = escape_for_diagram_source(r#"A["<b>bold</b> & more"] --> B"#);
        assert!(!escaped.contains('<'));
        assert!(!escaped.contains('"'));
        assert_eq!(escaped.matches('&').count(), escaped.matches(';').count());
        assert!(escaped.contains("-->"));
        assert!(escaped.contains("&lt;/b>"));
    }

    #[test]
    fn strips_script_elements() {
        let markup = format!(
            r#"<svg xmlns="{SVG_NS}"><script>alert(1)</script><g><script type="text/javascript">x()</script><rect width="10"/></g></svg>"#
        );
        let clean = sanitize_exported_markup(&markup).unwrap();
        assert_eq!(count_elements(&clean, "script"), 0);
        assert_eq!(count_elements(&clean, "rect"), 1);
        assert!(!clean.contains("alert"));
    }

    #[test]
    fn strips_embedded_documents_and_forms() {
        let markup = format!(
            r#"<svg xmlns="{SVG_NS}"><foreignObject><IFRAME src="x"/><form><input name="a"/></form><embed/><object/></foreignObject></svg>"#
        );
        let clean = sanitize_exported_markup(&markup).unwrap();
        for name in ["IFRAME", "iframe", "form", "input", "embed", "object"] {
            assert_eq!(count_elements(&clean, name), 0, "{name} survived");
        }
        assert_eq!(count_elements(&clean, "foreignObject"), 1);
    }

    #[test]
    fn strips_event_handlers_and_javascript_urls() {
        let markup = format!(
            r#"<svg xmlns="{SVG_NS}" xmlns:xlink="http://www.w3.org/1999/xlink" onload="boom()"><a xlink:href="JavaScript:alert(1)"><rect ONCLICK="x" fill="red"/></a></svg>"#
        );
        let clean = sanitize_exported_markup(&markup).unwrap();
        let lowered = clean.to_ascii_lowercase();
        assert!(!lowered.contains("onload"));
        assert!(!lowered.contains("onclick"));
        assert!(!lowered.contains("javascript:"));
        assert!(clean.contains(r#"fill="red""#));
    }

    #[test]
    fn keeps_namespaces_and_prefixed_attributes() {
        let markup = format!(
            r##"<svg xmlns="{SVG_NS}" xmlns:xlink="http://www.w3.org/1999/xlink" viewBox="0 0 10 10"><use xlink:href="#a" xml:space="preserve"/></svg>"##
        );
        let clean = sanitize_exported_markup(&markup).unwrap();
        assert!(clean.contains(&format!(r#"xmlns="{SVG_NS}""#)));
        assert!(clean.contains(r#"xmlns:xlink="http://www.w3.org/1999/xlink""#));
        assert!(clean.contains(r##"xlink:href="#a""##));
        assert!(clean.contains(r#"xml:space="preserve""#));
        assert_eq!(clean.matches("xmlns=").count(), 1);
    }

    #[test]
    fn sanitizing_is_idempotent() {
        let markup = format!(
            r#"<svg xmlns="{SVG_NS}"><!-- note --><style>.a &gt; .b {{ fill: red; }}</style><g class="node" onmouseover="x()"><text x="1">A &amp; B &lt; C</text><script>bad()</script></g></svg>"#
        );
        let once = sanitize_exported_markup(&markup).unwrap();
        let twice = sanitize_exported_markup(&once).unwrap();
        assert_eq!(once, twice);
        assert!(!once.contains("note"));
    }

    #[test]
    fn whitespace_references_survive_repeated_passes() {
        let markup = format!(r#"<svg xmlns="{SVG_NS}"><text data-x="a&#10;b&#9;c&#13;d">c&#13;d</text></svg>"#);
        let once = sanitize_exported_markup(&markup).unwrap();
        let twice = sanitize_exported_markup(&once).unwrap();
        assert_eq!(once, twice);
        assert!(once.contains(r#"data-x="a&#10;b&#9;c&#13;d""#));
        assert!(once.contains("c&#13;d</text>"));
    }

    #[test]
    fn rejects_unparseable_markup() {
        let err = sanitize_exported_markup("<svg><g></svg>").unwrap_err();
        assert!(matches!(err, SanitizeError::Parse(_)));
    }

    #[test]
    fn rejects_oversized_markup() {
        let sanitizer = Sanitizer::new(16);
        let err = sanitizer
            .sanitize_markup(&format!(r#"<svg xmlns="{SVG_NS}"/>"#))
            .unwrap_err();
        assert!(matches!(err, SanitizeError::TooLarge { limit: 16, .. }));
    }
}
