//! Lightweight start-tag scanning for page markup.
//!
//! Only start tags and their quoted attributes are recognised; this is enough to
//! locate embedded resources without building a DOM.

use std::ops::Range;
use std::sync::LazyLock;

use regex::Regex;

static START_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<([a-z][a-z0-9]*)\b([^>]*)>").unwrap());
static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
});

#[derive(Debug, Clone)]
pub struct Attr {
    /// Lowercased attribute name.
    pub name: String,
    /// Raw value, entities still encoded.
    pub value: String,
    /// Byte range of the value within the scanned markup.
    pub value_span: Range<usize>,
}

#[derive(Debug, Clone)]
pub struct StartTag {
    /// Lowercased element name.
    pub name: String,
    pub span: Range<usize>,
    pub attrs: Vec<Attr>,
}

impl StartTag {
    pub fn attr(&self, name: &str) -> Option<&Attr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Attribute value with the entities that commonly appear in URLs decoded.
    pub fn value(&self, name: &str) -> Option<String> {
        self.attr(name).map(|a| decode_attr(&a.value))
    }

    pub fn has(&self, name: &str) -> bool {
        self.attr(name).is_some()
    }
}

/// All start tags in document order.
pub fn start_tags(markup: &str) -> Vec<StartTag> {
    START_TAG_RE
        .captures_iter(markup)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let body = caps.get(2)?;
            Some(StartTag {
                name,
                span: whole.range(),
                attrs: parse_attrs(body.as_str(), body.start()),
            })
        })
        .collect()
}

/// Parse quoted attributes. `offset` is where `body` starts in the original markup.
pub fn parse_attrs(body: &str, offset: usize) -> Vec<Attr> {
    ATTR_RE
        .captures_iter(body)
        .filter_map(|caps| {
            let name = caps.get(1)?.as_str().to_ascii_lowercase();
            let value = caps.get(2).or_else(|| caps.get(3))?;
            Some(Attr {
                name,
                value: value.as_str().to_string(),
                value_span: offset + value.start()..offset + value.end(),
            })
        })
        .collect()
}

fn decode_attr(value: &str) -> String {
    value
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn images(markup: &str) -> Vec<StartTag> {
        start_tags(markup).into_iter().filter(|t| t.name == "img").collect()
    }

    #[test]
    fn finds_tags_with_attributes_in_any_order() {
        let html = r#"<p>x</p><IMG alt='a cat' SRC="http://x/a.png?w=1&amp;h=2" data-id="p1">"#;
        let tags = images(html);
        assert_eq!(tags.len(), 1);
        let img = &tags[0];
        assert_eq!(img.value("src").as_deref(), Some("http://x/a.png?w=1&h=2"));
        assert_eq!(img.value("alt").as_deref(), Some("a cat"));
        assert!(img.has("data-id"));
    }

    #[test]
    fn value_spans_point_into_markup() {
        let html = r#"<div><img src="http://x/a.png"></div>"#;
        let tags = images(html);
        let src = tags[0].attr("src").unwrap();
        assert_eq!(&html[src.value_span.clone()], "http://x/a.png");
        assert_eq!(&html[tags[0].span.clone()], r#"<img src="http://x/a.png">"#);
    }

    #[test]
    fn closing_tags_and_text_are_ignored() {
        let tags = start_tags("</p> 3 < 4 <br/>");
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "br");
    }
}
