//! Page markup → markdown, as an ordered list of pure text stages.
//!
//! Order matters: each stage only introduces text that later stages leave alone
//! (markdown delimiters contain no `<`, and entities are decoded last so that
//! decoded `<` never looks like a tag).

use std::sync::LazyLock;

use regex::{Captures, Regex};
use tracing::trace;

use super::tags::parse_attrs;

pub struct Stage {
    pub name: &'static str,
    pub run: fn(&str) -> String,
}

pub const PIPELINE: &[Stage] = &[
    Stage { name: "strip_preamble", run: strip_preamble },
    Stage { name: "headings", run: headings },
    Stage { name: "lists", run: lists },
    Stage { name: "line_breaks", run: line_breaks },
    Stage { name: "emphasis", run: emphasis },
    Stage { name: "links", run: links },
    Stage { name: "images", run: images },
    Stage { name: "strip_tags", run: strip_tags },
    Stage { name: "collapse_blank_lines", run: collapse_blank_lines },
    Stage { name: "decode_entities", run: decode_entities },
    Stage { name: "trim", run: trim },
];

/// Lossy conversion; unsupported constructs degrade to their inner text.
pub fn normalize(markup: &str) -> String {
    PIPELINE.iter().fold(markup.to_string(), |text, stage| {
        trace!(stage = stage.name, len = text.len(), "normalize");
        (stage.run)(&text)
    })
}

static PI_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<\?[^>]*>").unwrap());
static DOCTYPE_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<!DOCTYPE[^>]*>").unwrap());
static COMMENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").unwrap());
static HIDDEN_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    ["head", "script", "style"]
        .map(|tag| Regex::new(&format!(r"(?is)<{tag}\b[^>]*>.*?</{tag}\s*>")).unwrap())
});
static DATA_ID_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\s+data-id\s*=\s*(?:"[^"]*"|'[^']*')"#).unwrap());

/// Drops processing instructions, doctype, comments, non-content elements and
/// `data-id` attributes. Post: no `<?`, `<!` or `data-id=` remains.
fn strip_preamble(text: &str) -> String {
    let mut out = PI_RE.replace_all(text, "").into_owned();
    out = DOCTYPE_RE.replace_all(&out, "").into_owned();
    out = COMMENT_RE.replace_all(&out, "").into_owned();
    for re in HIDDEN_RES.iter() {
        out = re.replace_all(&out, "").into_owned();
    }
    DATA_ID_RE.replace_all(&out, "").into_owned()
}

static HEADING_RES: LazyLock<[Regex; 3]> = LazyLock::new(|| {
    [1, 2, 3].map(|level| Regex::new(&format!(r"(?is)<h{level}\b[^>]*>(.*?)</h{level}\s*>")).unwrap())
});
static WS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// `<h1>`–`<h3>` become `#`-prefixed lines set off by blank lines.
/// Inner whitespace, including newlines, collapses to single spaces.
fn headings(text: &str) -> String {
    let mut out = text.to_string();
    for (idx, re) in HEADING_RES.iter().enumerate() {
        let prefix = "#".repeat(idx + 1);
        out = re
            .replace_all(&out, |caps: &Captures| {
                format!("\n\n{} {}\n\n", prefix, WS_RE.replace_all(caps[1].trim(), " "))
            })
            .into_owned();
    }
    out
}

static LIST_WRAPPER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</?(?:ul|ol)\b[^>]*>").unwrap());
static LIST_ITEM_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<li\b[^>]*>(.*?)</li\s*>\s*").unwrap());

/// Items become `- ` lines, then list wrappers become blank-line boundaries.
/// Items go first so the whitespace they swallow never includes a boundary.
fn lists(text: &str) -> String {
    let out = LIST_ITEM_RE.replace_all(text, |caps: &Captures| format!("- {}\n", caps[1].trim()));
    LIST_WRAPPER_RE.replace_all(&out, "\n\n").into_owned()
}

static BR_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<br\b[^>]*>").unwrap());
static PARA_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</p\s*>").unwrap());
static DIV_END_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)</div\s*>").unwrap());

fn line_breaks(text: &str) -> String {
    let out = BR_RE.replace_all(text, "\n");
    let out = PARA_END_RE.replace_all(&out, "\n\n");
    DIV_END_RE.replace_all(&out, "\n").into_owned()
}

static EMPHASIS_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<(/?)(strong|b|em|i)\b[^>]*>").unwrap());
static ANY_TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]+>").unwrap());

struct OpenEmphasis {
    delim: &'static str,
    at: usize,
}

/// `<b>`/`<strong>` → `**`, `<i>`/`<em>` → `*`, matched with a tag stack so the
/// output delimiters always pair up. Crossed tags are closed and reopened,
/// nested repeats of the same kind are flattened, unmatched tags are dropped.
fn emphasis(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut stack: Vec<OpenEmphasis> = Vec::new();
    let mut last = 0;

    for caps in EMPHASIS_TAG_RE.captures_iter(text) {
        let Some(tag) = caps.get(0) else { continue };
        out.push_str(&text[last..tag.start()]);
        last = tag.end();

        let delim = match caps[2].to_ascii_lowercase().as_str() {
            "strong" | "b" => "**",
            _ => "*",
        };
        if caps[1].is_empty() {
            stack.push(OpenEmphasis { delim, at: out.len() });
            continue;
        }
        let Some(pos) = stack.iter().rposition(|o| o.delim == delim) else { continue };
        let reopen: Vec<&'static str> = stack[pos + 1..].iter().map(|o| o.delim).collect();
        while stack.len() > pos {
            if let Some(open) = stack.pop() {
                wrap_emphasis(&mut out, &open, &stack);
            }
        }
        for delim in reopen {
            stack.push(OpenEmphasis { delim, at: out.len() });
        }
    }
    out.push_str(&text[last..]);
    out
}

fn wrap_emphasis(out: &mut String, open: &OpenEmphasis, enclosing: &[OpenEmphasis]) {
    if enclosing.iter().any(|o| o.delim == open.delim) {
        return;
    }
    let content = out.split_off(open.at);
    if ANY_TAG_RE.replace_all(&content, "").trim().is_empty() {
        out.push_str(&content);
        return;
    }
    let core = content.trim();
    let lead = &content[..content.len() - content.trim_start().len()];
    let trail = &content[content.trim_end().len()..];
    out.push_str(lead);
    out.push_str(open.delim);
    out.push_str(core);
    out.push_str(open.delim);
    out.push_str(trail);
}

static LINK_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?is)<a\b([^>]*)>(.*?)</a\s*>").unwrap());

/// `<a href=X>text</a>` → `[text](X)`, whatever the attribute order.
fn links(text: &str) -> String {
    LINK_RE
        .replace_all(text, |caps: &Captures| {
            let attrs = parse_attrs(&caps[1], 0);
            let inner = WS_RE.replace_all(caps[2].trim(), " ");
            match attrs.iter().find(|a| a.name == "href") {
                Some(href) if inner.is_empty() => format!("[{}]({})", href.value, href.value),
                Some(href) => format!("[{}]({})", inner, href.value),
                None => inner.into_owned(),
            }
        })
        .into_owned()
}

static IMG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)<img\b([^>]*)>").unwrap());

/// `<img>` → `![alt](src)`, or `![](src)` when there is no alt text.
fn images(text: &str) -> String {
    IMG_RE
        .replace_all(text, |caps: &Captures| {
            let attrs = parse_attrs(&caps[1], 0);
            let find = |name: &str| attrs.iter().find(|a| a.name == name).map(|a| a.value.as_str());
            match (find("src"), find("alt")) {
                (Some(src), Some(alt)) => format!("![{}]({})", WS_RE.replace_all(alt.trim(), " "), src),
                (Some(src), None) => format!("![]({})", src),
                (None, _) => String::new(),
            }
        })
        .into_owned()
}

/// Post: no `<…>` tag remains.
fn strip_tags(text: &str) -> String {
    ANY_TAG_RE.replace_all(text, "").into_owned()
}

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Trims every line, then squeezes runs of blank lines to one.
fn collapse_blank_lines(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .map(|line| {
            let line = line.trim();
            if line.split("&nbsp;").all(|part| part.trim().is_empty()) {
                ""
            } else {
                line
            }
        })
        .collect();
    BLANK_RUN_RE.replace_all(&lines.join("\n"), "\n\n").into_owned()
}

static ENTITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"&(#[0-9]{1,7}|#[xX][0-9a-fA-F]{1,6}|[A-Za-z][A-Za-z0-9]{1,31});").unwrap()
});

/// Named and numeric character references → text. Unknown ones are kept verbatim.
fn decode_entities(text: &str) -> String {
    ENTITY_RE
        .replace_all(text, |caps: &Captures| {
            let entity = &caps[1];
            let decoded = if let Some(num) = entity.strip_prefix('#') {
                let code = match num.strip_prefix(['x', 'X']) {
                    Some(hex) => u32::from_str_radix(hex, 16).ok(),
                    None => num.parse::<u32>().ok(),
                };
                code.and_then(char::from_u32).map(String::from)
            } else {
                quick_xml::escape::resolve_html5_entity(entity).map(str::to_string)
            };
            decoded.unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

fn trim(text: &str) -> String {
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage(name: &str) -> fn(&str) -> String {
        PIPELINE.iter().find(|s| s.name == name).unwrap().run
    }

    #[test]
    fn intro_page() {
        let md = normalize(r#"<h1>Intro</h1><p><b>Hello</b> <img src="http://x/a.png" alt="cat"></p>"#);
        assert_eq!(md, "# Intro\n\n**Hello** ![cat](http://x/a.png)");
    }

    #[test]
    fn onenote_document() {
        let html = r#"<?xml version="1.0" encoding="utf-8" ?>
<html lang="en-US">
  <head>
    <title>Groceries</title>
    <meta name="created" content="2024-01-01T10:00:00.0000000" />
  </head>
  <body data-absolute-enabled="true" style="font-family:Calibri">
    <div data-id="_default" style="position:absolute">
      <h2 data-id="h1">Shopping
        list</h2>
      <ul>
        <li data-id="li1">Milk &amp; eggs</li>
        <li><i>Fresh</i> bread</li>
      </ul>
      <p>See <a data-id="a1" href="https://example.com/?a=1&amp;b=2">the shop</a>.</p>
      <p>&nbsp;</p>
    </div>
  </body>
</html>"#;
        let md = normalize(html);
        assert_eq!(
            md,
            "## Shopping list\n\n- Milk & eggs\n- *Fresh* bread\n\nSee [the shop](https://example.com/?a=1&b=2)."
        );
    }

    #[test]
    fn lists_end_with_a_blank_line() {
        assert_eq!(normalize("<ul><li>a</li></ul><p>b</p>"), "- a\n\nb");
        assert_eq!(normalize("<p>before</p><ol><li>a</li> <li>b</li></ol>after"), "before\n\n- a\n- b\n\nafter");
    }

    #[test]
    fn no_tags_remain_for_supported_constructs() {
        let samples = [
            "<h1>a</h1><h2>b</h2><h3>c</h3>",
            "<ul><li>x</li><li>y</li></ul>",
            "<p><strong>s</strong><em>e</em><b>b</b><i>i</i></p>",
            r#"<a title="t" href="/x">link</a><img src="y.png"><img alt="z" src="z.png">"#,
            "<div><br/><span>plain</span></div>",
        ];
        for sample in samples {
            let md = normalize(sample);
            assert!(!md.contains('<') && !md.contains('>'), "{:?} -> {:?}", sample, md);
        }
    }

    #[test]
    fn nested_emphasis_across_lines_pairs_up() {
        let md = normalize("<p><b>one\n<i>two\nthree</i> four</b></p>");
        assert_eq!(md, "**one\n*two\nthree* four**");
    }

    #[test]
    fn crossed_emphasis_stays_paired() {
        let out = stage("emphasis")("<b>x<i>y</b>z</i>");
        assert_eq!(out, "**x*y****z*");
        assert_eq!(out.matches('*').count() % 2, 0);
    }

    #[test]
    fn repeated_emphasis_is_flattened() {
        assert_eq!(stage("emphasis")("<b>a<strong>b</strong>c</b>"), "**abc**");
    }

    #[test]
    fn emphasis_whitespace_moves_outside() {
        assert_eq!(stage("emphasis")("<b>Hello </b>world"), "**Hello** world");
        assert_eq!(stage("emphasis")("a<i></i>b<b> </b>c"), "ab c");
    }

    #[test]
    fn unmatched_emphasis_is_dropped() {
        assert_eq!(stage("emphasis")("a</b>b<i>c"), "abc");
    }

    #[test]
    fn emphasis_ignores_similar_tags() {
        assert_eq!(stage("emphasis")("<br><body><img src=x><embed>"), "<br><body><img src=x><embed>");
    }

    #[test]
    fn links_match_by_attribute_name() {
        let out = stage("links")(r#"<a target="_blank" href="https://x">X</a> <a name="top">Top</a>"#);
        assert_eq!(out, "[X](https://x) Top");
    }

    #[test]
    fn images_with_and_without_alt() {
        let out = stage("images")(r#"<img alt="a b" src="1.png"><img src="2.png" width="3"><img>"#);
        assert_eq!(out, "![a b](1.png)![](2.png)");
    }

    #[test]
    fn headings_span_lines() {
        assert_eq!(stage("headings")("<h3 class=x>\n  Multi\n  line\n</h3>"), "\n\n### Multi line\n\n");
    }

    #[test]
    fn preamble_is_stripped() {
        let out = stage("strip_preamble")(
            r#"<?xml version="1.0"?><!DOCTYPE html><!-- c --><p data-id="p-1" lang="en">x</p>"#,
        );
        assert_eq!(out, r#"<p lang="en">x</p>"#);
    }

    #[test]
    fn blank_lines_collapse_to_one() {
        assert_eq!(stage("collapse_blank_lines")("a\n \n\t\n\n  b  \n\n\nc"), "a\n\nb\n\nc");
    }

    #[test]
    fn entities_decode() {
        assert_eq!(
            stage("decode_entities")("&lt;tag&gt; &amp;amp; &#65;&#x42; &eacute; &bogus;"),
            "<tag> &amp; AB é &bogus;"
        );
    }

    #[test]
    fn unknown_tags_degrade_to_text() {
        assert_eq!(normalize("<table><tr><td>cell</td></tr></table>"), "cell");
    }
}
