use std::collections::HashSet;
use std::sync::LazyLock;

use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use regex::Regex;

static ILLEGAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*\x00-\x1f]"#).unwrap());

const MAX_NAME_CHARS: usize = 200;
const PLACEHOLDER: &str = "untitled";

/// Characters that end or reinterpret a markdown link destination.
const LINK_CHARS: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'(')
    .add(b')')
    .add(b'<')
    .add(b'>')
    .add(b'%')
    .add(b'#')
    .add(b'?');

/// Make a display name safe to use as a single path component.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = ILLEGAL_RE.replace_all(name, "_");
    let trimmed = replaced.trim_matches(|c| c == '.' || c == ' ');
    if trimmed.is_empty() {
        return PLACEHOLDER.to_string();
    }
    trimmed.chars().take(MAX_NAME_CHARS).collect()
}

/// Hands out names that have not been handed out before, appending `_2`, `_3`, …
/// Comparison is case-insensitive so results are also unique on case-folding filesystems.
#[derive(Debug, Default)]
pub struct NameClaims {
    taken: HashSet<String>,
}

impl NameClaims {
    pub fn is_taken(&self, name: &str) -> bool {
        self.taken.contains(&name.to_lowercase())
    }

    /// Claim a file name. The suffix goes before the extension.
    pub fn claim(&mut self, name: &str) -> String {
        let unique = self.next_free(name);
        self.taken.insert(unique.to_lowercase());
        unique
    }

    /// Claim a bare stem such as a page title. Dots are not treated as an extension.
    pub fn claim_stem(&mut self, stem: &str) -> String {
        let unique = self.first_free(stem, None);
        self.taken.insert(unique.to_lowercase());
        unique
    }

    /// The name `claim` would return, without reserving it.
    pub fn next_free(&self, name: &str) -> String {
        let (stem, ext) = split_extension(name);
        match ext {
            Some(ext) if self.is_taken(name) => self.first_free(stem, Some(ext)),
            _ => self.first_free(name, None),
        }
    }

    fn first_free(&self, stem: &str, ext: Option<&str>) -> String {
        let build = |suffix: String| match ext {
            Some(ext) => format!("{}{}.{}", stem, suffix, ext),
            None => format!("{}{}", stem, suffix),
        };
        std::iter::once(String::new())
            .chain((2..).map(|n| format!("_{}", n)))
            .map(build)
            .find(|candidate| !self.is_taken(candidate))
            .unwrap_or_else(|| build(String::new()))
    }
}

/// Split `name.ext` into (`name`, `Some("ext")`). Leading-dot names have no extension.
pub fn split_extension(name: &str) -> (&str, Option<&str>) {
    match name.rfind('.') {
        Some(idx) if idx > 0 && idx + 1 < name.len() => (&name[..idx], Some(&name[idx + 1..])),
        _ => (name, None),
    }
}

/// Percent-encode the characters that break a markdown link destination.
pub fn encode_link_path(path: &str) -> String {
    utf8_percent_encode(path, LINK_CHARS).to_string()
}
