use anyhow::Result;

use super::{attachment_list, PageDocument, PageWriter, TargetFormat};

/// Every imported note carries this tag, next to one naming its notebook.
pub const IMPORT_TAG: &str = "onenote-import";

/// Markdown for an Obsidian vault: front matter with tags, then the body.
pub struct ObsidianWriter;

impl PageWriter for ObsidianWriter {
    fn format(&self) -> TargetFormat {
        TargetFormat::Obsidian
    }

    fn render(&self, doc: &PageDocument<'_>) -> Result<String> {
        let page = doc.page;
        let mut out = String::from("---\n");
        for (key, value) in [
            ("title", &page.title),
            ("created", &page.created),
            ("modified", &page.modified),
        ] {
            out.push_str(&format!("{}: {}\n", key, serde_json::to_string(value)?));
        }
        let tags = [IMPORT_TAG.to_string(), notebook_tag(doc.notebook)];
        out.push_str(&format!("tags: {}\n", serde_json::to_string(&tags)?));
        out.push_str("---\n\n");
        out.push_str(doc.markdown);

        out.push_str(&attachment_list(doc));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

/// Lowercased notebook name with whitespace runs turned into `-`.
fn notebook_tag(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
