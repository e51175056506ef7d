use anyhow::Result;

use super::{attachment_list, PageDocument, PageWriter, TargetFormat};

/// Markdown with a front-matter block, importable by Joplin ("Markdown + Front Matter").
pub struct JoplinWriter;

impl PageWriter for JoplinWriter {
    fn format(&self) -> TargetFormat {
        TargetFormat::Joplin
    }

    fn render(&self, doc: &PageDocument<'_>) -> Result<String> {
        let page = doc.page;
        let mut out = String::from("---\n");
        for (key, value) in [
            ("title", &page.title),
            ("created", &page.created),
            ("updated", &page.modified),
            ("author", &page.author),
        ] {
            // JSON strings are valid YAML scalars and survive colons and quotes.
            out.push_str(&format!("{}: {}\n", key, serde_json::to_string(value)?));
        }
        out.push_str("---\n\n");
        out.push_str(doc.markdown);

        out.push_str(&attachment_list(doc));
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::content::attachments::{Origin, ResolvedAttachment};
    use crate::content::media::MediaKind;
    use crate::writers::testing;

    #[test]
    fn front_matter_then_body() {
        let page = testing::page("Plan: \"Q3\"", "<p>x</p>");
        let doc = testing::document(&page, "# Goals\n\n- ship");
        let out = JoplinWriter.render(&doc).unwrap();

        assert_eq!(
            out,
            "---\ntitle: \"Plan: \\\"Q3\\\"\"\ncreated: \"2024-03-01T10:00:00Z\"\nupdated: \"2024-03-02T11:30:00.5Z\"\nauthor: \"Ada <ada@example.com>\"\n---\n\n# Goals\n\n- ship\n"
        );
    }

    #[test]
    fn lists_non_image_attachments() {
        let page = testing::page("Plan", "");
        let attachment = |origin, name: &str| ResolvedAttachment {
            origin,
            kind: MediaKind::Document,
            locator: "https://x".into(),
            file_name: name.into(),
            path: PathBuf::from(name),
            link_span: None,
        };
        let attachments = [
            attachment(Origin::Image, "image_1.png"),
            attachment(Origin::Embed, "attachment_2.pdf"),
            attachment(Origin::Audio, "audio 1.m4a"),
        ];
        let mut doc = testing::document(&page, "body");
        doc.attachments = &attachments;
        let out = JoplinWriter.render(&doc).unwrap();

        assert!(out.ends_with(
            "body\n\n## Attachments\n\n- [attachment_2.pdf](../Section/Page_attachments/attachment_2.pdf)\n- [audio 1.m4a](../Section/Page_attachments/audio%201.m4a)\n"
        ));
        assert!(!out.contains("image_1.png"));
    }
}
