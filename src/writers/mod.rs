pub mod enex;
pub mod joplin;
pub mod obsidian;

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use crate::content::attachments::{Origin, ResolvedAttachment};
use crate::sanitize::encode_link_path;
use crate::source::Page;

/// Output formats produced next to the raw HTML dump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, clap::ValueEnum)]
pub enum TargetFormat {
    /// Markdown with front matter
    Joplin,
    /// ENEX archive
    Evernote,
    /// Markdown with tags, for an Obsidian vault
    Obsidian,
}

impl TargetFormat {
    pub const ALL: [TargetFormat; 3] = [TargetFormat::Joplin, TargetFormat::Evernote, TargetFormat::Obsidian];
    /// Written when no format is requested.
    pub const DEFAULT: [TargetFormat; 2] = [TargetFormat::Joplin, TargetFormat::Evernote];

    /// Directory under the notebook folder.
    pub fn dir_name(self) -> &'static str {
        match self {
            TargetFormat::Joplin => "joplin",
            TargetFormat::Evernote => "evernote",
            TargetFormat::Obsidian => "obsidian",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            TargetFormat::Joplin | TargetFormat::Obsidian => "md",
            TargetFormat::Evernote => "enex",
        }
    }

    pub fn writer(self) -> Box<dyn PageWriter> {
        match self {
            TargetFormat::Joplin => Box::new(joplin::JoplinWriter),
            TargetFormat::Evernote => Box::new(enex::EnexWriter),
            TargetFormat::Obsidian => Box::new(obsidian::ObsidianWriter),
        }
    }
}

/// Everything a writer may use. Writers never see each other's output.
pub struct PageDocument<'a> {
    pub page: &'a Page,
    /// Display name of the containing notebook.
    pub notebook: &'a str,
    /// Normalized markdown with stored images already pointing at local files.
    pub markdown: &'a str,
    pub attachments: &'a [ResolvedAttachment],
    /// Relative link from a target-format file to the page's attachment directory.
    pub attachment_link_base: &'a str,
    pub exported_at: DateTime<Utc>,
}

pub trait PageWriter {
    fn format(&self) -> TargetFormat;
    fn render(&self, doc: &PageDocument<'_>) -> Result<String>;
}

/// `## Attachments` list of everything except inline images, which the body
/// already links. Empty when there is nothing to list.
pub fn attachment_list(doc: &PageDocument<'_>) -> String {
    let files: Vec<_> = doc
        .attachments
        .iter()
        .filter(|a| a.origin != Origin::Image)
        .collect();
    if files.is_empty() {
        return String::new();
    }
    let mut out = String::from("\n\n## Attachments\n\n");
    for a in files {
        let link = encode_link_path(&format!("{}/{}", doc.attachment_link_base, a.file_name));
        out.push_str(&format!("- [{}]({})\n", a.file_name, link));
    }
    out
}

/// Render and write `<notebook>/<format dir>/<stem>.<ext>`.
pub fn write_page(
    writer: &dyn PageWriter,
    notebook_dir: &Path,
    stem: &str,
    doc: &PageDocument<'_>,
) -> Result<PathBuf> {
    let format = writer.format();
    let dir = notebook_dir.join(format.dir_name());
    let path = dir.join(format!("{}.{}", stem, format.extension()));

    let body = writer.render(doc)?;
    fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    fs::write(&path, body).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_format_has_its_own_location() {
        let dirs: std::collections::HashSet<_> = TargetFormat::ALL.iter().map(|f| f.dir_name()).collect();
        assert_eq!(dirs.len(), TargetFormat::ALL.len());
        for format in TargetFormat::ALL {
            assert_eq!(format.writer().format(), format);
        }
    }

    #[test]
    fn writes_under_format_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let page = testing::page("Plan", "<p>x</p>");
        let doc = testing::document(&page, "x");

        let path = write_page(TargetFormat::Joplin.writer().as_ref(), tmp.path(), "Plan", &doc).unwrap();
        assert_eq!(path, tmp.path().join("joplin").join("Plan.md"));
        assert!(path.exists());
    }
}
