use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::stats::ExportStats;
use crate::writers::TargetFormat;

pub const SUMMARY_FILE: &str = "export_summary.json";
pub const README_FILE: &str = "README.md";

#[derive(Serialize)]
struct SummaryRecord<'a> {
    timestamp: String,
    statistics: &'a ExportStats,
    export_path: String,
}

/// `export_summary.json` at the export root.
pub fn write_summary(root: &Path, stats: &ExportStats, finished: DateTime<Local>) -> Result<PathBuf> {
    let record = SummaryRecord {
        timestamp: finished.to_rfc3339(),
        statistics: stats,
        export_path: root.display().to_string(),
    };
    let path = root.join(SUMMARY_FILE);
    let json = serde_json::to_string_pretty(&record)?;
    fs::write(&path, json).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

/// Human-readable overview with import steps for every written format.
pub fn write_readme(
    root: &Path,
    stats: &ExportStats,
    formats: &[TargetFormat],
    finished: DateTime<Local>,
) -> Result<PathBuf> {
    let path = root.join(README_FILE);
    fs::write(&path, readme(stats, formats, finished))
        .with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(path)
}

fn readme(stats: &ExportStats, formats: &[TargetFormat], finished: DateTime<Local>) -> String {
    let mut out = format!(
        "# OneNote Export\n\nExported on {}.\n\n## Statistics\n\n",
        finished.format("%Y-%m-%d %H:%M:%S")
    );
    for (label, value) in stat_rows(stats) {
        out.push_str(&format!("- {}: {}\n", label, value));
    }

    out.push_str("\n## Structure\n\n```\n<Notebook>/\n  <Section>/\n    <Page>.html\n    <Page>_attachments/\n");
    for format in formats {
        out.push_str(&format!("  {}/\n    <Page>.{}\n", format.dir_name(), format.extension()));
    }
    out.push_str("```\n");

    if !formats.is_empty() {
        out.push_str("\n## Importing\n");
    }
    for format in formats {
        out.push_str(match format {
            TargetFormat::Joplin => {
                "\n### Joplin\n\n\
                 1. File > Import > \"MD - Markdown + Front Matter (Directory)\".\n\
                 2. Pick a notebook's `joplin` folder.\n\
                 3. Images link into the section folders, so keep the export tree intact while importing.\n"
            }
            TargetFormat::Evernote => {
                "\n### Evernote\n\n\
                 1. File > Import Notes.\n\
                 2. Select the `.enex` files in a notebook's `evernote` folder.\n"
            }
            TargetFormat::Obsidian => {
                "\n### Obsidian\n\n\
                 1. Copy a notebook folder into your vault, section folders included.\n\
                 2. Notes in `obsidian` carry the tags `onenote-import` and the notebook name.\n"
            }
        });
    }
    out
}

fn stat_rows(stats: &ExportStats) -> [(&'static str, u64); 9] {
    [
        ("Notebooks", stats.notebooks),
        ("Sections", stats.sections),
        ("Pages", stats.pages),
        ("Skipped (no content)", stats.skipped),
        ("Attachments", stats.attachments),
        ("Images", stats.images),
        ("Audio files", stats.audio_files),
        ("PDFs", stats.pdfs),
        ("Errors", stats.errors),
    ]
}

/// End-of-run table on stdout.
pub fn print_summary(stats: &ExportStats, root: &Path, elapsed: Duration) {
    println!("\n{:<22} | {:>8}", "Export summary", "Count");
    println!("{}", "-".repeat(33));
    for (label, value) in stat_rows(stats) {
        println!("{:<22} | {:>8}", label, value);
    }
    println!("{}", "-".repeat(33));
    println!("Output:  {}", root.display());
    println!("Elapsed: {}", crate::format_duration(elapsed));
    if stats.errors > 0 {
        println!("{} errors, see the log above for details.", stats.errors);
    }
}
