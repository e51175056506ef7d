pub mod summary;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Local, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::content::{self, attachments};
use crate::sanitize::{sanitize_filename, NameClaims};
use crate::source::{ContentSource, Notebook, Page, PageMeta, Section};
use crate::stats::{ExportStats, PageOutcome, PageTally};
use crate::writers::{write_page, PageDocument, PageWriter};

/// Setup failures that abort the run. Everything below notebook level is recovered.
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("cannot create export directory {}: {source}", .path.display())]
    CannotCreateRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot list notebooks: {0:#}")]
    CannotListNotebooks(anyhow::Error),
    #[error("no notebooks found")]
    NoNotebooks,
    #[error("no notebook named {0:?}")]
    NoMatchingNotebook(Vec<String>),
}

/// Create `<dest>/OneNote_Export_<YYYYmmdd_HHMMSS>`.
pub fn prepare_root(dest: &Path, started: DateTime<Local>) -> Result<PathBuf, ExportError> {
    let root = dest.join(format!("OneNote_Export_{}", started.format("%Y%m%d_%H%M%S")));
    fs::create_dir_all(&root).map_err(|source| ExportError::CannotCreateRoot {
        path: root.clone(),
        source,
    })?;
    Ok(root)
}

/// Walks notebooks → sections → pages strictly in order, one page at a time.
pub struct Exporter<'a, S: ContentSource> {
    source: &'a S,
    root: PathBuf,
    writers: Vec<Box<dyn PageWriter>>,
    notebook_filter: Vec<String>,
    modified_since: Option<DateTime<Utc>>,
    exported_at: DateTime<Utc>,
}

/// Where one section's pages go.
struct SectionTarget<'p> {
    notebook_name: &'p str,
    notebook_dir: &'p Path,
    section_name: &'p str,
    /// Sanitized, unique within the notebook.
    dir_name: String,
}

impl SectionTarget<'_> {
    fn dir(&self) -> PathBuf {
        self.notebook_dir.join(&self.dir_name)
    }

    fn label(&self, title: &str) -> String {
        format!("{} / {}", self.section_name, title)
    }
}

impl<'a, S: ContentSource> Exporter<'a, S> {
    /// An empty writer list exports raw HTML and attachments only.
    pub fn new(source: &'a S, root: PathBuf, writers: Vec<Box<dyn PageWriter>>) -> Self {
        Exporter {
            source,
            root,
            writers,
            notebook_filter: Vec::new(),
            modified_since: None,
            exported_at: Utc::now(),
        }
    }

    /// Restrict the run to notebooks with exactly these names.
    pub fn with_notebooks(mut self, names: Vec<String>) -> Self {
        self.notebook_filter = names;
        self
    }

    /// Only export pages modified after `cutoff`. Pages without a readable
    /// modification time are left out too.
    pub fn with_modified_since(mut self, cutoff: Option<DateTime<Utc>>) -> Self {
        self.modified_since = cutoff;
        self
    }

    pub fn exported_at(mut self, at: DateTime<Utc>) -> Self {
        self.exported_at = at;
        self
    }

    /// Export everything, folding page outcomes into `stats`.
    pub async fn run(&self, mut stats: ExportStats) -> Result<ExportStats, ExportError> {
        let notebooks = self
            .source
            .list_notebooks()
            .await
            .map_err(ExportError::CannotListNotebooks)?;
        if notebooks.is_empty() {
            return Err(ExportError::NoNotebooks);
        }
        let notebooks = self.select(notebooks)?;

        info!("Exporting {} notebooks to {}", notebooks.len(), self.root.display());
        let mut dir_claims = NameClaims::default();
        dir_claims.claim(summary::SUMMARY_FILE);
        dir_claims.claim(summary::README_FILE);
        for notebook in &notebooks {
            let dir = self.root.join(dir_claims.claim_stem(&sanitize_filename(&notebook.name)));
            self.export_notebook(notebook, &dir, &mut stats).await;
        }
        Ok(stats)
    }

    fn select(&self, notebooks: Vec<Notebook>) -> Result<Vec<Notebook>, ExportError> {
        if self.notebook_filter.is_empty() {
            return Ok(notebooks);
        }
        let selected: Vec<Notebook> = notebooks
            .into_iter()
            .filter(|n| self.notebook_filter.iter().any(|f| f == &n.name))
            .collect();
        if selected.is_empty() {
            return Err(ExportError::NoMatchingNotebook(self.notebook_filter.clone()));
        }
        Ok(selected)
    }

    async fn export_notebook(&self, notebook: &Notebook, notebook_dir: &Path, stats: &mut ExportStats) {
        info!("Notebook: {}", notebook.name);

        match self.source.list_sections(&notebook.id).await {
            Ok(sections) => {
                // Section folders sit next to the format directories. Page stems are
                // unique per notebook because each format directory holds every section.
                let mut section_claims = NameClaims::default();
                let mut page_claims = NameClaims::default();
                for format in self.writers.iter().map(|w| w.format()) {
                    section_claims.claim_stem(format.dir_name());
                }
                for section in &sections {
                    let target = SectionTarget {
                        notebook_name: &notebook.name,
                        notebook_dir,
                        section_name: &section.name,
                        dir_name: section_claims.claim_stem(&sanitize_filename(&section.name)),
                    };
                    self.export_section(section, &target, &mut page_claims, stats).await;
                }
            }
            Err(e) => {
                warn!("Could not list sections of {}: {:#}", notebook.name, e);
                stats.record_error();
            }
        }

        stats.record_notebook();
    }

    async fn export_section(
        &self,
        section: &Section,
        target: &SectionTarget<'_>,
        claims: &mut NameClaims,
        stats: &mut ExportStats,
    ) {
        stats.record_section();
        let listing = match self.source.list_pages(&section.id).await {
            Ok(pages) => pages,
            Err(e) => {
                warn!("Could not list pages of {}: {:#}", target.section_name, e);
                stats.record_error();
                return;
            }
        };
        // Untitled pages keep their position in the full listing.
        let pages: Vec<(usize, &PageMeta)> = listing
            .iter()
            .enumerate()
            .map(|(i, meta)| (i + 1, meta))
            .filter(|(_, meta)| self.is_recent(meta))
            .collect();
        debug!("Section {}: {} of {} pages", section.name, pages.len(), listing.len());

        let pb = section_bar(pages.len() as u64, &section.name);
        let mut outcomes = Vec::with_capacity(pages.len());
        for (index, meta) in pages {
            outcomes.push(self.export_page(meta, index, target, claims).await);
            pb.inc(1);
        }
        pb.finish_and_clear();

        *stats += ExportStats::fold(&outcomes);
    }

    fn is_recent(&self, meta: &PageMeta) -> bool {
        let Some(cutoff) = self.modified_since else {
            return true;
        };
        let modified = meta
            .modified
            .as_deref()
            .and_then(|m| DateTime::parse_from_rfc3339(m).ok());
        match modified {
            Some(m) => m.with_timezone(&Utc) > cutoff,
            None => {
                debug!("Leaving out page {}: no modification time", meta.id);
                false
            }
        }
    }

    /// fetched → attachments resolved → each format written → outcome.
    async fn export_page(
        &self,
        meta: &PageMeta,
        index: usize,
        target: &SectionTarget<'_>,
        claims: &mut NameClaims,
    ) -> PageOutcome {
        let markup = match self.source.fetch_page_markup(&meta.id).await {
            Ok(Some(markup)) if !markup.trim().is_empty() => markup,
            Ok(_) => {
                info!("Skipping {} (no content)", target.label(&display_title(meta, index)));
                return PageOutcome::Skipped;
            }
            Err(e) => {
                warn!("Failed to fetch {}: {:#}", target.label(&display_title(meta, index)), e);
                return PageOutcome::Failed(PageTally::failure());
            }
        };

        let page = Page::new(meta, index, markup);
        let stem = claims.claim_stem(&sanitize_filename(&page.title));
        let section_dir = target.dir();

        if let Err(e) = write_raw(&section_dir, &stem, &page.markup) {
            warn!("Failed to save {} ({}): {:#}", target.label(&page.title), page.id, e);
            return PageOutcome::Failed(PageTally::failure());
        }

        let resolution =
            attachments::resolve(self.source, &page.markup, &section_dir.join(format!("{}_attachments", stem)))
                .await;
        let mut tally = resolution.tally;
        if !resolution.is_empty() {
            debug!("{}: stored {} files", target.label(&page.title), resolution.stored());
            for a in &resolution.attachments {
                debug!("  {:?} {} -> {}", a.kind, truncate_locator(&a.locator), a.path.display());
            }
        }
        if self.writers.is_empty() {
            return PageOutcome::Exported(tally);
        }

        let link_base = format!("../{}/{}_attachments", target.dir_name, stem);
        let markdown = content::to_markdown(&page.markup, &resolution, &link_base);
        let doc = PageDocument {
            page: &page,
            notebook: target.notebook_name,
            markdown: &markdown,
            attachments: &resolution.attachments,
            attachment_link_base: &link_base,
            exported_at: self.exported_at,
        };

        let mut failed = false;
        for writer in &self.writers {
            if let Err(e) = write_page(writer.as_ref(), target.notebook_dir, &stem, &doc) {
                warn!(
                    "Failed to write {} ({}) as {:?}: {:#}",
                    target.label(&page.title),
                    page.id,
                    writer.format(),
                    e
                );
                tally.errors += 1;
                failed = true;
            }
        }

        if failed {
            PageOutcome::Failed(tally)
        } else {
            PageOutcome::Exported(tally)
        }
    }
}

fn display_title(meta: &PageMeta, index: usize) -> String {
    match meta.title.as_deref().map(str::trim) {
        Some(t) if !t.is_empty() => t.to_string(),
        _ => format!("Untitled_{} ({})", index, meta.id),
    }
}

/// Inline payloads can be megabytes long.
fn truncate_locator(locator: &str) -> &str {
    match locator.char_indices().nth(80) {
        Some((idx, _)) => &locator[..idx],
        None => locator,
    }
}

fn write_raw(section_dir: &Path, stem: &str, markup: &str) -> Result<()> {
    fs::create_dir_all(section_dir).with_context(|| format!("Failed to create {}", section_dir.display()))?;
    let path = section_dir.join(format!("{}.html", stem));
    fs::write(&path, markup).with_context(|| format!("Failed to write {}", path.display()))
}

fn section_bar(len: u64, name: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    if let Ok(style) = ProgressStyle::default_bar().template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
        pb.set_style(style.progress_chars("#>-"));
    }
    pb.set_message(name.to_string());
    pb
}
