use std::ops::AddAssign;

use serde::Serialize;

/// Counters gathered while exporting one page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PageTally {
    pub attachments: u64,
    pub images: u64,
    pub audio_files: u64,
    pub pdfs: u64,
    pub errors: u64,
}

impl AddAssign for PageTally {
    fn add_assign(&mut self, rhs: Self) {
        self.attachments += rhs.attachments;
        self.images += rhs.images;
        self.audio_files += rhs.audio_files;
        self.pdfs += rhs.pdfs;
        self.errors += rhs.errors;
    }
}

impl PageTally {
    pub fn failure() -> Self {
        PageTally { errors: 1, ..Default::default() }
    }
}

/// Terminal state of one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// Written in every requested format. May still carry attachment errors.
    Exported(PageTally),
    /// Content was absent or empty.
    Skipped,
    /// Some step failed. The tally holds at least one error.
    Failed(PageTally),
}

/// Run-level counters. Only ever grow; folded from page outcomes by the exporter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExportStats {
    pub notebooks: u64,
    pub sections: u64,
    pub pages: u64,
    pub skipped: u64,
    pub attachments: u64,
    pub audio_files: u64,
    pub images: u64,
    pub pdfs: u64,
    pub errors: u64,
}

impl AddAssign for ExportStats {
    fn add_assign(&mut self, rhs: Self) {
        self.notebooks += rhs.notebooks;
        self.sections += rhs.sections;
        self.pages += rhs.pages;
        self.skipped += rhs.skipped;
        self.attachments += rhs.attachments;
        self.audio_files += rhs.audio_files;
        self.images += rhs.images;
        self.pdfs += rhs.pdfs;
        self.errors += rhs.errors;
    }
}

impl ExportStats {
    pub fn record_notebook(&mut self) {
        self.notebooks += 1;
    }

    pub fn record_section(&mut self) {
        self.sections += 1;
    }

    /// A failure outside any page, e.g. a section listing that could not be fetched.
    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    pub fn record_page(&mut self, outcome: &PageOutcome) {
        let tally = match outcome {
            PageOutcome::Exported(tally) => {
                self.pages += 1;
                *tally
            }
            PageOutcome::Skipped => {
                self.skipped += 1;
                return;
            }
            PageOutcome::Failed(tally) => PageTally {
                errors: tally.errors.max(1),
                ..*tally
            },
        };
        self.attachments += tally.attachments;
        self.images += tally.images;
        self.audio_files += tally.audio_files;
        self.pdfs += tally.pdfs;
        self.errors += tally.errors;
    }

    pub fn fold<'a>(outcomes: impl IntoIterator<Item = &'a PageOutcome>) -> Self {
        let mut stats = ExportStats::default();
        for outcome in outcomes {
            stats.record_page(outcome);
        }
        stats
    }
}
