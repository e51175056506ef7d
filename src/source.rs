use anyhow::Result;

#[derive(Debug, Clone)]
pub struct Notebook {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub id: String,
    pub name: String,
}

/// Page listing entry. Content is fetched separately.
#[derive(Debug, Clone, Default)]
pub struct PageMeta {
    pub id: String,
    pub title: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
    pub author: Option<String>,
}

/// A page with its fetched content, ready for export.
#[derive(Debug, Clone)]
pub struct Page {
    pub id: String,
    pub title: String,
    pub created: String,
    pub modified: String,
    pub author: String,
    pub markup: String,
}

impl Page {
    /// `index` is the 1-based position in the section, used for untitled pages.
    pub fn new(meta: &PageMeta, index: usize, markup: String) -> Self {
        let title = match meta.title.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => format!("Untitled_{}", index),
        };
        Page {
            id: meta.id.clone(),
            title,
            created: meta.created.clone().unwrap_or_default(),
            modified: meta.modified.clone().unwrap_or_default(),
            author: meta.author.clone().unwrap_or_else(|| "Unknown".to_string()),
            markup,
        }
    }
}

/// Remote hierarchy the exporter walks. Implementations own auth, retries and timeouts.
#[allow(async_fn_in_trait)]
pub trait ContentSource {
    async fn list_notebooks(&self) -> Result<Vec<Notebook>>;
    async fn list_sections(&self, notebook_id: &str) -> Result<Vec<Section>>;
    async fn list_pages(&self, section_id: &str) -> Result<Vec<PageMeta>>;
    /// `Ok(None)` means the page has no content, which is not an error.
    async fn fetch_page_markup(&self, page_id: &str) -> Result<Option<String>>;
    async fn fetch_bytes(&self, url: &str) -> Result<Vec<u8>>;
}
