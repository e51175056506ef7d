use std::fs;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use quick_xml::escape::escape;
use thiserror::Error;
use tracing::{debug, warn};

use super::media::{self, DecodeError, InlinePayload, MediaKind};
use super::tags::{self, StartTag};
use crate::sanitize::{encode_link_path, sanitize_filename, split_extension, NameClaims};
use crate::source::ContentSource;
use crate::stats::PageTally;

#[derive(Debug, Error)]
pub enum AttachmentError {
    #[error("download failed for {url}: {message}")]
    Fetch { url: String, message: String },
    #[error("could not decode inline payload: {0}")]
    Decode(#[from] DecodeError),
    #[error("unsupported locator {0:?}")]
    UnsupportedLocator(String),
    #[error("could not write {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Which markup construct declared the resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Element carrying `data-attachment` with a file name.
    Declared,
    Image,
    /// `<object>`/`<embed>` with an explicit `type`.
    Embed,
    Audio,
}

#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub origin: Origin,
    pub kind: MediaKind,
    /// Locator as written in the markup (fetched or decoded).
    pub locator: String,
    pub file_name: String,
    pub path: PathBuf,
    /// Byte range of the `src` value that displays this resource, for link rewriting.
    pub link_span: Option<Range<usize>>,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub attachments: Vec<ResolvedAttachment>,
    /// Set only when at least one file was written.
    pub dir: Option<PathBuf>,
    pub tally: PageTally,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.attachments.is_empty()
    }

    /// Files written for the page. Tally counters may count one file twice.
    pub fn stored(&self) -> usize {
        self.attachments.len()
    }

    /// Point every stored image at its local copy. Rewrites by source span, so
    /// images sharing (or lacking) alt text still get their own file.
    pub fn rewrite_image_links(&self, markup: &str, link_base: &str) -> String {
        let mut edits: Vec<(&Range<usize>, String)> = self
            .attachments
            .iter()
            .filter_map(|a| {
                let span = a.link_span.as_ref()?;
                let link = encode_link_path(&format!("{}/{}", link_base, a.file_name));
                // Attribute text: normalization decodes entities later on.
                Some((span, escape(&link).into_owned()))
            })
            .collect();
        edits.sort_by(|a, b| b.0.start.cmp(&a.0.start));

        let mut out = markup.to_string();
        for (span, link) in edits {
            if out.is_char_boundary(span.start) && out.is_char_boundary(span.end) {
                out.replace_range(span.clone(), &link);
            }
        }
        out
    }
}

/// Locate, fetch or decode, and store every embedded resource of one page.
///
/// Files go under `dir`, which is created on the first successful write. A failing
/// reference is logged, counted as an error and skipped.
pub async fn resolve<S: ContentSource>(source: &S, markup: &str, dir: &Path) -> Resolution {
    let tags = tags::start_tags(markup);
    let mut resolver = Resolver::new(source, dir);
    resolver.declared(&tags).await;
    resolver.images(&tags).await;
    resolver.embeds(&tags).await;
    resolver.audio(&tags).await;
    resolver.resolution
}

struct Resolver<'a, S> {
    source: &'a S,
    dir: PathBuf,
    names: NameClaims,
    resolution: Resolution,
}

struct Fetched {
    bytes: Vec<u8>,
    media_type: Option<String>,
}

impl<'a, S: ContentSource> Resolver<'a, S> {
    fn new(source: &'a S, dir: &Path) -> Self {
        Resolver {
            source,
            dir: dir.to_path_buf(),
            names: NameClaims::default(),
            resolution: Resolution::default(),
        }
    }

    async fn declared(&mut self, tags: &[StartTag]) {
        for tag in tags.iter().filter(|t| t.has("data-attachment")) {
            let Some(declared) = tag.value("data-attachment") else { continue };
            let Some(locator) = tag.value("src").or_else(|| tag.value("data")) else {
                continue;
            };

            let result = self.obtain(&locator).await.and_then(|fetched| {
                let media_type = tag.value("type").or(fetched.media_type.clone());
                let mut name = sanitize_filename(&declared);
                if split_extension(&name).1.is_none() {
                    if let Some(ext) = fetched.media_type.as_deref().and_then(media::extension_for) {
                        name = format!("{}.{}", name, ext);
                    }
                }
                let stored = self.store(&name, &fetched.bytes)?;
                Ok((stored, media_type))
            });

            match result {
                Ok(((file_name, path), media_type)) => {
                    let media_type = media_type.unwrap_or_default();
                    self.resolution.tally.attachments += 1;
                    self.count_media(&media_type);
                    self.push(Origin::Declared, MediaKind::from_media_type(&media_type), locator, file_name, path, None);
                }
                Err(e) => self.fail(&declared, &e),
            }
        }
    }

    async fn images(&mut self, tags: &[StartTag]) {
        let mut ordinal = 0usize;
        for tag in tags.iter().filter(|t| t.name == "img" && !t.has("data-attachment")) {
            ordinal += 1;
            let Some(locator) = tag.value("data-fullres-src").or_else(|| tag.value("src")) else {
                continue;
            };
            // Other schemes (cid:, relative paths) have nothing to fetch.
            if !media::is_inline(&locator) && !media::is_remote(&locator) {
                debug!("Ignoring image locator {:?}", locator);
                continue;
            }

            let result = self.obtain(&locator).await.and_then(|fetched| {
                let ext = match fetched.media_type.as_deref() {
                    Some(mt) => media::extension_for(mt).map(str::to_string),
                    None => media::extension_from_url(&locator),
                }
                .unwrap_or_else(|| "png".to_string());
                self.store(&format!("image_{}.{}", ordinal, ext), &fetched.bytes)
            });

            match result {
                Ok((file_name, path)) => {
                    self.resolution.tally.images += 1;
                    let link_span = tag.attr("src").map(|a| a.value_span.clone());
                    self.push(Origin::Image, MediaKind::Image, locator, file_name, path, link_span);
                }
                Err(e) => self.fail(&format!("image {}", ordinal), &e),
            }
        }
    }

    async fn embeds(&mut self, tags: &[StartTag]) {
        let embeds = tags
            .iter()
            .filter(|t| (t.name == "object" || t.name == "embed") && !t.has("data-attachment"));
        for tag in embeds {
            let Some(media_type) = tag.value("type") else { continue };
            let locator = if tag.name == "object" { tag.value("data") } else { tag.value("src") };
            let Some(locator) = locator else { continue };

            let ext = media::extension_for(&media_type).unwrap_or("bin");
            let name = format!("attachment_{}.{}", self.resolution.attachments.len() + 1, ext);
            let result = self
                .obtain(&locator)
                .await
                .and_then(|fetched| self.store(&name, &fetched.bytes));

            match result {
                Ok((file_name, path)) => {
                    self.resolution.tally.attachments += 1;
                    self.count_media(&media_type);
                    self.push(Origin::Embed, MediaKind::from_media_type(&media_type), locator, file_name, path, None);
                }
                Err(e) => self.fail(&name, &e),
            }
        }
    }

    async fn audio(&mut self, tags: &[StartTag]) {
        let mut ordinal = 0usize;
        for tag in tags.iter().filter(|t| t.name == "audio" && !t.has("data-attachment")) {
            let Some(locator) = tag.value("src") else { continue };
            ordinal += 1;

            let result = self.obtain(&locator).await.and_then(|fetched| {
                let ext = match fetched.media_type.as_deref() {
                    Some(mt) => media::extension_for(mt).map(str::to_string),
                    None => media::extension_from_url(&locator),
                }
                .unwrap_or_else(|| "m4a".to_string());
                self.store(&format!("audio_{}.{}", ordinal, ext), &fetched.bytes)
            });

            match result {
                Ok((file_name, path)) => {
                    self.resolution.tally.audio_files += 1;
                    self.push(Origin::Audio, MediaKind::Audio, locator, file_name, path, None);
                }
                Err(e) => self.fail(&format!("audio {}", ordinal), &e),
            }
        }
    }

    async fn obtain(&self, locator: &str) -> Result<Fetched, AttachmentError> {
        if media::is_inline(locator) {
            let payload = InlinePayload::parse(locator)?;
            return Ok(Fetched {
                bytes: payload.bytes,
                media_type: Some(payload.media_type),
            });
        }
        if !media::is_remote(locator) {
            return Err(AttachmentError::UnsupportedLocator(locator.to_string()));
        }
        let bytes = self
            .source
            .fetch_bytes(locator)
            .await
            .map_err(|e| AttachmentError::Fetch {
                url: locator.to_string(),
                message: format!("{:#}", e),
            })?;
        Ok(Fetched { bytes, media_type: None })
    }

    /// Write `bytes` under a name unique within the page directory.
    /// The file appears only once fully written.
    fn store(&mut self, name: &str, bytes: &[u8]) -> Result<(String, PathBuf), AttachmentError> {
        let io_err = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| AttachmentError::Io { path, source }
        };

        fs::create_dir_all(&self.dir).map_err(io_err(&self.dir))?;

        let mut file_name = self.names.next_free(name);
        while self.dir.join(&file_name).exists() {
            self.names.claim(&file_name);
            file_name = self.names.next_free(name);
        }
        let path = self.dir.join(&file_name);

        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_err(&self.dir))?;
        tmp.write_all(bytes).map_err(io_err(&path))?;
        tmp.persist(&path).map_err(|e| AttachmentError::Io {
            path: path.clone(),
            source: e.error,
        })?;

        self.names.claim(&file_name);
        self.resolution.dir = Some(self.dir.clone());
        Ok((file_name, path))
    }

    fn count_media(&mut self, media_type: &str) {
        if media::is_audio(media_type) {
            self.resolution.tally.audio_files += 1;
        } else if media::is_pdf(media_type) {
            self.resolution.tally.pdfs += 1;
        }
    }

    fn push(
        &mut self,
        origin: Origin,
        kind: MediaKind,
        locator: String,
        file_name: String,
        path: PathBuf,
        link_span: Option<Range<usize>>,
    ) {
        debug!("Stored {}", path.display());
        self.resolution.attachments.push(ResolvedAttachment {
            origin,
            kind,
            locator,
            file_name,
            path,
            link_span,
        });
    }

    fn fail(&mut self, what: &str, err: &AttachmentError) {
        warn!("Failed to save attachment {}: {}", what, err);
        self.resolution.tally.errors += 1;
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::source::fake::FakeSource;

    fn dir_entries(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn inline_image_is_decoded() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("page_attachments");
        let res = resolve(&FakeSource::default(), r#"<img src="data:image/png;base64,QUJD">"#, &dir).await;

        assert_eq!(res.attachments.len(), 1);
        assert_eq!(res.attachments[0].file_name, "image_1.png");
        assert_eq!(fs::read(dir.join("image_1.png")).unwrap(), b"ABC");
        assert_eq!(res.tally.images, 1);
        assert_eq!(res.tally.errors, 0);
        assert_eq!(res.dir.as_deref(), Some(dir.as_path()));
    }

    #[tokio::test]
    async fn remote_image_keeps_locator() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default().resource("http://x/a.png", b"png");
        let markup = r#"<h1>Intro</h1><p><b>Hello</b> <img src="http://x/a.png" alt="cat"></p>"#;
        let res = resolve(&source, markup, tmp.path()).await;

        assert_eq!(res.attachments.len(), 1);
        assert_eq!(res.attachments[0].locator, "http://x/a.png");
        assert_eq!(res.attachments[0].origin, Origin::Image);
    }

    #[tokio::test]
    async fn images_without_alt_get_distinct_files() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .resource("http://x/one", b"1")
            .resource("http://x/two", b"2");
        let markup = r#"<img src="http://x/one"><img src="http://x/two">"#;
        let res = resolve(&source, markup, tmp.path()).await;

        let names: Vec<&str> = res.attachments.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, ["image_1.png", "image_2.png"]);
        assert_eq!(fs::read(tmp.path().join("image_2.png")).unwrap(), b"2");
    }

    #[tokio::test]
    async fn no_attachments_creates_no_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("Empty_attachments");
        let res = resolve(&FakeSource::default(), "<p>Just text</p>", &dir).await;

        assert!(res.is_empty());
        assert!(res.dir.is_none());
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn one_bad_payload_does_not_stop_the_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let markup = concat!(
            r#"<img src="data:image/png;base64,QUJD">"#,
            r#"<img src="data:image/png;base64,%%%">"#,
            r#"<img src="data:image/gif;base64,REVG">"#,
        );
        let res = resolve(&FakeSource::default(), markup, tmp.path()).await;

        assert_eq!(res.tally.errors, 1);
        assert_eq!(res.tally.images, 2);
        let names: Vec<&str> = res.attachments.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names, ["image_1.png", "image_3.gif"]);
    }

    #[tokio::test]
    async fn failed_download_leaves_nothing_behind() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("p_attachments");
        let res = resolve(&FakeSource::default(), r#"<img src="https://x/missing.jpg">"#, &dir).await;

        assert!(res.is_empty());
        assert_eq!(res.tally.errors, 1);
        assert_eq!(res.tally.images, 0);
        assert!(!dir.exists());
    }

    #[tokio::test]
    async fn prefers_full_resolution_locator() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .resource("https://x/thumb.jpg", b"small")
            .resource("https://x/full.jpg", b"large");
        let markup = r#"<img src="https://x/thumb.jpg" data-fullres-src="https://x/full.jpg">"#;
        let res = resolve(&source, markup, tmp.path()).await;

        assert_eq!(*source.fetched.borrow(), ["https://x/full.jpg"]);
        assert_eq!(res.attachments[0].file_name, "image_1.jpg");
        assert_eq!(fs::read(&res.attachments[0].path).unwrap(), b"large");
    }

    #[tokio::test]
    async fn declared_files_use_their_names() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default().resource("https://x/res/1/$value", b"%PDF");
        let markup = concat!(
            r#"<object data-attachment="Budget.pdf" type="application/pdf" data="https://x/res/1/$value"/>"#,
            r#"<p data-attachment="notes" src="data:text/plain;base64,QUJD"></p>"#,
        );
        let res = resolve(&source, markup, tmp.path()).await;

        assert_eq!(dir_entries(tmp.path()), ["Budget.pdf", "notes.txt"]);
        assert_eq!(res.tally.attachments, 2);
        assert_eq!(res.tally.pdfs, 1);
        assert!(res.attachments.iter().all(|a| a.origin == Origin::Declared));
    }

    #[tokio::test]
    async fn typed_embeds_are_counted_by_kind() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .resource("https://x/r1", b"pdf")
            .resource("https://x/r2", b"snd")
            .resource("https://x/r3", b"bin");
        let markup = concat!(
            r#"<object data="https://x/r1" type="application/pdf"></object>"#,
            r#"<object type="audio/mpeg" data="https://x/r2"></object>"#,
            r#"<embed src="https://x/r3" type="application/x-custom">"#,
        );
        let res = resolve(&source, markup, tmp.path()).await;

        assert_eq!(dir_entries(tmp.path()), ["attachment_1.pdf", "attachment_2.mp3", "attachment_3.bin"]);
        assert_eq!(res.tally.attachments, 3);
        assert_eq!(res.tally.pdfs, 1);
        assert_eq!(res.tally.audio_files, 1);
        assert_eq!(res.stored(), 3);
    }

    #[tokio::test]
    async fn audio_elements() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .resource("https://x/rec.wav", b"wav")
            .resource("https://x/rec", b"m4a");
        let markup = r#"<audio src="https://x/rec.wav"></audio><audio src="https://x/rec"></audio>"#;
        let res = resolve(&source, markup, tmp.path()).await;

        assert_eq!(dir_entries(tmp.path()), ["audio_1.wav", "audio_2.m4a"]);
        assert_eq!(res.tally.audio_files, 2);
    }

    #[tokio::test]
    async fn colliding_names_are_disambiguated() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default().resource("https://x/a", b"1").resource("https://x/b", b"2");
        let markup = concat!(
            r#"<p data-attachment="image_1.png" src="https://x/a"></p>"#,
            r#"<img src="https://x/b">"#,
        );
        let res = resolve(&source, markup, tmp.path()).await;

        let names: HashSet<&str> = res.attachments.iter().map(|a| a.file_name.as_str()).collect();
        assert_eq!(names.len(), res.attachments.len());
        assert_eq!(dir_entries(tmp.path()), ["image_1.png", "image_1_2.png"]);
        assert_eq!(fs::read(tmp.path().join("image_1.png")).unwrap(), b"1");
    }

    #[tokio::test]
    async fn every_written_file_is_reported_once() {
        let tmp = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .resource("https://x/a.png", b"a")
            .resource("https://x/doc", b"d")
            .resource("https://x/s.mp3", b"s");
        let markup = concat!(
            r#"<img src="https://x/a.png"><img src="https://x/a.png">"#,
            r#"<object data="https://x/doc" type="application/pdf"></object>"#,
            r#"<audio src="https://x/s.mp3"></audio>"#,
        );
        let res = resolve(&source, markup, tmp.path()).await;

        let mut reported: Vec<String> = res.attachments.iter().map(|a| a.file_name.clone()).collect();
        reported.sort();
        assert_eq!(dir_entries(tmp.path()), reported);
    }

    #[tokio::test]
    async fn rewrites_links_by_identity() {
        let tmp = tempfile::tempdir().unwrap();
        let markup = r#"<img src="data:image/png;base64,QUJD"><img alt="" src="data:image/png;base64,REVG">"#;
        let res = resolve(&FakeSource::default(), markup, tmp.path()).await;
        let rewritten = res.rewrite_image_links(markup, "../My Section/Page_attachments");

        assert_eq!(
            rewritten,
            r#"<img src="../My%20Section/Page_attachments/image_1.png"><img alt="" src="../My%20Section/Page_attachments/image_2.png">"#
        );
    }

    #[tokio::test]
    async fn unsupported_schemes_are_ignored_for_images() {
        let tmp = tempfile::tempdir().unwrap();
        let res = resolve(&FakeSource::default(), r#"<img src="cid:abc">"#, tmp.path()).await;
        assert!(res.is_empty());
        assert_eq!(res.tally.errors, 0);
    }
}
