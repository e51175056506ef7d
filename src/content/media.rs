use base64::Engine;
use percent_encoding::percent_decode_str;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Document,
    Unknown,
}

impl MediaKind {
    pub fn from_media_type(media_type: &str) -> Self {
        let mt = media_type.to_ascii_lowercase();
        if mt.starts_with("image/") {
            MediaKind::Image
        } else if mt.starts_with("audio/") {
            MediaKind::Audio
        } else if mt.starts_with("application/") || mt.starts_with("text/") {
            MediaKind::Document
        } else {
            MediaKind::Unknown
        }
    }
}

pub fn is_pdf(media_type: &str) -> bool {
    media_type.to_ascii_lowercase().contains("pdf")
}

pub fn is_audio(media_type: &str) -> bool {
    media_type.to_ascii_lowercase().contains("audio")
}

/// File extension (without dot) for a media type, if it is one we know.
pub fn extension_for(media_type: &str) -> Option<&'static str> {
    let mt = media_type.trim().to_ascii_lowercase();
    let mt = mt.split(';').next().unwrap_or("").trim();
    let ext = match mt {
        "image/png" => "png",
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/gif" => "gif",
        "image/bmp" | "image/x-ms-bmp" => "bmp",
        "image/webp" => "webp",
        "image/tiff" => "tiff",
        "image/svg+xml" => "svg",
        "image/x-icon" | "image/vnd.microsoft.icon" => "ico",
        "image/heic" => "heic",
        "audio/mp4" | "audio/x-m4a" | "audio/m4a" => "m4a",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/wav" | "audio/x-wav" | "audio/wave" => "wav",
        "audio/ogg" => "ogg",
        "audio/aac" => "aac",
        "audio/x-ms-wma" => "wma",
        "video/mp4" => "mp4",
        "video/quicktime" => "mov",
        "video/x-msvideo" => "avi",
        "application/pdf" => "pdf",
        "application/msword" => "doc",
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => "docx",
        "application/vnd.ms-excel" => "xls",
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => "xlsx",
        "application/vnd.ms-powerpoint" => "ppt",
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => "pptx",
        "application/zip" | "application/x-zip-compressed" => "zip",
        "application/json" => "json",
        "application/xml" | "text/xml" => "xml",
        "text/plain" => "txt",
        "text/csv" => "csv",
        "text/html" => "html",
        "application/octet-stream" => "bin",
        _ => return None,
    };
    Some(ext)
}

/// Extension of the last path segment of a URL, ignoring query and fragment.
pub fn extension_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.last()?.to_string();
    match crate::sanitize::split_extension(&segment) {
        (_, Some(ext)) if ext.chars().all(|c| c.is_ascii_alphanumeric()) && ext.len() <= 5 => {
            Some(ext.to_ascii_lowercase())
        }
        _ => None,
    }
}

pub fn is_remote(locator: &str) -> bool {
    let lower = locator.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

pub fn is_inline(locator: &str) -> bool {
    locator.trim_start().get(..5).is_some_and(|p| p.eq_ignore_ascii_case("data:"))
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("not an inline data locator")]
    NotInline,
    #[error("inline payload has no ',' separator")]
    MissingSeparator,
    #[error("invalid base64 payload: {0}")]
    Base64(String),
}

/// Decoded `data:` locator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlinePayload {
    pub media_type: String,
    pub bytes: Vec<u8>,
}

impl InlinePayload {
    pub fn parse(locator: &str) -> Result<Self, DecodeError> {
        let locator = locator.trim();
        if !is_inline(locator) {
            return Err(DecodeError::NotInline);
        }
        let (header, payload) = locator[5..]
            .split_once(',')
            .ok_or(DecodeError::MissingSeparator)?;

        let mut params = header.split(';').map(str::trim);
        let media_type = match params.next() {
            Some(mt) if !mt.is_empty() => mt.to_ascii_lowercase(),
            _ => "text/plain".to_string(),
        };
        let base64 = params.any(|p| p.eq_ignore_ascii_case("base64"));

        let bytes = if base64 {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| DecodeError::Base64(e.to_string()))?
        } else {
            percent_decode_str(payload).collect()
        };

        Ok(InlinePayload { media_type, bytes })
    }
}
