use std::path::PathBuf;

use base64::{Engine as _, engine::general_purpose};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of a model request or response payload.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    Text(String),
    Media(MediaReference),
    FunctionCall { name: String, arguments: Value },
}

impl ContentBlock {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text(content.into())
    }

    pub fn image_path(path: impl Into<PathBuf>, extension: Option<String>) -> Self {
        Self::Media(MediaReference {
            kind: MediaKind::Image,
            source: MediaSource::Path(path.into()),
            extension,
        })
    }

    pub fn image_base64(data: impl Into<String>) -> Self {
        Self::Media(MediaReference {
            kind: MediaKind::Image,
            source: MediaSource::Base64(Base64Payload::Encoded(data.into())),
            extension: None,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
    Other,
}

impl MediaKind {
    /// Kind from the primary part of a MIME type. Anything unparseable counts as an image.
    pub fn from_mime(mime: &str) -> Self {
        let primary = mime
            .split('/')
            .next()
            .map(|part| part.trim().to_ascii_lowercase())
            .unwrap_or_default();

        match primary.as_str() {
            "audio" => Self::Audio,
            "video" => Self::Video,
            "image" | "" => Self::Image,
            _ if !mime.contains('/') => Self::Image,
            _ => Self::Other,
        }
    }
}

/// Image MIME type for a file extension, JPEG when unknown.
pub fn mime_for_extension(extension: &str) -> &'static str {
    match extension.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        _ => "image/jpeg",
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaReference {
    pub kind: MediaKind,
    pub source: MediaSource,
    pub extension: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MediaSource {
    Path(PathBuf),
    Base64(Base64Payload),
    Url(String),
}

/// Inline media as it arrived: already base64 text, or raw bytes.
#[derive(Debug, Clone, PartialEq)]
pub enum Base64Payload {
    Encoded(String),
    Raw(Vec<u8>),
}

impl Base64Payload {
    pub fn to_base64(&self) -> String {
        match self {
            Base64Payload::Encoded(text) => text.clone(),
            Base64Payload::Raw(bytes) => general_purpose::STANDARD.encode(bytes),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClientResponse {
    pub content: Vec<ContentBlock>,
    pub stop_reason: Option<String>,
    pub usage: Usage,
}

impl ClientResponse {
    pub fn from_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            ..Default::default()
        }
    }

    /// First text block, if any.
    pub fn primary_text(&self) -> Option<&str> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Text(text) => Some(text.as_str()),
            ContentBlock::Media(_) | ContentBlock::FunctionCall { .. } => None,
        })
    }

    /// First image carried inline as base64.
    pub fn primary_image(&self) -> Option<&Base64Payload> {
        self.content.iter().find_map(|block| match block {
            ContentBlock::Media(MediaReference {
                kind: MediaKind::Image,
                source: MediaSource::Base64(payload),
                ..
            }) => Some(payload),
            ContentBlock::Media(_) | ContentBlock::Text(_) | ContentBlock::FunctionCall { .. } => {
                None
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DecorationResult {
    pub image_base64: String,
    pub explanation: String,
}
