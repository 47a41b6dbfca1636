use std::fmt;

use serde::{Deserialize, Serialize};

pub const DATA_URL_IMAGE_PREFIX: &str = "data:image/";

/// An image reference turned into verified bytes.
///
/// `byte_len` always equals `bytes.len()` and `media_type` always starts with
/// `image/`; the resolver is the only producer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub source: String,
    pub media_type: String,
    pub bytes: Vec<u8>,
    pub base64: String,
    pub data_url: String,
    pub byte_len: usize,
}

impl ResolvedImage {
    pub fn new(
        source: impl Into<String>,
        media_type: impl Into<String>,
        bytes: Vec<u8>,
        base64: String,
    ) -> Self {
        let media_type = media_type.into();
        let data_url = format!("data:{media_type};base64,{base64}");
        let byte_len = bytes.len();
        Self {
            source: source.into(),
            media_type,
            bytes,
            base64,
            data_url,
            byte_len,
        }
    }

    /// Canonical file extension used when uploading the image as a form part.
    pub fn file_extension(&self) -> &'static str {
        extension_for_media_type(&self.media_type)
    }

    pub fn upload_file_name(&self) -> String {
        format!("image.{}", self.file_extension())
    }
}

pub fn extension_for_media_type(media_type: &str) -> &'static str {
    match media_type.trim().to_ascii_lowercase().as_str() {
        "image/jpeg" | "image/jpg" | "image/pjpeg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// An image location returned by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ImageReference {
    Url(String),
    DataUrl(String),
}

impl ImageReference {
    /// Classifies a bare string: inline `data:image/...` values stay inline,
    /// everything else is treated as a remote reference.
    pub fn from_raw(raw: &str) -> Option<Self> {
        let value = raw.trim();
        if value.is_empty() {
            return None;
        }
        if value.to_ascii_lowercase().starts_with(DATA_URL_IMAGE_PREFIX) {
            return Some(Self::DataUrl(value.to_string()));
        }
        Some(Self::Url(value.to_string()))
    }

    pub fn inline(media_type: &str, base64: &str) -> Self {
        Self::DataUrl(format!("data:{media_type};base64,{}", base64.trim()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Url(value) | Self::DataUrl(value) => value.as_str(),
        }
    }

    pub fn to_markdown(&self, index: usize) -> String {
        format!("![image {}]({})", index + 1, self.as_str())
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageMode {
    #[default]
    Generate,
    Edit,
}

impl ImageMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generate => "generate",
            Self::Edit => "edit",
        }
    }
}

/// Caller-facing image request, already normalized from whatever shape the
/// inbound request had.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRequest {
    pub prompt: String,
    #[serde(default)]
    pub mode: ImageMode,
    pub model: Option<String>,
    pub size: Option<String>,
    #[serde(default = "default_n")]
    pub n: u32,
    #[serde(default)]
    pub images: Vec<String>,
    pub provider: Option<String>,
}

impl ImageRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            mode: ImageMode::Generate,
            model: None,
            size: None,
            n: default_n(),
            images: Vec::new(),
            provider: None,
        }
    }
}

fn default_n() -> u32 {
    1
}
