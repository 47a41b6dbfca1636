//! Turns caller-supplied image references into verified bytes.

use std::sync::Arc;
use std::time::Duration;

use imagegate_contracts::images::ResolvedImage;
use reqwest::Url;
use serde_json::Value;
use tracing::debug;

use crate::codec;
use crate::error::{GatewayError, Result};
use crate::fetch::{fetch_bounded, normalize_image_media_type};
use crate::transport::HttpTransport;

pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_IMAGE_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolveOptions {
    pub timeout: Duration,
    pub max_bytes: u64,
    pub allow_private_network: bool,
}

impl Default for ResolveOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_RESOLVE_TIMEOUT,
            max_bytes: DEFAULT_MAX_IMAGE_BYTES,
            allow_private_network: false,
        }
    }
}

#[derive(Clone)]
pub struct ImageResolver {
    transport: Arc<dyn HttpTransport>,
    options: ResolveOptions,
}

impl ImageResolver {
    pub fn new(transport: Arc<dyn HttpTransport>, options: ResolveOptions) -> Self {
        Self { transport, options }
    }

    pub fn options(&self) -> &ResolveOptions {
        &self.options
    }

    /// Like [`ImageResolver::resolve`] for references taken straight out of a
    /// JSON body, where anything but a string is invalid.
    pub async fn resolve_value(&self, reference: &Value) -> Result<ResolvedImage> {
        match reference.as_str() {
            Some(text) => self.resolve(text).await,
            None => Err(GatewayError::invalid_reference(
                "image reference must be a string",
            )),
        }
    }

    pub async fn resolve(&self, reference: &str) -> Result<ResolvedImage> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(GatewayError::invalid_reference("image reference is empty"));
        }
        if has_data_scheme(reference) {
            return self.resolve_inline(reference);
        }
        self.resolve_remote(reference).await
    }

    /// Resolves references one after another, stopping at the first failure.
    pub async fn resolve_all(&self, references: &[String]) -> Result<Vec<ResolvedImage>> {
        let mut resolved = Vec::with_capacity(references.len());
        for reference in references {
            resolved.push(self.resolve(reference).await?);
        }
        Ok(resolved)
    }

    fn resolve_inline(&self, reference: &str) -> Result<ResolvedImage> {
        let Some((header, payload)) = reference["data:".len()..].split_once(',') else {
            return Err(GatewayError::invalid_reference(
                "inline image is missing the ',' separator",
            ));
        };
        let mut params = header.split(';').map(str::trim);
        let declared_type = params.next().unwrap_or_default();
        if !params.any(|param| param.eq_ignore_ascii_case("base64")) {
            return Err(GatewayError::UnsupportedEncoding {
                message: "only base64 inline images are supported".to_string(),
            });
        }
        let media_type = normalize_image_media_type(Some(declared_type))?;

        let bytes = codec::decode(payload).map_err(|err| {
            GatewayError::invalid_reference(format!("inline image payload: {err}"))
        })?;
        let limit = self.options.max_bytes;
        if bytes.len() as u64 > limit {
            return Err(GatewayError::too_large(
                limit,
                format!("decoded {} bytes", bytes.len()),
            ));
        }

        debug!(media_type = %media_type, bytes = bytes.len(), "inline image resolved");
        Ok(build_resolved(summarize_inline(&media_type), media_type, bytes))
    }

    async fn resolve_remote(&self, reference: &str) -> Result<ResolvedImage> {
        let url = Url::parse(reference).map_err(|err| {
            GatewayError::invalid_reference(format!("'{reference}' is not a valid URL: {err}"))
        })?;
        let fetched = fetch_bounded(self.transport.as_ref(), &url, &self.options).await?;
        Ok(build_resolved(
            url.to_string(),
            fetched.media_type,
            fetched.bytes,
        ))
    }
}

fn has_data_scheme(reference: &str) -> bool {
    reference
        .get(..5)
        .map(|prefix| prefix.eq_ignore_ascii_case("data:"))
        .unwrap_or(false)
}

fn build_resolved(source: String, media_type: String, bytes: Vec<u8>) -> ResolvedImage {
    let base64 = codec::encode(&bytes);
    ResolvedImage::new(source, media_type, bytes, base64)
}

/// Inline payloads can be megabytes long; keep only a label as the source.
fn summarize_inline(media_type: &str) -> String {
    format!("data:{media_type};base64,…")
}
