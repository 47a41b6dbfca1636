//! Size- and time-bounded download of a remote image.

use futures_util::StreamExt;
use reqwest::header::LOCATION;
use reqwest::Url;
use tracing::{debug, warn};

use crate::error::{GatewayError, Result};
use crate::net_guard::is_private_host;
use crate::resolver::ResolveOptions;
use crate::transport::{with_deadline, HttpTransport, TransportRequest, TransportResponse};

pub const MAX_REDIRECTS: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    pub bytes: Vec<u8>,
    pub media_type: String,
}

/// Downloads `url`, enforcing `max_bytes` against both the declared
/// `Content-Length` and the bytes actually streamed, all within `timeout`.
///
/// Redirects are followed here, hop by hop, so every target passes the same
/// scheme and private-network checks as the original URL.
pub async fn fetch_bounded(
    transport: &dyn HttpTransport,
    url: &Url,
    options: &ResolveOptions,
) -> Result<FetchedImage> {
    ensure_http_scheme(url)?;
    ensure_host_allowed(url, options.allow_private_network)?;
    with_deadline(
        "image download",
        options.timeout,
        read_bounded(transport, url, options),
    )
    .await
}

pub(crate) fn ensure_http_scheme(url: &Url) -> Result<()> {
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(GatewayError::UnsupportedScheme {
            scheme: other.to_string(),
        }),
    }
}

pub(crate) fn ensure_host_allowed(url: &Url, allow_private_network: bool) -> Result<()> {
    let host = url.host_str().unwrap_or_default();
    if host.is_empty() {
        return Err(GatewayError::invalid_reference(format!("'{url}' has no host")));
    }
    if !allow_private_network && is_private_host(host) {
        warn!(host = %host, "blocked image fetch into private network");
        return Err(GatewayError::BlockedBySsrfPolicy {
            host: host.to_string(),
        });
    }
    Ok(())
}

/// Lower-cased media type with parameters removed, if it is an image type.
pub(crate) fn normalize_image_media_type(raw: Option<&str>) -> Result<String> {
    let media_type = raw
        .and_then(|value| value.split(';').next())
        .map(|value| value.trim().to_ascii_lowercase())
        .unwrap_or_default();
    if media_type.starts_with("image/") && media_type.len() > "image/".len() {
        return Ok(media_type);
    }
    Err(GatewayError::InvalidMediaType {
        media_type: if media_type.is_empty() {
            "<missing>".to_string()
        } else {
            media_type
        },
    })
}

fn is_redirect(status: u16) -> bool {
    matches!(status, 301 | 302 | 303 | 307 | 308)
}

/// Sends GETs until a non-redirect answer, checking each hop's target.
async fn follow_redirects(
    transport: &dyn HttpTransport,
    url: &Url,
    allow_private_network: bool,
) -> Result<TransportResponse> {
    let mut current = url.clone();
    let mut last_status = 0;
    for _ in 0..=MAX_REDIRECTS {
        let response = transport
            .execute(TransportRequest::get(current.clone()))
            .await?;
        if !is_redirect(response.status) {
            return Ok(response);
        }
        let status = response.status;
        last_status = status;
        let Some(location) = response
            .headers
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
        else {
            return Err(GatewayError::UpstreamError {
                status,
                body: "redirect without a Location header".to_string(),
            });
        };
        let next = current.join(location.trim()).map_err(|err| {
            GatewayError::invalid_reference(format!(
                "redirect to '{location}' is not a valid URL: {err}"
            ))
        })?;
        ensure_http_scheme(&next)?;
        ensure_host_allowed(&next, allow_private_network)?;
        debug!(from = %current, to = %next, status, "following image redirect");
        current = next;
    }
    Err(GatewayError::UpstreamError {
        status: last_status,
        body: format!("more than {MAX_REDIRECTS} redirects"),
    })
}

async fn read_bounded(
    transport: &dyn HttpTransport,
    url: &Url,
    options: &ResolveOptions,
) -> Result<FetchedImage> {
    let max_bytes = options.max_bytes;
    let response = follow_redirects(transport, url, options.allow_private_network).await?;
    if !response.is_success() {
        return Err(response.into_upstream_error().await);
    }

    let declared = response.content_length();
    if let Some(declared) = declared {
        if declared > max_bytes {
            return Err(GatewayError::too_large(
                max_bytes,
                format!("declared {declared} bytes"),
            ));
        }
    }
    let media_type = normalize_image_media_type(response.content_type())?;

    let TransportResponse { mut body, .. } = response;
    let capacity = declared.unwrap_or(0).min(max_bytes) as usize;
    let mut bytes = Vec::with_capacity(capacity);
    while let Some(chunk) = body.next().await {
        let chunk = chunk?;
        let received = (bytes.len() + chunk.len()) as u64;
        if received > max_bytes {
            // Dropping the stream aborts the transfer.
            drop(body);
            return Err(GatewayError::too_large(
                max_bytes,
                format!("received at least {received} bytes"),
            ));
        }
        bytes.extend_from_slice(&chunk);
    }

    debug!(url = %url, media_type = %media_type, bytes = bytes.len(), "image downloaded");
    Ok(FetchedImage { bytes, media_type })
}
