//! Image downloader.
//!
//! Fetches one candidate image into memory together with its content type.
//! Nothing is written to disk; the bytes go straight to the mail attachment
//! and the upload form.
//!
//! A host that cannot be reached at all ends the run. An error status, a
//! non-image content type, or a body that cannot be read or comes back
//! empty is reported as a transient error so the orchestrator can try
//! another candidate.

use crate::error::PandaError;
use crate::models::{Candidate, DownloadedImage};
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use tracing::{info, instrument, warn};
use url::Url;

/// Label used when a candidate has no alt text.
pub const FALLBACK_NAME: &str = "panda";

/// Content type assumed when the image host does not send one.
pub const FALLBACK_CONTENT_TYPE: &str = "image/png";

/// Something that can fetch a candidate image.
pub trait ImageDownloader {
    async fn download(&self, candidate: &Candidate) -> Result<DownloadedImage, PandaError>;
}

/// [`ImageDownloader`] using a default `reqwest` client.
#[derive(Debug, Clone, Default)]
pub struct HttpImageDownloader {
    client: Client,
}

impl HttpImageDownloader {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ImageDownloader for HttpImageDownloader {
    #[instrument(level = "info", skip_all, fields(url = %candidate.image_url))]
    async fn download(&self, candidate: &Candidate) -> Result<DownloadedImage, PandaError> {
        let url = Url::parse(&candidate.image_url)
            .map_err(|_| PandaError::InvalidImageUrl(candidate.image_url.clone()))?;

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| PandaError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .unwrap_or_else(|| {
                warn!(%url, fallback = FALLBACK_CONTENT_TYPE, "No Content-Type on image");
                FALLBACK_CONTENT_TYPE.to_string()
            });

        let status = response.status();
        if !status.is_success() || !is_image(&content_type) {
            return Err(PandaError::NotAnImage {
                url: url.to_string(),
                status,
                content_type,
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| PandaError::BodyRead {
                url: url.to_string(),
                source,
            })?
            .to_vec();

        if bytes.is_empty() {
            return Err(PandaError::EmptyBody { url: url.to_string() });
        }

        let filename = derive_filename(&candidate.alt_text, &content_type);
        info!(%filename, %content_type, bytes = bytes.len(), "Downloaded image");

        Ok(DownloadedImage {
            bytes,
            content_type,
            filename,
        })
    }
}

fn is_image(content_type: &str) -> bool {
    content_type
        .trim_start()
        .get(..6)
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case("image/"))
}

/// Build the attachment filename from the candidate label and content type.
///
/// `("Giant Panda", "image/jpeg")` becomes `"Giant Panda.jpeg"`. An empty
/// label falls back to [`FALLBACK_NAME`]; media type parameters such as
/// `; charset=...` are dropped.
pub fn derive_filename(alt_text: &str, content_type: &str) -> String {
    let name = if alt_text.is_empty() {
        FALLBACK_NAME
    } else {
        alt_text
    };
    let media_type = content_type.split(';').next().unwrap_or_default().trim();
    let extension = media_type.strip_prefix("image/").unwrap_or(media_type);
    format!("{name}.{extension}")
}
