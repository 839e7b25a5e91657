//! Page fetcher for source sites.
//!
//! Source sites are fetched with certificate verification turned off (their
//! certificates are unreliable), a generous timeout, and a custom
//! User-Agent because some of them refuse the default one.
//!
//! Connection failures are returned as fatal errors. Whether to try another
//! site is up to the orchestrator.

use crate::error::PandaError;
use crate::models::FetchedPage;
use reqwest::Client;
use std::time::Duration;
use tracing::{info, instrument, warn};
use url::Url;

/// User-Agent sent to source sites.
pub const USER_AGENT: &str = "Not Firefox";

/// Client-side timeout for a page fetch.
pub const FETCH_TIMEOUT: Duration = Duration::from_secs(100);

/// Something that can fetch a source page.
pub trait PageFetcher {
    /// Fetch `site` and buffer its body.
    async fn fetch(&self, site: &str) -> Result<FetchedPage, PandaError>;
}

/// [`PageFetcher`] backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpPageFetcher {
    client: Client,
}

impl HttpPageFetcher {
    pub fn new() -> Result<Self, PandaError> {
        let client = Client::builder()
            .danger_accept_invalid_certs(true)
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| PandaError::Config(format!("could not build page client: {e}")))?;
        Ok(Self { client })
    }
}

/// Validate and normalize a configured site URL.
pub fn normalize_url(site: &str) -> Result<Url, PandaError> {
    Url::parse(site.trim()).map_err(|source| PandaError::InvalidSiteUrl {
        url: site.to_string(),
        source,
    })
}

impl PageFetcher for HttpPageFetcher {
    #[instrument(level = "info", skip(self))]
    async fn fetch(&self, site: &str) -> Result<FetchedPage, PandaError> {
        let url = normalize_url(site)?;
        info!(%url, "Getting images from source site");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|source| PandaError::Unreachable {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            // Some sites answer with an error status but still serve images
            warn!(%url, %status, "Source site returned a non-success status");
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| PandaError::BodyRead {
                url: url.to_string(),
                source,
            })?
            .to_vec();

        info!(%url, %status, bytes = body.len(), "Fetched source page");
        Ok(FetchedPage { url, status, body })
    }
}
