//! Error taxonomy for the daily panda run.
//!
//! Every stage returns [`PandaError`] to the orchestrator, which decides
//! whether to retry, log and continue, or abort. [`PandaError::is_fatal`]
//! separates the errors that end the run immediately from the transient
//! ones that are retried a bounded number of times.

use thiserror::Error;

/// Errors produced by the scraping, delivery and storage stages.
#[derive(Debug, Error)]
pub enum PandaError {
    /// A configured source site URL could not be parsed.
    #[error("invalid site URL {url}: {source}")]
    InvalidSiteUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },

    /// No connection could be established to a source or target host.
    #[error("host unreachable for {url}: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The fetched page could not be turned into a document.
    #[error("could not parse page {url}: {reason}")]
    Parse { url: String, reason: String },

    /// The connection succeeded but the body could not be read in full.
    #[error("failed reading body from {url}: {source}")]
    BodyRead {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The body was read but held no bytes.
    #[error("empty body from {url}")]
    EmptyBody { url: String },

    /// The image host answered, but not with an image.
    #[error("not an image at {url}: status {status}, content type {content_type:?}")]
    NotAnImage {
        url: String,
        status: reqwest::StatusCode,
        content_type: String,
    },

    /// A candidate carried no usable image URL.
    #[error("candidate has no usable image URL: {0:?}")]
    InvalidImageUrl(String),

    /// The email API rejected the message; sending it again will not help.
    #[error("mail API error: {0}")]
    Mail(String),

    /// The email API could not be reached or is temporarily refusing work.
    #[error("mail API unavailable: {0}")]
    MailUnavailable(String),

    /// The image host rejected or failed the upload.
    #[error("upload failed: {0}")]
    Upload(String),

    /// A response could not be decoded into the expected shape.
    #[error("could not decode response: {0}")]
    Decode(String),

    /// The document store failed.
    #[error("database error: {0}")]
    Database(#[from] mongodb::error::Error),

    /// A date-keyed lookup that must exist came back empty.
    #[error("no panda was found")]
    NotFound,

    /// Required configuration is missing or unusable.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl PandaError {
    /// Whether this error should end the run instead of being retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            PandaError::InvalidSiteUrl { .. } | PandaError::Unreachable { .. } | PandaError::Config(_)
        )
    }

    /// Whether a failed send may go through if repeated.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PandaError::MailUnavailable(_))
    }
}
