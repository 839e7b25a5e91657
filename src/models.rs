//! Data models shared by the pipeline stages.
//!
//! - [`FetchedPage`]: raw response from a source site
//! - [`Candidate`]: an image on that page believed to show a panda
//! - [`DownloadedImage`]: the bytes of one chosen candidate
//! - [`Entry`]: the persisted panda of the day
//!
//! Only [`Entry`] outlives a run; the others exist for a single extraction
//! pass.

use bson::oid::ObjectId;
use bson::serde_helpers::chrono_datetime_as_bson_datetime;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use url::Url;

/// A source page as returned by the fetcher, body already buffered.
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// The normalized URL that was requested.
    pub url: Url,
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// An image element that passed the keyword filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    /// Absolute image URL, or empty when the element had no `src`.
    pub image_url: String,
    /// The `alt` text, or the parent's `title` when that rule matched.
    pub alt_text: String,
}

/// Bytes and metadata of a downloaded candidate.
#[derive(Debug, Clone)]
pub struct DownloadedImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub filename: String,
}

/// The panda of the day, one per calendar date.
///
/// Field names on the wire match the `entries` collection layout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    /// Public URL of the uploaded image.
    pub url: String,
    /// Page the image was scraped from.
    pub source: String,
    #[serde(rename = "filename")]
    pub file_name: String,
    #[serde(rename = "wordOfTheDay")]
    pub word_of_the_day: String,
    /// Local midnight of the day this entry belongs to.
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub date: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub created: DateTime<Utc>,
    #[serde(with = "chrono_datetime_as_bson_datetime")]
    pub updated: DateTime<Utc>,
}

impl Entry {
    /// True when none of the descriptive fields carry data.
    pub fn is_blank(&self) -> bool {
        self.source.is_empty() && self.file_name.is_empty() && self.url.is_empty()
    }
}

/// The fields a publish step contributes to an [`Entry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEntry {
    pub url: String,
    pub source: String,
    pub file_name: String,
}
