//! Image candidate extraction.
//!
//! Every `<img>` in the document is checked on its own, in document order:
//!
//! 1. `src` and `alt` both present and `alt` mentions "panda" (any case):
//!    the image is a candidate labelled with its `alt`.
//! 2. Otherwise, if the immediate parent has a `title` attribute, the image
//!    is a candidate labelled with that title. photosforclass.com wraps its
//!    results this way.
//!
//! Rule 2 does not look at the image itself, so it can admit images that
//! are not pandas at all.
//!
//! Candidates are not deduplicated.

use crate::error::PandaError;
use crate::models::{Candidate, FetchedPage};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, instrument};
use url::Url;

static PANDA_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)panda").unwrap());

/// Decode a fetched page and extract its candidates.
///
/// Fails only when the body cannot be read as a document (empty or not
/// UTF-8). An empty candidate list is a normal outcome.
#[instrument(level = "info", skip_all, fields(url = %page.url, status = %page.status))]
pub fn extract_from_page(page: &FetchedPage) -> Result<Vec<Candidate>, PandaError> {
    let parse_err = |reason: String| PandaError::Parse {
        url: page.url.to_string(),
        reason,
    };

    if page.body.is_empty() {
        return Err(parse_err("empty document".into()));
    }
    let html = std::str::from_utf8(&page.body).map_err(|e| parse_err(e.to_string()))?;

    let candidates = extract_candidates(html, Some(&page.url))?;
    info!(count = candidates.len(), "Extracted image candidates");
    Ok(candidates)
}

/// Walk every image in `html` and apply the selection rules.
///
/// When `base` is given, relative `src` values are resolved against it.
pub fn extract_candidates(html: &str, base: Option<&Url>) -> Result<Vec<Candidate>, PandaError> {
    let document = Html::parse_document(html);
    let img_selector = Selector::parse("img").map_err(|e| PandaError::Parse {
        url: base.map(Url::to_string).unwrap_or_default(),
        reason: e.to_string(),
    })?;

    let mut candidates = Vec::new();
    for element in document.select(&img_selector) {
        let src = element.value().attr("src");
        let alt = element.value().attr("alt");
        let parent_title = element
            .parent()
            .and_then(ElementRef::wrap)
            .and_then(|parent| parent.value().attr("title"));

        let alt_text = match (src, alt, parent_title) {
            (Some(_), Some(alt), _) if PANDA_RE.is_match(alt) => alt,
            (_, _, Some(title)) => title,
            _ => continue,
        };

        let image_url = src.map(|s| resolve_src(s, base)).unwrap_or_default();
        debug!(%image_url, %alt_text, "Image candidate");
        candidates.push(Candidate {
            image_url,
            alt_text: alt_text.to_string(),
        });
    }

    Ok(candidates)
}

fn resolve_src(src: &str, base: Option<&Url>) -> String {
    match base.map(|b| b.join(src)) {
        Some(Ok(resolved)) => resolved.to_string(),
        _ => src.to_string(),
    }
}
