//! Source sites known to carry panda pictures.
//!
//! One site is picked at random per pipeline attempt. Nothing about earlier
//! picks is remembered, so the same site may come up on consecutive days.

use rand::seq::IndexedRandom;
use tracing::debug;

/// Pages that are scraped for candidate images.
pub const SITE_URLS: &[&str] = &[
    "https://www.worldwildlife.org/species/giant-panda",
    "https://www.photosforclass.com/search/panda",
    "https://www.photosforclass.com/search/panda/2",
    "https://www.photosforclass.com/search/panda/3",
    "https://www.photosforclass.com/search/panda/4",
];

/// Choose one site uniformly at random. `None` only for an empty list.
pub fn select_site<S: AsRef<str>>(sites: &[S]) -> Option<&str> {
    let site = sites.choose(&mut rand::rng()).map(|s| s.as_ref());
    debug!(?site, available = sites.len(), "Selected source site");
    site
}
