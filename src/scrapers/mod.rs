//! Scraping stages that turn a source site into image candidates.
//!
//! A pipeline attempt runs these in order:
//!
//! 1. [`sites`]: pick one source page at random
//! 2. [`fetch`]: GET the page with relaxed TLS and a custom User-Agent
//! 3. [`extract`]: walk its `<img>` elements and keep likely pandas
//!
//! | Source | Notes |
//! |--------|-------|
//! | worldwildlife.org | species page, images carry descriptive `alt` text |
//! | photosforclass.com | search results, title sits on the wrapping link |

pub mod extract;
pub mod fetch;
pub mod sites;
