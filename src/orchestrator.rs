//! The daily run: scrape, download, mail, publish and record.
//!
//! ```text
//! SelectSite → Fetch → Extract ─┬─ no candidates ─────────────┐
//!                               └─ Download ─┬─ failed ───────┤ (retry)
//!                                            └─ Notify/Publish → done
//! ```
//!
//! Every loop is bounded by an explicit attempt counter:
//!
//! - [`RUN_ATTEMPTS`] full passes starting from site selection
//! - [`PARSE_ATTEMPTS`] tries at reading one fetched page
//! - [`DOWNLOAD_ATTEMPTS`] random candidate picks per pass
//!
//! Fatal errors (bad site URL, unreachable host) end the run at once. Once
//! an image is downloaded the run counts as a success; mail, upload and
//! store failures after that point are logged only.

use crate::cli::Settings;
use crate::download::ImageDownloader;
use crate::error::PandaError;
use crate::media::MediaPublisher;
use crate::models::{Candidate, DownloadedImage, Entry, FetchedPage, NewEntry};
use crate::notify::{Message, Notifier};
use crate::scrapers::extract::extract_from_page;
use crate::scrapers::fetch::PageFetcher;
use crate::scrapers::sites::select_site;
use crate::store::{EntryStore, save_entry};
use chrono::Local;
use rand::seq::IndexedRandom;
use tracing::{error, info, instrument, warn};

/// Full pipeline passes before the run gives up.
pub const RUN_ATTEMPTS: usize = 3;

/// Reads of one fetched page before the pass is abandoned.
pub const PARSE_ATTEMPTS: usize = 2;

/// Candidate downloads per pass.
pub const DOWNLOAD_ATTEMPTS: usize = 3;

/// Wires the stages together for one run.
pub struct Orchestrator<'a, F, D, N, P, S> {
    pub settings: &'a Settings,
    pub sites: Vec<String>,
    pub fetcher: F,
    pub downloader: D,
    pub notifier: N,
    pub publisher: P,
    /// `None` when the document store could not be opened.
    pub store: Option<S>,
}

impl<F, D, N, P, S> Orchestrator<'_, F, D, N, P, S>
where
    F: PageFetcher,
    D: ImageDownloader,
    N: Notifier,
    P: MediaPublisher,
    S: EntryStore,
{
    /// Run the pipeline until an image is produced or attempts run out.
    ///
    /// `Ok(true)` means an image was downloaded and handed on, whatever
    /// happened to the mail, upload and store steps.
    #[instrument(level = "info", skip_all)]
    pub async fn run(&self) -> Result<bool, PandaError> {
        for attempt in 1..=RUN_ATTEMPTS {
            let site = select_site(&self.sites)
                .ok_or_else(|| PandaError::Config("no source sites configured".into()))?;
            info!(attempt, max = RUN_ATTEMPTS, %site, "Starting pipeline attempt");

            let page = match self.fetcher.fetch(site).await {
                Ok(page) => page,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(attempt, %site, error = %e, "Fetch failed; trying again");
                    continue;
                }
            };

            if let Some(image) = self.find_image(&page).await? {
                self.deliver(&image, site).await;
                return Ok(true);
            }
            warn!(attempt, max = RUN_ATTEMPTS, "No image produced on this attempt");
        }

        error!(attempts = RUN_ATTEMPTS, "Could not find a panda today");
        self.notify_failure().await;
        Ok(false)
    }

    /// Extract candidates from `page` and download one of them.
    async fn find_image(&self, page: &FetchedPage) -> Result<Option<DownloadedImage>, PandaError> {
        let Some(candidates) = parse_candidates(page) else {
            return Ok(None);
        };

        if candidates.is_empty() {
            info!(url = %page.url, "No valid images found. Doing nothing...");
            return Ok(None);
        }

        for attempt in 1..=DOWNLOAD_ATTEMPTS {
            let Some(candidate) = candidates.choose(&mut rand::rng()) else {
                break;
            };

            match self.downloader.download(candidate).await {
                Ok(image) => return Ok(Some(image)),
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => warn!(
                    attempt,
                    max = DOWNLOAD_ATTEMPTS,
                    url = %candidate.image_url,
                    error = %e,
                    "Download failed; picking again"
                ),
            }
        }
        Ok(None)
    }

    /// Mail (when enabled) and publish a downloaded image.
    async fn deliver(&self, image: &DownloadedImage, source: &str) {
        info!(filename = %image.filename, content_type = %image.content_type, "Downloaded image");

        if self.settings.send_mail {
            let message =
                Message::success(&self.settings.email_sender, self.settings.recipients(), image);
            if let Err(e) = self.notifier.send(&message).await {
                error!(error = %e, "Couldn't send email");
            }
        }

        match self.publish(image, source).await {
            Ok(entry) => info!(id = %entry.id, url = %entry.url, "Published panda of the day"),
            Err(e) => error!(error = %e, "Couldn't save image"),
        }
    }

    /// Upload the image and record it as today's entry.
    async fn publish(&self, image: &DownloadedImage, source: &str) -> Result<Entry, PandaError> {
        let url = self.publisher.upload(&image.filename, &image.bytes).await?;
        let store = self
            .store
            .as_ref()
            .ok_or_else(|| PandaError::Config("document store unavailable".into()))?;

        let new = NewEntry {
            url,
            source: source.to_string(),
            file_name: image.filename.clone(),
        };
        save_entry(store, new, Local::now()).await
    }

    async fn notify_failure(&self) {
        if !(self.settings.send_mail && self.settings.notify_on_failure) {
            return;
        }
        let message = Message::failure(&self.settings.email_sender, self.settings.recipients());
        if let Err(e) = self.notifier.send(&message).await {
            error!(error = %e, "Couldn't send failure notice");
        }
    }
}

/// Read candidates off a page, retrying a bounded number of times.
///
/// `None` when every read failed.
fn parse_candidates(page: &FetchedPage) -> Option<Vec<Candidate>> {
    parse_candidates_with(page, extract_from_page)
}

fn parse_candidates_with<E>(page: &FetchedPage, mut extract: E) -> Option<Vec<Candidate>>
where
    E: FnMut(&FetchedPage) -> Result<Vec<Candidate>, PandaError>,
{
    for attempt in 1..=PARSE_ATTEMPTS {
        match extract(page) {
            Ok(candidates) => return Some(candidates),
            Err(e) => warn!(attempt, max = PARSE_ATTEMPTS, error = %e, "Error loading HTTP response body"),
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryEntryStore;
    use reqwest::StatusCode;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use url::Url;

    const PANDA_PAGE: &str = r#"<html><body>
        <img src="https://img.example.com/a.jpg" alt="Giant Panda">
        <img src="https://img.example.com/b.jpg" alt="bamboo">
    </body></html>"#;

    const EMPTY_PAGE: &str = "<html><body><p>nothing here</p></body></html>";

    struct FakeFetcher {
        body: Vec<u8>,
        error: Option<fn() -> PandaError>,
        calls: AtomicUsize,
    }

    impl FakeFetcher {
        fn serving(html: &str) -> Self {
            Self {
                body: html.as_bytes().to_vec(),
                error: None,
                calls: AtomicUsize::new(0),
            }
        }

        fn failing(error: fn() -> PandaError) -> Self {
            Self {
                body: Vec::new(),
                error: Some(error),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl PageFetcher for FakeFetcher {
        async fn fetch(&self, site: &str) -> Result<FetchedPage, PandaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(error) = self.error {
                return Err(error());
            }
            Ok(FetchedPage {
                url: Url::parse(site).unwrap(),
                status: StatusCode::OK,
                body: self.body.clone(),
            })
        }
    }

    #[derive(Clone, Copy)]
    enum Outcome {
        Succeed,
        Transient,
        Fatal,
        /// The first pick answers with something that is not an image
        RejectedOnce,
    }

    struct FakeDownloader {
        outcome: Outcome,
        calls: AtomicUsize,
    }

    impl FakeDownloader {
        fn new(outcome: Outcome) -> Self {
            Self {
                outcome,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl ImageDownloader for FakeDownloader {
        async fn download(&self, candidate: &Candidate) -> Result<DownloadedImage, PandaError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Outcome::RejectedOnce if call == 0 => Err(PandaError::NotAnImage {
                    url: candidate.image_url.clone(),
                    status: StatusCode::FORBIDDEN,
                    content_type: "text/html".into(),
                }),
                Outcome::Succeed | Outcome::RejectedOnce => Ok(DownloadedImage {
                    bytes: vec![0xff, 0xd8],
                    content_type: "image/jpeg".into(),
                    filename: format!("{}.jpeg", candidate.alt_text),
                }),
                Outcome::Transient => Err(PandaError::EmptyBody {
                    url: candidate.image_url.clone(),
                }),
                Outcome::Fatal => Err(PandaError::Config("host unreachable".into())),
            }
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        fail: bool,
        sent: Mutex<Vec<Message>>,
    }

    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &Message) -> Result<String, PandaError> {
            self.sent.lock().unwrap().push(message.clone());
            if self.fail {
                Err(PandaError::Mail("rejected".into()))
            } else {
                Ok("<id>".into())
            }
        }
    }

    #[derive(Default)]
    struct FakePublisher {
        fail: bool,
        calls: AtomicUsize,
    }

    impl MediaPublisher for FakePublisher {
        async fn upload(&self, filename: &str, _bytes: &[u8]) -> Result<String, PandaError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(PandaError::Upload("quota".into()))
            } else {
                Ok(format!("https://res.cloudinary.com/demo/{filename}"))
            }
        }
    }

    type TestOrchestrator<'a> = Orchestrator<
        'a,
        FakeFetcher,
        FakeDownloader,
        RecordingNotifier,
        FakePublisher,
        MemoryEntryStore,
    >;

    fn mail_settings() -> Settings {
        Settings {
            send_mail: true,
            mail_recipients: "a@example.com,b@example.com".into(),
            email_sender: "no-reply@daily-panda.site".into(),
            ..Default::default()
        }
    }

    fn orchestrator<'a>(
        settings: &'a Settings,
        fetcher: FakeFetcher,
        downloader: FakeDownloader,
    ) -> TestOrchestrator<'a> {
        Orchestrator {
            settings,
            sites: vec!["https://www.worldwildlife.org/species/giant-panda".into()],
            fetcher,
            downloader,
            notifier: RecordingNotifier::default(),
            publisher: FakePublisher::default(),
            store: Some(MemoryEntryStore::default()),
        }
    }

    fn sent(o: &TestOrchestrator<'_>) -> Vec<Message> {
        o.notifier.sent.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_run_success_notifies_publishes_and_stores() {
        let settings = mail_settings();
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );

        assert!(o.run().await.unwrap());

        let messages = sent(&o);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].recipients, vec!["a@example.com", "b@example.com"]);
        assert_eq!(
            messages[0].attachment.as_ref().unwrap().filename,
            "Giant Panda.jpeg"
        );
        assert_eq!(o.publisher.calls.load(Ordering::SeqCst), 1);

        let store = o.store.as_ref().unwrap();
        assert_eq!(store.len(), 1);
        let entry = store.entries.lock().unwrap()[0].clone();
        assert_eq!(entry.source, "https://www.worldwildlife.org/species/giant-panda");
        assert_eq!(entry.file_name, "Giant Panda.jpeg");
        assert_eq!(entry.url, "https://res.cloudinary.com/demo/Giant Panda.jpeg");
    }

    #[tokio::test]
    async fn test_run_without_send_mail_skips_notifier() {
        let settings = Settings::default();
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );

        assert!(o.run().await.unwrap());
        assert!(sent(&o).is_empty());
        assert_eq!(o.publisher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_no_candidates_ends_softly() {
        let settings = mail_settings();
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(EMPTY_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );

        assert!(!o.run().await.unwrap());
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), RUN_ATTEMPTS);
        assert_eq!(o.downloader.calls.load(Ordering::SeqCst), 0);
        assert_eq!(o.publisher.calls.load(Ordering::SeqCst), 0);
        assert!(sent(&o).is_empty());
    }

    #[tokio::test]
    async fn test_run_download_failures_exhaust_all_attempts() {
        let settings = mail_settings();
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Transient),
        );

        assert!(!o.run().await.unwrap());
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), RUN_ATTEMPTS);
        assert_eq!(
            o.downloader.calls.load(Ordering::SeqCst),
            RUN_ATTEMPTS * DOWNLOAD_ATTEMPTS
        );
        assert_eq!(o.publisher.calls.load(Ordering::SeqCst), 0);
        assert!(sent(&o).is_empty());
    }

    #[tokio::test]
    async fn test_run_non_image_response_picks_again() {
        let settings = mail_settings();
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::RejectedOnce),
        );

        assert!(o.run().await.unwrap());
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(o.downloader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(sent(&o).len(), 1);
        assert_eq!(o.store.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_fatal_download_aborts() {
        let settings = mail_settings();
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Fatal),
        );

        assert!(o.run().await.is_err());
        assert_eq!(o.downloader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_unparseable_page_retries_then_fails() {
        let settings = Settings::default();
        let mut fetcher = FakeFetcher::serving("");
        fetcher.body = vec![0xff, 0xfe, 0xfd];
        let o = orchestrator(&settings, fetcher, FakeDownloader::new(Outcome::Succeed));

        assert!(!o.run().await.unwrap());
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), RUN_ATTEMPTS);
        assert_eq!(o.downloader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_run_fatal_fetch_aborts() {
        let settings = Settings::default();
        let fetcher = FakeFetcher::failing(|| PandaError::Config("bad site".into()));
        let o = orchestrator(&settings, fetcher, FakeDownloader::new(Outcome::Succeed));

        assert!(matches!(o.run().await, Err(PandaError::Config(_))));
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_transient_fetch_is_retried() {
        let settings = Settings::default();
        let fetcher = FakeFetcher::failing(|| PandaError::Parse {
            url: "https://example.com".into(),
            reason: "truncated".into(),
        });
        let o = orchestrator(&settings, fetcher, FakeDownloader::new(Outcome::Succeed));

        assert!(!o.run().await.unwrap());
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), RUN_ATTEMPTS);
    }

    #[tokio::test]
    async fn test_run_publish_failure_still_succeeds() {
        let settings = mail_settings();
        let mut o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );
        o.publisher.fail = true;

        assert!(o.run().await.unwrap());
        assert_eq!(sent(&o).len(), 1);
        assert_eq!(o.store.as_ref().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_run_mail_failure_still_publishes() {
        let settings = mail_settings();
        let mut o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );
        o.notifier.fail = true;

        assert!(o.run().await.unwrap());
        assert_eq!(o.publisher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(o.store.as_ref().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_without_store_still_succeeds() {
        let settings = Settings::default();
        let mut o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );
        o.store = None;

        assert!(o.run().await.unwrap());
        assert_eq!(o.publisher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_failure_notice_when_enabled() {
        let settings = Settings {
            notify_on_failure: true,
            ..mail_settings()
        };
        let o = orchestrator(
            &settings,
            FakeFetcher::serving(EMPTY_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );

        assert!(!o.run().await.unwrap());
        let messages = sent(&o);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].subject, crate::notify::FAILURE_SUBJECT);
        assert!(messages[0].attachment.is_none());
    }

    #[tokio::test]
    async fn test_run_without_sites_is_config_error() {
        let settings = Settings::default();
        let mut o = orchestrator(
            &settings,
            FakeFetcher::serving(PANDA_PAGE),
            FakeDownloader::new(Outcome::Succeed),
        );
        o.sites.clear();

        assert!(matches!(o.run().await, Err(PandaError::Config(_))));
        assert_eq!(o.fetcher.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_parse_candidates_gives_up_on_bad_body() {
        let page = FetchedPage {
            url: Url::parse("https://example.com").unwrap(),
            status: StatusCode::OK,
            body: Vec::new(),
        };
        assert!(parse_candidates(&page).is_none());
    }

    #[test]
    fn test_parse_candidates_reads_same_page_bounded_times() {
        let page = FetchedPage {
            url: Url::parse("https://example.com").unwrap(),
            status: StatusCode::OK,
            body: vec![0xff, 0xfe],
        };
        let mut seen = Vec::new();
        let result = parse_candidates_with(&page, |p| {
            seen.push(std::ptr::from_ref(p));
            extract_from_page(p)
        });

        assert!(result.is_none());
        assert_eq!(seen.len(), PARSE_ATTEMPTS);
        assert!(seen.iter().all(|p| std::ptr::eq(*p, &page)));
    }

    #[test]
    fn test_parse_candidates_stops_after_first_good_read() {
        let page = FetchedPage {
            url: Url::parse("https://example.com").unwrap(),
            status: StatusCode::OK,
            body: PANDA_PAGE.as_bytes().to_vec(),
        };
        let mut reads = 0;
        let result = parse_candidates_with(&page, |p| {
            reads += 1;
            if reads == 1 {
                Err(PandaError::Parse {
                    url: p.url.to_string(),
                    reason: "truncated".into(),
                })
            } else {
                extract_from_page(p)
            }
        });

        assert_eq!(result.map(|c| c.len()), Some(1));
        assert_eq!(reads, 2);
    }
}
