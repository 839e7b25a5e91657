//! # Daily Panda
//!
//! A once-a-day batch job that finds a picture of a panda on one of a few
//! known websites, mails it to a list of subscribers, uploads it to an
//! image host and records it as the panda of the day.
//!
//! ## Usage
//!
//! ```sh
//! daily_panda            # the scheduled run
//! daily_panda show       # print today's entry
//! daily_panda gif        # build the combined gif of every panda
//! ```
//!
//! ## Architecture
//!
//! The run is a single sequential pipeline:
//! 1. **Selecting**: pick a source page at random
//! 2. **Fetching**: download the page
//! 3. **Extracting**: collect `<img>` elements that look like pandas
//! 4. **Downloading**: fetch one candidate into memory
//! 5. **Delivering**: mail it, upload it, upsert today's entry
//!
//! Configuration comes from the environment (or a `.env` file) and is read
//! once at startup.

use chrono::{Local, NaiveDate};
use clap::Parser;
use std::process::ExitCode;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod download;
mod error;
mod media;
mod models;
mod notify;
mod orchestrator;
mod scrapers;
mod store;
mod utils;

use cli::{Cli, Command, Settings};
use download::HttpImageDownloader;
use error::PandaError;
use media::CloudinaryPublisher;
use notify::{MailgunNotifier, RetrySend, SEND_RETRIES};
use orchestrator::Orchestrator;
use scrapers::fetch::HttpPageFetcher;
use scrapers::sites::SITE_URLS;
use store::{MongoEntryStore, get_entry};
use utils::midnight_of;

#[tokio::main]
async fn main() -> ExitCode {
    // .env must be loaded before tracing and clap read the environment
    let dotenv = dotenvy::dotenv();

    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    match dotenv {
        Ok(path) => debug!(path = %path.display(), "Loaded .env"),
        Err(e) => debug!(error = %e, "No .env loaded"),
    }

    let args = Cli::parse();
    let command = args.command();
    info!(?command, "daily_panda starting up");

    let start_time = std::time::Instant::now();
    let result = match command {
        Command::Run => run(&args.settings).await,
        Command::Show { date } => show(&args.settings, date).await.map(|_| true),
        Command::Gif => gif(&args.settings).await.map(|_| true),
    };

    let elapsed = start_time.elapsed();
    match result {
        Ok(true) => {
            info!(?elapsed, secs = elapsed.as_secs(), "Execution complete");
            ExitCode::SUCCESS
        }
        Ok(false) => {
            error!(?elapsed, "No panda was produced");
            ExitCode::FAILURE
        }
        Err(e) => {
            error!(?elapsed, error = %e, "Execution failed");
            ExitCode::FAILURE
        }
    }
}

/// The scheduled daily run.
#[instrument(level = "info", skip_all)]
async fn run(settings: &Settings) -> Result<bool, PandaError> {
    let fetcher = HttpPageFetcher::new()?;

    // A store that fails to open only disables recording, not the run
    let store = match MongoEntryStore::connect(&settings.mongo_url, &settings.mongo_database).await {
        Ok(store) => Some(store),
        Err(e) => {
            error!(error = %e, "Could not open document store; entries will not be recorded");
            None
        }
    };

    let mut orchestrator = Orchestrator {
        settings,
        sites: SITE_URLS.iter().map(|s| s.to_string()).collect(),
        fetcher,
        downloader: HttpImageDownloader::new(),
        notifier: RetrySend::new(
            MailgunNotifier::new(&settings.mg_api_base, &settings.mg_domain, &settings.mg_api_key),
            SEND_RETRIES,
            std::time::Duration::from_secs(1),
        ),
        publisher: CloudinaryPublisher::new(
            &settings.cd_api_base,
            &settings.cd_cloud_name,
            &settings.cd_upload_preset,
            &settings.cd_api_key,
            &settings.cd_api_secret,
        ),
        store,
    };

    let result = orchestrator.run().await;

    if let Some(store) = orchestrator.store.take() {
        store.close().await;
    }
    result
}

/// Print the entry recorded for `date` (today when absent).
#[instrument(level = "info", skip(settings))]
async fn show(settings: &Settings, date: Option<NaiveDate>) -> Result<(), PandaError> {
    let when = match date {
        Some(day) => midnight_of(day)
            .map(|utc| utc.with_timezone(&Local))
            .ok_or_else(|| PandaError::Config(format!("no local midnight for {day}")))?,
        None => Local::now(),
    };

    let store = MongoEntryStore::connect(&settings.mongo_url, &settings.mongo_database).await?;
    let result = get_entry(&store, when).await;
    store.close().await;
    let entry = result?;

    println!("date:     {}", entry.date.with_timezone(&Local).date_naive());
    println!("caption:  {}", entry.word_of_the_day);
    println!("file:     {}", entry.file_name);
    println!("url:      {}", entry.url);
    println!("source:   {}", entry.source);
    println!("updated:  {}", entry.updated.to_rfc3339());
    Ok(())
}

/// Ask the image host to build the combined gif.
#[instrument(level = "info", skip_all)]
async fn gif(settings: &Settings) -> Result<(), PandaError> {
    if settings.cd_api_key.is_empty() || settings.cd_api_secret.is_empty() {
        return Err(PandaError::Config(
            "CD_API_KEY and CD_API_SECRET are required for signed requests".into(),
        ));
    }

    let publisher = CloudinaryPublisher::new(
        &settings.cd_api_base,
        &settings.cd_cloud_name,
        &settings.cd_upload_preset,
        &settings.cd_api_key,
        &settings.cd_api_secret,
    );
    let body = publisher.create_gif().await?;
    println!("{body}");
    Ok(())
}
