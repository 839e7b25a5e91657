//! Entry persistence: one panda of the day per calendar date.
//!
//! The [`EntryStore`] trait exposes the three primitive operations a
//! backend must support. The upsert-by-date and required-read rules live in
//! [`save_entry`] and [`get_entry`] so every backend shares them.
//!
//! # Date Key
//!
//! Entries are keyed by local midnight of the day they belong to (see
//! [`normalize_date`]). Writing twice on the same day updates the existing
//! entry in place; a new identifier is only minted for a new day.

use crate::error::PandaError;
use crate::models::{Entry, NewEntry};
use crate::utils::normalize_date;
use bson::doc;
use bson::oid::ObjectId;
use chrono::{DateTime, Local, Utc};
use mongodb::options::ClientOptions;
use mongodb::{Client, Collection};
use rand::seq::IndexedRandom;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Collection holding one document per day.
pub const COLLECTION: &str = "entries";

/// Captions rotated onto each day's entry.
pub const DAILY_WORDS: &[&str] = &[
    "Pandas are the best.",
    "It’s panda day.",
    "Everyday is panda day.",
    "It’s still panda day.",
    "What day is it?",
    "Panda. Panda. Panda.",
    "It’s time to panda.",
    "Just panda.",
    "Got panda?",
    "Need more pandas.",
];

const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Pick today's caption at random.
pub fn daily_word() -> &'static str {
    DAILY_WORDS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(DAILY_WORDS[0])
}

/// Primitive operations a document store must provide.
pub trait EntryStore {
    /// Look up the entry stored under an exact date key.
    ///
    /// `Ok(None)` means the query ran and found nothing.
    async fn find_by_date(&self, date: DateTime<Utc>) -> Result<Option<Entry>, PandaError>;

    async fn insert(&self, entry: &Entry) -> Result<(), PandaError>;

    /// Overwrite the stored entry with the same id.
    async fn replace(&self, entry: &Entry) -> Result<(), PandaError>;
}

/// Record `new` as the panda of the day `now` falls on.
///
/// An existing entry for that day keeps its id and `created` time; its
/// url, source, filename and caption are overwritten and `updated` is set to
/// `now`. Otherwise a fresh entry is inserted.
#[instrument(level = "info", skip(store, new), fields(file = %new.file_name))]
pub async fn save_entry<S: EntryStore>(
    store: &S,
    new: NewEntry,
    now: DateTime<Local>,
) -> Result<Entry, PandaError> {
    let date = normalize_date(now);
    let now = now.with_timezone(&Utc);

    if let Some(mut existing) = store.find_by_date(date).await? {
        existing.url = new.url;
        existing.source = new.source;
        existing.file_name = new.file_name;
        existing.word_of_the_day = daily_word().to_string();
        existing.updated = now;
        store.replace(&existing).await?;
        info!(id = %existing.id, %date, "Updated panda of the day");
        return Ok(existing);
    }

    let entry = Entry {
        id: ObjectId::new(),
        url: new.url,
        source: new.source,
        file_name: new.file_name,
        word_of_the_day: daily_word().to_string(),
        date,
        created: now,
        updated: now,
    };
    store.insert(&entry).await?;
    info!(id = %entry.id, %date, "Saved new panda of the day");
    Ok(entry)
}

/// Fetch the panda of the day `tm` falls on.
///
/// Fails with [`PandaError::NotFound`] when nothing, or only a blank
/// record, is stored for that day.
#[instrument(level = "info", skip(store))]
pub async fn get_entry<S: EntryStore>(store: &S, tm: DateTime<Local>) -> Result<Entry, PandaError> {
    let date = normalize_date(tm);
    match store.find_by_date(date).await? {
        Some(entry) if !entry.is_blank() => Ok(entry),
        _ => {
            debug!(%date, "No panda stored for date");
            Err(PandaError::NotFound)
        }
    }
}

/// [`EntryStore`] backed by MongoDB.
///
/// Open with [`MongoEntryStore::connect`] and release with
/// [`MongoEntryStore::close`].
#[derive(Debug, Clone)]
pub struct MongoEntryStore {
    client: Client,
    entries: Collection<Entry>,
}

impl MongoEntryStore {
    /// Connect, select `database`, and ping it before returning.
    #[instrument(level = "info", skip(url))]
    pub async fn connect(url: &str, database: &str) -> Result<Self, PandaError> {
        if url.is_empty() || database.is_empty() {
            return Err(PandaError::Config(
                "MONGO_URL and MONGO_DATABASE are required".into(),
            ));
        }

        let mut options = ClientOptions::parse(url).await?;
        options.app_name = Some(env!("CARGO_PKG_NAME").to_string());
        options.connect_timeout = Some(CONNECT_TIMEOUT);
        options.server_selection_timeout = Some(CONNECT_TIMEOUT);

        let client = Client::with_options(options)?;
        let db = client.database(database);
        db.run_command(doc! { "ping": 1 }).await?;
        info!(database, "Connected to document store");

        Ok(Self {
            entries: db.collection(COLLECTION),
            client,
        })
    }

    /// Release the connection pool.
    pub async fn close(self) {
        self.client.shutdown().await;
        debug!("Closed document store connection");
    }
}

impl EntryStore for MongoEntryStore {
    async fn find_by_date(&self, date: DateTime<Utc>) -> Result<Option<Entry>, PandaError> {
        let filter = doc! { "date": bson::DateTime::from_chrono(date) };
        Ok(self.entries.find_one(filter).await?)
    }

    async fn insert(&self, entry: &Entry) -> Result<(), PandaError> {
        self.entries.insert_one(entry).await?;
        Ok(())
    }

    async fn replace(&self, entry: &Entry) -> Result<(), PandaError> {
        self.entries
            .replace_one(doc! { "_id": entry.id }, entry)
            .await?;
        Ok(())
    }
}
