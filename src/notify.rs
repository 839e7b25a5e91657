//! Email notifications with bounded retry.
//!
//! The module uses the same trait-plus-decorator layout for sending:
//! - [`Notifier`]: core trait for dispatching one message
//! - [`MailgunNotifier`]: sends through the Mailgun HTTP API
//! - [`RetrySend`]: decorator that retries any [`Notifier`] a fixed number
//!   of times before surfacing the error
//!
//! Attachments are sent straight from memory as a multipart part; the image
//! is never written to a temporary file first.
//!
//! # Retry Strategy
//!
//! - Only [`PandaError::is_retryable`] errors are retried: transport
//!   failures and 5xx/429 answers. A rejected message is surfaced at once
//! - Up to 3 retries after the first attempt
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter (0-250ms) added to each delay

use crate::error::PandaError;
use crate::models::DownloadedImage;
use crate::utils::truncate_for_log;
use rand::{Rng, rng};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Per-call timeout for the email API.
pub const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Retries after the first failed send.
pub const SEND_RETRIES: usize = 3;

pub const SUCCESS_SUBJECT: &str = "Your daily dose of panda!";

pub const SUCCESS_BODY: &str = "
Hello panda lover!

Attached, you will find today's panda.

You can also see him/her on the cover of today's magazine at https://daily-panda.site 🤩🤩

P.S. These messages are scheduled to go out at 8am GMT everyday. If you receive it at any other time, something went wrong and we had to retry :)
";

pub const FAILURE_SUBJECT: &str = "Bad news, no panda dose today";

pub const FAILURE_BODY: &str =
    "Hi!, Sadly we couldn't find any picture of a panda to send to you today. We'll be back tomorrow.";

/// An in-memory file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// A message ready to be handed to a [`Notifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub recipients: Vec<String>,
    pub attachment: Option<Attachment>,
}

impl Message {
    /// The daily mail carrying the downloaded image.
    pub fn success(sender: &str, recipients: Vec<String>, image: &DownloadedImage) -> Self {
        Self {
            sender: sender.to_string(),
            subject: SUCCESS_SUBJECT.to_string(),
            body: SUCCESS_BODY.to_string(),
            recipients,
            attachment: Some(Attachment {
                filename: image.filename.clone(),
                bytes: image.bytes.clone(),
            }),
        }
    }

    /// The apology sent when no image could be found.
    pub fn failure(sender: &str, recipients: Vec<String>) -> Self {
        Self {
            sender: sender.to_string(),
            subject: FAILURE_SUBJECT.to_string(),
            body: FAILURE_BODY.to_string(),
            recipients,
            attachment: None,
        }
    }
}

/// Something that can deliver a [`Message`].
pub trait Notifier {
    /// Send `message`, returning the provider's message id.
    async fn send(&self, message: &Message) -> Result<String, PandaError>;
}

/// Wrapper that retries any [`Notifier`] with exponential backoff.
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..max_jitter)
/// ```
pub struct RetrySend<T> {
    inner: T,
    max_retries: usize,
    base_delay: Duration,
    max_delay: Duration,
    max_jitter: Duration,
}

impl<T> RetrySend<T>
where
    T: Notifier,
{
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }

    /// Override the jitter ceiling (zero disables jitter).
    #[cfg(test)]
    pub fn with_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }
}

impl<T> fmt::Debug for RetrySend<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySend")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Notifier for RetrySend<T>
where
    T: Notifier,
{
    #[instrument(level = "info", skip_all, fields(subject = %message.subject))]
    async fn send(&self, message: &Message) -> Result<String, PandaError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            match self.inner.send(message).await {
                Ok(id) => return Ok(id),
                Err(e) if !e.is_retryable() => {
                    error!(attempt = attempt + 1, error = %e, "send() failed; not retrying");
                    return Err(e);
                }
                Err(e) => {
                    attempt += 1;
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "send() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self
                        .base_delay
                        .saturating_mul(1 << (attempt - 1).min(16))
                        .min(self.max_delay);
                    let jitter_ms = rng().random_range(0..=self.max_jitter.as_millis() as u64);
                    let delay = delay + Duration::from_millis(jitter_ms);

                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "send() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct MailgunResponse {
    id: String,
    #[serde(default)]
    message: String,
}

/// [`Notifier`] that talks to the Mailgun messages endpoint.
#[derive(Clone)]
pub struct MailgunNotifier {
    client: Client,
    api_base: String,
    domain: String,
    api_key: String,
}

impl fmt::Debug for MailgunNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailgunNotifier")
            .field("api_base", &self.api_base)
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl MailgunNotifier {
    pub fn new(api_base: &str, domain: &str, api_key: &str) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            domain: domain.to_string(),
            api_key: api_key.to_string(),
        }
    }

    fn endpoint(&self) -> String {
        format!("{}/{}/messages", self.api_base, self.domain)
    }

    fn form(message: &Message) -> Result<Form, PandaError> {
        let mut form = Form::new()
            .text("from", message.sender.clone())
            .text("subject", message.subject.clone())
            .text("text", message.body.clone());

        for recipient in &message.recipients {
            form = form.text("to", recipient.clone());
        }

        if let Some(attachment) = message.attachment.as_ref().filter(|a| !a.bytes.is_empty()) {
            let part = Part::bytes(attachment.bytes.clone())
                .file_name(attachment.filename.clone())
                .mime_str("application/octet-stream")
                .map_err(|e| PandaError::Mail(format!("bad attachment: {e}")))?;
            form = form.part("attachment", part);
        }

        Ok(form)
    }
}

impl Notifier for MailgunNotifier {
    #[instrument(level = "info", skip_all, fields(domain = %self.domain, recipients = message.recipients.len()))]
    async fn send(&self, message: &Message) -> Result<String, PandaError> {
        if message.recipients.is_empty() {
            return Err(PandaError::Mail("no recipients".into()));
        }

        let response = self
            .client
            .post(self.endpoint())
            .basic_auth("api", Some(&self.api_key))
            .timeout(SEND_TIMEOUT)
            .multipart(Self::form(message)?)
            .send()
            .await
            .map_err(|e| PandaError::MailUnavailable(format!("could not send message: {e}")))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_else(|e| {
            warn!(%status, error = %e, "Could not read mail API response");
            String::new()
        });

        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(PandaError::MailUnavailable(format!(
                "status {status}: {}",
                truncate_for_log(&body, 300)
            )));
        }
        if !status.is_success() {
            return Err(PandaError::Mail(format!(
                "status {status}: {}",
                truncate_for_log(&body, 300)
            )));
        }

        // Accepted; an unexpected body does not un-send the message
        match serde_json::from_str::<MailgunResponse>(&body) {
            Ok(parsed) => {
                info!(id = %parsed.id, resp = %parsed.message, "Sent email to recipients");
                Ok(parsed.id)
            }
            Err(e) => {
                warn!(error = %e, body = %truncate_for_log(&body, 300), "Sent email; response had no message id");
                Ok(String::new())
            }
        }
    }
}
