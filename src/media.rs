//! Media publishing through the Cloudinary upload API.
//!
//! Images are uploaded unsigned through an upload preset and the returned
//! `secure_url` becomes the public URL stored on the day's entry.
//!
//! Signed calls (the combined GIF of every tagged upload) authenticate with
//! a SHA-1 hex digest over the sorted `key=value` parameters joined by `&`,
//! with the API secret appended.

use crate::error::PandaError;
use crate::utils::truncate_for_log;
use chrono::Utc;
use itertools::Itertools;
use reqwest::Client;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::{Digest, Sha1};
use std::fmt;
use tracing::{info, instrument};

/// Tag shared by every daily upload; the combined GIF is built from it.
pub const UPLOAD_TAG: &str = "panda_image";

/// Transformation applied when combining uploads into a GIF.
pub const GIF_TRANSFORMATION: &str = "dl_800,w_400,h_400,c_fill_pad,g_auto";

/// Something that can host an image and hand back a public URL.
pub trait MediaPublisher {
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, PandaError>;
}

/// Subset of the upload response that is used.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    pub public_id: String,
    pub secure_url: String,
    #[serde(default)]
    pub format: String,
    #[serde(default, rename = "bytes")]
    pub size: u64,
}

/// Cloudinary credentials and endpoints.
#[derive(Clone)]
pub struct CloudinaryPublisher {
    client: Client,
    api_base: String,
    cloud_name: String,
    upload_preset: String,
    api_key: String,
    api_secret: String,
}

impl fmt::Debug for CloudinaryPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CloudinaryPublisher")
            .field("api_base", &self.api_base)
            .field("cloud_name", &self.cloud_name)
            .field("upload_preset", &self.upload_preset)
            .finish_non_exhaustive()
    }
}

impl CloudinaryPublisher {
    pub fn new(
        api_base: &str,
        cloud_name: &str,
        upload_preset: &str,
        api_key: &str,
        api_secret: &str,
    ) -> Self {
        Self {
            client: Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            cloud_name: cloud_name.to_string(),
            upload_preset: upload_preset.to_string(),
            api_key: api_key.to_string(),
            api_secret: api_secret.to_string(),
        }
    }

    fn endpoint(&self, action: &str) -> String {
        format!("{}/{}/image/{}", self.api_base, self.cloud_name, action)
    }

    /// Combine every upload tagged [`UPLOAD_TAG`] into an animated GIF.
    ///
    /// Returns the raw response body; the host answers asynchronously and
    /// the body only acknowledges the request.
    #[instrument(level = "info", skip(self), fields(cloud = %self.cloud_name))]
    pub async fn create_gif(&self) -> Result<String, PandaError> {
        let timestamp = Utc::now().timestamp().to_string();
        let signature = sign(
            &[
                ("tag", UPLOAD_TAG),
                ("timestamp", timestamp.as_str()),
                ("transformation", GIF_TRANSFORMATION),
            ],
            &self.api_secret,
        );

        let payload = serde_json::json!({
            "tag": UPLOAD_TAG,
            "api_key": self.api_key,
            "transformation": GIF_TRANSFORMATION,
            "signature": signature,
            "timestamp": timestamp,
        });

        let response = self
            .client
            .post(self.endpoint("multi"))
            .json(&payload)
            .send()
            .await
            .map_err(|e| PandaError::Upload(format!("could not request gif: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PandaError::Upload(format!("could not read gif response: {e}")))?;
        info!(%status, body = %truncate_for_log(&body, 300), "Requested combined gif");

        if !status.is_success() {
            return Err(PandaError::Upload(format!("gif request failed with {status}")));
        }
        Ok(body)
    }
}

impl MediaPublisher for CloudinaryPublisher {
    #[instrument(level = "info", skip(self, bytes), fields(cloud = %self.cloud_name, bytes = bytes.len()))]
    async fn upload(&self, filename: &str, bytes: &[u8]) -> Result<String, PandaError> {
        let part = Part::bytes(bytes.to_vec())
            .file_name(filename.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| PandaError::Upload(format!("could not build form: {e}")))?;
        let form = Form::new()
            .part("file", part)
            .text("upload_preset", self.upload_preset.clone())
            .text("tags", UPLOAD_TAG);

        let response = self
            .client
            .post(self.endpoint("upload"))
            .multipart(form)
            .send()
            .await
            .map_err(|e| PandaError::Upload(format!("could not send upload: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| PandaError::Upload(format!("could not read upload response: {e}")))?;

        if !status.is_success() {
            return Err(PandaError::Upload(format!(
                "status {status}: {}",
                truncate_for_log(&body, 300)
            )));
        }

        let uploaded: UploadResponse = serde_json::from_str(&body).map_err(|e| {
            PandaError::Decode(format!("{e}; body: {}", truncate_for_log(&body, 300)))
        })?;

        info!(
            public_id = %uploaded.public_id,
            format = %uploaded.format,
            size = uploaded.size,
            "Uploaded image to cloudinary"
        );
        Ok(uploaded.secure_url)
    }
}

/// Compute a request signature over `params` with `secret`.
///
/// Each pair is rendered as `key=value`, the rendered pairs are sorted,
/// joined with `&`, the secret is appended, and the result is SHA-1 hashed
/// and hex encoded.
pub fn sign<K, V>(params: &[(K, V)], secret: &str) -> String
where
    K: fmt::Display,
    V: fmt::Display,
{
    let to_sign = params
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .sorted()
        .join("&");

    let mut hasher = Sha1::new();
    hasher.update(to_sign.as_bytes());
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}
