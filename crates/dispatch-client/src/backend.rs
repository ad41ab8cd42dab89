use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::config::{ClientConfig, normalize_base_url};
use crate::error::BackendError;
use crate::identity::Identifier;

pub const VERIFY_PATH: &str = "/verify";
pub const MESSAGES_PATH: &str = "/messages";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyRequest {
    #[serde(rename = "telegramId")]
    pub telegram_id: String,
}

/// One historical conversation unit: a driver entry plus dispatcher replies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryRecord {
    pub content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(default, deserialize_with = "deserialize_replies")]
    pub replies: Vec<HistoryReply>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HistoryReply {
    pub reply_content: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    pub reply_at: DateTime<Utc>,
}

/// Backend collaborator used by the verification gate and the history hydrator.
#[async_trait]
pub trait Backend: Send + Sync {
    /// `Ok(())` on 2xx. Non-2xx must map to `BackendError::Http`.
    async fn verify(&self, identifier: &Identifier) -> Result<(), BackendError>;

    async fn fetch_history(
        &self,
        identifier: &Identifier,
    ) -> Result<Vec<HistoryRecord>, BackendError>;
}

/// reqwest-backed backend client.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpBackend {
    pub fn new(config: &ClientConfig) -> Result<Self, BackendError> {
        if config.base_url.trim().is_empty() {
            return Err(BackendError::BaseUrlMissing);
        }
        let base_url = normalize_base_url(&config.base_url)
            .map_err(|error| BackendError::BaseUrlInvalid(error.to_string()))?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(|error| BackendError::ClientInit {
                message: error.to_string(),
            })?;
        Ok(Self {
            base_url,
            timeout: config.request_timeout(),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with('/') {
            Some(format!("{}{}", self.base_url, trimmed))
        } else {
            Some(format!("{}/{}", self.base_url, trimmed))
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, BackendError> {
        let response = request
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| BackendError::Request {
                message: error.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            // The status alone decides the outcome; an unreadable body is reported empty.
            let body = response
                .bytes()
                .await
                .map(|bytes| bytes.to_vec())
                .unwrap_or_default();
            return Err(format_http_error(status, &body));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|error| BackendError::Read {
                message: error.to_string(),
            })?;
        Ok(bytes.to_vec())
    }
}

#[async_trait]
impl Backend for HttpBackend {
    async fn verify(&self, identifier: &Identifier) -> Result<(), BackendError> {
        let url = self.endpoint(VERIFY_PATH).ok_or(BackendError::InvalidPath)?;
        let payload = VerifyRequest {
            telegram_id: identifier.as_str().to_string(),
        };
        self.send(self.http.post(url).json(&payload)).await?;
        Ok(())
    }

    async fn fetch_history(
        &self,
        identifier: &Identifier,
    ) -> Result<Vec<HistoryRecord>, BackendError> {
        let url = self
            .endpoint(MESSAGES_PATH)
            .ok_or(BackendError::InvalidPath)?;
        let bytes = self
            .send(
                self.http
                    .get(url)
                    .query(&[("userId", identifier.as_str())]),
            )
            .await?;
        serde_json::from_slice::<Vec<HistoryRecord>>(&bytes).map_err(|error| {
            BackendError::Decode {
                message: error.to_string(),
            }
        })
    }
}

pub fn format_http_error(status: StatusCode, body: &[u8]) -> BackendError {
    let body = String::from_utf8_lossy(body).trim().to_string();
    let body = if body.is_empty() {
        "<empty>".to_string()
    } else {
        body
    };
    BackendError::Http { status, body }
}

fn deserialize_replies<'de, D>(deserializer: D) -> Result<Vec<HistoryReply>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<HistoryReply>>::deserialize(deserializer)?.unwrap_or_default())
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Millis(i64),
    Text(String),
}

/// Accepts RFC 3339, naive `YYYY-MM-DD[ T]HH:MM:SS[.fff]` (UTC), or epoch
/// milliseconds.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
where
    D: Deserializer<'de>,
{
    match RawTimestamp::deserialize(deserializer)? {
        RawTimestamp::Millis(millis) => Utc
            .timestamp_millis_opt(millis)
            .single()
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {millis}"))),
        RawTimestamp::Text(text) => parse_timestamp(&text)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp: {text}"))),
    }
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if let Ok(parsed) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(parsed.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())
        .map(|naive| naive.and_utc())
}
