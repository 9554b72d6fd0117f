//! Delivery of staged records to the primary message service.

use crate::{DeliveryError, DrainError, DrainResult};
use async_trait::async_trait;
use relay_database::RelayRecord;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Longest `room_id` the primary service accepts.
pub const MAX_ROOM_ID_LEN: usize = 255;
/// Longest `sender_handle` the primary service accepts.
pub const MAX_SENDER_HANDLE_LEN: usize = 100;

const SECRET_HEADER: &str = "X-API-SECRET";
const MAX_ERROR_BODY_CHARS: usize = 256;

/// One delivery attempt for one record.
#[async_trait]
pub trait Deliverer: Send + Sync {
    async fn deliver(&self, record: &RelayRecord) -> Result<(), DeliveryError>;
}

/// Delivery client configuration.
#[derive(Clone)]
pub struct DeliveryConfig {
    /// Base URL of the primary service.
    pub endpoint_url: String,
    /// Sent as `X-API-SECRET` on every call.
    pub shared_secret: String,
    /// Per-call timeout.
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "http://localhost:3000".to_string(),
            shared_secret: String::new(),
            timeout: Duration::from_secs(10),
        }
    }
}

impl std::fmt::Debug for DeliveryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryConfig")
            .field("endpoint_url", &self.endpoint_url)
            .field("shared_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct DeliverMessageRequest<'a> {
    sender_handle: &'a str,
    cipher_blob: &'a str,
    filter_version: i32,
}

/// HTTP client for the primary service's per-room message endpoint.
pub struct PrimaryClient {
    client: Client,
    base_url: Url,
    shared_secret: String,
}

impl PrimaryClient {
    /// Build a client. Invalid URLs and client build failures are
    /// configuration errors.
    pub fn new(config: &DeliveryConfig) -> DrainResult<Self> {
        let base_url = Url::parse(&config.endpoint_url).map_err(|e| {
            DrainError::Config(format!("invalid endpoint URL {:?}: {}", config.endpoint_url, e))
        })?;
        if base_url.cannot_be_a_base() || !matches!(base_url.scheme(), "http" | "https") {
            return Err(DrainError::Config(format!(
                "endpoint URL must be http(s): {}",
                config.endpoint_url
            )));
        }

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| DrainError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            shared_secret: config.shared_secret.clone(),
        })
    }

    /// `{base}/api/messaging/rooms/{room_id}/messages`, with `room_id`
    /// encoded as a single path segment.
    pub fn room_url(&self, room_id: &str) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments
                .pop_if_empty()
                .extend(["api", "messaging", "rooms", room_id, "messages"]);
        }
        url
    }
}

fn classify_transport_error(e: reqwest::Error) -> DeliveryError {
    if e.is_timeout() {
        DeliveryError::Timeout
    } else {
        DeliveryError::Network(e.to_string())
    }
}

#[async_trait]
impl Deliverer for PrimaryClient {
    async fn deliver(&self, record: &RelayRecord) -> Result<(), DeliveryError> {
        let url = self.room_url(&record.room_id);
        let body = DeliverMessageRequest {
            sender_handle: &record.sender_handle,
            cipher_blob: &record.payload,
            filter_version: record.schema_version,
        };

        debug!(record_id = record.id, url = %url, "Delivering record");

        let response = self
            .client
            .post(url)
            .header(SECRET_HEADER, &self.shared_secret)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(DeliveryError::CredentialRejected(status.as_u16()));
        }

        let body = response.text().await.unwrap_or_default();
        Err(DeliveryError::Status {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        })
    }
}

/// Shape checks run before any network call.
pub fn validate_record(record: &RelayRecord) -> DrainResult<()> {
    let reason = if record.room_id.is_empty() {
        Some("room_id is empty".to_string())
    } else if record.room_id.chars().count() > MAX_ROOM_ID_LEN {
        Some(format!("room_id exceeds {} characters", MAX_ROOM_ID_LEN))
    } else if record.sender_handle.is_empty() {
        Some("sender_handle is empty".to_string())
    } else if record.sender_handle.chars().count() > MAX_SENDER_HANDLE_LEN {
        Some(format!("sender_handle exceeds {} characters", MAX_SENDER_HANDLE_LEN))
    } else if record.payload.is_empty() {
        Some("payload is empty".to_string())
    } else {
        None
    };

    match reason {
        Some(reason) => Err(DrainError::MalformedRecord {
            id: record.id,
            reason,
        }),
        None => Ok(()),
    }
}
