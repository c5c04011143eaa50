//! Collaborator boundary for Google Cloud services.
//!
//! The job engine only talks to the queue and the blob store through the
//! traits in this module:
//!
//! - [`Puller`]: pull / acknowledge / lease extension / subscription lookup
//! - [`Publisher`]: publishes progress notifications to a topic
//! - [`Storage`]: moves objects between a bucket and the local workspace
//!
//! [`pubsub::PubsubClient`] and [`storage::CloudStorage`] implement them over
//! the public REST APIs.

pub mod pubsub;
pub mod storage;

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;

pub use pubsub::PubsubClient;
pub use storage::CloudStorage;

/// Pub/Sub message body as it appears on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PubsubMessage {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message_id: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "deserialize_publish_time"
    )]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Base64 encoded payload.
    #[serde(default)]
    pub data: String,
}

/// RFC 3339 timestamp; an empty string means unset.
fn deserialize_publish_time<'de, D>(d: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(d)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(None),
        Some(s) => DateTime::parse_from_rfc3339(s)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(serde::de::Error::custom),
    }
}

impl PubsubMessage {
    /// Decoded payload. Data that is not valid base64 is taken verbatim.
    pub fn payload(&self) -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(self.data.as_bytes())
            .unwrap_or_else(|_| self.data.as_bytes().to_vec())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedMessage {
    #[serde(default)]
    pub ack_id: String,
    #[serde(default)]
    pub message: PubsubMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub ack_deadline_seconds: i64,
}

#[async_trait]
pub trait Puller: Send + Sync {
    /// Pull at most one message. `None` when the subscription is empty.
    async fn pull(&self, subscription: &str) -> Result<Option<ReceivedMessage>>;

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> Result<()>;

    /// Set the ack deadline of the given messages to `delay_seconds` from now.
    /// A delay of zero makes the messages immediately available for redelivery.
    async fn extend_lease(
        &self,
        subscription: &str,
        ack_ids: &[String],
        delay_seconds: i64,
    ) -> Result<()>;

    async fn describe_subscription(&self, name: &str) -> Result<Subscription>;
}

#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, topic: &str, message: PubsubMessage) -> Result<()>;
}

#[async_trait]
pub trait Storage: Send + Sync {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> Result<()>;

    async fn upload(&self, bucket: &str, object: &str, src: &Path) -> Result<()>;
}
