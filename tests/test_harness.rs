//! In-memory collaborators for pipeline, lease and subscription tests.
#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::Engine;
use tokio::sync::{Notify, Semaphore};

use blocks_gcs_proxy::config::ProgressNotificationConfig;
use blocks_gcs_proxy::gcp::{Publisher, PubsubMessage, Puller, ReceivedMessage, Storage, Subscription};
use blocks_gcs_proxy::notification::ProgressNotification;
use blocks_gcs_proxy::{ProxyError, Result};

pub const SUBSCRIPTION: &str = "projects/test/subscriptions/test-job-subscription";
pub const TOPIC: &str = "projects/test/topics/test-progress-topic";

#[derive(Debug, Clone, PartialEq)]
pub enum PullerEvent {
    Pull,
    Ack(String),
    Extend(String, i64),
}

/// Puller backed by a queue of messages. Records every call.
#[derive(Default)]
pub struct FakePuller {
    pub queue: Mutex<VecDeque<ReceivedMessage>>,
    pub events: Mutex<Vec<PullerEvent>>,
    pub ack_deadline_seconds: i64,
    pub fail_ack: bool,
    pub fail_extend: bool,
    /// When set, every lease extension waits for a permit before returning.
    pub extend_gate: Option<Arc<Semaphore>>,
    pub extend_started: Notify,
}

impl FakePuller {
    pub fn new() -> Self {
        Self {
            ack_deadline_seconds: 60,
            ..Default::default()
        }
    }

    pub fn with_messages(messages: Vec<ReceivedMessage>) -> Self {
        let puller = Self::new();
        puller.queue.lock().unwrap().extend(messages);
        puller
    }

    pub fn events(&self) -> Vec<PullerEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn acks(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PullerEvent::Ack(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn extends(&self) -> Vec<i64> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                PullerEvent::Extend(_, delay) => Some(delay),
                _ => None,
            })
            .collect()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

#[async_trait]
impl Puller for FakePuller {
    async fn pull(&self, _subscription: &str) -> Result<Option<ReceivedMessage>> {
        self.events.lock().unwrap().push(PullerEvent::Pull);
        Ok(self.queue.lock().unwrap().pop_front())
    }

    async fn acknowledge(&self, _subscription: &str, ack_id: &str) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(PullerEvent::Ack(ack_id.to_string()));
        if self.fail_ack {
            return Err(ProxyError::Transport("acknowledge refused".to_string()));
        }
        Ok(())
    }

    async fn extend_lease(
        &self,
        _subscription: &str,
        ack_ids: &[String],
        delay_seconds: i64,
    ) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push(PullerEvent::Extend(ack_ids.join(","), delay_seconds));
        self.extend_started.notify_one();
        if let Some(ref gate) = self.extend_gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        if self.fail_extend {
            return Err(ProxyError::Transport("modifyAckDeadline refused".to_string()));
        }
        Ok(())
    }

    async fn describe_subscription(&self, name: &str) -> Result<Subscription> {
        Ok(Subscription {
            name: name.to_string(),
            topic: String::new(),
            ack_deadline_seconds: self.ack_deadline_seconds,
        })
    }
}

/// Publisher that keeps every published message.
#[derive(Default)]
pub struct FakePublisher {
    pub published: Mutex<Vec<(String, PubsubMessage)>>,
    pub fail: bool,
}

impl FakePublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn messages(&self) -> Vec<PubsubMessage> {
        self.published
            .lock()
            .unwrap()
            .iter()
            .map(|(_, m)| m.clone())
            .collect()
    }

    /// `(step, step_status)` of every event, in publish order.
    pub fn steps(&self) -> Vec<(String, String)> {
        self.messages()
            .iter()
            .map(|m| (m.attributes["step"].clone(), m.attributes["step_status"].clone()))
            .collect()
    }

    pub fn progresses(&self) -> Vec<u32> {
        self.messages()
            .iter()
            .map(|m| m.attributes["progress"].parse().unwrap())
            .collect()
    }
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(&self, topic: &str, message: PubsubMessage) -> Result<()> {
        if self.fail {
            return Err(ProxyError::Transport("publish refused".to_string()));
        }
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), message));
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Upload {
    pub bucket: String,
    pub object: String,
    pub src: PathBuf,
    pub content: Vec<u8>,
}

/// Object store held in memory. Uploads capture the file content at upload time.
#[derive(Default)]
pub struct FakeStorage {
    pub objects: Mutex<HashMap<(String, String), Vec<u8>>>,
    pub downloads: Mutex<Vec<(String, String, PathBuf)>>,
    pub uploads: Mutex<Vec<Upload>>,
}

impl FakeStorage {
    pub fn with_object(self, bucket: &str, object: &str, content: &str) -> Self {
        self.objects.lock().unwrap().insert(
            (bucket.to_string(), object.to_string()),
            content.as_bytes().to_vec(),
        );
        self
    }

    pub fn downloads(&self) -> Vec<(String, String, PathBuf)> {
        self.downloads.lock().unwrap().clone()
    }

    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

#[async_trait]
impl Storage for FakeStorage {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> Result<()> {
        let content = self
            .objects
            .lock()
            .unwrap()
            .get(&(bucket.to_string(), object.to_string()))
            .cloned()
            .ok_or_else(|| ProxyError::Staging(format!("gs://{}/{} not found", bucket, object)))?;
        tokio::fs::write(dest, content).await?;
        self.downloads.lock().unwrap().push((
            bucket.to_string(),
            object.to_string(),
            dest.to_path_buf(),
        ));
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, src: &Path) -> Result<()> {
        let content = tokio::fs::read(src).await?;
        self.uploads.lock().unwrap().push(Upload {
            bucket: bucket.to_string(),
            object: object.to_string(),
            src: src.to_path_buf(),
            content,
        });
        Ok(())
    }
}

/// A received message with the given id and attributes.
pub fn received(message_id: &str, attributes: &[(&str, &str)], data: &str) -> ReceivedMessage {
    ReceivedMessage {
        ack_id: format!("ack-{}", message_id),
        message: PubsubMessage {
            message_id: message_id.to_string(),
            publish_time: None,
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            data: base64::engine::general_purpose::STANDARD.encode(data),
        },
    }
}

pub fn notification(publisher: Arc<FakePublisher>, level: &str) -> Arc<ProgressNotification> {
    let config = ProgressNotificationConfig {
        topic: TOPIC.to_string(),
        log_level: level.to_string(),
        hostname: "test-host".to_string(),
    };
    Arc::new(ProgressNotification::new(config, publisher).unwrap())
}

pub fn decode(data: &str) -> String {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .unwrap();
    String::from_utf8(bytes).unwrap()
}
