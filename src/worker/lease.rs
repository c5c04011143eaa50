use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::SustainerConfig;
use crate::error::{ProxyError, Result};
use crate::gcp::{Puller, ReceivedMessage};

/// Poll period of the sustain loop while it waits for the next deadline.
pub const SUSTAIN_TICK: Duration = Duration::from_millis(100);

/// Attribute every job message must carry.
pub const DOWNLOAD_FILES_ATTR: &str = "download_files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Running,
    Done,
    Acknowledged,
}

impl std::fmt::Display for LeaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LeaseStatus::Running => write!(f, "running"),
            LeaseStatus::Done => write!(f, "done"),
            LeaseStatus::Acknowledged => write!(f, "acknowledged"),
        }
    }
}

/// Delivery state of one pulled message.
///
/// The status only moves forward (`Running -> Done -> Acknowledged`, or
/// straight to `Acknowledged`). Every read and write goes through one lock,
/// which is also held across the acknowledge and lease-extend calls so the
/// sustain loop can never extend a lease that has already been acknowledged.
pub struct JobMessage {
    subscription: String,
    raw: ReceivedMessage,
    payload: Vec<u8>,
    sustainer: SustainerConfig,
    puller: Arc<dyn Puller>,
    status: Mutex<LeaseStatus>,
}

impl std::fmt::Debug for JobMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobMessage")
            .field("subscription", &self.subscription)
            .field("ack_id", &self.raw.ack_id)
            .field("message_id", &self.raw.message.message_id)
            .finish()
    }
}

impl JobMessage {
    pub fn new(
        subscription: impl Into<String>,
        raw: ReceivedMessage,
        sustainer: SustainerConfig,
        puller: Arc<dyn Puller>,
    ) -> Self {
        let payload = raw.message.payload();
        Self {
            subscription: subscription.into(),
            raw,
            payload,
            sustainer,
            puller,
            status: Mutex::new(LeaseStatus::Running),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.message_id().is_empty() {
            return Err(ProxyError::Validation("no message id is given".to_string()));
        }
        if !self.raw.message.attributes.contains_key(DOWNLOAD_FILES_ATTR) {
            return Err(ProxyError::Validation(format!(
                "no {} given",
                DOWNLOAD_FILES_ATTR
            )));
        }
        Ok(())
    }

    pub fn message_id(&self) -> &str {
        &self.raw.message.message_id
    }

    pub fn ack_id(&self) -> &str {
        &self.raw.ack_id
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.raw.message.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> &HashMap<String, String> {
        &self.raw.message.attributes
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub async fn status(&self) -> LeaseStatus {
        *self.status.lock().await
    }

    pub async fn running(&self) -> bool {
        self.status().await == LeaseStatus::Running
    }

    pub async fn ack(&self) -> Result<()> {
        let mut status = self.status.lock().await;
        self.puller
            .acknowledge(&self.subscription, &self.raw.ack_id)
            .await
            .inspect_err(|e| {
                tracing::error!(
                    message_id = %self.message_id(),
                    ack_id = %self.raw.ack_id,
                    error = %e,
                    "Failed to acknowledge"
                );
            })?;
        *status = LeaseStatus::Acknowledged;
        Ok(())
    }

    /// Hand the message back for immediate redelivery and stop sustaining.
    pub async fn nack(&self) -> Result<()> {
        let mut status = self.status.lock().await;
        self.puller
            .extend_lease(&self.subscription, &[self.raw.ack_id.clone()], 0)
            .await?;
        if *status == LeaseStatus::Running {
            *status = LeaseStatus::Done;
        }
        Ok(())
    }

    pub async fn done(&self) {
        let mut status = self.status.lock().await;
        if *status == LeaseStatus::Running {
            *status = LeaseStatus::Done;
        }
    }

    /// Start the sustain loop on its own task.
    ///
    /// The returned handle aborts the task when dropped, so the loop cannot
    /// outlive the pipeline that owns it even if the pipeline unwinds.
    pub fn spawn_sustainer(self: &Arc<Self>) -> SustainerHandle {
        let message = Arc::clone(self);
        SustainerHandle {
            handle: Some(tokio::spawn(async move {
                message.send_lease_periodically().await;
            })),
        }
    }

    /// Extend the lease every `interval` until the status leaves `Running`.
    pub async fn send_lease_periodically(&self) {
        let interval = self.sustainer.interval();
        loop {
            let next_deadline = Instant::now() + interval;
            if !self.wait_and_extend(next_deadline).await {
                break;
            }
        }
        tracing::debug!(message_id = %self.message_id(), "Sustainer stopped");
    }

    /// Returns false once the message is no longer running.
    async fn wait_and_extend(&self, next_deadline: Instant) -> bool {
        let mut ticker = tokio::time::interval(SUSTAIN_TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            let now = ticker.tick().await;
            if !self.running().await {
                return false;
            }
            if now >= next_deadline {
                break;
            }
        }

        let status = self.status.lock().await;
        if *status != LeaseStatus::Running {
            return false;
        }
        let delay = self.sustainer.delay_seconds();
        match self
            .puller
            .extend_lease(&self.subscription, &[self.raw.ack_id.clone()], delay)
            .await
        {
            Ok(()) => {
                tracing::debug!(message_id = %self.message_id(), delay, "Lease extended");
            }
            Err(e) => {
                tracing::warn!(
                    subscription = %self.subscription,
                    message_id = %self.message_id(),
                    delay,
                    error = %e,
                    "Failed to extend lease"
                );
            }
        }
        true
    }
}

/// Owner of a running sustain loop.
#[derive(Debug)]
pub struct SustainerHandle {
    handle: Option<JoinHandle<()>>,
}

impl SustainerHandle {
    /// Wait for the loop to observe the status change and exit.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    tracing::error!(error = %e, "Sustainer task failed");
                }
            }
        }
    }
}

impl Drop for SustainerHandle {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
