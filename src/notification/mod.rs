//! Progress notifications for job pipelines.
//!
//! Every pipeline stage is decorated with [`ProgressNotification::wrap`], which
//! publishes one `STARTING` event and exactly one terminal event (`SUCCESS` or
//! `FAILURE`) to the configured topic. Events carry a progress score and a
//! severity derived from [`JobStep`]; events more verbose than the configured
//! threshold are dropped before publishing.
//!
//! Publishing is best effort. A failed publish is logged and reported to the
//! caller, but `wrap` never lets it change the outcome of the stage.

pub mod step;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use base64::Engine;
use tracing::Level;

use crate::config::ProgressNotificationConfig;
use crate::error::{ProxyError, Result};
use crate::gcp::{Publisher, PubsubMessage};

pub use step::{JobStep, Progress, StepStatus};

pub struct ProgressNotification {
    config: ProgressNotificationConfig,
    level: Level,
    publisher: Arc<dyn Publisher>,
}

impl ProgressNotification {
    pub fn new(config: ProgressNotificationConfig, publisher: Arc<dyn Publisher>) -> Result<Self> {
        let level = config.level()?;
        Ok(Self {
            config,
            level,
            publisher,
        })
    }

    pub fn level(&self) -> Level {
        self.level
    }

    /// Run `f` between a starting event and its success or failure event.
    /// The error from `f` is returned unchanged.
    pub async fn wrap<T, F, Fut>(
        &self,
        msg_id: &str,
        step: JobStep,
        attrs: &HashMap<String, String>,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let _ = self.notify(msg_id, step, StepStatus::Starting, attrs).await;
        match f().await {
            Ok(value) => {
                let _ = self.notify(msg_id, step, StepStatus::Success, attrs).await;
                Ok(value)
            }
            Err(e) => {
                let _ = self
                    .notify_with_message(msg_id, step, StepStatus::Failure, attrs, &e.to_string())
                    .await;
                Err(e)
            }
        }
    }

    pub async fn notify(
        &self,
        msg_id: &str,
        step: JobStep,
        st: StepStatus,
        attrs: &HashMap<String, String>,
    ) -> Result<()> {
        let msg = format!("{} {}", step, st);
        self.notify_with_message(msg_id, step, st, attrs, &msg).await
    }

    pub async fn notify_with_message(
        &self,
        msg_id: &str,
        step: JobStep,
        st: StepStatus,
        attrs: &HashMap<String, String>,
        msg: &str,
    ) -> Result<()> {
        let mut attrs = attrs.clone();
        attrs.insert("step".to_string(), step.to_string());
        attrs.insert("step_status".to_string(), st.to_string());
        self.notify_progress(
            msg_id,
            step.progress_for(st),
            step.completed(st),
            step.level_for(st),
            attrs,
            msg,
        )
        .await
    }

    pub async fn notify_progress(
        &self,
        msg_id: &str,
        progress: Progress,
        completed: bool,
        level: Level,
        mut attrs: HashMap<String, String>,
        data: &str,
    ) -> Result<()> {
        // More verbose than the threshold: drop silently.
        if level > self.level {
            return Ok(());
        }
        attrs.insert("progress".to_string(), progress.to_string());
        attrs.insert("completed".to_string(), completed.to_string());
        attrs.insert("job_message_id".to_string(), msg_id.to_string());
        attrs.insert("level".to_string(), level.to_string().to_lowercase());
        attrs.insert("host".to_string(), self.config.hostname.clone());

        tracing::debug!(job_message_id = msg_id, progress, completed, attrs = ?attrs, "Publishing notification");
        let message = PubsubMessage {
            data: base64::engine::general_purpose::STANDARD.encode(data.as_bytes()),
            attributes: attrs,
            ..Default::default()
        };
        self.publisher
            .publish(&self.config.topic, message)
            .await
            .map_err(|e| {
                tracing::warn!(
                    job_message_id = msg_id,
                    progress,
                    topic = %self.config.topic,
                    error = %e,
                    "Failed to publish notification"
                );
                ProxyError::Notification(e.to_string())
            })
    }
}
