use std::future::Future;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::JobSubscriptionConfig;
use crate::error::Result;
use crate::gcp::Puller;
use crate::worker::lease::JobMessage;

/// Pulls messages one at a time and hands each to a handler.
pub struct JobSubscription {
    config: JobSubscriptionConfig,
    puller: Arc<dyn Puller>,
}

impl JobSubscription {
    pub fn new(config: JobSubscriptionConfig, puller: Arc<dyn Puller>) -> Self {
        Self { config, puller }
    }

    pub fn config(&self) -> &JobSubscriptionConfig {
        &self.config
    }

    /// Loop until `shutdown` is cancelled.
    ///
    /// A handler error is logged and the loop moves on to the next message.
    /// Empty pulls and pull errors wait `pull_interval` before trying again.
    pub async fn listen<F, Fut>(&self, shutdown: CancellationToken, mut handler: F) -> Result<()>
    where
        F: FnMut(JobMessage) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let subscription = self.config.subscription.as_str();
        tracing::info!(subscription, "Start listening");

        while !shutdown.is_cancelled() {
            let pulled = tokio::select! {
                _ = shutdown.cancelled() => break,
                pulled = self.puller.pull(subscription) => pulled,
            };

            match pulled {
                Ok(Some(raw)) => {
                    let message = JobMessage::new(
                        subscription,
                        raw,
                        self.config.sustainer.clone(),
                        Arc::clone(&self.puller),
                    );
                    let message_id = message.message_id().to_string();
                    if let Err(e) = handler(message).await {
                        tracing::error!(subscription, message_id = %message_id, error = %e, "Job error");
                    }
                    continue;
                }
                Ok(None) => {
                    tracing::debug!(subscription, "No message received");
                }
                Err(e) => {
                    tracing::error!(subscription, error = %e, "Failed to pull");
                }
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.pull_interval()) => {}
            }
        }

        tracing::info!(subscription, "Stop listening");
        Ok(())
    }
}
