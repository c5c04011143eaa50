use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{CommandConfig, ProcessConfig};
use crate::error::Result;
use crate::gcp::{CloudStorage, Publisher, PubsubClient, Puller, Storage};
use crate::job::Job;
use crate::notification::ProgressNotification;
use crate::worker::JobSubscription;

/// Wires configuration and collaborators into the subscription loop.
pub struct Process {
    command: Arc<CommandConfig>,
    subscription: JobSubscription,
    notification: Arc<ProgressNotification>,
    storage: Arc<dyn Storage>,
    download_workers: usize,
    upload_workers: usize,
}

impl Process {
    /// Build against the Google Cloud REST endpoints from `config.gcp`.
    pub async fn setup(config: ProcessConfig) -> Result<Self> {
        let pubsub = Arc::new(PubsubClient::new(&config.gcp));
        let storage = Arc::new(CloudStorage::new(&config.gcp));
        Self::with_clients(config, pubsub.clone(), pubsub, storage).await
    }

    /// Build against arbitrary collaborators. Resolves the sustainer timing
    /// from the subscription when it is not configured.
    pub async fn with_clients(
        mut config: ProcessConfig,
        puller: Arc<dyn Puller>,
        publisher: Arc<dyn Publisher>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        config.job.setup_sustainer(puller.as_ref()).await?;
        let notification = Arc::new(ProgressNotification::new(
            config.progress_notification.clone(),
            publisher,
        )?);
        Ok(Self {
            download_workers: config.download.workers.max(1),
            upload_workers: config.upload.workers.max(1),
            command: Arc::new(config.command),
            subscription: JobSubscription::new(config.job, puller),
            notification,
            storage,
        })
    }

    pub fn subscription(&self) -> &JobSubscription {
        &self.subscription
    }

    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let job_config = self.subscription.config();
        let sustain = !job_config.sustainer.disabled;
        let nack_on_error = job_config.nack_on_error;
        let (download_workers, upload_workers) = (self.download_workers, self.upload_workers);

        self.subscription
            .listen(shutdown, move |message| async move {
                let job = Job::new(
                    Arc::clone(&self.command),
                    message,
                    Arc::clone(&self.notification),
                    Arc::clone(&self.storage),
                )
                .with_sustain(sustain)
                .with_nack_on_error(nack_on_error)
                .with_workers(download_workers, upload_workers);
                job.run().await
            })
            .await
    }
}
