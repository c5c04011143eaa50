use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::config::CommandConfig;
use crate::error::Result;
use crate::gcp::Storage;
use crate::job::staging::{download_files, upload_files, DownloadFiles};
use crate::job::variable::{build_command, Variable};
use crate::job::workspace::Workspace;
use crate::notification::{JobStep, ProgressNotification, StepStatus};
use crate::worker::executor::JobExecutor;
use crate::worker::lease::{JobMessage, DOWNLOAD_FILES_ATTR};

/// One message processed end to end.
pub struct Job {
    config: Arc<CommandConfig>,
    message: Arc<JobMessage>,
    notification: Arc<ProgressNotification>,
    storage: Arc<dyn Storage>,
    executor: JobExecutor,
    sustain: bool,
    nack_on_error: bool,
    download_workers: usize,
    upload_workers: usize,
}

impl Job {
    pub fn new(
        config: Arc<CommandConfig>,
        message: JobMessage,
        notification: Arc<ProgressNotification>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            config,
            message: Arc::new(message),
            notification,
            storage,
            executor: JobExecutor::new(),
            sustain: true,
            nack_on_error: false,
            download_workers: 1,
            upload_workers: 1,
        }
    }

    pub fn with_sustain(mut self, sustain: bool) -> Self {
        self.sustain = sustain;
        self
    }

    pub fn with_nack_on_error(mut self, nack_on_error: bool) -> Self {
        self.nack_on_error = nack_on_error;
        self
    }

    /// Concurrent transfers for the Downloading and Uploading stages.
    pub fn with_workers(mut self, download: usize, upload: usize) -> Self {
        self.download_workers = download;
        self.upload_workers = upload;
        self
    }

    pub fn message(&self) -> &JobMessage {
        &self.message
    }

    /// Run the whole pipeline for this job's message.
    ///
    /// An invalid message is acknowledged without entering any stage so it is
    /// not redelivered forever. Otherwise the lease is sustained while the
    /// stages run in order; the first failing stage aborts the rest. Cleanup
    /// is notified whatever the outcome.
    pub async fn run(&self) -> Result<()> {
        let msg_id = self.message.message_id().to_string();
        let attrs = HashMap::new();

        if let Err(verr) = self.message.validate() {
            tracing::error!(
                ack_id = %self.message.ack_id(),
                message_id = %msg_id,
                error = %verr,
                "Invalid message"
            );
            self.notification
                .wrap(&msg_id, JobStep::Cancelling, &attrs, || self.message.ack())
                .await?;
            return Err(verr);
        }

        let sustainer = self.sustain.then(|| self.message.spawn_sustainer());

        let _ = self
            .notification
            .notify(&msg_id, JobStep::Processing, StepStatus::Starting, &attrs)
            .await;

        let mut workspace = None;
        let result = self.run_stages(&msg_id, &mut workspace, &attrs).await;
        if result.is_err() && self.nack_on_error {
            if let Err(e) = self
                .notification
                .wrap(&msg_id, JobStep::NackSending, &attrs, || self.message.nack())
                .await
            {
                tracing::warn!(message_id = %msg_id, error = %e, "Failed to nack");
            }
        }
        let cleanup = self
            .notification
            .wrap(&msg_id, JobStep::Cleanup, &attrs, move || async move {
                workspace.map_or(Ok(()), Workspace::close)
            })
            .await;
        let result = result.and(cleanup);

        self.message.done().await;
        if let Some(sustainer) = sustainer {
            sustainer.join().await;
        }
        result
    }

    /// Creating the workspace is part of Preparing. Once created it is left
    /// in `slot` for cleanup, whatever the later stages do.
    async fn run_stages(
        &self,
        msg_id: &str,
        slot: &mut Option<Workspace>,
        attrs: &HashMap<String, String>,
    ) -> Result<()> {
        let n = &self.notification;
        let storage = &self.storage;

        let prepared = &mut *slot;
        let downloads = n
            .wrap(msg_id, JobStep::Preparing, attrs, move || async move {
                let workspace = prepared.insert(Workspace::create()?);
                self.setup_download_files(workspace)
            })
            .await?;
        let Some(workspace) = slot.as_ref() else {
            return Ok(());
        };
        n.wrap(msg_id, JobStep::Downloading, attrs, || {
            download_files(storage, &downloads.file_map, self.download_workers)
        })
        .await?;
        n.wrap(msg_id, JobStep::Executing, attrs, || {
            self.execute(msg_id, workspace, &downloads)
        })
        .await?;
        n.wrap(msg_id, JobStep::Uploading, attrs, || {
            upload_files(storage, workspace.uploads_dir(), self.upload_workers)
        })
        .await?;
        n.wrap(msg_id, JobStep::AckSending, attrs, || self.message.ack())
            .await?;
        Ok(())
    }

    fn setup_download_files(&self, workspace: &Workspace) -> Result<DownloadFiles> {
        let attr = self.message.attribute(DOWNLOAD_FILES_ATTR).unwrap_or_default();
        DownloadFiles::from_attribute(attr, workspace.downloads_dir())
    }

    async fn execute(
        &self,
        msg_id: &str,
        workspace: &Workspace,
        downloads: &DownloadFiles,
    ) -> Result<()> {
        let variable = build_variable(
            workspace,
            downloads,
            self.message.attributes(),
            self.message.payload(),
            &self.config.separator,
        );
        execute_command(&self.config, &variable, &self.executor, msg_id).await
    }
}

/// Values visible to command templates. File trees are exposed under two
/// names each.
pub fn build_variable(
    workspace: &Workspace,
    downloads: &DownloadFiles,
    attributes: &HashMap<String, String>,
    payload: &[u8],
    separator: &str,
) -> Variable {
    let path = |p: &std::path::Path| Value::String(p.to_string_lossy().to_string());
    let attrs: Map<String, Value> = attributes
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut data = Map::new();
    data.insert("workspace".to_string(), path(workspace.root()));
    data.insert("downloads_dir".to_string(), path(workspace.downloads_dir()));
    data.insert("uploads_dir".to_string(), path(workspace.uploads_dir()));
    data.insert("download_files".to_string(), downloads.local.clone());
    data.insert("local_download_files".to_string(), downloads.local.clone());
    data.insert("remote_download_files".to_string(), downloads.remote.clone());
    data.insert("attrs".to_string(), Value::Object(attrs.clone()));
    data.insert("attributes".to_string(), Value::Object(attrs));
    data.insert(
        "data".to_string(),
        Value::String(String::from_utf8_lossy(payload).to_string()),
    );
    Variable::new(data, separator)
}

/// Build the command from `config` and run it unless dry-run is set.
pub async fn execute_command(
    config: &CommandConfig,
    variable: &Variable,
    executor: &JobExecutor,
    msg_id: &str,
) -> Result<()> {
    let args = build_command(variable, &config.template, &config.options).inspect_err(|e| {
        tracing::error!(
            message_id = msg_id,
            template = ?config.template,
            error = %e,
            "Command build error"
        );
    })?;
    if config.dryrun {
        tracing::info!(message_id = msg_id, command = ?args, "Dry run, command not executed");
        return Ok(());
    }
    let output = executor.execute(msg_id, &args).await?.into_result(&args)?;
    tracing::debug!(message_id = msg_id, output = %output, "Command output");
    Ok(())
}
