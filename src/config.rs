use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};
use crate::gcp::Puller;

pub const DEFAULT_CONFIG_PATH: &str = "./config.json";
pub const DEFAULT_PULL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_SEPARATOR: &str = " ";
pub const ACCESS_TOKEN_ENV: &str = "GOOGLE_OAUTH_ACCESS_TOKEN";

/// Top level configuration, loaded from a JSON file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessConfig {
    #[serde(default)]
    pub command: CommandConfig,
    #[serde(default)]
    pub job: JobSubscriptionConfig,
    #[serde(default)]
    pub progress_notification: ProgressNotificationConfig,
    #[serde(default)]
    pub download: StagingConfig,
    #[serde(default)]
    pub upload: StagingConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub gcp: GcpConfig,
}

impl ProcessConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    /// Fill in defaults. `template` comes from the command line, never from the file.
    pub fn setup(&mut self, template: Vec<String>) {
        self.command.template = template;
        self.job.setup();
        self.download.setup();
        self.upload.setup();
        self.progress_notification.setup();
    }

    /// Checks required for running the subscription loop.
    pub fn validate(&self) -> Result<()> {
        if self.command.template.is_empty() {
            return Err(ProxyError::Config("command template is empty".to_string()));
        }
        if self.job.subscription.is_empty() {
            return Err(ProxyError::Config("job.subscription is required".to_string()));
        }
        if self.progress_notification.topic.is_empty() {
            return Err(ProxyError::Config(
                "progress_notification.topic is required".to_string(),
            ));
        }
        self.progress_notification.level()?;
        Ok(())
    }
}

/// Command template and its dispatch table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    #[serde(skip)]
    pub template: Vec<String>,
    /// Joined base arguments -> alternate template. `"default"` is the fallback.
    #[serde(default)]
    pub options: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub dryrun: bool,
    /// Splits one expanded template entry into several arguments.
    #[serde(default = "default_separator")]
    pub separator: String,
}

fn default_separator() -> String {
    DEFAULT_SEPARATOR.to_string()
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            template: Vec::new(),
            options: HashMap::new(),
            dryrun: false,
            separator: default_separator(),
        }
    }
}

/// Concurrency of one transfer direction.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Transfers in flight at once. Zero means one.
    #[serde(default)]
    pub workers: usize,
}

impl StagingConfig {
    pub fn setup(&mut self) {
        if self.workers == 0 {
            self.workers = 1;
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobSubscriptionConfig {
    #[serde(default)]
    pub subscription: String,
    /// Seconds to wait after an empty pull.
    #[serde(default)]
    pub pull_interval: u64,
    #[serde(default)]
    pub sustainer: SustainerConfig,
    #[serde(default)]
    pub nack_on_error: bool,
}

impl JobSubscriptionConfig {
    pub fn setup(&mut self) {
        if self.pull_interval == 0 {
            self.pull_interval = DEFAULT_PULL_INTERVAL_SECS;
        }
    }

    pub fn pull_interval(&self) -> Duration {
        Duration::from_secs(self.pull_interval)
    }

    /// Resolve the sustainer's delay and interval.
    ///
    /// Values that are not configured explicitly are derived from the
    /// subscription's ack deadline: delay = deadline, interval = 80% of it.
    pub async fn setup_sustainer(&mut self, puller: &dyn Puller) -> Result<()> {
        let cs = &mut self.sustainer;
        if cs.disabled {
            tracing::info!(subscription = %self.subscription, "Sustainer is disabled");
            return Ok(());
        }
        if cs.delay > 0.0 && cs.interval > 0.0 {
            tracing::info!(
                subscription = %self.subscription,
                delay = cs.delay,
                interval = cs.interval,
                "Sustainer config OK"
            );
            return Ok(());
        }

        let subscription = puller
            .describe_subscription(&self.subscription)
            .await
            .inspect_err(|e| {
                tracing::error!(subscription = %self.subscription, error = %e, "Failed to get subscription");
            })?;
        let deadline = subscription.ack_deadline_seconds as f64;
        if cs.delay <= 0.0 {
            cs.delay = deadline;
        }
        if cs.interval <= 0.0 {
            cs.interval = deadline * 0.8;
        }
        tracing::info!(
            subscription = %self.subscription,
            ack_deadline = deadline,
            delay = cs.delay,
            interval = cs.interval,
            "Sustainer config OK"
        );
        Ok(())
    }
}

/// Lease sustaining. `delay` and `interval` are in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SustainerConfig {
    #[serde(default)]
    pub delay: f64,
    #[serde(default)]
    pub interval: f64,
    #[serde(default)]
    pub disabled: bool,
}

impl SustainerConfig {
    pub fn delay_seconds(&self) -> i64 {
        self.delay.round() as i64
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(self.interval.max(0.0))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressNotificationConfig {
    #[serde(default)]
    pub topic: String,
    /// Most verbose severity that still gets published.
    #[serde(default)]
    pub log_level: String,
    #[serde(default)]
    pub hostname: String,
}

impl ProgressNotificationConfig {
    pub fn setup(&mut self) {
        if self.log_level.is_empty() {
            self.log_level = "info".to_string();
        }
        if self.hostname.is_empty() {
            self.hostname = hostname::get()
                .map(|h| h.to_string_lossy().to_string())
                .unwrap_or_else(|_| "Unknown".to_string());
        }
    }

    pub fn level(&self) -> Result<tracing::Level> {
        parse_level(&self.log_level)
    }
}

/// Parse a severity name. Accepts the `tracing` names plus `warning`,
/// `fatal` and `panic`, the last two meaning errors only.
pub fn parse_level(name: &str) -> Result<tracing::Level> {
    match name.trim().to_ascii_lowercase().as_str() {
        "" => Ok(tracing::Level::INFO),
        "warning" => Ok(tracing::Level::WARN),
        "fatal" | "panic" => Ok(tracing::Level::ERROR),
        other => other
            .parse()
            .map_err(|_| ProxyError::Config(format!("unknown log level: {}", name))),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// REST endpoints and credentials for Pub/Sub and Cloud Storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GcpConfig {
    #[serde(default = "default_pubsub_endpoint")]
    pub pubsub_endpoint: String,
    #[serde(default = "default_storage_endpoint")]
    pub storage_endpoint: String,
    /// OAuth2 bearer token. Falls back to `GOOGLE_OAUTH_ACCESS_TOKEN`.
    #[serde(default)]
    pub access_token: Option<String>,
}

fn default_pubsub_endpoint() -> String {
    "https://pubsub.googleapis.com".to_string()
}

fn default_storage_endpoint() -> String {
    "https://storage.googleapis.com".to_string()
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            pubsub_endpoint: default_pubsub_endpoint(),
            storage_endpoint: default_storage_endpoint(),
            access_token: None,
        }
    }
}

impl GcpConfig {
    pub fn access_token(&self) -> Option<String> {
        self.access_token
            .clone()
            .filter(|t| !t.is_empty())
            .or_else(|| std::env::var(ACCESS_TOKEN_ENV).ok())
            .filter(|t| !t.is_empty())
    }
}
