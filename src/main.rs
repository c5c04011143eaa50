use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use blocks_gcs_proxy::config::{ProcessConfig, DEFAULT_CONFIG_PATH};
use blocks_gcs_proxy::gcp::{CloudStorage, PubsubMessage, Storage};
use blocks_gcs_proxy::job::pipeline::{build_variable, execute_command};
use blocks_gcs_proxy::job::staging::{download_files, upload_files};
use blocks_gcs_proxy::job::{DownloadFiles, Workspace};
use blocks_gcs_proxy::process::Process;
use blocks_gcs_proxy::shutdown::install_shutdown_handler;
use blocks_gcs_proxy::worker::lease::DOWNLOAD_FILES_ATTR;
use blocks_gcs_proxy::worker::JobExecutor;

#[derive(Parser, Debug)]
#[command(name = "blocks-gcs-proxy")]
#[command(version)]
#[command(about = "Runs a command for each Pub/Sub job message, staging files from and to GCS")]
#[command(propagate_version = true)]
struct Args {
    /// Load configuration from FILE (default: ./config.json)
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Pull job messages and process them until SIGTERM/SIGINT
    Run {
        /// Command template, e.g. `cmd %{download_files.0} %{uploads_dir}`
        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        template: Vec<String>,
    },

    /// Check the config file is valid
    Check {
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        template: Vec<String>,
    },

    /// Download the given gs:// references into DIR/bucket/path
    Download {
        /// Directory which receives bucket_name/path/to/file
        #[arg(long, short = 'd')]
        downloads_dir: PathBuf,

        /// Number of concurrent downloads
        #[arg(long, short = 'n', default_value_t = 5)]
        workers: usize,

        /// Seconds to wait after the downloads finish
        #[arg(long, short = 'w', default_value_t = 0)]
        wait: u64,

        files: Vec<String>,
    },

    /// Upload the files under DIR; the first directory level names the bucket
    Upload {
        #[arg(long, short = 'd')]
        uploads_dir: PathBuf,

        /// Number of concurrent uploads
        #[arg(long, short = 'n', default_value_t = 6)]
        uploaders: usize,
    },

    /// Execute a job from a message file without download nor upload
    Exec {
        /// Path to the message JSON file with attributes and data
        #[arg(long, short = 'm')]
        message: PathBuf,

        /// Workspace directory containing downloads/ and uploads/
        #[arg(long, short = 'w')]
        workspace: PathBuf,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
        template: Vec<String>,
    },
}

fn init_logging(level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .init();
}

fn load_config(path: Option<&Path>, template: Vec<String>) -> Result<ProcessConfig, Box<dyn std::error::Error>> {
    let path = path.unwrap_or_else(|| Path::new(DEFAULT_CONFIG_PATH));
    let mut config = ProcessConfig::load(path)?;
    config.setup(template);
    Ok(config)
}

/// Config for the staging commands, which also work without a config file.
fn load_optional_config(path: Option<&Path>) -> Result<ProcessConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => load_config(Some(path), Vec::new()),
        None => {
            let mut config = ProcessConfig::default();
            config.log.level = "debug".to_string();
            config.setup(Vec::new());
            Ok(config)
        }
    }
}

async fn run(config: ProcessConfig) -> Result<(), Box<dyn std::error::Error>> {
    config.validate()?;
    let shutdown = install_shutdown_handler();
    let process = Process::setup(config).await?;
    process.run(shutdown).await?;
    Ok(())
}

async fn exec(
    config: ProcessConfig,
    message_path: &Path,
    workspace: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let raw = tokio::fs::read_to_string(message_path).await?;
    // Fields other than the message's own (e.g. ackId) are ignored.
    let message: PubsubMessage = serde_json::from_str(&raw)?;

    let workspace = Workspace::open(workspace)?;
    let attr = message
        .attributes
        .get(DOWNLOAD_FILES_ATTR)
        .map(String::as_str)
        .unwrap_or_default();
    let downloads = DownloadFiles::from_attribute(attr, workspace.downloads_dir())?;
    let variable = build_variable(
        &workspace,
        &downloads,
        &message.attributes,
        &message.payload(),
        &config.command.separator,
    );
    println!("Executing job");
    execute_command(&config.command, &variable, &JobExecutor::new(), &message.message_id).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config_path = args.config.as_deref();

    match args.command {
        Commands::Run { template } => {
            let config = load_config(config_path, template)?;
            init_logging(&config.log.level);
            run(config).await?;
        }
        Commands::Check { template } => {
            let config = load_config(config_path, template)?;
            config.validate()?;
            println!("OK");
        }
        Commands::Download {
            downloads_dir,
            workers,
            wait,
            files,
        } => {
            let config = load_optional_config(config_path)?;
            init_logging(&config.log.level);
            let remote = Value::Array(files.into_iter().map(Value::String).collect());
            let downloads = DownloadFiles::from_value(remote, &downloads_dir)?;
            let storage: Arc<dyn Storage> = Arc::new(CloudStorage::new(&config.gcp));
            let result = download_files(&storage, &downloads.file_map, workers).await;
            if wait > 0 {
                tokio::time::sleep(Duration::from_secs(wait)).await;
            }
            result?;
        }
        Commands::Upload {
            uploads_dir,
            uploaders,
        } => {
            let config = load_optional_config(config_path)?;
            init_logging(&config.log.level);
            println!("Uploading files under {}", uploads_dir.display());
            let storage: Arc<dyn Storage> = Arc::new(CloudStorage::new(&config.gcp));
            upload_files(&storage, &uploads_dir, uploaders).await?;
        }
        Commands::Exec {
            message,
            workspace,
            template,
        } => {
            let config = load_config(config_path, template)?;
            init_logging(&config.log.level);
            exec(config, &message, &workspace).await?;
        }
    }

    Ok(())
}
