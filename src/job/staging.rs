use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::error::{ProxyError, Result};
use crate::gcp::Storage;
use crate::job::files::{
    build_file_map, copy_with_file_map, list_files, parse_json, upload_target, FileMap,
    RemoteFile,
};

/// Input references of one job and where they land locally.
#[derive(Debug, Clone, Default)]
pub struct DownloadFiles {
    pub remote: Value,
    pub local: Value,
    pub file_map: FileMap,
}

impl DownloadFiles {
    /// Prepare from the raw `download_files` attribute.
    pub fn from_attribute(attr: &str, downloads_dir: &Path) -> Result<Self> {
        Self::from_value(parse_json(attr), downloads_dir)
    }

    pub fn from_value(remote: Value, downloads_dir: &Path) -> Result<Self> {
        let file_map = build_file_map(&remote, downloads_dir)?;
        let local = copy_with_file_map(&remote, &file_map);
        Ok(Self {
            remote,
            local,
            file_map,
        })
    }
}

/// Download every entry of `file_map`, at most `workers` at a time.
pub async fn download_files(
    storage: &Arc<dyn Storage>,
    file_map: &FileMap,
    workers: usize,
) -> Result<()> {
    let mut transfers = Vec::with_capacity(file_map.len());
    for (reference, dest) in file_map {
        let file = RemoteFile::parse(reference)?;
        let storage = Arc::clone(storage);
        let dest = dest.clone();
        transfers.push(async move {
            if let Some(dir) = dest.parent() {
                tokio::fs::create_dir_all(dir).await?;
            }
            storage.download(&file.bucket, &file.object, &dest).await
        });
    }
    run_bounded(workers, transfers).await
}

/// Upload every file below `uploads_dir`, at most `workers` at a time. The
/// first directory level is the bucket, the rest of the relative path is the
/// object name.
pub async fn upload_files(
    storage: &Arc<dyn Storage>,
    uploads_dir: &Path,
    workers: usize,
) -> Result<()> {
    let mut transfers = Vec::new();
    for local in list_files(uploads_dir)? {
        let (bucket, object) = upload_target(uploads_dir, &local)?;
        let storage = Arc::clone(storage);
        transfers.push(async move {
            storage.upload(&bucket, &object, &local).await.inspect_err(|e| {
                tracing::error!(
                    src = %local.display(),
                    bucket = %bucket,
                    object = %object,
                    error = %e,
                    "Upload failed"
                );
            })
        });
    }
    run_bounded(workers, transfers).await
}

/// Run `tasks` with at most `workers` in flight. Every task runs to the end;
/// the first error in completion order is returned.
async fn run_bounded<F>(workers: usize, tasks: Vec<F>) -> Result<()>
where
    F: Future<Output = Result<()>> + Send + 'static,
{
    let limit = Arc::new(Semaphore::new(workers.max(1)));
    let mut set = JoinSet::new();
    for task in tasks {
        let permit = Arc::clone(&limit)
            .acquire_owned()
            .await
            .map_err(|e| ProxyError::Staging(e.to_string()))?;
        set.spawn(async move {
            let _permit = permit;
            task.await
        });
    }

    let mut failure = None;
    while let Some(joined) = set.join_next().await {
        let result = joined
            .map_err(|e| ProxyError::Staging(format!("transfer task failed: {}", e)))
            .and_then(|r| r);
        if let Err(e) = result {
            failure.get_or_insert(e);
        }
    }
    failure.map_or(Ok(()), Err)
}
