use std::path::Path;

use async_trait::async_trait;
use reqwest::Url;
use tokio::io::AsyncWriteExt;

use crate::config::GcpConfig;
use crate::error::{ProxyError, Result};
use crate::gcp::Storage;

/// Cloud Storage JSON API client.
#[derive(Debug, Clone)]
pub struct CloudStorage {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

impl CloudStorage {
    pub fn new(config: &GcpConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.storage_endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token(),
        }
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ProxyError::Config(format!("invalid storage endpoint: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| ProxyError::Config("storage endpoint cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// `.../storage/v1/b/{bucket}/o/{object}?alt=media`, object name encoded as one segment.
    fn object_url(&self, bucket: &str, object: &str) -> Result<Url> {
        let mut url = self.url(&["storage", "v1", "b", bucket, "o", object])?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }

    fn upload_url(&self, bucket: &str, object: &str) -> Result<Url> {
        let mut url = self.url(&["upload", "storage", "v1", "b", bucket, "o"])?;
        url.query_pairs_mut()
            .append_pair("uploadType", "media")
            .append_pair("name", object);
        Ok(url)
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

fn staging_err(action: &str, bucket: &str, object: &str, e: impl std::fmt::Display) -> ProxyError {
    ProxyError::Staging(format!("{} gs://{}/{}: {}", action, bucket, object, e))
}

#[async_trait]
impl Storage for CloudStorage {
    async fn download(&self, bucket: &str, object: &str, dest: &Path) -> Result<()> {
        tracing::debug!(bucket, object, dest = %dest.display(), "Downloading");
        let url = self.object_url(bucket, object)?;
        let mut resp = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(|e| staging_err("download", bucket, object, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(staging_err("download", bucket, object, format!("{} {}", status, body)));
        }

        let mut file = tokio::fs::File::create(dest).await.map_err(|e| {
            tracing::warn!(dest = %dest.display(), error = %e, "Creating dest file failed");
            staging_err("download", bucket, object, e)
        })?;
        let mut size = 0usize;
        while let Some(chunk) = resp
            .chunk()
            .await
            .map_err(|e| staging_err("download", bucket, object, e))?
        {
            size += chunk.len();
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        tracing::debug!(bucket, object, size, "Download successfully");
        Ok(())
    }

    async fn upload(&self, bucket: &str, object: &str, src: &Path) -> Result<()> {
        tracing::debug!(bucket, object, src = %src.display(), "Uploading");
        let body = tokio::fs::read(src).await.map_err(|e| {
            tracing::warn!(src = %src.display(), error = %e, "Failed to open the file");
            staging_err("upload", bucket, object, e)
        })?;
        let url = self.upload_url(bucket, object)?;
        let resp = self
            .authorize(self.http.post(url))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| staging_err("upload", bucket, object, e))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(staging_err("upload", bucket, object, format!("{} {}", status, body)));
        }
        tracing::debug!(bucket, object, "Upload successfully");
        Ok(())
    }
}
