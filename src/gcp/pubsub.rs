use async_trait::async_trait;
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::GcpConfig;
use crate::error::{ProxyError, Result};
use crate::gcp::{Publisher, PubsubMessage, Puller, ReceivedMessage, Subscription};

/// Pub/Sub v1 REST client.
#[derive(Debug, Clone)]
pub struct PubsubClient {
    http: reqwest::Client,
    endpoint: String,
    access_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PullRequest {
    max_messages: u32,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct PullResponse {
    #[serde(default)]
    received_messages: Vec<ReceivedMessage>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct AcknowledgeRequest<'a> {
    ack_ids: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ModifyAckDeadlineRequest<'a> {
    ack_ids: &'a [String],
    ack_deadline_seconds: i64,
}

#[derive(Serialize)]
struct PublishRequest {
    messages: Vec<PubsubMessage>,
}

#[derive(Deserialize)]
struct Empty {}

impl PubsubClient {
    pub fn new(config: &GcpConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint: config.pubsub_endpoint.trim_end_matches('/').to_string(),
            access_token: config.access_token(),
        }
    }

    fn request(&self, method: Method, resource: &str) -> RequestBuilder {
        let url = format!("{}/v1/{}", self.endpoint, resource);
        let builder = self.http.request(method, url);
        match self.access_token {
            Some(ref token) => builder.bearer_auth(token),
            None => builder,
        }
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let resp = builder
            .send()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProxyError::Transport(format!(
                "pubsub returned {}: {}",
                status, body
            )));
        }
        resp.json()
            .await
            .map_err(|e| ProxyError::Transport(e.to_string()))
    }
}

#[async_trait]
impl Puller for PubsubClient {
    async fn pull(&self, subscription: &str) -> Result<Option<ReceivedMessage>> {
        let req = self
            .request(Method::POST, &format!("{}:pull", subscription))
            .json(&PullRequest { max_messages: 1 });
        let resp: PullResponse = self.send(req).await?;
        Ok(resp.received_messages.into_iter().next())
    }

    async fn acknowledge(&self, subscription: &str, ack_id: &str) -> Result<()> {
        let ack_ids = [ack_id.to_string()];
        let req = self
            .request(Method::POST, &format!("{}:acknowledge", subscription))
            .json(&AcknowledgeRequest { ack_ids: &ack_ids });
        let _: Empty = self.send(req).await?;
        Ok(())
    }

    async fn extend_lease(
        &self,
        subscription: &str,
        ack_ids: &[String],
        delay_seconds: i64,
    ) -> Result<()> {
        let req = self
            .request(Method::POST, &format!("{}:modifyAckDeadline", subscription))
            .json(&ModifyAckDeadlineRequest {
                ack_ids,
                ack_deadline_seconds: delay_seconds,
            });
        let _: Empty = self.send(req).await?;
        Ok(())
    }

    async fn describe_subscription(&self, name: &str) -> Result<Subscription> {
        self.send(self.request(Method::GET, name)).await
    }
}

#[async_trait]
impl Publisher for PubsubClient {
    async fn publish(&self, topic: &str, message: PubsubMessage) -> Result<()> {
        let req = self
            .request(Method::POST, &format!("{}:publish", topic))
            .json(&PublishRequest {
                messages: vec![message],
            });
        let _: serde_json::Value = self.send(req).await?;
        Ok(())
    }
}
