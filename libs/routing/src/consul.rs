//! Consul KV HTTP client.
//!
//! Only the four calls the registrar needs are implemented:
//! - `GET /v1/kv/<key>?raw`
//! - `PUT /v1/kv/<key>`
//! - `DELETE /v1/kv/<prefix>?recurse`
//! - `GET /v1/kv/<prefix>?keys`

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::debug;

use crate::error::KvError;
use crate::kv::KvStore;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// [`KvStore`] backed by a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulKv {
    client: reqwest::Client,
    base_url: String,
}

impl ConsulKv {
    /// Create a client for the agent at `base_url` (e.g. `http://127.0.0.1:8500`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, KvError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}/v1/kv/{}", self.base_url, key.trim_start_matches('/'))
    }
}

async fn status_error(response: reqwest::Response) -> KvError {
    let status = response.status().as_u16();
    let message = response.text().await.unwrap_or_default();
    KvError::Status { status, message }
}

#[async_trait]
impl KvStore for ConsulKv {
    async fn get(&self, key: &str) -> Result<String, KvError> {
        let response = self
            .client
            .get(self.key_url(key))
            .query(&[("raw", "")])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(KvError::NotFound(key.to_string())),
            s if s.is_success() => Ok(response.text().await?),
            _ => Err(status_error(response).await),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        debug!(key = %key, "Writing routing key");

        let response = self
            .client
            .put(self.key_url(key))
            .body(value.to_string())
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        // Consul answers `true`/`false` for whether the write was applied.
        let body = response.text().await?;
        if body.trim() == "false" {
            return Err(KvError::Status {
                status: 200,
                message: format!("write to {key} was not applied"),
            });
        }

        Ok(())
    }

    async fn delete_tree(&self, prefix: &str) -> Result<(), KvError> {
        debug!(prefix = %prefix, "Deleting routing subtree");

        let response = self
            .client
            .delete(self.key_url(prefix))
            .query(&[("recurse", "")])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(KvError::NotFound(prefix.to_string())),
            s if s.is_success() => Ok(()),
            _ => Err(status_error(response).await),
        }
    }

    async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let response = self
            .client
            .get(self.key_url(prefix))
            .query(&[("keys", "")])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(Vec::new()),
            s if s.is_success() => {
                let body = response.bytes().await?;
                serde_json::from_slice(&body).map_err(|e| KvError::Decode(e.to_string()))
            }
            _ => Err(status_error(response).await),
        }
    }
}
