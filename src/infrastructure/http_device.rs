// HTTP device client - reqwest implementation of DeviceApi
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;

use crate::application::device_api::DeviceApi;

#[derive(Debug, Clone)]
pub struct HttpDeviceApi {
    base_url: String,
    events_path: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpDeviceApi {
    pub fn new(base_url: &str, events_path: &str, timeout: Duration) -> Result<Self> {
        // no client-wide timeout, it would also cut off the event stream
        let client = reqwest::Client::builder()
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            events_path: events_path.to_string(),
            timeout,
            client,
        })
    }

    fn url_for(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key.trim_start_matches('/'))
    }

    pub fn events_url(&self) -> String {
        self.url_for(&self.events_path)
    }

    async fn get_text(&self, key: &str) -> Result<String> {
        let response = self
            .client
            .get(self.url_for(key))
            .header("Accept", "application/json")
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to request {key}"))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned status {}: {}", key, status, body);
        }

        response
            .text()
            .await
            .with_context(|| format!("Failed to read body of {key}"))
    }

    async fn put_json(&self, key: &str, payload: &Value) -> Result<()> {
        let response = self
            .client
            .put(self.url_for(key))
            .json(payload)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to send {key}"))?;

        if !response.status().is_success() {
            // the firmware explains refused commands in the body
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{}", body.trim());
        }
        Ok(())
    }

    /// Open the long-lived push stream and return its body chunks.
    pub async fn open_events(&self) -> Result<BoxStream<'static, reqwest::Result<Bytes>>> {
        let url = self.events_url();
        let response = self
            .client
            .get(&url)
            .header("Accept", "text/event-stream, application/x-ndjson")
            .send()
            .await
            .with_context(|| format!("Failed to connect to {url}"))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("Event stream {} returned status {}", url, status);
        }

        Ok(response.bytes_stream().boxed())
    }
}

#[async_trait]
impl DeviceApi for HttpDeviceApi {
    async fn get_state(&self, key: &str) -> Result<Value> {
        let body = self.get_text(key).await?;
        serde_json::from_str(&body).with_context(|| format!("Failed to parse {key}"))
    }

    async fn fetch_bootstrap(&self, path: &str) -> Result<String> {
        self.get_text(path).await
    }

    async fn save(&self, key: &str, payload: &Value) -> Result<()> {
        self.put_json(&format!("{key}_update"), payload).await
    }

    async fn call(&self, key: &str, payload: &Value) -> Result<()> {
        self.put_json(key, payload).await
    }
}
