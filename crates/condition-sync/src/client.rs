//! Best-effort delivery of sync messages to the collector

use crate::message::SyncMessage;
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default bound on one sync request
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_millis(2000);

/// Token the collector puts in its body to acknowledge an update
const ACK_TOKEN: &str = "success";

/// Destination for commanded-condition updates
#[async_trait]
pub trait ConditionSink: Send + Sync {
    async fn publish(&self, message: &SyncMessage) -> Result<()>;
}

/// Sink used when no collector is configured
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl ConditionSink for NullSink {
    async fn publish(&self, message: &SyncMessage) -> Result<()> {
        debug!("Sync disabled, not reporting {}", message);
        Ok(())
    }
}

/// HTTP client for the collector's `/tc_settings` endpoint
#[derive(Debug, Clone)]
pub struct SyncClient {
    client: reqwest::Client,
    endpoint: String,
}

impl SyncClient {
    pub fn new(host: &str, port: u16, timeout: Duration) -> Result<Self> {
        // Direct connection only, proxies are ignored
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .no_proxy()
            .build()?;
        Ok(Self {
            client,
            endpoint: format!("http://{}:{}/tc_settings", host, port),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl ConditionSink for SyncClient {
    async fn publish(&self, message: &SyncMessage) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(message)
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(SyncError::Status {
                status: status.as_u16(),
                body,
            });
        }
        if !body.contains(ACK_TOKEN) {
            return Err(SyncError::NotAcknowledged(body));
        }
        Ok(())
    }
}

/// Publish `message`, logging the outcome; never fails the caller
pub async fn report<S: ConditionSink + ?Sized>(sink: &S, message: &SyncMessage) -> bool {
    match sink.publish(message).await {
        Ok(()) => {
            info!("Synced condition {}", message);
            true
        }
        Err(e) => {
            warn!("Failed to sync condition {}: {}", message.preset, e);
            false
        }
    }
}
