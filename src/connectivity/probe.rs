use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::debug;

/// Reachability of the wider internet, independent of the locker service.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    async fn reachable(&self) -> bool;
}

/// Any HTTP answer from a well-known host within the timeout counts as reachable.
pub struct HttpUpstreamProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpUpstreamProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("failed to build probe client")?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl UpstreamProbe for HttpUpstreamProbe {
    async fn reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(_) => true,
            Err(err) => {
                debug!("upstream probe to {} failed: {err}", self.url);
                false
            }
        }
    }
}
