use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{StatusCode, Url};

use crate::error::RemoteError;

use super::models::{RedeemBody, Redemption};
use super::LockerService;

pub struct HttpLockerService {
    client: reqwest::Client,
    base_url: Url,
    probe_timeout: Duration,
}

impl HttpLockerService {
    pub fn new(
        base_url: &str,
        request_timeout: Duration,
        probe_timeout: Duration,
        accept_invalid_certs: bool,
    ) -> Result<Self> {
        let base_url = Url::parse(base_url)
            .with_context(|| format!("invalid API base URL {base_url:?}"))?;
        if base_url.cannot_be_a_base() {
            bail!("API base URL {base_url} cannot carry a path");
        }

        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .connect_timeout(request_timeout)
            .danger_accept_invalid_certs(accept_invalid_certs)
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            probe_timeout,
        })
    }

    /// `base/segment`, with `segment` percent-encoded as a single path segment.
    fn endpoint(&self, segment: &str) -> Result<Url, RemoteError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| RemoteError::Transport("base URL cannot carry a path".into()))?
            .pop_if_empty()
            .push(segment);
        Ok(url)
    }
}

fn classify(err: reqwest::Error) -> RemoteError {
    if err.is_timeout() {
        RemoteError::Timeout
    } else if err.is_connect() {
        RemoteError::Connect(err.to_string())
    } else if err.is_decode() {
        RemoteError::InvalidResponse(err.to_string())
    } else {
        RemoteError::Transport(err.to_string())
    }
}

#[async_trait]
impl LockerService for HttpLockerService {
    async fn redeem(&self, code: &str) -> Result<Redemption, RemoteError> {
        let url = self.endpoint(code)?;
        let response = self.client.get(url).send().await.map_err(classify)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound);
        }
        if !status.is_success() {
            return Err(RemoteError::Status(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(classify)?;
        let body: RedeemBody = serde_json::from_slice(&bytes)
            .map_err(|err| RemoteError::InvalidResponse(err.to_string()))?;
        body.into_redemption()
    }

    async fn invalidate(&self, code: &str) -> Result<(), RemoteError> {
        let url = self.endpoint(code)?;
        let response = self.client.patch(url).send().await.map_err(classify)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RemoteError::Status(status.as_u16()))
        }
    }

    async fn health_check(&self) -> bool {
        let url = match self.endpoint("test") {
            Ok(url) => url,
            Err(err) => {
                warn!("health check URL: {err}");
                return false;
            }
        };

        match self
            .client
            .get(url)
            .timeout(self.probe_timeout)
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                debug!("health check failed: {err}");
                false
            }
        }
    }
}
