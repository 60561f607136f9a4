//! IPinfo privacy detection provider.

use super::{check_status, reuse_if_fresh, DetectionProvider, ProviderError, ScoringRisk};
use crate::config::IpInfoConfig;
use crate::record::{AnalysisRecord, Fingerprint};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    country: Option<String>,

    /// Only present on plans with privacy detection.
    #[serde(default)]
    privacy: Option<Privacy>,
}

#[derive(Debug, Default, Deserialize)]
struct Privacy {
    #[serde(default)]
    vpn: bool,
    #[serde(default)]
    proxy: bool,
    #[serde(default)]
    tor: bool,
    #[serde(default)]
    relay: bool,
    #[serde(default)]
    hosting: bool,
}

impl Privacy {
    fn risk(&self) -> ScoringRisk {
        if self.proxy || self.vpn || self.tor || self.relay || self.hosting {
            ScoringRisk::Suspicious
        } else {
            ScoringRisk::Safe
        }
    }
}

/// IPinfo provider.
pub struct IpInfoProvider {
    config: IpInfoConfig,
    client: Client,
}

impl IpInfoProvider {
    /// Create a new IPinfo provider. An API token is mandatory.
    pub fn new(config: IpInfoConfig) -> Result<Self, ProviderError> {
        if config.token.trim().is_empty() {
            return Err(ProviderError::MissingCredential(
                "an API token must be configured to use IPinfo".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ProviderError::Client(e.to_string()))?;

        Ok(Self { config, client })
    }

    fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.config.freshness_seconds)
    }
}

#[async_trait]
impl DetectionProvider for IpInfoProvider {
    fn name(&self) -> &str {
        "ipinfo"
    }

    async fn scan(
        &self,
        ip: &IpAddr,
        previous: Option<&AnalysisRecord>,
    ) -> Result<AnalysisRecord, ProviderError> {
        if let Some(cached) = reuse_if_fresh(self.name(), previous, self.freshness_window()) {
            return Ok(cached);
        }

        let url = format!("{}/{}", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying IPinfo");

        let response = self
            .client
            .get(&url)
            .query(&[("token", self.config.token.as_str())])
            .header("Accept", "application/json")
            .send()
            .await?;

        check_status(self.name(), response.status())?;

        let data: IpInfoResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse IPinfo response: {}", e))
        })?;

        let privacy = data.privacy.ok_or_else(|| {
            ProviderError::MissingField(
                "privacy field not found; privacy detection requires a standard plan".to_string(),
            )
        })?;

        let risk = privacy.risk();
        let mut record = risk.into_record(ip).with_country(data.country);
        if privacy.tor {
            record.fingerprint = Fingerprint::Tor;
        }
        record.requires_rescan = false;

        debug!(
            ip = %ip,
            vpn = privacy.vpn,
            proxy = privacy.proxy,
            tor = privacy.tor,
            hosting = privacy.hosting,
            "IPinfo lookup complete"
        );

        Ok(record)
    }
}
