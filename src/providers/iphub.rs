//! IPHub proxy/VPN detection provider.

use super::{check_status, reuse_if_fresh, DetectionProvider, ProviderError, ScoringRisk};
use crate::config::IpHubConfig;
use crate::record::AnalysisRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// IPHub API response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(dead_code)] // Fields parsed from API response for logging
struct IpHubResponse {
    /// 0 = residential, 1 = non-residential, 2 = non-residential and residential.
    block: u8,

    #[serde(default)]
    country_code: Option<String>,

    #[serde(default)]
    isp: Option<String>,

    #[serde(default)]
    asn: Option<u32>,
}

/// IPHub provider.
pub struct IpHubProvider {
    config: IpHubConfig,
    client: Client,
}

impl IpHubProvider {
    /// Create a new IPHub provider. An API key is mandatory.
    pub fn new(config: IpHubConfig) -> Result<Self, ProviderError> {
        if config.api_key.trim().is_empty() {
            return Err(ProviderError::MissingCredential(
                "an API key must be configured to use IPHub".to_string(),
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

/// Classify a block code.
fn analyze_risk(block: u8) -> ScoringRisk {
    match block {
        0 => ScoringRisk::Safe,
        1 => ScoringRisk::Suspicious,
        _ => ScoringRisk::Unknown,
    }
}

#[async_trait]
impl DetectionProvider for IpHubProvider {
    fn name(&self) -> &str {
        "iphub"
    }

    async fn scan(
        &self,
        ip: &IpAddr,
        previous: Option<&AnalysisRecord>,
    ) -> Result<AnalysisRecord, ProviderError> {
        if let Some(cached) = reuse_if_fresh(self.name(), previous, self.freshness_window()) {
            return Ok(cached);
        }

        let url = format!("{}/ip/{}", self.config.base_url.trim_end_matches('/'), ip);

        debug!(ip = %ip, "Querying IPHub");

        let response = self
            .client
            .get(&url)
            .header("X-Key", &self.config.api_key)
            .header("Accept", "application/json")
            .send()
            .await?;

        if let Err(e) = check_status(self.name(), response.status()) {
            warn!(ip = %ip, error = %e, "IPHub request rejected");
            return Err(e);
        }

        let data: IpHubResponse = response.json().await.map_err(|e| {
            ProviderError::InvalidResponse(format!("failed to parse IPHub response: {}", e))
        })?;

        let risk = analyze_risk(data.block);

        debug!(
            ip = %ip,
            block = data.block,
            isp = ?data.isp,
            risk = ?risk,
            "IPHub lookup complete"
        );

        Ok(risk.into_record(ip).with_country(data.country_code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{now_millis, Fingerprint, RecommendedAction};
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(base_url: &str) -> IpHubConfig {
        IpHubConfig {
            api_key: "test-key".to_string(),
            base_url: base_url.to_string(),
            ..IpHubConfig::default()
        }
    }

    #[test]
    fn test_missing_api_key() {
        assert!(matches!(
            IpHubProvider::new(IpHubConfig::default()),
            Err(ProviderError::MissingCredential(_))
        ));
    }

    #[test]
    fn test_analyze_risk() {
        assert_eq!(analyze_risk(0), ScoringRisk::Safe);
        assert_eq!(analyze_risk(1), ScoringRisk::Suspicious);
        assert_eq!(analyze_risk(2), ScoringRisk::Unknown);
    }

    #[test]
    fn test_provider_name() {
        let provider = IpHubProvider::new(create_test_config("http://localhost")).unwrap();
        assert_eq!(provider.name(), "iphub");
    }

    #[tokio::test]
    async fn test_scan_residential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ip/8.8.8.8"))
            .and(header("X-Key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ip": "8.8.8.8",
                "countryCode": "US",
                "countryName": "United States",
                "asn": 15169,
                "isp": "GOOGLE",
                "block": 0
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = IpHubProvider::new(create_test_config(&server.uri())).unwrap();
        let before = now_millis();
        let record = provider.scan(&"8.8.8.8".parse().unwrap(), None).await.unwrap();

        assert_eq!(record.fingerprint, Fingerprint::Residential);
        assert_eq!(record.recommended_action, RecommendedAction::Whitelist);
        assert!(!record.requires_rescan);
        assert_eq!(record.origin_country.as_deref(), Some("US"));
        assert!(record.last_queried_at >= before);
    }

    #[tokio::test]
    async fn test_scan_mixed_block_requires_rescan() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "ip": "1.2.3.4",
                "block": 2
            })))
            .mount(&server)
            .await;

        let provider = IpHubProvider::new(create_test_config(&server.uri())).unwrap();
        let record = provider.scan(&"1.2.3.4".parse().unwrap(), None).await.unwrap();

        assert_eq!(record.fingerprint, Fingerprint::ProxyOrVpn);
        assert!(record.requires_rescan);
    }

    #[tokio::test]
    async fn test_scan_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = IpHubProvider::new(create_test_config(&server.uri())).unwrap();
        let err = provider
            .scan(&"1.2.3.4".parse().unwrap(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn test_scan_stale_record_queries_upstream() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "block": 1
            })))
            .expect(1)
            .mount(&server)
            .await;

        let mut config = create_test_config(&server.uri());
        config.freshness_seconds = 60;
        let provider = IpHubProvider::new(config).unwrap();

        let mut previous = AnalysisRecord::new(
            "1.2.3.4",
            Fingerprint::Residential,
            RecommendedAction::Whitelist,
            false,
        );
        previous.last_queried_at -= 120_000;

        let record = provider
            .scan(&"1.2.3.4".parse().unwrap(), Some(&previous))
            .await
            .unwrap();
        assert_eq!(record.fingerprint, Fingerprint::ProxyOrVpn);
    }

    #[tokio::test]
    async fn test_scan_malformed_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("{}"))
            .mount(&server)
            .await;

        let provider = IpHubProvider::new(create_test_config(&server.uri())).unwrap();
        let err = provider
            .scan(&"1.2.3.4".parse().unwrap(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }
}
