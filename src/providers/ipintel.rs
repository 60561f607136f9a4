//! GetIPIntel proxy/VPN detection provider.

use super::{check_status, reuse_if_fresh, DetectionProvider, ProviderError, ScoringRisk};
use crate::config::IpIntelConfig;
use crate::record::AnalysisRecord;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, warn};

/// Scores at or above this are treated as proxies with good certainty.
const HIGH_RISK_THRESHOLD: f64 = 0.99;

/// GetIPIntel API response. Errors use the same shape with a negative result.
#[derive(Debug, Deserialize)]
struct IpIntelResponse {
    #[serde(default)]
    status: Option<String>,

    /// Probability (0-1) that the address is a proxy, or a negative error code.
    #[serde(deserialize_with = "de_score")]
    result: f64,

    #[serde(rename = "Country", default)]
    country: Option<String>,

    #[serde(default)]
    message: Option<String>,
}

/// The API reports the score as a string; accept plain numbers too.
fn de_score<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Score {
        Number(f64),
        Text(String),
    }

    match Score::deserialize(deserializer)? {
        Score::Number(n) => Ok(n),
        Score::Text(s) => s.trim().parse().map_err(serde::de::Error::custom),
    }
}

/// GetIPIntel provider.
pub struct IpIntelProvider {
    config: IpIntelConfig,
    client: Client,
}

impl IpIntelProvider {
    /// Create a new GetIPIntel provider. A contact e-mail is mandatory.
    pub fn new(config: IpIntelConfig) -> Result<Self, ProviderError> {
        if config.contact_email.trim().is_empty() {
            return Err(ProviderError::MissingContactEmail(
                "a contact e-mail must be configured to use GetIPIntel".to_string(),
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

    /// Classify a score.
    fn analyze_risk(&self, score: f64) -> ScoringRisk {
        if (0.0..=self.config.low_risk_threshold).contains(&score) {
            ScoringRisk::Safe
        } else if score >= HIGH_RISK_THRESHOLD {
            ScoringRisk::Suspicious
        } else {
            ScoringRisk::Unknown
        }
    }

    async fn query(&self, ip: &IpAddr) -> Result<IpIntelResponse, ProviderError> {
        let url = format!("{}/check.php", self.config.base_url.trim_end_matches('/'));
        let address = ip.to_string();

        debug!(ip = %ip, flags = %self.config.flags, "Querying GetIPIntel");

        let response = self
            .client
            .get(&url)
            .query(&[
                ("ip", address.as_str()),
                ("contact", self.config.contact_email.as_str()),
                ("flags", self.config.flags.as_str()),
                ("format", "json"),
            ])
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            warn!("GetIPIntel rate limit exceeded");
            return Err(ProviderError::RateLimited);
        }

        // Error payloads arrive with a 4xx status but still carry a result code
        let body = response.text().await?;
        match serde_json::from_str::<IpIntelResponse>(&body) {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                check_status(self.name(), status)?;
                Err(ProviderError::InvalidResponse(format!(
                    "failed to parse GetIPIntel response: {}",
                    e
                )))
            }
        }
    }
}

/// Map a negative result code to an error.
fn error_for_code(code: f64, message: Option<String>) -> ProviderError {
    let detail = |default: &str| message.clone().unwrap_or_else(|| default.to_string());

    match code as i64 {
        -1 => ProviderError::InvalidInput(detail("invalid or no input provided")),
        -2 => ProviderError::InvalidAddress(detail("invalid IP address")),
        -3 => ProviderError::UnroutableAddress(detail("unroutable or private address")),
        -4 => ProviderError::UpstreamUnavailable(detail("database unreachable due to maintenance")),
        -5 => ProviderError::Banned(detail("connecting IP has been banned")),
        -6 => ProviderError::MissingContactEmail(detail("contact information missing or invalid")),
        other => ProviderError::InvalidResponse(format!("unknown GetIPIntel error code {}", other)),
    }
}

#[async_trait]
impl DetectionProvider for IpIntelProvider {
    fn name(&self) -> &str {
        "ipintel"
    }

    async fn scan(
        &self,
        ip: &IpAddr,
        previous: Option<&AnalysisRecord>,
    ) -> Result<AnalysisRecord, ProviderError> {
        if let Some(cached) = reuse_if_fresh(self.name(), previous, self.freshness_window()) {
            return Ok(cached);
        }

        let response = self.query(ip).await?;

        if response.result < 0.0 {
            return Err(error_for_code(response.result, response.message));
        }

        let risk = self.analyze_risk(response.result);

        debug!(
            ip = %ip,
            score = response.result,
            status = ?response.status,
            risk = ?risk,
            "GetIPIntel lookup complete"
        );

        Ok(risk.into_record(ip).with_country(response.country))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{now_millis, Fingerprint, RecommendedAction};
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn create_test_config(base_url: &str) -> IpIntelConfig {
        IpIntelConfig {
            contact_email: "ops@example.com".to_string(),
            base_url: base_url.to_string(),
            ..IpIntelConfig::default()
        }
    }

    #[test]
    fn test_missing_contact_email() {
        let config = IpIntelConfig::default();
        assert!(matches!(
            IpIntelProvider::new(config),
            Err(ProviderError::MissingContactEmail(_))
        ));
    }

    #[test]
    fn test_analyze_risk() {
        let provider = IpIntelProvider::new(create_test_config("http://localhost")).unwrap();

        assert_eq!(provider.analyze_risk(0.0), ScoringRisk::Safe);
        assert_eq!(provider.analyze_risk(0.20), ScoringRisk::Safe);
        assert_eq!(provider.analyze_risk(0.5), ScoringRisk::Unknown);
        assert_eq!(provider.analyze_risk(0.98), ScoringRisk::Unknown);
        assert_eq!(provider.analyze_risk(0.99), ScoringRisk::Suspicious);
        assert_eq!(provider.analyze_risk(1.0), ScoringRisk::Suspicious);
    }

    #[test]
    fn test_error_codes() {
        assert!(matches!(error_for_code(-1.0, None), ProviderError::InvalidInput(_)));
        assert!(matches!(error_for_code(-2.0, None), ProviderError::InvalidAddress(_)));
        assert!(matches!(error_for_code(-3.0, None), ProviderError::UnroutableAddress(_)));
        assert!(matches!(error_for_code(-4.0, None), ProviderError::UpstreamUnavailable(_)));
        assert!(matches!(error_for_code(-5.0, None), ProviderError::Banned(_)));
        assert!(matches!(error_for_code(-6.0, None), ProviderError::MissingContactEmail(_)));
        assert!(matches!(error_for_code(-9.0, None), ProviderError::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_scan_high_score_is_proxy() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/check.php"))
            .and(query_param("ip", "1.2.3.4"))
            .and(query_param("contact", "ops@example.com"))
            .and(query_param("flags", "f"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "result": "1",
                "queryIP": "1.2.3.4",
                "Country": "DE"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let record = provider.scan(&"1.2.3.4".parse().unwrap(), None).await.unwrap();

        assert_eq!(record.fingerprint, Fingerprint::ProxyOrVpn);
        assert_eq!(record.recommended_action, RecommendedAction::Blacklist);
        assert!(!record.requires_rescan);
        assert_eq!(record.origin_country.as_deref(), Some("DE"));
        assert_eq!(record.target_address, "1.2.3.4");
    }

    #[tokio::test]
    async fn test_scan_low_score_is_residential() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/check.php"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "result": "0.01"
            })))
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let before = now_millis();
        let record = provider.scan(&"1.2.3.4".parse().unwrap(), None).await.unwrap();

        assert_eq!(record.fingerprint, Fingerprint::Residential);
        assert_eq!(record.recommended_action, RecommendedAction::Whitelist);
        assert!(record.last_queried_at >= before);
        assert!(record.origin_country.is_none());
    }

    #[tokio::test]
    async fn test_scan_uncertain_score_requires_rescan() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "status": "success",
                "result": 0.6
            })))
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let record = provider.scan(&"1.2.3.4".parse().unwrap(), None).await.unwrap();

        assert_eq!(record.fingerprint, Fingerprint::ProxyOrVpn);
        assert!(record.requires_rescan);
    }

    #[tokio::test]
    async fn test_scan_error_payload() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "status": "error",
                "result": "-3",
                "message": "Unroutable address"
            })))
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let err = provider
            .scan(&"10.0.0.1".parse().unwrap(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::UnroutableAddress(_)));
    }

    #[tokio::test]
    async fn test_scan_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let err = provider
            .scan(&"1.2.3.4".parse().unwrap(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::RateLimited));
    }

    #[tokio::test]
    async fn test_scan_unparsable_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let err = provider
            .scan(&"1.2.3.4".parse().unwrap(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ProviderError::UpstreamUnavailable(_)));
    }

    #[tokio::test]
    async fn test_scan_reuses_fresh_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let provider = IpIntelProvider::new(create_test_config(&server.uri())).unwrap();
        let previous = AnalysisRecord::new(
            "1.2.3.4",
            Fingerprint::Residential,
            RecommendedAction::Whitelist,
            false,
        );

        let record = provider
            .scan(&"1.2.3.4".parse().unwrap(), Some(&previous))
            .await
            .unwrap();
        assert_eq!(record, previous);
    }
}
