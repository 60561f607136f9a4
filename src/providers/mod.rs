//! Detection providers.
//!
//! Each provider consults one upstream reputation source and turns its answer
//! into an [`AnalysisRecord`]. Providers receive the last cached verdict for the
//! address and hand it back unchanged while it is still fresh.

pub mod ipinfo;
pub mod iphub;
pub mod ipintel;
pub mod tor;

use crate::config::Config;
use crate::record::{now_millis, AnalysisRecord, Fingerprint, RecommendedAction};
use async_trait::async_trait;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub use self::ipinfo::IpInfoProvider;
pub use self::iphub::IpHubProvider;
pub use self::ipintel::IpIntelProvider;
pub use self::tor::TorProvider;

/// Error from a detection provider. Any of these means "no vote".
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Upstream rejected us for making too many requests.
    #[error("rate limited")]
    RateLimited,

    /// Upstream is down, in maintenance or returned an unexpected status.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream considers the address invalid.
    #[error("invalid address: {0}")]
    InvalidAddress(String),

    /// Upstream received no usable input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Private or otherwise unroutable address.
    #[error("unroutable address: {0}")]
    UnroutableAddress(String),

    /// The provider cannot handle this kind of address.
    #[error("unsupported address: {0}")]
    UnsupportedAddress(IpAddr),

    /// Our client has been banned upstream.
    #[error("banned: {0}")]
    Banned(String),

    /// A credential is missing or was rejected.
    #[error("missing credential: {0}")]
    MissingCredential(String),

    /// The contact e-mail required by the upstream is missing or invalid.
    #[error("missing contact email: {0}")]
    MissingContactEmail(String),

    /// The upstream payload lacks a required field.
    #[error("missing field: {0}")]
    MissingField(String),

    /// The upstream payload could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Request timed out.
    #[error("request timed out")]
    Timeout,

    /// HTTP transport failure.
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// The HTTP client could not be built.
    #[error("failed to create HTTP client: {0}")]
    Client(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http(e)
        }
    }
}

/// Trait for detection providers.
///
/// Implementations must tolerate concurrent calls and must stamp
/// `last_queried_at` on every freshly computed record.
#[async_trait]
pub trait DetectionProvider: Send + Sync {
    /// Stable provider name for logging.
    fn name(&self) -> &str;

    /// Produce a verdict for `ip`, reusing `previous` while it is fresh.
    async fn scan(
        &self,
        ip: &IpAddr,
        previous: Option<&AnalysisRecord>,
    ) -> Result<AnalysisRecord, ProviderError>;
}

/// Return a copy of `previous` if it can be trusted without querying upstream.
///
/// A record is fresh when it does not require a rescan and was computed no
/// longer than `window` ago.
pub fn reuse_if_fresh(
    provider: &str,
    previous: Option<&AnalysisRecord>,
    window: Duration,
) -> Option<AnalysisRecord> {
    let previous = previous?;
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);

    if !previous.requires_rescan && previous.age_millis(now_millis()) <= window_ms {
        debug!(provider, ip = %previous.target_address, "Reusing cached verdict");
        Some(previous.clone())
    } else {
        debug!(
            provider,
            ip = %previous.target_address,
            requires_rescan = previous.requires_rescan,
            "Cached verdict is stale or provisional"
        );
        None
    }
}

/// Risk level derived from an upstream score.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringRisk {
    /// Low risk with good certainty.
    Safe,
    /// High risk with good certainty.
    Suspicious,
    /// Not enough certainty either way.
    Unknown,
}

impl ScoringRisk {
    /// Turn a score-based risk into a verdict.
    ///
    /// Anything not safe is treated as proxy/VPN; uncertain scores are
    /// additionally marked for rescan.
    pub fn into_record(self, ip: &IpAddr) -> AnalysisRecord {
        match self {
            ScoringRisk::Safe => AnalysisRecord::new(
                ip.to_string(),
                Fingerprint::Residential,
                RecommendedAction::Whitelist,
                false,
            ),
            ScoringRisk::Suspicious => AnalysisRecord::new(
                ip.to_string(),
                Fingerprint::ProxyOrVpn,
                RecommendedAction::Blacklist,
                false,
            ),
            ScoringRisk::Unknown => AnalysisRecord::new(
                ip.to_string(),
                Fingerprint::ProxyOrVpn,
                RecommendedAction::Blacklist,
                true,
            ),
        }
    }
}

/// Map an upstream HTTP status to an error, if it is not a success.
pub(crate) fn check_status(provider: &str, status: reqwest::StatusCode) -> Result<(), ProviderError> {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(ProviderError::RateLimited);
    }
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ProviderError::MissingCredential(format!(
            "{} rejected credential (HTTP {})",
            provider, status
        )));
    }
    if !status.is_success() {
        return Err(ProviderError::UpstreamUnavailable(format!(
            "{} returned HTTP {}",
            provider, status
        )));
    }
    Ok(())
}

/// Ordered set of providers consulted by the orchestrator.
///
/// Registration order is the iteration order used when reconciling verdicts.
#[derive(Clone, Default)]
pub struct ProviderRegistry {
    providers: Vec<Arc<dyn DetectionProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a provider at the end of the registration order.
    pub fn register(&mut self, provider: Arc<dyn DetectionProvider>) {
        info!(provider = provider.name(), "Detection provider enabled");
        self.providers.push(provider);
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, provider: Arc<dyn DetectionProvider>) -> Self {
        self.register(provider);
        self
    }

    /// Build every enabled provider from configuration.
    ///
    /// Fails if an enabled provider cannot be constructed, e.g. because its
    /// credential is missing.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let mut registry = Self::new();

        if let Some(ref ipintel) = config.ipintel {
            if ipintel.enabled {
                let provider = IpIntelProvider::new(ipintel.clone())
                    .map_err(|e| anyhow::anyhow!("ipintel provider: {}", e))?;
                registry.register(Arc::new(provider));
            }
        }

        if let Some(ref iphub) = config.iphub {
            if iphub.enabled {
                let provider = IpHubProvider::new(iphub.clone())
                    .map_err(|e| anyhow::anyhow!("iphub provider: {}", e))?;
                registry.register(Arc::new(provider));
            }
        }

        if let Some(ref ipinfo) = config.ipinfo {
            if ipinfo.enabled {
                let provider = IpInfoProvider::new(ipinfo.clone())
                    .map_err(|e| anyhow::anyhow!("ipinfo provider: {}", e))?;
                registry.register(Arc::new(provider));
            }
        }

        if let Some(ref tor) = config.tor {
            if tor.enabled {
                let provider = TorProvider::new(tor.clone())
                    .map_err(|e| anyhow::anyhow!("tor provider: {}", e))?;
                registry.register(Arc::new(provider));
            }
        }

        Ok(registry)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn DetectionProvider>> {
        self.providers.iter()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}
