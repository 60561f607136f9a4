//! Detection orchestration.
//!
//! Fans an evaluation out to every registered provider in parallel, each with
//! its own time budget, reconciles the verdicts that came back and writes the
//! result to the cache.

use crate::cache::{self, CacheError, ResultCache};
use crate::config::Config;
use crate::error::EvaluateError;
use crate::providers::{DetectionProvider, ProviderError, ProviderRegistry};
use crate::record::{cache_key, AnalysisRecord, Fingerprint, RecommendedAction, DEFAULT_NAMESPACE};
use futures::future::join_all;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default per-provider time budget.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default time budget for each cache read or write.
pub const DEFAULT_CACHE_TIMEOUT: Duration = Duration::from_millis(1000);

/// Outcome of one evaluation.
///
/// The verdict is always present; `cache_write` reports separately whether it
/// could be persisted.
#[derive(Debug)]
pub struct Evaluation {
    pub analysis: AnalysisRecord,
    pub cache_write: Result<(), CacheError>,
}

impl Evaluation {
    /// Whether persisting the verdict failed.
    pub fn save_failed(&self) -> bool {
        self.cache_write.is_err()
    }

    pub fn into_analysis(self) -> AnalysisRecord {
        self.analysis
    }
}

/// Coordinates providers and the result cache.
pub struct Orchestrator {
    providers: ProviderRegistry,
    cache: Arc<dyn ResultCache>,
    provider_timeout: Duration,
    cache_timeout: Duration,
    namespace: String,
}

impl Orchestrator {
    /// Create an orchestrator with default timeout and key namespace.
    pub fn new(providers: ProviderRegistry, cache: Arc<dyn ResultCache>) -> Self {
        Self {
            providers,
            cache,
            provider_timeout: DEFAULT_PROVIDER_TIMEOUT,
            cache_timeout: DEFAULT_CACHE_TIMEOUT,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Create an orchestrator using the configured timeout and namespace.
    pub fn from_config(
        config: &Config,
        providers: ProviderRegistry,
        cache: Arc<dyn ResultCache>,
    ) -> Self {
        info!(
            providers = providers.len(),
            cache = cache.name(),
            timeout_ms = config.settings.provider_timeout_ms,
            "Orchestrator initialized"
        );

        Self::new(providers, cache)
            .with_provider_timeout(config.settings.provider_timeout())
            .with_cache_timeout(config.settings.cache_timeout())
            .with_namespace(&config.settings.namespace)
    }

    pub fn with_provider_timeout(mut self, timeout: Duration) -> Self {
        self.provider_timeout = timeout;
        self
    }

    pub fn with_cache_timeout(mut self, timeout: Duration) -> Self {
        self.cache_timeout = timeout;
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    /// Evaluate an address.
    ///
    /// Fails only when no provider is registered or the address is not an IP
    /// literal. Provider failures, timeouts and cache errors degrade the
    /// verdict instead of failing the call.
    pub async fn evaluate(&self, address: &str) -> Result<Evaluation, EvaluateError> {
        if self.providers.is_empty() {
            return Err(EvaluateError::NoProviderConfigured);
        }

        let ip: IpAddr = address
            .trim()
            .parse()
            .map_err(|_| EvaluateError::InvalidAddress(address.to_string()))?;

        // Canonical text form, so equivalent spellings share a cache entry
        let target = ip.to_string();
        let key = cache_key(&self.namespace, &target);

        let previous = match self.load_previous(&key).await {
            Ok(record) => Some(record),
            Err(CacheError::RecordNotFound) => {
                debug!(ip = %ip, "No cached verdict");
                None
            }
            Err(e) => {
                warn!(ip = %ip, cache = self.cache.name(), error = %e, "Cache read failed, scanning without history");
                None
            }
        };

        let verdicts = self.scan_all(&ip, previous.as_ref()).await;
        let analysis = reconcile(&target, verdicts);

        debug!(
            ip = %ip,
            fingerprint = ?analysis.fingerprint,
            action = ?analysis.recommended_action,
            requires_rescan = analysis.requires_rescan,
            "Verdict reconciled"
        );

        let cache_write = self.save(&key, &analysis).await;
        if let Err(ref e) = cache_write {
            warn!(ip = %ip, cache = self.cache.name(), error = %e, "Failed to save verdict");
        }

        Ok(Evaluation {
            analysis,
            cache_write,
        })
    }

    /// Read the cached verdict. A cache that does not answer in time counts as
    /// unavailable.
    async fn load_previous(&self, key: &str) -> Result<AnalysisRecord, CacheError> {
        match tokio::time::timeout(self.cache_timeout, cache::load(self.cache.as_ref(), key)).await {
            Ok(result) => result,
            Err(_) => Err(CacheError::Unavailable(format!(
                "no answer within {} ms",
                self.cache_timeout.as_millis()
            ))),
        }
    }

    async fn save(&self, key: &str, analysis: &AnalysisRecord) -> Result<(), CacheError> {
        match tokio::time::timeout(self.cache_timeout, cache::store(self.cache.as_ref(), key, analysis))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(CacheError::SaveFailure(format!(
                "no answer within {} ms",
                self.cache_timeout.as_millis()
            ))),
        }
    }

    /// Run every provider concurrently and keep the verdicts that succeeded,
    /// in registration order.
    async fn scan_all(&self, ip: &IpAddr, previous: Option<&AnalysisRecord>) -> Vec<AnalysisRecord> {
        let scans = self
            .providers
            .iter()
            .map(|provider| self.scan_one(provider.as_ref(), ip, previous));

        join_all(scans).await.into_iter().flatten().collect()
    }

    async fn scan_one(
        &self,
        provider: &dyn DetectionProvider,
        ip: &IpAddr,
        previous: Option<&AnalysisRecord>,
    ) -> Option<AnalysisRecord> {
        debug!(provider = provider.name(), ip = %ip, "Awaiting provider verdict");

        let outcome = match tokio::time::timeout(self.provider_timeout, provider.scan(ip, previous)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout),
        };

        match outcome {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(provider = provider.name(), ip = %ip, error = %e, "Provider lookup failed");
                None
            }
        }
    }
}

/// Combine successful provider verdicts into one.
///
/// - no verdicts: fail closed
/// - any Tor verdict: the first one wins outright
/// - otherwise the larger of the proxy/VPN and residential groups wins, with
///   its first verdict in provider order as representative
/// - a tie fails closed
pub fn reconcile(target: &str, verdicts: Vec<AnalysisRecord>) -> AnalysisRecord {
    if verdicts.is_empty() {
        return AnalysisRecord::fail_closed(target);
    }

    let mut proxy_votes = Vec::new();
    let mut residential_votes = Vec::new();

    for verdict in verdicts {
        match verdict.fingerprint {
            Fingerprint::Tor => {
                let mut tor = verdict;
                tor.recommended_action = RecommendedAction::Blacklist;
                return tor;
            }
            Fingerprint::ProxyOrVpn => proxy_votes.push(verdict),
            Fingerprint::Residential => residential_votes.push(verdict),
            Fingerprint::Unidentified => {}
        }
    }

    if proxy_votes.len() > residential_votes.len() {
        proxy_votes.swap_remove(0)
    } else if residential_votes.len() > proxy_votes.len() {
        residential_votes.swap_remove(0)
    } else {
        AnalysisRecord::fail_closed(target)
    }
}
