//! Tor exit node detection provider.
//!
//! Queries the Tor DNS exit list: an address is an exit node when
//! `<reversed octets>.<zone>` resolves to `127.0.0.2`.

use super::{reuse_if_fresh, DetectionProvider, ProviderError};
use crate::config::TorConfig;
use crate::record::{AnalysisRecord, Fingerprint, RecommendedAction};
use async_trait::async_trait;
use hickory_resolver::config::{NameServerConfigGroup, ResolverConfig};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::{Resolver, TokioResolver};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Answer returned by the exit list for listed addresses.
const EXIT_NODE_ANSWER: Ipv4Addr = Ipv4Addr::new(127, 0, 0, 2);

/// A-record lookup against the exit list zone.
#[async_trait]
pub trait ExitListLookup: Send + Sync {
    /// Resolve `name`. A name that does not exist yields an empty list.
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, ProviderError>;
}

/// Exit list lookup over DNS.
pub struct DnsExitListLookup {
    resolver: TokioResolver,
}

impl DnsExitListLookup {
    /// Create a resolver that uses the given nameservers.
    pub fn new(nameservers: &[IpAddr]) -> Self {
        let group = NameServerConfigGroup::from_ips_clear(nameservers, 53, true);
        let config = ResolverConfig::from_parts(None, vec![], group);
        let resolver =
            Resolver::builder_with_config(config, TokioConnectionProvider::default()).build();

        Self { resolver }
    }
}

#[async_trait]
impl ExitListLookup for DnsExitListLookup {
    async fn lookup_a(&self, name: &str) -> Result<Vec<Ipv4Addr>, ProviderError> {
        match self.resolver.ipv4_lookup(name).await {
            Ok(lookup) => Ok(lookup.iter().map(|a| a.0).collect()),
            Err(e) if e.is_no_records_found() => Ok(Vec::new()),
            Err(e) => Err(ProviderError::UpstreamUnavailable(format!(
                "exit list lookup failed: {}",
                e
            ))),
        }
    }
}

/// Tor exit node detection provider.
pub struct TorProvider {
    config: TorConfig,
    lookup: Arc<dyn ExitListLookup>,
}

impl TorProvider {
    /// Create a new Tor provider resolving through the configured nameservers.
    pub fn new(config: TorConfig) -> Result<Self, ProviderError> {
        let nameservers = config
            .nameservers
            .iter()
            .map(|s| {
                s.parse::<IpAddr>().map_err(|_| {
                    ProviderError::InvalidInput(format!("invalid nameserver address: {}", s))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let lookup = Arc::new(DnsExitListLookup::new(&nameservers));
        Ok(Self::with_lookup(config, lookup))
    }

    /// Create a provider with a custom lookup.
    pub fn with_lookup(config: TorConfig, lookup: Arc<dyn ExitListLookup>) -> Self {
        Self { config, lookup }
    }

    fn freshness_window(&self) -> Duration {
        Duration::from_secs(self.config.freshness_seconds)
    }

    /// Exit list query name for an address.
    fn query_name(&self, ip: &IpAddr) -> Result<String, ProviderError> {
        match ip {
            IpAddr::V4(v4) => {
                let [a, b, c, d] = v4.octets();
                Ok(format!(
                    "{}.{}.{}.{}.{}.",
                    d,
                    c,
                    b,
                    a,
                    self.config.zone.trim_end_matches('.')
                ))
            }
            IpAddr::V6(_) => Err(ProviderError::UnsupportedAddress(*ip)),
        }
    }

    /// Check if an address is a listed exit node.
    async fn is_exit_node(&self, ip: &IpAddr) -> Result<bool, ProviderError> {
        let name = self.query_name(ip)?;
        let answers = self.lookup.lookup_a(&name).await?;
        Ok(answers.contains(&EXIT_NODE_ANSWER))
    }
}

#[async_trait]
impl DetectionProvider for TorProvider {
    fn name(&self) -> &str {
        "tor"
    }

    async fn scan(
        &self,
        ip: &IpAddr,
        previous: Option<&AnalysisRecord>,
    ) -> Result<AnalysisRecord, ProviderError> {
        if let Some(cached) = reuse_if_fresh(self.name(), previous, self.freshness_window()) {
            return Ok(cached);
        }

        let is_tor = self.is_exit_node(ip).await?;
        debug!(ip = %ip, is_tor, "Tor exit list lookup complete");

        // Not being an exit node says nothing about being residential
        let fingerprint = if is_tor {
            Fingerprint::Tor
        } else {
            Fingerprint::Unidentified
        };

        Ok(AnalysisRecord::new(
            ip.to_string(),
            fingerprint,
            RecommendedAction::Blacklist,
            true,
        ))
    }
}
