//! Analysis record and cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Default namespace prefixed to every cache key.
pub const DEFAULT_NAMESPACE: &str = "validate-my-address";

/// Default expiry horizon for cached records and provider freshness (6 hours).
pub const DEFAULT_EXPIRY_SECONDS: u64 = 6 * 60 * 60;

/// Classification assigned to an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Fingerprint {
    #[serde(rename = "residential")]
    Residential,
    #[serde(rename = "tor")]
    Tor,
    #[serde(rename = "proxy/vpn")]
    ProxyOrVpn,
    #[serde(rename = "unidentified")]
    Unidentified,
}

/// Recommended handling of an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendedAction {
    Whitelist,
    Blacklist,
}

/// Verdict about one address.
///
/// Serialized with snake_case field names, which is the layout used both in
/// the cache and in HTTP responses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    /// The scanned address.
    pub target_address: String,

    /// Classification of the address.
    pub fingerprint: Fingerprint,

    /// Whitelist or blacklist recommendation.
    pub recommended_action: RecommendedAction,

    /// Provisional verdict; must be re-evaluated on next access.
    pub requires_rescan: bool,

    /// Country of origin as reported upstream.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_country: Option<String>,

    /// When this verdict was computed, in milliseconds since the epoch.
    #[serde(default)]
    pub last_queried_at: i64,
}

impl AnalysisRecord {
    /// Build a record stamped with the current time.
    ///
    /// A Tor fingerprint always carries a blacklist recommendation, whatever
    /// `action` says.
    pub fn new(
        target_address: impl Into<String>,
        fingerprint: Fingerprint,
        action: RecommendedAction,
        requires_rescan: bool,
    ) -> Self {
        let recommended_action = if fingerprint == Fingerprint::Tor {
            RecommendedAction::Blacklist
        } else {
            action
        };

        Self {
            target_address: target_address.into(),
            fingerprint,
            recommended_action,
            requires_rescan,
            origin_country: None,
            last_queried_at: now_millis(),
        }
    }

    /// The fail-closed verdict: unidentified, blacklisted, needs rescan.
    pub fn fail_closed(target_address: impl Into<String>) -> Self {
        Self::new(
            target_address,
            Fingerprint::Unidentified,
            RecommendedAction::Blacklist,
            true,
        )
    }

    /// Set the country of origin.
    pub fn with_country(mut self, country: Option<String>) -> Self {
        self.origin_country = country.filter(|c| !c.trim().is_empty());
        self
    }

    /// Whether this record is the fail-closed verdict.
    pub fn is_fail_closed(&self) -> bool {
        self.fingerprint == Fingerprint::Unidentified
            && self.recommended_action == RecommendedAction::Blacklist
            && self.requires_rescan
    }

    /// Milliseconds elapsed between `last_queried_at` and `now`.
    pub fn age_millis(&self, now: i64) -> i64 {
        now.saturating_sub(self.last_queried_at)
    }

    /// Serialize for storage.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Reconstruct a record from its stored form.
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Derive the cache key for an address.
///
/// The address is hashed with SHA-256 so keys never expose it. Callers are
/// expected to normalize the address first.
pub fn cache_key(namespace: &str, address: &str) -> String {
    let digest = Sha256::digest(address.as_bytes());
    format!("{}:analysis_{}", namespace, hex::encode(digest))
}
