//! Configuration types for the proxy detection service.

use crate::record::{DEFAULT_EXPIRY_SECONDS, DEFAULT_NAMESPACE};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;

/// Root configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Global settings.
    #[serde(default)]
    pub settings: Settings,

    /// Result cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// GetIPIntel provider.
    #[serde(default)]
    pub ipintel: Option<IpIntelConfig>,

    /// IPHub provider.
    #[serde(default)]
    pub iphub: Option<IpHubConfig>,

    /// IPinfo provider.
    #[serde(default)]
    pub ipinfo: Option<IpInfoConfig>,

    /// Tor DNS exit list provider.
    #[serde(default)]
    pub tor: Option<TorConfig>,
}

/// Global settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    /// Time budget for each provider during one evaluation (milliseconds).
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_ms: u64,

    /// Time budget for each cache read or write (milliseconds).
    #[serde(default = "default_cache_timeout")]
    pub cache_timeout_ms: u64,

    /// Prefix for cache keys.
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            provider_timeout_ms: default_provider_timeout(),
            cache_timeout_ms: default_cache_timeout(),
            namespace: default_namespace(),
        }
    }
}

impl Settings {
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn cache_timeout(&self) -> Duration {
        Duration::from_millis(self.cache_timeout_ms)
    }
}

fn default_provider_timeout() -> u64 {
    5000
}

fn default_cache_timeout() -> u64 {
    1000
}

fn default_namespace() -> String {
    DEFAULT_NAMESPACE.to_string()
}

/// Cache backend selection.
#[derive(Debug, Clone, Copy, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    /// Bounded in-process LRU cache.
    #[default]
    Memory,
    /// Redis with per-key expiry.
    Redis,
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,

    /// Maximum number of entries (memory backend).
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,

    /// Expiry horizon for stored records (seconds).
    #[serde(default = "default_expiry")]
    pub ttl_seconds: u64,

    /// Redis connection URL (redis backend).
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            capacity: default_cache_capacity(),
            ttl_seconds: default_expiry(),
            redis_url: None,
        }
    }
}

fn default_cache_capacity() -> usize {
    100
}

fn default_expiry() -> u64 {
    DEFAULT_EXPIRY_SECONDS
}

/// GetIPIntel provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpIntelConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Contact e-mail required by the API (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub contact_email: String,

    /// Query flags. `m` and `b` produce too many false positives.
    #[serde(default = "default_ipintel_flags")]
    pub flags: String,

    /// Scores at or below this are considered residential.
    #[serde(default = "default_low_risk_threshold")]
    pub low_risk_threshold: f64,

    #[serde(default = "default_ipintel_url")]
    pub base_url: String,

    /// HTTP request timeout (milliseconds).
    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,

    /// How long a cached verdict is trusted without re-querying (seconds).
    #[serde(default = "default_expiry")]
    pub freshness_seconds: u64,
}

impl Default for IpIntelConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            contact_email: String::new(),
            flags: default_ipintel_flags(),
            low_risk_threshold: default_low_risk_threshold(),
            base_url: default_ipintel_url(),
            timeout_ms: default_http_timeout(),
            freshness_seconds: default_expiry(),
        }
    }
}

fn default_ipintel_flags() -> String {
    "f".to_string()
}

fn default_low_risk_threshold() -> f64 {
    0.20
}

fn default_ipintel_url() -> String {
    "https://check.getipintel.net".to_string()
}

/// IPHub provider configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpHubConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API key (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub api_key: String,

    #[serde(default = "default_iphub_url")]
    pub base_url: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_expiry")]
    pub freshness_seconds: u64,
}

impl Default for IpHubConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_key: String::new(),
            base_url: default_iphub_url(),
            timeout_ms: default_http_timeout(),
            freshness_seconds: default_expiry(),
        }
    }
}

fn default_iphub_url() -> String {
    "http://v2.api.iphub.info".to_string()
}

/// IPinfo provider configuration. Privacy data requires a paid plan.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct IpInfoConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// API token (supports ${ENV_VAR} syntax).
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_ipinfo_url")]
    pub base_url: String,

    #[serde(default = "default_http_timeout")]
    pub timeout_ms: u64,

    #[serde(default = "default_expiry")]
    pub freshness_seconds: u64,
}

impl Default for IpInfoConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            token: String::new(),
            base_url: default_ipinfo_url(),
            timeout_ms: default_http_timeout(),
            freshness_seconds: default_expiry(),
        }
    }
}

fn default_ipinfo_url() -> String {
    "https://ipinfo.io".to_string()
}

/// Tor DNS exit list configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// DNSEL zone queried with the reversed address.
    #[serde(default = "default_tor_zone")]
    pub zone: String,

    /// Resolvers used for exit list lookups.
    #[serde(default = "default_nameservers")]
    pub nameservers: Vec<String>,

    #[serde(default = "default_expiry")]
    pub freshness_seconds: u64,
}

impl Default for TorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            zone: default_tor_zone(),
            nameservers: default_nameservers(),
            freshness_seconds: default_expiry(),
        }
    }
}

fn default_tor_zone() -> String {
    "dnsel.torproject.org".to_string()
}

fn default_nameservers() -> Vec<String> {
    vec!["1.1.1.1".to_string(), "8.8.8.8".to_string()]
}

fn default_http_timeout() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let expanded = expand_env_vars(content);
        let config: Config = serde_yaml::from_str(&expanded)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.settings.provider_timeout_ms == 0 {
            anyhow::bail!("provider_timeout_ms must be greater than 0");
        }

        if self.settings.cache_timeout_ms == 0 {
            anyhow::bail!("cache_timeout_ms must be greater than 0");
        }

        if self.settings.namespace.trim().is_empty() {
            anyhow::bail!("namespace must not be empty");
        }

        if self.cache.capacity == 0 {
            anyhow::bail!("cache capacity must be greater than 0");
        }

        if self.cache.backend == CacheBackend::Redis
            && self.cache.redis_url.as_deref().map_or(true, str::is_empty)
        {
            anyhow::bail!("redis cache backend requires redis_url");
        }

        if let Some(ref ipintel) = self.ipintel {
            if ipintel.enabled && ipintel.contact_email.trim().is_empty() {
                anyhow::bail!("GetIPIntel is enabled but contact_email is empty");
            }
            if !(0.0..=1.0).contains(&ipintel.low_risk_threshold) {
                anyhow::bail!(
                    "low_risk_threshold ({}) must be between 0 and 1",
                    ipintel.low_risk_threshold
                );
            }
        }

        if let Some(ref iphub) = self.iphub {
            if iphub.enabled && iphub.api_key.trim().is_empty() {
                anyhow::bail!("IPHub is enabled but api_key is empty");
            }
        }

        if let Some(ref ipinfo) = self.ipinfo {
            if ipinfo.enabled && ipinfo.token.trim().is_empty() {
                anyhow::bail!("IPinfo is enabled but token is empty");
            }
        }

        if let Some(ref tor) = self.tor {
            if tor.enabled && tor.zone.trim().trim_matches('.').is_empty() {
                anyhow::bail!("Tor is enabled but zone is empty");
            }
            for entry in &tor.nameservers {
                if entry.parse::<IpAddr>().is_err() {
                    anyhow::bail!("Invalid Tor nameserver: {}", entry);
                }
            }
        }

        Ok(())
    }

    /// Generate example configuration YAML.
    pub fn example() -> String {
        r#"# Proxy Detection Configuration

settings:
  provider_timeout_ms: 5000    # Per-provider time budget per evaluation
  cache_timeout_ms: 1000       # Time budget per cache read or write
  namespace: "validate-my-address"

# Result cache
cache:
  backend: memory              # memory or redis
  capacity: 100                # Max entries (memory backend)
  ttl_seconds: 21600           # Keep verdicts for 6 hours
  # redis_url: "redis://127.0.0.1:6379"

# GetIPIntel (free, requires a contact e-mail)
ipintel:
  enabled: true
  contact_email: "${CONTACT_EMAIL}"
  flags: "f"
  low_risk_threshold: 0.20
  timeout_ms: 5000
  freshness_seconds: 21600

# IPHub (free tier: 1k lookups per month)
iphub:
  enabled: true
  api_key: "${IP_HUB_APIKEY}"
  timeout_ms: 5000

# IPinfo (privacy detection requires a standard plan)
ipinfo:
  enabled: false
  token: "${IP_INFO_TOKEN}"

# Tor exit node detection via DNS exit list
tor:
  enabled: true
  zone: "dnsel.torproject.org"
  nameservers:
    - "1.1.1.1"
    - "8.8.8.8"
"#
        .to_string()
    }
}

/// Expand environment variables in the format ${VAR_NAME}.
fn expand_env_vars(content: &str) -> String {
    let re = match regex::Regex::new(r"\$\{([^}]+)\}") {
        Ok(re) => re,
        Err(_) => return content.to_string(),
    };

    re.replace_all(content, |caps: &regex::Captures| {
        std::env::var(&caps[1]).unwrap_or_default()
    })
    .into_owned()
}
