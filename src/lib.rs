//! Proxy, VPN and Tor detection for Zentinel.
//!
//! Asks several independent IP reputation sources about an address at once
//! and reconciles their answers into a single verdict recommending whether
//! to whitelist or blacklist it.
//!
//! # Features
//!
//! - **GetIPIntel, IPHub and IPinfo** - Commercial and free reputation APIs
//! - **Tor Exit Node Detection** - DNS exit list lookups
//! - **Majority Vote** - Tor wins outright, otherwise the larger camp wins
//! - **Fail-Closed** - No answer or a tie blacklists and asks for a rescan
//! - **Caching** - Verdicts cached in memory or Redis, reused while fresh
//!
//! # Example Configuration
//!
//! ```yaml
//! settings:
//!   provider_timeout_ms: 5000
//!
//! cache:
//!   backend: memory
//!   ttl_seconds: 21600
//!
//! iphub:
//!   enabled: true
//!   api_key: "${IP_HUB_APIKEY}"
//!
//! tor:
//!   enabled: true
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod providers;
pub mod record;
pub mod server;

pub use cache::{CacheError, MemoryCache, RedisCache, ResultCache};
pub use config::Config;
pub use error::EvaluateError;
pub use orchestrator::{reconcile, Evaluation, Orchestrator};
pub use providers::{DetectionProvider, ProviderError, ProviderRegistry};
pub use record::{AnalysisRecord, Fingerprint, RecommendedAction};
