//! Proxy detection service CLI.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;
use zentinel_proxy_detect::config::CacheBackend;
use zentinel_proxy_detect::{
    server, Config, MemoryCache, Orchestrator, ProviderRegistry, RedisCache, ResultCache,
};

#[derive(Parser, Debug)]
#[command(name = "zentinel-proxy-detect")]
#[command(about = "Proxy detection service for Zentinel - flag proxy, VPN and Tor addresses using several reputation sources")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "proxy-detect.yaml")]
    config: PathBuf,

    /// HTTP listen address
    #[arg(short, long, default_value = "0.0.0.0:9000")]
    listen: SocketAddr,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

fn build_cache(config: &Config) -> Result<Arc<dyn ResultCache>> {
    let cache: Arc<dyn ResultCache> = match config.cache.backend {
        CacheBackend::Memory => {
            let memory = Arc::new(MemoryCache::new(
                config.cache.ttl_seconds,
                config.cache.capacity,
            ));

            // Periodically drop expired entries
            let sweeper = memory.clone();
            tokio::spawn(async move {
                let mut interval = tokio::time::interval(Duration::from_secs(60));
                loop {
                    interval.tick().await;
                    sweeper.cleanup();
                }
            });

            memory
        }
        CacheBackend::Redis => {
            let url = config.cache.redis_url.as_deref().unwrap_or_default();
            Arc::new(
                RedisCache::new(url, config.cache.ttl_seconds)
                    .context("Failed to set up redis cache")?
                    .with_timeout(config.settings.cache_timeout()),
            )
        }
    };

    info!(backend = cache.name(), ttl_seconds = config.cache.ttl_seconds, "Result cache ready");
    Ok(cache)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_config {
        println!("{}", Config::example());
        return Ok(());
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(config = %args.config.display(), "Loading configuration");
    let config = Config::load(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;

    let providers = ProviderRegistry::from_config(&config)?;
    if providers.is_empty() {
        anyhow::bail!("No detection provider is enabled");
    }

    if args.validate {
        info!(providers = ?providers.names(), "Configuration is valid");
        return Ok(());
    }

    let cache = build_cache(&config)?;
    let orchestrator = Arc::new(Orchestrator::from_config(&config, providers, cache));

    let listener = TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("Failed to bind {}", args.listen))?;

    server::serve(listener, orchestrator).await
}
