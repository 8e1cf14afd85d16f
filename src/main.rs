use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use secrecy::SecretString;
use tracing::Level;

use relay_directory::DirectoryConfig;
use relay_server::ServerConfig;
use relay_store::{RedisStore, SharedStore};
use relay_telemetry::{init_telemetry, LogFormat, TelemetryConfig};
use relay_translate::TranslateConfig;

/// Real-time caption relay: pairs a producing control client with any number of displays.
#[derive(Debug, Parser)]
#[command(name = "relay", version)]
struct Args {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Shared store for multi-instance deployments. Unset runs single-instance.
    #[arg(long, env = "REDIS_URL")]
    redis_url: Option<String>,

    #[arg(long, env = "LIBRETRANSLATE_URL", default_value = "http://127.0.0.1:5000")]
    libretranslate_url: String,

    #[arg(long, env = "LIBRETRANSLATE_API_KEY", hide_env_values = true)]
    libretranslate_api_key: Option<String>,

    #[arg(long, env = "PUBLIC_DIR", default_value = "public")]
    public_dir: PathBuf,

    #[arg(long, env = "SESSION_TTL_SECS", default_value_t = 3600)]
    session_ttl_secs: u64,

    #[arg(long, env = "IDLE_TTL_SECS", default_value_t = 300)]
    idle_ttl_secs: u64,

    #[arg(long, env = "STALE_GRACE_SECS", default_value_t = 300)]
    stale_grace_secs: u64,

    #[arg(long, env = "EXPIRY_NOTICE_SECS", default_value_t = 60)]
    expiry_notice_secs: u64,

    #[arg(long, env = "TRANSLATION_CACHE_TTL_SECS", default_value_t = 3600)]
    translation_cache_ttl_secs: u64,

    #[arg(long, env = "LOG_FORMAT", default_value = "json")]
    log_format: LogFormat,

    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,
}

impl Args {
    fn server_config(&self) -> ServerConfig {
        ServerConfig {
            host: self.host.clone(),
            port: self.port,
            public_dir: self.public_dir.clone(),
            directory: DirectoryConfig {
                session_ttl: Duration::from_secs(self.session_ttl_secs),
                idle_ttl: Duration::from_secs(self.idle_ttl_secs),
                stale_grace: Duration::from_secs(self.stale_grace_secs),
                expiry_notice: Duration::from_secs(self.expiry_notice_secs),
                ..Default::default()
            },
            translate: TranslateConfig {
                url: self.libretranslate_url.clone(),
                api_key: self.libretranslate_api_key.clone().map(SecretString::from),
                cache_ttl: Duration::from_secs(self.translation_cache_ttl_secs),
                ..Default::default()
            },
            ..Default::default()
        }
    }
}

/// Connect to the shared store, or run without one when it is unset or unreachable.
async fn shared_store(url: Option<&str>) -> Option<Arc<dyn SharedStore>> {
    let url = url.filter(|u| !u.is_empty())?;
    let store = match RedisStore::connect(url).await {
        Ok(store) => store,
        Err(err) => {
            tracing::warn!(error = %err, "shared store unavailable, running single-instance");
            return None;
        }
    };
    if let Err(err) = store.ping().await {
        tracing::warn!(error = %err, "shared store did not answer ping, running single-instance");
        return None;
    }
    Some(Arc::new(store))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let telemetry = init_telemetry(TelemetryConfig {
        log_level: args.log_level,
        format: args.log_format,
        ..Default::default()
    });

    tracing::info!("Starting caption relay");

    let store = shared_store(args.redis_url.as_deref()).await;
    let handle = relay_server::start(args.server_config(), store, telemetry.metrics())
        .await
        .context("failed to start server")?;

    tracing::info!(port = handle.port, "Relay ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl+c")?;

    tracing::info!("Shutting down");
    handle.shutdown().await;
    Ok(())
}
