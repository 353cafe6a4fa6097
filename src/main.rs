use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tollgate::cache::{NullCache, RedisCache, TokenCache};
use tollgate::config::Config;
use tollgate::directory::TenantDirectory;
use tollgate::proxy::GatewayServer;
use tollgate::{PKG_NAME, VERSION};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tollgate=debug".parse().expect("valid log directive")),
        )
        .init();

    // Load configuration; the gateway refuses to serve without a snapshot
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .or_else(|| std::env::var("TOLLGATE_CONFIG").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), "Configuration loaded");
    print_startup_banner(&config);

    let directory = Arc::new(TenantDirectory::new(config.tenants.clone()));

    // Cache connectivity is never fatal: lookups degrade to empty
    // credentials either way
    let cache: Arc<dyn TokenCache> = match config.cache.url.as_deref() {
        Some(url) if !url.is_empty() => match RedisCache::connect(url).await {
            Ok(cache) => {
                info!("Token cache connected");
                Arc::new(cache)
            }
            Err(e) => {
                warn!(error = %e, "Token cache unavailable, cached credentials degrade to empty");
                Arc::new(NullCache)
            }
        },
        _ => {
            info!("No token cache configured");
            Arc::new(NullCache)
        }
    };

    let bind_addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port)
        .parse()
        .map_err(|e| {
            error!(bind = %config.server.bind, port = config.server.port, error = %e, "Invalid bind address");
            anyhow::anyhow!("Invalid bind address: {}", e)
        })?;

    let (server, shutdown_tx) = GatewayServer::new(
        bind_addr,
        Arc::clone(&directory),
        cache,
        &config.upstream,
    )?;

    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Gateway server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM) or config reload (SIGHUP)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");
        let mut sighup = signal(SignalKind::hangup()).expect("Failed to install SIGHUP handler");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Received SIGINT (Ctrl+C), shutting down...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down...");
                    break;
                }
                _ = sighup.recv() => {
                    info!(path = %config_path.display(), "Received SIGHUP, reloading tenant configuration...");
                    match Config::load(&config_path) {
                        Ok(new_config) => {
                            let summary = directory.replace(new_config.tenants);
                            info!(
                                added = summary.added.len(),
                                removed = summary.removed.len(),
                                total = summary.total,
                                "Tenant snapshot replaced"
                            );
                            if !summary.added.is_empty() {
                                info!(tenants = ?summary.added, "New tenants available");
                            }
                            if !summary.removed.is_empty() {
                                info!(tenants = ?summary.removed, "Tenants removed");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to reload configuration, keeping current snapshot");
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown and wait for the server to stop (with timeout)
    let _ = shutdown_tx.send(true);
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting gateway");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        "Server configuration"
    );
    info!(
        primary = %config.upstream.primary_base,
        secondary = %config.upstream.secondary_base,
        tertiary = %config.upstream.tertiary_base,
        "Upstream hosts"
    );
    info!(
        connect_timeout_secs = config.upstream.connect_timeout_secs,
        pool_idle_timeout_secs = config.upstream.pool_idle_timeout_secs,
        pool_max_idle = config.upstream.pool_max_idle_per_host,
        "Upstream transport settings"
    );
    info!(
        tenant_count = config.tenants.len(),
        tenants = ?config.tenants.iter().map(|t| t.id.as_str()).collect::<Vec<_>>(),
        cache = config.cache.url.is_some(),
        "Registered tenants"
    );
}
