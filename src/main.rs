//! Switchyard reverse proxy binary.
//!
//! ```text
//!     Client ──▶ HTTP / HTTPS listener ──▶ resolver pipeline ──▶ round robin ──▶ Backend
//!                                               │
//!                          challenge (9999) · rate limit · user resolvers · routing table (0)
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::task::JoinSet;

use switchyard::admin::{serve_admin, AdminState};
use switchyard::config::{load_config, ConfigWatcher, ProxyConfig};
use switchyard::lifecycle::{shutdown_on_signal, Shutdown};
use switchyard::net::tls::load_tls_config;
use switchyard::observability::{init_logging, init_metrics};
use switchyard::{HttpForwarder, HttpServer, ReverseProxy};

#[derive(Debug, Parser)]
#[command(name = "switchyard", version, about = "Host and path based reverse proxy")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Reload routes when the configuration file changes.
    #[arg(long, requires = "config")]
    watch: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };

    init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "switchyard starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        routes = config.routes.len(),
        rate_limit = config.rate_limit.enabled,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr: SocketAddr = config.observability.metrics_address.parse()?;
        if let Err(e) = init_metrics(addr) {
            tracing::error!(error = %e, "Failed to start metrics endpoint");
        }
    }

    let proxy = Arc::new(ReverseProxy::from_config(&config).await?);
    let forwarder = Arc::new(HttpForwarder::new(
        Duration::from_secs(config.timeouts.connect_secs),
        config.proxy.xfwd,
    ));
    let server = Arc::new(HttpServer::new(
        proxy.clone(),
        forwarder,
        Duration::from_secs(config.timeouts.request_secs),
    ));

    let shutdown = Shutdown::new();
    tokio::spawn(shutdown_on_signal(shutdown.clone()));

    let mut listeners = JoinSet::new();

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    {
        let server = server.clone();
        let shutdown = shutdown.clone();
        listeners.spawn(async move { server.run(listener, shutdown).await });
    }

    if let Some(https) = &config.https {
        let tls = load_tls_config(
            Path::new(&https.cert_path),
            Path::new(&https.key_path),
            proxy.certificates().clone(),
        )?;
        let addr: SocketAddr = https.bind_address.parse()?;
        let server = server.clone();
        let shutdown = shutdown.clone();
        listeners.spawn(async move { server.run_tls(addr, tls, shutdown).await });
    }

    if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let state = AdminState {
            proxy: proxy.clone(),
            api_key: Arc::from(config.admin.api_key.as_str()),
        };
        listeners.spawn(serve_admin(listener, state, shutdown.clone()));
    }

    // dropping the handle stops the watch, keep it until exit
    let _watch = match (&cli.config, cli.watch) {
        (Some(path), true) => {
            let (watcher, mut updates) = ConfigWatcher::new(path);
            let handle = watcher.run()?;
            let proxy = proxy.clone();
            let stopped = shutdown.signalled();
            tokio::spawn(async move {
                tokio::pin!(stopped);
                loop {
                    tokio::select! {
                        _ = &mut stopped => break,
                        update = updates.recv() => match update {
                            Some(config) => {
                                if let Err(e) = proxy.reload_routes(&config.routes) {
                                    tracing::error!(error = %e, "Route reload failed, keeping current routes");
                                }
                            }
                            None => break,
                        },
                    }
                }
            });
            Some(handle)
        }
        _ => None,
    };

    while let Some(joined) = listeners.join_next().await {
        match joined {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::error!(error = %e, "Listener failed, shutting down");
                shutdown.trigger();
            }
            Err(e) => {
                tracing::error!(error = %e, "Listener task panicked, shutting down");
                shutdown.trigger();
            }
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
