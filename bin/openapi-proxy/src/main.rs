use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use hyper::{server::conn::http1, service::service_fn};
use hyper_util::rt::tokio::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod spec_proxy;

use spec_proxy::SpecProxy;

/// Serves collected OpenAPI documents with server URLs rewritten for the router
#[derive(Parser, Debug)]
#[command(name = "openapi-proxy", version, about, long_about = None)]
struct Cli {
    /// Debug mode: log more information
    #[arg(long, short, env = "OPENAPI_PROXY_DEBUG")]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long, env = "OPENAPI_PROXY_LOG_JSON")]
    log_json: bool,

    /// Address to listen on
    #[arg(long, env = "OPENAPI_PROXY_LISTEN_ADDR", default_value = "0.0.0.0:5000")]
    listen_addr: SocketAddr,

    /// Seconds to wait for a backend to return its document
    #[arg(long, env = "OPENAPI_PROXY_UPSTREAM_TIMEOUT", default_value_t = 30)]
    upstream_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug, cli.log_json);

    info!("Starting openapi-proxy v{}...", env!("CARGO_PKG_VERSION"));

    let proxy = Arc::new(SpecProxy::new(Duration::from_secs(cli.upstream_timeout))?);

    let listener = TcpListener::bind(&cli.listen_addr).await?;
    info!("HTTP server listening on {}", cli.listen_addr);

    loop {
        let (stream, peer_addr) = tokio::select! {
            accepted = listener.accept() => accepted?,
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received, exiting...");
                return Ok(());
            }
        };
        let io = TokioIo::new(stream);
        let proxy = proxy.clone();

        tokio::task::spawn(async move {
            let service = service_fn(move |req| {
                let proxy = proxy.clone();
                async move { Ok::<_, Infallible>(proxy.handle(req).await) }
            });

            if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                debug!("Error serving HTTP connection from {}: {}", peer_addr, e);
            }
        });
    }
}

/// `RUST_LOG` wins; otherwise `debug` with `--debug` and `info` without
fn init_tracing(debug: bool, json: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
