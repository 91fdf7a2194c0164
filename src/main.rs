//! PROXY protocol echo server
//!
//! Accepts connections behind a PROXY-speaking load balancer, logs the
//! recovered client address and echoes the payload back. Ctrl+C stops
//! accepting.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use proxyproto::config::Config;
use proxyproto::net::{Acceptor, ProxyConn, ProxyListener, TcpAcceptor, TcpTransport, Transport};

#[derive(Parser, Debug)]
#[command(name = "proxyproto-echo", version, about)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the configuration
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let listener = Arc::new(ProxyListener::with_config(
        TcpAcceptor::bind(&config.server.bind).await?,
        &config.proxy_protocol,
    ));
    info!("Listening on {}", listener.local_addr()?);

    {
        let listener = Arc::clone(&listener);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received");
                if let Err(e) = listener.close().await {
                    warn!("Close error: {}", e);
                }
            }
        });
    }

    loop {
        let conn = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) if listener.get_ref().is_closed() => break,
            Err(e) => {
                warn!("Accept error: {}", e);
                continue;
            }
        };

        tokio::spawn(async move {
            if let Err(e) = serve(conn).await {
                debug!("Connection error: {}", e);
            }
        });
    }

    info!("Stopped accepting");
    Ok(())
}

async fn serve(conn: ProxyConn<TcpTransport>) -> io::Result<()> {
    let client = conn.remote_addr().await?;
    let closer = conn.close_handle();

    match conn.proxy_header().await {
        Ok(header) => info!(client = %client, destination = %header.destination, "Connection"),
        Err(e) if e.is_parse_error() => {
            warn!(client = %client, error = %e, "Rejecting connection with malformed PROXY header");
            return closer.close().await;
        }
        Err(e) => {
            debug!(client = %client, error = %e, "PROXY header unavailable");
            return closer.close().await;
        }
    }

    let (mut reader, mut writer) = tokio::io::split(conn);
    let result = tokio::io::copy(&mut reader, &mut writer).await;

    closer.close().await?;
    result.map(|echoed| debug!(client = %client, bytes = echoed, "Connection finished"))
}
