//! MirrorProxy - Main entry point
//!
//! A domain-substitution reverse proxy server

use anyhow::Result;
use clap::Parser;
use mirrorproxy::{Forwarder, MirrorConfig, ProxyConfig, ProxyServer, RuntimeMode};
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// MirrorProxy - A domain-substitution reverse proxy server
#[derive(Parser, Debug)]
#[command(name = "mirrorproxy")]
#[command(author = "MirrorProxy Contributors")]
#[command(version = "1.0.0")]
#[command(about = "Mirror a set of upstream domains under one hostname suffix")]
struct Args {
    /// HTTP port to listen on
    #[arg(long, env = "HTTP_PORT", default_value = "8080")]
    http_port: u16,

    /// Address to bind
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0")]
    bind_addr: IpAddr,

    /// Mirror configuration file (JSON); the built-in table is used when absent
    #[arg(long, env = "MIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Runtime mode; development exposes error chains in 502 responses
    #[arg(long, env = "RUNTIME_ENV", value_enum, default_value = "production")]
    runtime_env: RuntimeMode,

    /// Maximum seconds spent on one request, 0 for no limit
    #[arg(long, env = "MAX_DURATION_SECS", default_value = "30")]
    max_duration_secs: u64,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    info!("Starting MirrorProxy v1.0.0");

    let mirror = MirrorConfig::load_or_builtin(args.config.as_ref())?;
    match &args.config {
        Some(path) => info!("Mirror configuration loaded from: {}", path.display()),
        None => info!("Using built-in mirror configuration"),
    }

    let mapping = Arc::new(mirror.build_mapping()?);
    info!(
        "Default prefix {} -> {}",
        mapping.default_entry().prefix,
        mapping.default_entry().target
    );

    let config = ProxyConfig {
        bind_addr: args.bind_addr,
        http_port: args.http_port,
        redirect: mirror.redirect,
        mode: args.runtime_env,
        max_duration: (args.max_duration_secs > 0).then(|| Duration::from_secs(args.max_duration_secs)),
    };

    let forwarder = Forwarder::new()?;
    let server = Arc::new(ProxyServer::new(config, mapping, forwarder));

    info!("MirrorProxy started successfully");

    server.run().await?;

    Ok(())
}
