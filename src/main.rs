//! email-mcp-rs: Email MCP server over stdio or streamable HTTP
//!
//! Exposes one IMAP mailbox and one SMTP relay as Model Context Protocol
//! tools: list, search, read, send, reply, forward, flag, move and delete.
//!
//! # Architecture
//!
//! - [`main`]: Process entry point with env loading and transport selection
//! - [`config`]: Environment-driven IMAP/SMTP/OAuth settings
//! - [`errors`]: Application error model with in-band tool error mapping
//! - [`email`]: Normalized email records and per-call request values
//! - [`store`]: Mail store session seam and sequence-set formatting
//! - [`imap`]: `async-imap` implementation of the store with timeouts
//! - [`mailbox`]: Session driver sequencing select/search/fetch/store
//! - [`mime`]: Message decoding into bodies and attachments
//! - [`compose`]: Send/reply/forward derivation into `lettre` messages
//! - [`smtp`]: Relay delivery, one connection per call
//! - [`server`]: MCP tool handlers with validation
//! - [`http`]: Streamable HTTP router with a health check
//! - [`models`]: Tool input DTOs and the response envelope

mod compose;
mod config;
mod email;
mod errors;
mod http;
mod imap;
mod mailbox;
mod mime;
mod models;
mod server;
mod smtp;
mod store;
#[cfg(test)]
mod testing;

use clap::Parser;
use config::ServerConfig;
use rmcp::ServiceExt;
use rmcp::transport::stdio;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Command-line options
#[derive(Debug, Parser)]
#[command(name = "email-mcp-rs", version, about)]
struct Cli {
    /// Serve streamable HTTP instead of stdio
    #[arg(long)]
    http: bool,
    /// Listen address used with `--http`
    #[arg(long, default_value = http::DEFAULT_ADDR)]
    addr: String,
}

/// Application entry point
///
/// Initializes tracing from environment, loads config, opens the mailbox
/// session in the background (failure is not fatal) and serves MCP on the
/// selected transport without waiting for it. Logs go to stderr because stdout carries the stdio protocol.
///
/// # Environment Variables
///
/// See [`ServerConfig::load_from_env`] for full configuration options.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ServerConfig::load_from_env()?;
    info!(
        imap = %format!("{}:{}", config.imap.host, config.imap.port),
        smtp = %format!("{}:{}", config.smtp.host, config.smtp.port),
        oauth = config.oauth.enabled,
        "configuration loaded"
    );

    let server = server::EmailServer::new(config);
    server.spawn_warm_up();

    if cli.http {
        let shutdown = CancellationToken::new();
        let trigger = shutdown.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("shutdown requested");
                    trigger.cancel();
                }
                Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
            }
        });
        http::serve(server, &cli.addr, shutdown).await?;
    } else {
        let service = server.serve(stdio()).await?;
        service.waiting().await?;
    }
    Ok(())
}
