//! Burrow - covert DNS tunnel
//!
//! Carries an arbitrary byte stream inside DNS TXT query/response
//! traffic to traverse networks that only permit DNS resolution.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

use burrow::{ClientConfig, Encoding, ServerConfig, TunnelClient, TunnelServer};

#[derive(Parser)]
#[command(name = "burrow")]
#[command(version)]
#[command(about = "Covert DNS tunnel", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the tunnel server: decode queries, relay to the backend
    Server {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// UDP listen address
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Tunnel domain this server is authoritative for
        #[arg(short, long, required_unless_present = "config")]
        domain: Option<String>,

        /// Backend target address sessions relay to
        #[arg(short, long, required_unless_present = "config")]
        backend: Option<SocketAddr>,

        /// Payload encoding (base32, base64, hex)
        #[arg(short, long)]
        encoding: Option<Encoding>,

        /// Maximum concurrently handled queries
        #[arg(long)]
        max_inflight: Option<usize>,
    },

    /// Run the tunnel client: bridge a local TCP port into DNS queries
    Client {
        /// Configuration file path
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Local TCP listen address
        #[arg(short, long)]
        listen: Option<SocketAddr>,

        /// Upstream resolver address (or the tunnel server directly)
        #[arg(short, long, required_unless_present = "config")]
        resolver: Option<SocketAddr>,

        /// Tunnel domain, must match the server
        #[arg(short, long, required_unless_present = "config")]
        domain: Option<String>,

        /// Payload encoding (base32, base64, hex)
        #[arg(short, long)]
        encoding: Option<Encoding>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    match cli.command {
        Commands::Server {
            config,
            listen,
            domain,
            backend,
            encoding,
            max_inflight,
        } => {
            let mut cfg = match config {
                Some(path) => ServerConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => ServerConfig::new(
                    domain.clone().context("--domain is required")?,
                    backend.context("--backend is required")?,
                ),
            };
            if let Some(listen) = listen {
                cfg.listen_addr = listen;
            }
            if let Some(domain) = domain {
                cfg.tunnel_domain = domain;
            }
            if let Some(backend) = backend {
                cfg.backend_addr = backend;
            }
            if let Some(encoding) = encoding {
                cfg.encoding = encoding;
            }
            if let Some(max_inflight) = max_inflight {
                cfg.max_inflight = max_inflight;
            }

            let server = TunnelServer::bind(cfg)
                .await
                .context("starting tunnel server")?;
            server.run().await.context("tunnel server failed")?;
        }

        Commands::Client {
            config,
            listen,
            resolver,
            domain,
            encoding,
        } => {
            let mut cfg = match config {
                Some(path) => ClientConfig::from_file(&path)
                    .with_context(|| format!("loading config from {}", path.display()))?,
                None => ClientConfig::new(
                    domain.clone().context("--domain is required")?,
                    resolver.context("--resolver is required")?,
                ),
            };
            if let Some(listen) = listen {
                cfg.listen_addr = listen;
            }
            if let Some(resolver) = resolver {
                cfg.resolver_addr = resolver;
            }
            if let Some(domain) = domain {
                cfg.tunnel_domain = domain;
            }
            if let Some(encoding) = encoding {
                cfg.encoding = encoding;
            }

            let client = TunnelClient::bind(cfg)
                .await
                .context("starting tunnel client")?;
            client.run().await.context("tunnel client failed")?;
        }
    }

    Ok(())
}
