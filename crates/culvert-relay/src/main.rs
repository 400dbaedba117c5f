//! Culvert Relay - pivot local TCP traffic through reverse-connecting agents
//!
//! Agents dial in over QUIC and register a session; every connection made
//! to the local forward port is relayed through the currently selected
//! agent session as its own logical stream. Sessions are switched from
//! the console without restarting the listener.
//!
//! # Example Usage
//!
//! ```bash
//! # Run with a certificate/key pair
//! culvert-relay --cert certs/cert.pem --key certs/key.pem
//!
//! # Development: self-signed certificate, custom ports
//! culvert-relay --listen 0.0.0.0:5555 --forward 127.0.0.1:1080
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use culvert_relay::{
    console, display_id, AgentListener, Command, ForwardListener, Selector, SessionPool,
};
use culvert_session::SessionConfig;

/// Culvert Relay - session pool and forwarding engine
#[derive(Parser, Debug)]
#[command(
    name = "culvert-relay",
    about = "Relay local TCP connections through reverse-connecting agents",
    version,
    long_about = "The Culvert relay accepts encrypted agent sessions on one port and \
                  plain TCP connections on another. Each local connection is forwarded \
                  through the currently selected agent session as an independent \
                  logical stream; the active session can be switched at runtime from \
                  the console."
)]
struct Args {
    /// Agent-facing listen address (QUIC)
    #[arg(long, env = "CULVERT_LISTEN_ADDR", default_value = "0.0.0.0:5555")]
    listen: SocketAddr,

    /// Local forward listen address (plain TCP)
    #[arg(long, env = "CULVERT_FORWARD_ADDR", default_value = "127.0.0.1:1080")]
    forward: SocketAddr,

    /// TLS certificate file (PEM)
    ///
    /// Generated self-signed on startup when omitted.
    #[arg(long, env = "CULVERT_CERT_FILE")]
    cert: Option<PathBuf>,

    /// TLS private key file (PEM)
    #[arg(long, env = "CULVERT_KEY_FILE")]
    key: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "RUST_LOG", default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(&args.log_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .init();

    info!("Starting Culvert Relay");
    info!("Relay configuration:");
    info!("  Agent listener: {}", args.listen);
    info!("  Forward listener: {}", args.forward);

    let session_config = match (&args.cert, &args.key) {
        (Some(cert), Some(key)) => {
            info!("  Certificate: {}", cert.display());
            info!("  Key: {}", key.display());
            SessionConfig::server(cert, key)
        }
        (None, None) => {
            warn!("⚠️  No certificate configured - generating a self-signed one");
            warn!("⚠️  Agents must connect with certificate verification disabled");
            SessionConfig::server_ephemeral()
                .context("Failed to generate self-signed certificate")?
        }
        _ => anyhow::bail!("--cert and --key must be provided together"),
    };

    let pool = Arc::new(SessionPool::new());
    let (picker, mut commands) = console::start();
    let selector = Arc::new(Selector::new(pool.clone(), Arc::new(picker)));

    let agent_listener = AgentListener::bind(args.listen, &session_config, pool.clone())
        .context("Failed to bind agent listener")?;
    let forward_listener = ForwardListener::bind(args.forward, selector.clone())
        .await
        .context("Failed to bind forward listener")?;

    info!("Console commands: select, list, quit");

    let mut agent_task = tokio::spawn(agent_listener.run());
    let mut forward_task = tokio::spawn(forward_listener.run());

    loop {
        tokio::select! {
            result = &mut agent_task => {
                match result {
                    Ok(Ok(())) => error!("Agent listener stopped unexpectedly"),
                    Ok(Err(e)) => error!("Agent listener failed: {}", e),
                    Err(e) => error!("Agent listener task panicked: {}", e),
                }
                anyhow::bail!("agent listener terminated");
            }
            result = &mut forward_task => {
                match result {
                    Ok(Ok(())) => error!("Forward listener stopped unexpectedly"),
                    Ok(Err(e)) => error!("Forward listener failed: {}", e),
                    Err(e) => error!("Forward listener task panicked: {}", e),
                }
                anyhow::bail!("forward listener terminated");
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Select) => {
                        // Run the prompt off the control loop so quit and
                        // Ctrl+C stay responsive while it is open
                        let selector = selector.clone();
                        tokio::spawn(async move {
                            if let Err(e) = selector.reselect().await {
                                warn!("Session selection failed: {}", e);
                            }
                        });
                    }
                    Some(Command::List) => {
                        let current = pool.current().map(|(id, _)| id);
                        let ids = pool.snapshot();
                        if ids.is_empty() {
                            println!("No sessions connected");
                        } else {
                            println!("Sessions ({}):", ids.len());
                            for id in ids {
                                let marker = if Some(&id) == current.as_ref() { "*" } else { " " };
                                println!(" {} {}", marker, display_id(&id));
                            }
                        }
                    }
                    Some(Command::Quit) | None => {
                        info!("Shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                break;
            }
        }
    }

    Ok(())
}
