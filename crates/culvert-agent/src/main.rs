//! Culvert Agent - dial a relay and serve forwarded connections
//!
//! The agent connects out to a Culvert relay, registers under an
//! identifier, and forwards every stream the relay opens to a single
//! target address.
//!
//! # Example Usage
//!
//! ```bash
//! # Forward relay traffic to a local service
//! culvert-agent --relay relay.example.com:5555 --target 127.0.0.1:8080
//!
//! # Development against a self-signed relay
//! culvert-agent --relay 127.0.0.1:5555 --target 127.0.0.1:8080 --insecure
//! ```

use anyhow::Result;
use clap::Parser;
use tracing::{error, info, warn};

use culvert_agent::{Agent, AgentConfig};

/// Culvert Agent - reverse-connecting forwarding endpoint
#[derive(Parser, Debug)]
#[command(
    name = "culvert-agent",
    about = "Reverse-connecting agent that forwards relay traffic to a target address",
    version
)]
struct Args {
    /// Relay address to connect to (host:port)
    #[arg(long, env = "CULVERT_RELAY_ADDR", default_value = "127.0.0.1:5555")]
    relay: String,

    /// Target address to forward traffic to (host:port)
    #[arg(long, env = "CULVERT_TARGET_ADDR")]
    target: String,

    /// Identifier reported to the relay (defaults to the hostname)
    #[arg(long, env = "CULVERT_AGENT_ID")]
    id: Option<String>,

    /// Server name expected on the relay's certificate
    #[arg(long, env = "CULVERT_SERVER_NAME", default_value = "localhost")]
    server_name: String,

    /// Skip TLS certificate verification (INSECURE - development only)
    #[arg(long, env = "CULVERT_INSECURE")]
    insecure: bool,

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

    info!("Starting Culvert Agent");

    let identifier = args
        .id
        .unwrap_or_else(|| gethostname::gethostname().to_string_lossy().into_owned());

    info!("Agent configuration:");
    info!("  Relay: {}", args.relay);
    info!("  Target: {}", args.target);
    info!("  Identifier: {}", identifier);

    if args.insecure {
        warn!("⚠️  Running in INSECURE mode - certificate verification is DISABLED");
        warn!("⚠️  This should ONLY be used for local development");
    }

    let agent = Agent::new(AgentConfig {
        relay_addr: args.relay,
        server_name: args.server_name,
        target_addr: args.target,
        identifier,
        insecure: args.insecure,
    });

    tokio::select! {
        result = agent.run() => {
            if let Err(e) = result {
                error!("Agent error: {}", e);
                return Err(e.into());
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
    }

    info!("Agent stopped");
    Ok(())
}
