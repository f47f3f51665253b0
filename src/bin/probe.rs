//! Probe CLI: connect to a running bridge, list its tools
//!
//! Run with: sse-bridge-probe --base-url http://127.0.0.1:8080

use std::time::Duration;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sse_bridge::probe::{list_tools, ProbeConfig};

#[derive(Parser, Debug)]
#[command(name = "sse-bridge-probe")]
#[command(about = "Probe an MCP SSE server and list its tools")]
struct Args {
    /// Server base URL (no trailing slash)
    #[arg(long, default_value = "http://127.0.0.1:8080")]
    base_url: String,

    /// SSE path
    #[arg(long, default_value = "/sse")]
    sse_path: String,

    /// Protocol version to send in initialize
    #[arg(long, default_value = "2024-11-05")]
    protocol_version: String,

    /// Overall wait limit in seconds for the tools response
    #[arg(long, default_value = "15")]
    max_wait: u64,

    /// Log every event observed on the stream
    #[arg(long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .init();
    let config = ProbeConfig {
        base_url: args.base_url,
        sse_path: args.sse_path,
        protocol_version: args.protocol_version,
        max_wait: Duration::from_secs(args.max_wait),
    };

    let report = list_tools(&config).await?;

    println!("Received {} tools via {}:", report.tools.len(), report.endpoint);
    for tool in &report.tools {
        println!("- {}: {}", tool.name, tool.description);
    }
    println!("({}ms)", report.elapsed.as_millis());

    Ok(())
}
