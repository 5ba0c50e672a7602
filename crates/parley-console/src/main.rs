//! Parley console binary.
//!
//! # Usage
//!
//! ```bash
//! # Token from the environment
//! PARLEY_TOKEN=... parley-console https://chat.example.com
//!
//! # Explicit token and verbose logs (logs go to stderr)
//! parley-console localhost:5000 --token ... --log-level debug
//! ```

use std::io;

use clap::Parser;
use parley_app::{Runtime, RuntimeConfig, SystemEnv, WsDriver, socket_url};
use parley_console::{Console, run_session};
use tokio::io::BufReader;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Parley operator console
#[derive(Parser, Debug)]
#[command(name = "parley-console")]
#[command(about = "Line-oriented operator console for Parley chat servers")]
#[command(version)]
struct Args {
    /// Server URL (http, https, ws or wss; scheme defaults to ws)
    url: String,

    /// Bearer token for the operator account
    #[arg(short, long, env = "PARLEY_TOKEN", hide_env_values = true)]
    token: String,

    /// Operator id sent with list and history requests
    #[arg(long)]
    operator_id: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer().with_writer(io::stderr)).with(filter).init();

    let url = socket_url(&args.url);
    tracing::info!(%url, "Parley console starting");

    let mut config = RuntimeConfig::new(url);
    config.client.operator_id = args.operator_id;

    let (runtime, handle) = Runtime::new(WsDriver::new(), SystemEnv::new(), config);
    let task = tokio::spawn(runtime.run());

    let mut console = Console::new(io::stdout());
    console.line("type /help for commands")?;

    handle.connect(args.token).await?;
    run_session(&handle, BufReader::new(tokio::io::stdin()), &mut console).await?;

    handle.close().await?;
    drop(handle);
    task.await?;

    Ok(())
}
