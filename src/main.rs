//! socketio-bridge CLI - runs Lua clients against loopback sockets.
//!
//! See the `socketio_bridge` library for the bridge itself.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use mimalloc::MiMalloc;
use socketio_bridge::bridge::serialize_query;
use socketio_bridge::{LoopbackFactory, LuaRuntime, SocketFactory};

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

#[derive(Parser)]
#[command(name = "socketio-bridge")]
#[command(version)]
#[command(about = "Socket.IO-style event bridge with a Lua consumer")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a Lua script with the `socketio`, `log` and `json` globals
    Run {
        /// Path to the Lua script
        script: PathBuf,
        /// Deliver emits back to the emitting socket's own listeners
        #[arg(long)]
        echo: bool,
        /// Delay between event polls, in milliseconds
        #[arg(long, default_value_t = 50)]
        poll_ms: u64,
        /// Number of event polls before shutting down
        #[arg(long, default_value_t = 20)]
        ticks: u32,
    },
    /// Print the handshake query string for key=value pairs
    Query {
        /// Pairs in key=value form
        pairs: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            script,
            echo,
            poll_ms,
            ticks,
        } => run_script(&script, echo, poll_ms, ticks).await,
        Commands::Query { pairs } => {
            println!("{}", build_query(&pairs)?);
            Ok(())
        }
    }
}

async fn run_script(script: &Path, echo: bool, poll_ms: u64, ticks: u32) -> Result<()> {
    let factory: Arc<dyn SocketFactory> = if echo {
        Arc::new(LoopbackFactory::echoing())
    } else {
        Arc::new(LoopbackFactory::new())
    };

    let mut runtime = LuaRuntime::new(factory).context("Failed to create Lua runtime")?;
    runtime.set_strict(true);
    runtime
        .load_file_absolute(script)
        .with_context(|| format!("Script failed: {}", script.display()))?;

    let mut delivered = 0;
    for _ in 0..ticks {
        delivered += runtime.poll();
        tokio::time::sleep(Duration::from_millis(poll_ms)).await;
    }

    log::info!(
        "Delivered {delivered} event(s) to {} listener(s)",
        runtime.listener_count()
    );
    runtime.shutdown();
    Ok(())
}

fn build_query(pairs: &[String]) -> Result<String> {
    let mut parsed = Vec::with_capacity(pairs.len());
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("Expected key=value, got '{pair}'");
        };
        parsed.push((key, value));
    }
    Ok(serialize_query(parsed))
}
