//! skiff-cli - Command-line tool for skiff services
//!
//! Sends hand-built calls to a server and decodes captured messages.

mod commands;

use clap::{Parser, Subcommand};
use colored::Colorize;
use skiff_client::{Client, ConnectionConfig};
use skiff_protocol::CodecOptions;
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "skiff-cli")]
#[command(about = "Command-line tool for skiff RPC services")]
#[command(version)]
struct Cli {
    /// Server address
    #[arg(short, long, env = "SKIFF_SERVER", default_value = "127.0.0.1:9090")]
    server: SocketAddr,

    /// Request timeout in seconds
    #[arg(short, long, default_value = "30")]
    timeout: u64,

    /// Write envelopes without the version word
    #[arg(long, env = "SKIFF_NON_STRICT")]
    non_strict: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Call a method with a hex-encoded args struct
    Call {
        /// Method name
        method: String,

        /// Encoded args struct (defaults to an empty struct)
        #[arg(short, long, default_value = "00")]
        args_hex: String,

        /// Send as ONEWAY and do not wait for a reply
        #[arg(long)]
        oneway: bool,
    },

    /// Decode a hex dump of a message, with or without its frame prefix
    Decode {
        /// Hex bytes
        hex: String,

        /// Input is a bare struct with no envelope
        #[arg(long)]
        struct_only: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let codec = CodecOptions::default()
        .with_strict_write(!cli.non_strict)
        .with_strict_read(false);

    let result = match cli.command {
        // Decoding needs no server connection
        Commands::Decode { hex, struct_only } => commands::decode(&hex, codec, struct_only),
        Commands::Call {
            method,
            args_hex,
            oneway,
        } => {
            let config = ConnectionConfig::new(cli.server)
                .with_request_timeout(Duration::from_secs(cli.timeout))
                .with_codec_options(codec);
            let mut client = Client::connect(config).await.map_err(|e| {
                eprintln!("{}: {}", "Connection failed".red(), e);
                e
            })?;
            let result = commands::call(&client, &method, &args_hex, oneway).await;
            client.close().await?;
            result
        }
    };

    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}
