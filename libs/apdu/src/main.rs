//! signet-apdu CLI - APDU daemon for the Signet command core
//!
//! Serves the command core over a length-framed TCP socket, the same shape
//! an emulator or host tooling speaks. The daemon signs with the
//! deterministic development backend; production builds wire in a real
//! [`signet_apdu::SigningBackend`] instead.

use clap::{Parser, Subcommand};
use signet_apdu::dispatch::ProcessorConfig;
use signet_apdu::server::ApduServer;
use signet_apdu::test_utils::TestBackend;
use std::net::ToSocketAddrs;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "signet-apdu")]
#[command(about = "APDU daemon for the Signet command core", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the command core over TCP
    #[command(name = "serve")]
    Serve {
        /// Listen address
        #[arg(short = 'a', long, default_value = "127.0.0.1")]
        address: String,

        /// Listen port
        #[arg(short = 'p', long, default_value = "9999")]
        port: u16,

        /// Connection timeout in seconds
        #[arg(short = 't', long)]
        timeout: Option<u64>,

        /// Maximum concurrent connections
        #[arg(short = 'c', long, default_value = "4")]
        max_connections: usize,

        /// Maximum logical message size in bytes
        #[arg(long, default_value = "65536")]
        max_message_size: usize,

        /// Refuse transactions carrying contract calldata
        #[arg(long)]
        disable_contract_data: bool,
    },
}

/// Launch the TCP daemon
fn serve(
    address: &str,
    port: u16,
    timeout: Option<u64>,
    max_connections: usize,
    config: ProcessorConfig,
) -> Result<(), String> {
    let addr_str = format!("{address}:{port}");
    let addr = addr_str
        .to_socket_addrs()
        .map_err(|e| format!("Failed to resolve address '{addr_str}': {e}"))?
        .next()
        .ok_or_else(|| format!("No addresses found for '{addr_str}'"))?;

    let timeout_duration = timeout.map(Duration::from_secs);

    println!("\nConfiguration:");
    println!("  Listen address: {addr}");
    println!("  Max message size: {} bytes", config.max_message_size);
    println!(
        "  Contract calldata: {}",
        if config.allow_contract_data {
            "allowed"
        } else {
            "refused"
        }
    );
    if let Some(t) = timeout {
        println!("  Timeout: {t}s");
    } else {
        println!("  Timeout: None");
    }

    let server = ApduServer::new(addr, TestBackend::new(), timeout_duration)
        .with_config(config)
        .with_max_connections(max_connections);

    println!("\nStarting APDU daemon on {addr}");
    println!("Press Ctrl+C to stop\n");

    server.run().map_err(|e| format!("Server error: {e}"))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Serve {
            address,
            port,
            timeout,
            max_connections,
            max_message_size,
            disable_contract_data,
        } => {
            let config = ProcessorConfig {
                max_message_size,
                allow_contract_data: !disable_contract_data,
                ..ProcessorConfig::default()
            };
            serve(&address, port, timeout, max_connections, config)
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
