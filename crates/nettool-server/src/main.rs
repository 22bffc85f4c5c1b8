//! NetTool BLE HTTP proxy binary.
//!
//! # Usage
//!
//! ```bash
//! nettool-ble-proxy --device-name NetTool --port 8080
//! ```

use std::path::PathBuf;

use clap::Parser;
use nettool_server::ProxyConfig;
use tracing_subscriber::EnvFilter;

/// BLE GATT peripheral that proxies framed HTTP/1.1 requests to a local
/// HTTP server.
#[derive(Debug, Parser)]
#[command(name = "nettool-ble-proxy", version, about)]
struct Args {
    /// Advertised and local BLE device name.
    #[arg(long, default_value = "NetTool")]
    device_name: String,

    /// Port of the local HTTP server every request is forwarded to.
    #[arg(long, default_value_t = 8080)]
    port: u16,

    /// Path to the status file kept alongside the Status characteristic.
    #[arg(long, default_value = "/tmp/nettool_ble_proxy.status")]
    status_file: PathBuf,

    /// Maximum number of concurrently in-flight origin requests.
    #[arg(long, default_value_t = 16)]
    max_concurrent_requests: usize,

    /// Log level, overridden by `RUST_LOG` when set.
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = ProxyConfig {
        device_name: args.device_name,
        http_port: args.port,
        status_file: args.status_file,
        max_concurrent_requests: args.max_concurrent_requests,
    };

    match nettool_server::run(config).await {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "nettool-ble-proxy exited with an error");
            std::process::ExitCode::FAILURE
        },
    }
}
