use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stylecard::api::{AppState, HttpServer};
use stylecard::config::StylecardConfig;
use stylecard::face_swap::FaceSwapService;
use stylecard::upstream::ImageKitClient;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Rate-limited face-swap proxy for the StyleCard try-on app.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Cli {
    /// YAML configuration file
    #[arg(short, long, env = "STYLECARD_CONFIG")]
    config: Option<PathBuf>,

    /// Override the HTTP listen address
    #[arg(long)]
    listen: Option<SocketAddr>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the effective configuration (secrets masked) and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    info!("Starting Stylecard service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = StylecardConfig::load(cli.config.as_deref())?;
    if let Some(listen) = cli.listen {
        config.server.http_addr = listen;
    }

    if cli.print_config {
        print!("{}", config.to_redacted_yaml()?);
        return Ok(());
    }

    info!(
        http_addr = %config.server.http_addr,
        max_requests = config.rate_limiting.max_requests,
        window_size_ms = config.rate_limiting.window_size_ms,
        retry_enabled = config.replicate.retry_enabled,
        "Configuration loaded"
    );

    let face_swap = FaceSwapService::from_config(&config)?;

    let imagekit = match config.imagekit.private_key.as_deref() {
        Some(key) => Some(ImageKitClient::new(&config.imagekit, key)?),
        None => {
            warn!("ImageKit API key not configured, reference endpoints will fail");
            None
        }
    };

    let server = HttpServer::new(config.server.http_addr, AppState::new(face_swap, imagekit));
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Stylecard service stopped");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match format {
        LogFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .with_thread_ids(true)
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
