use axum::extract::Request;
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tollgate::config::TollgateConfig;
use tollgate::errorscheme::{report_error, unwritten, AppError, ErrorChannel, ErrorSchemeLayer};
use tollgate::ratelimit::RateLimitLayer;

/// Demo service guarded by the Tollgate middleware.
#[derive(Debug, Parser)]
#[command(name = "tollgate", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    info!("Starting Tollgate demo service");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = TollgateConfig::load(args.config.as_deref())?;
    info!(
        addr = %config.server.addr,
        limit = config.rate_limiting.limit,
        window_secs = config.rate_limiting.window_secs,
        backend = ?config.rate_limiting.backend,
        "Configuration loaded"
    );

    let rate_limit = RateLimitLayer::from_config(&config.rate_limiting).await?;
    let error_scheme = ErrorSchemeLayer::from_config(&config.errors);

    // The error scheme wraps the limiter so store failures are rendered
    let app = Router::new()
        .route("/", get(index))
        .route("/fail", get(fail))
        .route("/report", get(report))
        .route("/panic", get(freakout))
        .layer(rate_limit)
        .layer(error_scheme);

    let listener = tokio::net::TcpListener::bind(config.server.addr).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Tollgate demo service stopped");
    Ok(())
}

async fn index() -> &'static str {
    "Chillin"
}

async fn fail(channel: ErrorChannel) -> Response {
    channel.report(AppError::new(StatusCode::BAD_REQUEST, "Bad move"))
}

async fn report(req: Request) -> Response {
    report_error(
        &req,
        AppError::internal_server_error("Something broke")
            .with_internal(anyhow::anyhow!("demo failure")),
    );
    unwritten()
}

async fn freakout() -> &'static str {
    panic!("Freakout")
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
