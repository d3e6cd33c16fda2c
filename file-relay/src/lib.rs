//! # file-relay: streaming download relay
//!
//! `file-relay` serves file downloads on behalf of a metadata service. A client asks for a file by
//! id; the relay asks the metadata service (authenticating with a static bearer key) where that
//! file lives and which headers to present, fetches it from there, and streams the bytes back
//! without ever holding the whole file in memory.
//!
//! ## Request Flow
//!
//! 1. **Route**: `GET /{id}` or `GET /{dok_id}/{file_id}` (a trailing slash is accepted) is parsed
//!    into a [`types::FileIdentifier`]. Non-numeric segments are rejected with `400`.
//! 2. **Resolve**: `GET <main_server>/failas/<id>/downloadProxyInformation` with
//!    `Authorization: Bearer <api_key>` yields a [`types::DownloadDescriptor`].
//! 3. **Relay**: `GET <fileUrl>` with the descriptor's headers; the body is streamed to the client
//!    with `Content-Type`, `Content-Length` and `Content-Disposition` taken from the descriptor.
//!
//! A non-2xx answer from either upstream is returned to the client as-is (status and body). Any
//! other failure before the response starts is a `500 Internal proxy error`; a failure after the
//! body has started aborts the connection.
//!
//! Nothing is shared between requests except one [`upstream::UpstreamClient`], built from the
//! immutable [`Config`] at startup around a pooled `reqwest::Client`.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use file_relay::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = file_relay::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     file_relay::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config)?;
//!     app.serve(async {
//!         tokio::signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
//!     })
//!     .await?;
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! See the [`config`] module for configuration options.

pub mod api;
pub mod config;
pub mod errors;
pub mod relay;
pub mod telemetry;
pub mod types;
pub mod upstream;

#[cfg(test)]
mod test;

use axum::{Router, routing::get};
use bon::Builder;
pub use config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, debug, info};
use upstream::UpstreamClient;

/// Application state shared across all request handlers.
///
/// Read-only after startup; cloning is cheap.
#[derive(Clone, Builder)]
pub struct AppState {
    pub upstream: Arc<UpstreamClient>,
}

/// Build the application router with the download routes and request tracing.
///
/// `get` also answers `HEAD`. Each route is registered with and without a trailing slash.
pub fn build_router(state: AppState) -> Router {
    let router = Router::new()
        .route("/{id}", get(api::handlers::files::download_file))
        .route("/{id}/", get(api::handlers::files::download_file))
        .route("/{dok_id}/{file_id}", get(api::handlers::files::download_container_file))
        .route("/{dok_id}/{file_id}/", get(api::handlers::files::download_container_file))
        .with_state(state);

    router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
}

/// Main application struct.
///
/// 1. **Create**: [`Application::new`] builds the upstream client and router
/// 2. **Serve**: [`Application::serve`] binds to a TCP port and handles requests until the
///    shutdown future resolves
pub struct Application {
    router: Router,
    config: Config,
}

impl Application {
    /// Create a new application instance from validated configuration
    pub fn new(config: Config) -> anyhow::Result<Self> {
        // Not the whole config: it carries the API key
        debug!(main_server = ?config.main_server, upstream = ?config.upstream, "Starting file relay");

        let upstream = Arc::new(UpstreamClient::new(&config)?);
        let state = AppState::builder().upstream(upstream).build();

        Ok(Self {
            router: build_router(state),
            config,
        })
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router).expect("Failed to create test server")
    }

    /// Serve on an already-bound listener until `shutdown` resolves
    pub async fn serve_with_listener<F>(self, listener: TcpListener, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;
        Ok(())
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("Proxy server listening on http://{}", bind_addr);

        self.serve_with_listener(listener, shutdown).await?;

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}
