use std::sync::Arc;

use axum::http::{header::HeaderName, HeaderMap, HeaderValue, StatusCode};
use axum::{extract::Extension, routing::get, AddExtensionLayer, Router};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::config::Config;

/// Healthcheck & metrics server.
pub struct AppServer {
    /// The application's runtime config.
    config: Arc<Config>,
    /// A handle for rendering the metrics recorded by the process.
    metrics: PrometheusHandle,

    /// A channel used for triggering graceful shutdown.
    shutdown: broadcast::Sender<()>,
}

impl AppServer {
    /// Create a new instance.
    pub fn new(config: Arc<Config>, metrics: PrometheusHandle, shutdown: broadcast::Sender<()>) -> Self {
        Self { config, metrics, shutdown }
    }

    /// Spawn the HTTP server, serving `/health` & `/metrics`.
    ///
    /// An error from the server triggers a shutdown of the whole process.
    pub fn spawn(self) -> JoinHandle<()> {
        let shutdown = self.shutdown.clone();
        let mut http_shutdown_rx = self.shutdown.subscribe();
        let app = Router::new()
            .route("/health", get(|| async { StatusCode::OK }))
            .route("/metrics", get(prometheus_scrape))
            .layer(AddExtensionLayer::new(self.metrics));
        let http_server = axum::Server::bind(&([0, 0, 0, 0], self.config.http_port).into())
            .serve(app.into_make_service())
            .with_graceful_shutdown(async move {
                let _res = http_shutdown_rx.recv().await;
            });
        tracing::info!("http server is listening at 0.0.0.0:{}", self.config.http_port);

        tokio::spawn(async move {
            if let Err(err) = http_server.await {
                tracing::error!(error = ?err, "error from http server, shutting down");
                let _res = shutdown.send(());
            }
        })
    }
}

/// Handle Prometheus metrics scraping.
async fn prometheus_scrape(Extension(metrics): Extension<PrometheusHandle>) -> (StatusCode, HeaderMap, String) {
    let mut headers = HeaderMap::new();
    headers.insert(HeaderName::from_static("content-type"), HeaderValue::from_static("text/plain; version=0.0.4"));
    (StatusCode::OK, headers, metrics.render())
}
