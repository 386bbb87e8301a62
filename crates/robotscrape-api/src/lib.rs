//! robotscrape-api: the HTTP surface for robotscrape, an AI-assisted
//! web-extraction service. Wraps a `robotscrape_core::RobotScrape` facade
//! with request-id tracking, per-identifier rate limiting, CORS, security
//! headers, and graceful shutdown.

mod handlers;
pub mod error;
pub mod middleware;
mod validation;

use axum::{
    Router,
    http::{HeaderValue, header},
    middleware::from_fn_with_state,
    routing::{get, patch, post},
};
use middleware::request_context;
use robotscrape_core::{RobotScrape, RobotScrapeConfig};
use std::net::IpAddr;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::GovernorError;
use tower_governor::GovernorLayer;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::key_extractor::{KeyExtractor, PeerIpKeyExtractor, SmartIpKeyExtractor};
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;

/// Coarse IP-bucket rate limiter key extractor, applied ahead of the
/// identifier-aware limiter in [`middleware::request_context`] as a second
/// line of defense against connection floods.
///
/// When `behind_proxy` is true, extracts the client IP from X-Forwarded-For
/// or X-Real-IP. When false (default), uses the TCP peer address directly.
#[derive(Debug, Clone, Copy)]
struct RobotScrapeKeyExtractor {
    behind_proxy: bool,
}

impl KeyExtractor for RobotScrapeKeyExtractor {
    type Key = IpAddr;

    fn extract<T>(&self, req: &axum::http::Request<T>) -> Result<Self::Key, GovernorError> {
        if self.behind_proxy {
            SmartIpKeyExtractor.extract(req)
        } else {
            PeerIpKeyExtractor.extract(req)
        }
    }
}

/// Application state shared across handlers.
pub struct AppState {
    pub robot: RobotScrape,
}

/// Build the Axum router with all routes.
///
/// Note: the governor rate-limit layer is applied separately in `serve()`
/// because it requires real TCP connection info (peer IP) which isn't
/// available in `oneshot` tests.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = build_cors_layer(state.robot.config());

    Router::new()
        .route("/health", get(handlers::health))
        .route("/openapi.json", get(handlers::openapi))
        .route("/extract", post(handlers::extract))
        .route("/batch", post(handlers::batch))
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/{id}", get(handlers::get_job))
        .route("/jobs/{id}/result", get(handlers::get_job_result))
        .route("/schedules", get(handlers::list_schedules).post(handlers::create_schedule))
        .route(
            "/schedules/{id}",
            patch(handlers::update_schedule).delete(handlers::delete_schedule),
        )
        .route("/usage", get(handlers::usage))
        .route("/usage/export", get(handlers::usage_export))
        .route("/webhook/test", post(handlers::webhook_test))
        // Request-scoped middleware: assigns request id, resolves auth, enforces rate limit.
        .layer(from_fn_with_state(state.clone(), request_context))
        .with_state(state)
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CONTENT_SECURITY_POLICY,
            HeaderValue::from_static("default-src 'none'"),
        ))
        .layer(
            TraceLayer::new_for_http().make_span_with(
                tower_http::trace::DefaultMakeSpan::new()
                    .level(tracing::Level::INFO)
                    .include_headers(false),
            ),
        )
}

/// Build CORS layer from config.
///
/// Defaults to denying all cross-origin requests if `cors_origins` is not
/// configured. Set `cors_origins = ["*"]` to allow all origins, or specify
/// explicit origins.
fn build_cors_layer(config: &RobotScrapeConfig) -> CorsLayer {
    let origins = config.server.as_ref().map(|s| &s.cors_origins).filter(|o| !o.is_empty());

    match origins {
        Some(origins) if origins.iter().any(|o| o == "*") => CorsLayer::permissive(),
        Some(origins) => {
            let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            CorsLayer::new().allow_origin(origins)
        }
        // Default: deny all cross-origin requests (secure by default)
        None => CorsLayer::new(),
    }
}

/// Run the API server with graceful shutdown support.
///
/// The server drains in-flight connections when receiving SIGINT (Ctrl+C)
/// or SIGTERM (container stop / Kubernetes terminate).
pub async fn serve(robot: RobotScrape) -> anyhow::Result<()> {
    let server_config = robot.config().server.clone().unwrap_or_default();
    let state = Arc::new(AppState { robot });

    // Rate limiting: 50 burst capacity, replenish 10/second per IP.
    // Applied here (not in build_router) because it requires real TCP peer IP.
    let key_extractor = RobotScrapeKeyExtractor {
        behind_proxy: server_config.behind_proxy,
    };
    if server_config.behind_proxy {
        tracing::info!("rate limiter using proxy headers (X-Forwarded-For/X-Real-IP) for client IP");
    }
    let governor_conf = GovernorConfigBuilder::default()
        .key_extractor(key_extractor)
        .per_second(10)
        .burst_size(50)
        .finish()
        .unwrap();
    let governor_layer = GovernorLayer::new(governor_conf);

    let app = build_router(state).layer(governor_layer);

    let addr: SocketAddr = format!("{}:{}", server_config.host, server_config.port).parse()?;

    tracing::info!("starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining connections...");
}
