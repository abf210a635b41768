//! Storefront API Library
//!
//! Session carts, guest checkout payment intents and the payment webhook that
//! turns a paid cart into an order.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod checkout;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod middleware_helpers;
pub mod migrator;
pub mod openapi;
pub mod services;
pub mod tracing;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use sea_orm::DatabaseConnection;
use std::{sync::Arc, time::Duration};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, timeout::TimeoutLayer};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: Arc<config::AppConfig>,
    pub event_sender: Arc<events::EventSender>,
    pub services: handlers::AppServices,
}

/// All JSON endpoints, relative to the server root
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .nest("/api/cart", handlers::carts::carts_routes())
        .nest("/api/checkout", handlers::checkout::checkout_routes())
        .nest("/api/orders", handlers::orders::orders_routes())
        // Signature-verified; no session required
        .nest("/api/webhooks", handlers::payment_webhooks::webhook_routes())
        .nest("/health", handlers::health::health_routes())
        .merge(openapi::openapi_routes())
}

/// Builds the CORS layer from configuration.
///
/// Explicit origins get credentialed CORS so the cart cookie travels with
/// cross-origin storefront requests. Without origins, development falls back
/// to a permissive layer and every other environment stays same-origin.
pub fn cors_layer(cfg: &config::AppConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = cfg
        .cors_allowed_origins
        .as_deref()
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    if !origins.is_empty() {
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE])
            .allow_credentials(true)
    } else if cfg.is_development() {
        CorsLayer::permissive()
    } else {
        CorsLayer::new()
    }
}

/// Full application router with tracing, request ids, CORS, compression and timeouts applied
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = cors_layer(&state.config);
    Router::new()
        .route("/", get(|| async { "storefront-api up" }))
        .merge(api_routes())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .layer(CompressionLayer::new())
        .layer(cors)
        // HTTP tracing layer for consistent request/response telemetry
        .layer(tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}

pub mod prelude {
    pub use crate::checkout::*;
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::services::*;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, http::Request};
    use tower::ServiceExt;

    fn config(environment: &str, origins: Option<&str>) -> config::AppConfig {
        let mut cfg = config::AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            8080,
            environment.to_string(),
        );
        cfg.cors_allowed_origins = origins.map(str::to_string);
        cfg
    }

    async fn preflight(cfg: &config::AppConfig, origin: &str) -> axum::http::HeaderMap {
        let app = Router::new()
            .route("/api/cart", get(|| async { "ok" }))
            .layer(cors_layer(cfg));
        let response = app
            .oneshot(
                Request::builder()
                    .method(Method::OPTIONS)
                    .uri("/api/cart")
                    .header(header::ORIGIN, origin)
                    .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response.headers().clone()
    }

    #[tokio::test]
    async fn configured_origins_get_credentialed_cors() {
        let cfg = config(
            "production",
            Some("https://shop.example, https://www.shop.example"),
        );
        let headers = preflight(&cfg, "https://www.shop.example").await;
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "https://www.shop.example"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");

        let headers = preflight(&cfg, "https://evil.example").await;
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());
    }

    #[tokio::test]
    async fn production_without_origins_stays_same_origin() {
        let headers = preflight(&config("production", Some(" , ")), "https://shop.example").await;
        assert!(headers.get(header::ACCESS_CONTROL_ALLOW_ORIGIN).is_none());

        let headers = preflight(&config("development", None), "https://shop.example").await;
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    }
}
