//! Router configuration.
//!
//! # Route Structure
//!
//! ```text
//! /health                                       - Health check
//! /tilesets                                     - List tilesets
//! /tiles/{tileset}/{grid}/{z}/{x}/{y}.{ext}     - Tile endpoint
//! ```
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use tilecache::registry::Registry;
//! use tilecache::server::{create_router, RouterConfig};
//!
//! # async fn run(registry: Registry) -> std::io::Result<()> {
//! let config = RouterConfig::new()
//!     .with_cors_origins(vec!["https://example.com".to_string()]);
//! let router = create_router(Arc::new(registry), config);
//!
//! let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
//! axum::serve(listener, router).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use axum::{routing::get, Router};
use http::header::CONTENT_TYPE;
use http::Method;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use super::handlers::{health_handler, tile_handler, tilesets_handler, AppState};
use crate::registry::Registry;

// =============================================================================
// Router Configuration
// =============================================================================

/// Configuration for the HTTP router.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    /// Allowed CORS origins (None = allow any origin)
    pub cors_origins: Option<Vec<String>>,

    /// Whether to enable request tracing
    pub enable_tracing: bool,
}

impl RouterConfig {
    /// Any CORS origin, tracing enabled.
    pub fn new() -> Self {
        Self {
            cors_origins: None,
            enable_tracing: true,
        }
    }

    /// Set specific allowed CORS origins. An empty list disallows
    /// cross-origin requests.
    pub fn with_cors_origins(mut self, origins: Vec<String>) -> Self {
        self.cors_origins = Some(origins);
        self
    }

    pub fn with_cors_any_origin(mut self) -> Self {
        self.cors_origins = None;
        self
    }

    pub fn with_tracing(mut self, enabled: bool) -> Self {
        self.enable_tracing = enabled;
        self
    }
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Router Builder
// =============================================================================

/// Create the application router over `registry`.
pub fn create_router(registry: Arc<Registry>, config: RouterConfig) -> Router {
    let cors = build_cors_layer(&config);

    // {filename} captures both "{y}" and "{y}.{ext}"
    let router = Router::new()
        .route("/health", get(health_handler))
        .route("/tilesets", get(tilesets_handler))
        .route(
            "/tiles/{tileset}/{grid}/{z}/{x}/{filename}",
            get(tile_handler),
        )
        .with_state(AppState::new(registry))
        .layer(cors);

    if config.enable_tracing {
        router.layer(TraceLayer::new_for_http())
    } else {
        router
    }
}

fn build_cors_layer(config: &RouterConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::HEAD, Method::OPTIONS])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(86400));

    match &config.cors_origins {
        None => cors.allow_origin(Any),
        Some(origins) if origins.is_empty() => cors,
        Some(origins) => {
            let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
            cors.allow_origin(parsed)
        }
    }
}
