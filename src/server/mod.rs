//! HTTP front-end.
//!
//! A thin REST endpoint over the [`Registry`](crate::registry::Registry).
//! Tile requests run the blocking tileset code on Tokio's blocking pool.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         HTTP Layer                              │
//! │       GET /tiles/{tileset}/{grid}/{z}/{x}/{y}.{ext}             │
//! │                                                                 │
//! │  ┌──────────────────────────┐  ┌─────────────────────────────┐  │
//! │  │        handlers          │  │          routes             │  │
//! │  │ (requests, error → JSON) │  │ (router, CORS, tracing)     │  │
//! │  └────────────┬─────────────┘  └─────────────────────────────┘  │
//! └───────────────┼─────────────────────────────────────────────────┘
//!                 │ spawn_blocking
//!                 ▼
//!          Tileset::get_tile
//! ```

pub mod handlers;
pub mod routes;

pub use handlers::{
    health_handler, tile_handler, tilesets_handler, AppState, ErrorResponse, HandlerError,
    HealthResponse, TilePathParams, TilesetInfo, TilesetsResponse, X_TILE_CACHE,
};
pub use routes::{create_router, RouterConfig};
