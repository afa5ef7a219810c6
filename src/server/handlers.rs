//! HTTP request handlers for the tile API.
//!
//! # Endpoints
//!
//! - `GET /tiles/{tileset}/{grid}/{z}/{x}/{y}.{ext}` - Serve a tile
//! - `GET /tilesets` - List configured tilesets
//! - `GET /health` - Health check endpoint

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use axum::{
    extract::{Path, Query, State},
    http::{header, HeaderName, StatusCode},
    response::{AppendHeaders, IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::codec::FormatGuess;
use crate::error::{GridError, TileError};
use crate::registry::Registry;

/// Response header naming the path a tile took: `hit`, `rendered` or `waited`.
pub const X_TILE_CACHE: HeaderName = HeaderName::from_static("x-tile-cache");

// =============================================================================
// Application State
// =============================================================================

/// Shared application state, passed to handlers via Axum's State extractor.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<Registry>,
}

impl AppState {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }
}

// =============================================================================
// Request Parameters
// =============================================================================

/// Path parameters for tile requests.
///
/// Extracted from: `/tiles/{tileset}/{grid}/{z}/{x}/{filename}`
/// where filename is `{y}` or `{y}.{ext}`
#[derive(Debug, Deserialize)]
pub struct TilePathParams {
    pub tileset: String,
    pub grid: String,
    pub z: usize,
    pub x: i64,

    /// Tile row with an optional extension (e.g., "3" or "3.png")
    pub filename: String,
}

impl TilePathParams {
    /// Parse the row from the filename, ignoring any extension.
    pub fn y(&self) -> Result<i64, std::num::ParseIntError> {
        let stem = self
            .filename
            .split_once('.')
            .map_or(self.filename.as_str(), |(stem, _)| stem);
        stem.parse()
    }

    /// Extension after the row, if any.
    pub fn extension(&self) -> Option<&str> {
        self.filename.split_once('.').map(|(_, ext)| ext)
    }
}

/// Whether a requested extension names the format stored as `expected`.
fn extension_matches(requested: &str, expected: &str) -> bool {
    requested.eq_ignore_ascii_case(expected)
        || (expected == "jpg" && requested.eq_ignore_ascii_case("jpeg"))
}

// =============================================================================
// Response Types
// =============================================================================

/// JSON error response returned for all error conditions.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error type identifier (e.g., "unknown_tileset", "out_of_limits")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

impl ErrorResponse {
    pub fn with_status(
        error: impl Into<String>,
        message: impl Into<String>,
        status: StatusCode,
    ) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
            status: Some(status.as_u16()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One entry of the tilesets listing.
#[derive(Debug, Serialize)]
pub struct TilesetInfo {
    pub name: String,
    pub grids: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,

    /// Tiles per metatile, `[x, y]`
    pub metatile: [u32; 2],

    /// Dimension names with their default values
    pub dimensions: Vec<(String, String)>,
}

#[derive(Debug, Serialize)]
pub struct TilesetsResponse {
    pub tilesets: Vec<TilesetInfo>,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Status code and error type identifier for `err`.
fn classify(err: &TileError) -> (StatusCode, &'static str) {
    match err {
        TileError::UnknownTileset { .. } => (StatusCode::NOT_FOUND, "unknown_tileset"),
        TileError::UnknownGrid { .. } => (StatusCode::NOT_FOUND, "unknown_grid"),
        TileError::OutOfLimits { .. } => (StatusCode::NOT_FOUND, "out_of_limits"),
        TileError::NoSource { .. } => (StatusCode::NOT_FOUND, "not_cached"),
        TileError::WrongTileSize { .. } => (StatusCode::BAD_REQUEST, "wrong_tile_size"),
        TileError::Dimension(_) => (StatusCode::BAD_REQUEST, "invalid_dimension"),
        TileError::Grid(GridError::LevelOutOfRange { .. }) => {
            (StatusCode::NOT_FOUND, "out_of_limits")
        }
        TileError::Grid(err) if !matches!(err, GridError::InvalidDefinition { .. }) => {
            (StatusCode::BAD_REQUEST, "invalid_request")
        }
        TileError::Source(_) => (StatusCode::BAD_GATEWAY, "source_error"),
        TileError::MetatileSize { .. } => (StatusCode::BAD_GATEWAY, "source_error"),
        TileError::Codec(_) => (StatusCode::INTERNAL_SERVER_ERROR, "codec_error"),
        TileError::Cache(_) => (StatusCode::INTERNAL_SERVER_ERROR, "cache_error"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
    }
}

fn error_response(status: StatusCode, error_type: &str, message: String) -> Response {
    if status.is_server_error() {
        error!(
            error_type = error_type,
            status = status.as_u16(),
            "Server error: {}",
            message
        );
    } else if status == StatusCode::NOT_FOUND {
        debug!(
            error_type = error_type,
            status = status.as_u16(),
            "Resource not found: {}",
            message
        );
    } else {
        warn!(
            error_type = error_type,
            status = status.as_u16(),
            "Client error: {}",
            message
        );
    }

    let body = ErrorResponse::with_status(error_type, message, status);
    (status, Json(body)).into_response()
}

/// Convert TileError to HTTP response.
///
/// 5xx errors are logged at ERROR, 404s at DEBUG and other 4xx at WARN.
impl IntoResponse for TileError {
    fn into_response(self) -> Response {
        let (status, error_type) = classify(&self);
        error_response(status, error_type, self.to_string())
    }
}

/// Errors a handler can answer with.
#[derive(Debug)]
pub enum HandlerError {
    Tile(TileError),
    BadRequest(String),
    NotFound(String),
    Internal(String),
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        match self {
            HandlerError::Tile(err) => err.into_response(),
            HandlerError::BadRequest(message) => {
                error_response(StatusCode::BAD_REQUEST, "invalid_request", message)
            }
            HandlerError::NotFound(message) => {
                error_response(StatusCode::NOT_FOUND, "unknown_format", message)
            }
            HandlerError::Internal(message) => {
                error_response(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
            }
        }
    }
}

impl From<TileError> for HandlerError {
    fn from(err: TileError) -> Self {
        HandlerError::Tile(err)
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Handle tile requests.
///
/// # Endpoint
///
/// `GET /tiles/{tileset}/{grid}/{z}/{x}/{y}.{ext}`
///
/// Query parameters named after a tileset dimension (case-insensitive) set
/// that dimension; other parameters are ignored.
///
/// # Response
///
/// - `200 OK`: the tile, read from the cache or rendered on a miss
/// - `400 Bad Request`: invalid dimension value or malformed coordinates
/// - `404 Not Found`: unknown tileset or grid, tile outside the grid, an
///   extension other than the tileset format's, or not cached on a tileset
///   without a source
/// - `502 Bad Gateway`: the source failed to render
///
/// # Headers
///
/// - `Content-Type`: from the tileset format, or sniffed for pass-through
/// - `Cache-Control: max-age={expires}`
/// - `Last-Modified` when the cache reports a modification time
/// - `X-Tile-Cache: hit|rendered|waited`
pub async fn tile_handler(
    State(state): State<AppState>,
    Path(params): Path<TilePathParams>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, HandlerError> {
    let y = params
        .y()
        .map_err(|_| HandlerError::BadRequest(format!("invalid tile row '{}'", params.filename)))?;

    let tileset = Arc::clone(state.registry.tileset(&params.tileset)?);
    if let (Some(ext), Some(_)) = (params.extension(), tileset.format()) {
        if !extension_matches(ext, tileset.extension()) {
            return Err(HandlerError::NotFound(format!(
                "tileset {} serves .{} tiles, not .{}",
                tileset.name(),
                tileset.extension(),
                ext
            )));
        }
    }
    let mut tile = tileset.tile(&params.grid)?;
    tile.x = params.x;
    tile.y = y;
    tile.z = params.z;
    for dimension in tileset.dimensions() {
        let value = query
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(dimension.name()))
            .map(|(_, value)| value);
        if let Some(value) = value {
            tileset.set_dimension(&mut tile, dimension.name(), value)?;
        }
    }

    let content_type = tileset.format().map(|f| f.mime_type());
    let (tile, fetch) = tokio::task::spawn_blocking(move || {
        let fetch = tileset.get_tile(&mut tile)?;
        Ok::<_, TileError>((tile, fetch))
    })
    .await
    .map_err(|e| HandlerError::Internal(format!("tile task failed: {}", e)))??;

    let Some(data) = tile.data.clone() else {
        return Err(HandlerError::Internal(format!("tile {} has no data", tile)));
    };
    debug!(tile = %tile, cache = fetch.as_str(), bytes = data.len(), "serving tile");

    let content_type =
        content_type.unwrap_or_else(|| FormatGuess::sniff(&data).mime_type());
    let mut headers = vec![
        (header::CONTENT_TYPE, content_type.to_string()),
        (X_TILE_CACHE, fetch.as_str().to_string()),
    ];
    if let Some(expires) = tile.expires {
        headers.push((header::CACHE_CONTROL, format!("max-age={}", expires)));
    }
    if let Some(mtime) = tile.mtime {
        headers.push((header::LAST_MODIFIED, http_date(mtime)));
    }

    Ok((StatusCode::OK, AppendHeaders(headers), data).into_response())
}

/// Handle tileset listing requests.
///
/// `GET /tilesets`
pub async fn tilesets_handler(State(state): State<AppState>) -> Json<TilesetsResponse> {
    let registry = &state.registry;
    let tilesets = registry
        .tileset_names()
        .filter_map(|name| registry.tileset(name).ok())
        .map(|tileset| {
            let layout = tileset.layout();
            TilesetInfo {
                name: tileset.name().to_string(),
                grids: tileset
                    .grid_links()
                    .iter()
                    .map(|link| link.grid().name().to_string())
                    .collect(),
                format: tileset.format().map(|f| f.name().to_string()),
                metatile: [layout.size_x, layout.size_y],
                dimensions: tileset
                    .dimensions()
                    .iter()
                    .map(|d| (d.name().to_string(), d.default_value().to_string()))
                    .collect(),
            }
        })
        .collect();
    Json(TilesetsResponse { tilesets })
}

/// Handle health check requests.
///
/// `GET /health` returns `{"status": "healthy", "version": "..."}`.
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// RFC 7231 date, e.g. `Sun, 06 Nov 1994 08:49:37 GMT`.
fn http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

// =============================================================================
// Tests
// =============================================================================
