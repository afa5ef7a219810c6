//! HTTP API tests.
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use tilecache::cache::{DiskCache, MemoryCache};
use tilecache::codec::Format;
use tilecache::grid::GridLink;
use tilecache::registry::Registry;
use tilecache::server::{create_router, RouterConfig};
use tilecache::tile::Dimension;
use tilecache::tileset::Tileset;

use super::test_utils::{is_valid_png, local_grid, metatiled_tileset, FailingSource, StubSource};

// =============================================================================
// Helpers
// =============================================================================

fn router_with(tilesets: Vec<Tileset>) -> Router {
    let mut registry = Registry::new().unwrap();
    for tileset in tilesets {
        registry.add_tileset(tileset);
    }
    create_router(Arc::new(registry), RouterConfig::new().with_tracing(false))
}

async fn get(router: &Router, uri: &str) -> axum::response::Response {
    router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_bytes(response: axum::response::Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

async fn body_json(response: axum::response::Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn header_str<'a>(response: &'a axum::response::Response, name: &str) -> Option<&'a str> {
    response.headers().get(name).and_then(|v| v.to_str().ok())
}

// =============================================================================
// Tiles
// =============================================================================

#[tokio::test]
async fn test_tile_rendered_then_hit() {
    let dir = TempDir::new().unwrap();
    let source = StubSource::gradient();
    let router = router_with(vec![metatiled_tileset(
        Arc::new(DiskCache::new("disk", dir.path())),
        source.clone(),
    )]);

    let response = get(&router, "/tiles/osm/local/1/0/1.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-tile-cache"), Some("rendered"));
    assert_eq!(
        header_str(&response, header::CONTENT_TYPE.as_str()),
        Some("image/png")
    );
    assert_eq!(
        header_str(&response, header::CACHE_CONTROL.as_str()),
        Some("max-age=300")
    );
    assert!(header_str(&response, header::LAST_MODIFIED.as_str())
        .is_some_and(|v| v.ends_with(" GMT")));
    assert!(is_valid_png(&body_bytes(response).await));

    let response = get(&router, "/tiles/osm/local/1/1/1.png").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(header_str(&response, "x-tile-cache"), Some("hit"));
    assert_eq!(source.call_count(), 1);
}

#[tokio::test]
async fn test_unknown_tileset() {
    let router = router_with(vec![]);
    let response = get(&router, "/tiles/nope/local/0/0/0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json = body_json(response).await;
    assert_eq!(json["error"], "unknown_tileset");
    assert_eq!(json["status"], 404);
}

#[tokio::test]
async fn test_unknown_grid() {
    let router = router_with(vec![metatiled_tileset(
        Arc::new(MemoryCache::new("mem")),
        StubSource::gradient(),
    )]);
    let response = get(&router, "/tiles/osm/WGS84/0/0/0.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "unknown_grid");
}

#[tokio::test]
async fn test_out_of_limits() {
    let source = StubSource::gradient();
    let router = router_with(vec![metatiled_tileset(
        Arc::new(MemoryCache::new("mem")),
        source.clone(),
    )]);
    for uri in [
        "/tiles/osm/local/1/2/0.png",
        "/tiles/osm/local/1/-1/0.png",
        "/tiles/osm/local/7/0/0.png",
    ] {
        let response = get(&router, uri).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
    }
    assert_eq!(source.call_count(), 0);
}

#[tokio::test]
async fn test_malformed_row() {
    let router = router_with(vec![metatiled_tileset(
        Arc::new(MemoryCache::new("mem")),
        StubSource::gradient(),
    )]);
    let response = get(&router, "/tiles/osm/local/1/0/abc.png").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_extension_must_match_format() {
    let source = StubSource::gradient();
    let router = router_with(vec![metatiled_tileset(
        Arc::new(MemoryCache::new("mem")),
        source.clone(),
    )]);

    let response = get(&router, "/tiles/osm/local/0/0/0.jpg").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(body_json(response).await["error"], "unknown_format");
    assert_eq!(source.call_count(), 0);

    let response = get(&router, "/tiles/osm/local/0/0/0").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_source_failure_is_bad_gateway() {
    let router = router_with(vec![metatiled_tileset(
        Arc::new(MemoryCache::new("mem")),
        Arc::new(FailingSource),
    )]);
    let response = get(&router, "/tiles/osm/local/0/0/0.png").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(body_json(response).await["error"], "source_error");
}

// =============================================================================
// Dimensions
// =============================================================================

fn dimensioned_tileset(name: &str, source: Arc<StubSource>) -> Tileset {
    Tileset::builder(name)
        .grid(GridLink::new(local_grid()))
        .cache(Arc::new(MemoryCache::new("mem")))
        .source(source)
        .format(Format::png())
        .dimension(
            Dimension::values(
                "time",
                "2020",
                vec!["2020".to_string(), "2021".to_string()],
                false,
            )
            .unwrap(),
        )
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_dimension_from_query() {
    let source = StubSource::gradient();
    let router = router_with(vec![dimensioned_tileset("osm", source.clone())]);

    let response = get(&router, "/tiles/osm/local/0/0/0.png?TIME=2021&foo=bar").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        source.last_request().unwrap().dimensions,
        vec![("time".to_string(), "2021".to_string())]
    );

    let response = get(&router, "/tiles/osm/local/0/0/0.png?time=2021").await;
    assert_eq!(header_str(&response, "x-tile-cache"), Some("hit"));
}

#[tokio::test]
async fn test_invalid_dimension_value() {
    let source = StubSource::gradient();
    let router = router_with(vec![dimensioned_tileset("osm", source.clone())]);

    let response = get(&router, "/tiles/osm/local/0/0/0.png?time=1999").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_dimension");
    assert_eq!(source.call_count(), 0);
}

// =============================================================================
// Listing and Health
// =============================================================================

#[tokio::test]
async fn test_list_tilesets() {
    let router = router_with(vec![
        metatiled_tileset(Arc::new(MemoryCache::new("mem")), StubSource::gradient()),
        dimensioned_tileset("timed", StubSource::gradient()),
    ]);

    let json = body_json(get(&router, "/tilesets").await).await;
    let tilesets = json["tilesets"].as_array().unwrap();
    assert_eq!(tilesets.len(), 2);
    assert_eq!(tilesets[0]["name"], "osm");
    assert_eq!(tilesets[0]["grids"][0], "local");
    assert_eq!(tilesets[0]["metatile"][0], 2);
    assert_eq!(tilesets[1]["dimensions"][0][0], "time");
}

#[tokio::test]
async fn test_health() {
    let router = router_with(vec![]);
    let response = get(&router, "/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await["status"], "healthy");
}
