//! Metatile lock tests.
//!
//! Concurrent requests for tiles of one metatile must cause exactly one
//! render, whether they share a tileset or use separate cache instances over
//! the same storage (as separate processes would).

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use tilecache::cache::{CacheBackend, DiskCache, LockOutcome, SqliteCache};
use tilecache::error::CacheError;
use tilecache::tileset::{Fetch, Tileset};

use super::test_utils::{metatiled_tileset, request, Paint, StubSource};

fn slow_gradient() -> Arc<StubSource> {
    Arc::new(StubSource::new(Paint::Gradient).with_delay(Duration::from_millis(300)))
}

/// Request every `(x, y)` at level 1 from its own thread, all at once.
fn request_concurrently(tilesets: Vec<Arc<Tileset>>, coords: &[(i64, i64)]) -> Vec<Fetch> {
    let barrier = Arc::new(Barrier::new(coords.len()));
    let handles: Vec<_> = coords
        .iter()
        .enumerate()
        .map(|(i, &(x, y))| {
            let tileset = Arc::clone(&tilesets[i % tilesets.len()]);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let mut tile = request(&tileset, x, y, 1);
                barrier.wait();
                let fetch = tileset.get_tile(&mut tile).unwrap();
                assert!(tile.data.is_some());
                fetch
            })
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

#[test]
fn test_one_render_per_metatile_across_threads() {
    let dir = TempDir::new().unwrap();
    let source = slow_gradient();
    let tileset = Arc::new(metatiled_tileset(
        Arc::new(DiskCache::new("disk", dir.path())),
        source.clone(),
    ));

    let coords = [(0, 0), (1, 0), (0, 1), (1, 1), (0, 0), (1, 1), (1, 0), (0, 1)];
    let fetches = request_concurrently(vec![tileset], &coords);

    assert_eq!(source.call_count(), 1);
    assert_eq!(fetches.iter().filter(|f| **f == Fetch::Rendered).count(), 1);
}

#[test]
fn test_one_render_across_cache_instances() {
    let dir = TempDir::new().unwrap();
    let source = slow_gradient();
    // Two caches over one directory, like two server processes
    let tilesets: Vec<_> = (0..2)
        .map(|i| {
            Arc::new(metatiled_tileset(
                Arc::new(DiskCache::new(format!("disk{}", i), dir.path())),
                source.clone(),
            ))
        })
        .collect();

    let coords = [(0, 0), (1, 1), (1, 0), (0, 1)];
    let fetches = request_concurrently(tilesets.clone(), &coords);
    assert_eq!(source.call_count(), 1);
    assert!(fetches.contains(&Fetch::Rendered));

    // Both instances read the same bytes
    let mut a = request(&tilesets[0], 1, 0, 1);
    let mut b = request(&tilesets[1], 1, 0, 1);
    tilesets[0].get_tile(&mut a).unwrap();
    tilesets[1].get_tile(&mut b).unwrap();
    assert_eq!(a.data, b.data);
}

#[test]
fn test_one_render_with_sqlite_cache() {
    let dir = TempDir::new().unwrap();
    let source = slow_gradient();
    let tileset = Arc::new(metatiled_tileset(
        Arc::new(SqliteCache::new("db", dir.path())),
        source.clone(),
    ));

    let coords = [(0, 0), (1, 0), (0, 1), (1, 1)];
    request_concurrently(vec![tileset], &coords);
    assert_eq!(source.call_count(), 1);
}

#[test]
fn test_waiter_released_by_unlock() {
    let dir = TempDir::new().unwrap();
    let cache = Arc::new(DiskCache::new("disk", dir.path()));
    let tileset = metatiled_tileset(cache.clone(), slow_gradient());
    let anchor = request(&tileset, 0, 0, 1);

    let LockOutcome::Acquired(handle) = cache.lock(&anchor).unwrap() else {
        panic!("lock should be free");
    };
    assert!(matches!(
        cache.lock(&anchor).unwrap(),
        LockOutcome::AlreadyLocked
    ));

    let waiter = {
        let cache = Arc::clone(&cache);
        let anchor = anchor.clone();
        thread::spawn(move || {
            let started = Instant::now();
            cache.wait_for_lock(&anchor).unwrap();
            started.elapsed()
        })
    };
    thread::sleep(Duration::from_millis(300));
    cache.unlock(&anchor, handle).unwrap();

    let waited = waiter.join().unwrap();
    assert!(waited >= Duration::from_millis(200), "waited {:?}", waited);
    assert!(!cache.lock_path(&anchor).exists());
}

#[test]
fn test_foreign_handle_rejected() {
    let dir = TempDir::new().unwrap();
    let cache = DiskCache::new("disk", dir.path());
    let tileset = metatiled_tileset(Arc::new(DiskCache::new("unused", dir.path())), slow_gradient());
    let a = request(&tileset, 0, 0, 1);
    let b = request(&tileset, 1, 1, 0);

    let LockOutcome::Acquired(handle) = cache.lock(&a).unwrap() else {
        panic!("lock should be free");
    };
    assert!(matches!(
        cache.unlock(&b, handle),
        Err(CacheError::LockMismatch { .. })
    ));
}
