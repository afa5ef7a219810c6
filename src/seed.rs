//! Cache seeding.
//!
//! A [`SeedSession`] walks every metatile of a tileset inside a zoom range
//! and an optional extent, and runs each through the same lock / render /
//! store path that serves tile requests. Workers pull metatiles from one
//! shared walk and stop early when the cancel flag is raised.
//!
//! ```text
//!   levels ──► metatile walk ──► Mutex ──┬──► worker 1 ─┐
//!                                        ├──► worker 2 ─┼──► ensure_metatile
//!                                        └──► worker n ─┘
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::TileError;
use crate::grid::{Extent, TileLimits};
use crate::tileset::{MetatileOutcome, Tileset};

/// Default number of seeding workers.
pub const DEFAULT_SEED_THREADS: usize = 4;

type MetatileWalk = Box<dyn Iterator<Item = (i64, i64, usize)> + Send>;

// =============================================================================
// Progress
// =============================================================================

/// Live counters, readable while the session runs.
#[derive(Debug, Default)]
pub struct SeedProgress {
    rendered: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl SeedProgress {
    pub fn rendered(&self) -> u64 {
        self.rendered.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Metatiles handled so far, whatever the outcome.
    pub fn done(&self) -> u64 {
        self.rendered() + self.skipped() + self.failed()
    }
}

/// Summary of a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    /// Metatiles this session rendered
    pub rendered: u64,
    /// Metatiles already cached, or rendered by another actor meanwhile
    pub skipped: u64,
    pub failed: u64,
    /// Whether the session stopped before the walk was exhausted
    pub cancelled: bool,
    pub elapsed: Duration,
}

// =============================================================================
// Seed Session
// =============================================================================

/// Pre-renders a region of a tileset.
///
/// # Example
///
/// ```no_run
/// # use std::sync::Arc;
/// # use tilecache::seed::SeedSession;
/// # fn seed(tileset: Arc<tilecache::tileset::Tileset>) -> Result<(), tilecache::TileError> {
/// let session = SeedSession::new(tileset, "GoogleMapsCompatible")?
///     .zoom_range(0, 5)
///     .threads(8);
/// let report = session.run();
/// println!("rendered {} metatiles", report.rendered);
/// # Ok(())
/// # }
/// ```
pub struct SeedSession {
    tileset: Arc<Tileset>,
    grid: String,
    zoom: Option<(usize, usize)>,
    extent: Option<Extent>,
    threads: usize,
    force: bool,
    cancel: Arc<AtomicBool>,
    progress: Arc<SeedProgress>,
}

impl SeedSession {
    /// Session over every level of `grid`. The tileset must have a source.
    pub fn new(tileset: Arc<Tileset>, grid: &str) -> Result<Self, TileError> {
        tileset.grid_link(grid)?;
        if tileset.source().is_none() {
            return Err(TileError::NoSource {
                tileset: tileset.name().to_string(),
            });
        }
        Ok(Self {
            tileset,
            grid: grid.to_string(),
            zoom: None,
            extent: None,
            threads: DEFAULT_SEED_THREADS,
            force: false,
            cancel: Arc::new(AtomicBool::new(false)),
            progress: Arc::new(SeedProgress::default()),
        })
    }

    /// Seed levels `min_z..=max_z`, clipped to the grid link's levels.
    pub fn zoom_range(mut self, min_z: usize, max_z: usize) -> Self {
        self.zoom = Some((min_z, max_z));
        self
    }

    /// Only seed metatiles touching `extent`.
    pub fn extent(mut self, extent: Extent) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Re-render metatiles that are already cached.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Flag that stops the workers once set. Units already started finish.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn progress(&self) -> Arc<SeedProgress> {
        Arc::clone(&self.progress)
    }

    /// Number of metatiles the session will visit.
    pub fn metatile_count(&self) -> u64 {
        let layout = self.tileset.layout();
        let (sx, sy) = (layout.size_x as i64, layout.size_y as i64);
        self.levels()
            .iter()
            .map(|(_, limits)| {
                let cols = metatile_span(limits.min_x, limits.max_x, sx);
                let rows = metatile_span(limits.min_y, limits.max_y, sy);
                (cols.end() - cols.start() + 1) as u64 * (rows.end() - rows.start() + 1) as u64
            })
            .sum()
    }

    /// Seed every metatile and block until done or cancelled.
    pub fn run(&self) -> SeedReport {
        let started = Instant::now();
        let levels = self.levels();
        info!(
            tileset = self.tileset.name(),
            grid = %self.grid,
            levels = levels.len(),
            metatiles = self.metatile_count(),
            threads = self.threads,
            force = self.force,
            "seeding started"
        );

        let walk = Mutex::new(self.walk(levels));
        std::thread::scope(|scope| {
            for _ in 0..self.threads {
                scope.spawn(|| self.worker(&walk));
            }
        });

        let report = SeedReport {
            rendered: self.progress.rendered(),
            skipped: self.progress.skipped(),
            failed: self.progress.failed(),
            cancelled: self.cancel.load(Ordering::SeqCst),
            elapsed: started.elapsed(),
        };
        info!(
            tileset = self.tileset.name(),
            rendered = report.rendered,
            skipped = report.skipped,
            failed = report.failed,
            cancelled = report.cancelled,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "seeding finished"
        );
        report
    }

    fn worker(&self, walk: &Mutex<MetatileWalk>) {
        let template = match self.tileset.tile(&self.grid) {
            Ok(tile) => tile,
            Err(e) => {
                warn!(error = %e, "cannot create seed tile");
                return;
            }
        };

        while !self.cancel.load(Ordering::SeqCst) {
            let Some((x, y, z)) = walk.lock().next() else {
                break;
            };
            let mut tile = template.sibling(x, y);
            tile.z = z;

            if !self.force && self.tileset.cache().exists(&tile) {
                self.progress.skipped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            match self.tileset.ensure_metatile(&tile, self.force) {
                Ok(MetatileOutcome::Rendered) => {
                    debug!(tile = %tile, "metatile seeded");
                    self.progress.rendered.fetch_add(1, Ordering::Relaxed);
                }
                Ok(MetatileOutcome::Present | MetatileOutcome::Waited) => {
                    self.progress.skipped.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    warn!(tile = %tile, error = %e, "failed to seed metatile");
                    self.progress.failed.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
    }

    /// Non-empty tile windows per level, after zoom and extent clipping.
    fn levels(&self) -> Vec<(usize, TileLimits)> {
        let Ok(link) = self.tileset.grid_link(&self.grid) else {
            return Vec::new();
        };
        let (mut min_z, mut max_z) = (link.min_z(), link.max_z());
        if let Some((lo, hi)) = self.zoom {
            min_z = min_z.max(lo);
            max_z = max_z.min(hi.saturating_add(1));
        }
        let clip = self
            .extent
            .map(|extent| link.grid().compute_limits(&extent, 0));

        (min_z..max_z)
            .filter_map(|z| {
                let mut limits = *link.limits_at(z)?;
                if let Some(clip) = clip.as_ref().and_then(|c| c.get(z)) {
                    limits = TileLimits::new(
                        limits.min_x.max(clip.min_x),
                        limits.min_y.max(clip.min_y),
                        limits.max_x.min(clip.max_x),
                        limits.max_y.min(clip.max_y),
                    );
                }
                (limits.count() > 0).then_some((z, limits))
            })
            .collect()
    }

    /// One tile per metatile, the lowest one inside the window.
    fn walk(&self, levels: Vec<(usize, TileLimits)>) -> MetatileWalk {
        let layout = self.tileset.layout();
        let (sx, sy) = (layout.size_x as i64, layout.size_y as i64);
        Box::new(levels.into_iter().flat_map(move |(z, limits)| {
            metatile_span(limits.min_x, limits.max_x, sx).flat_map(move |mx| {
                metatile_span(limits.min_y, limits.max_y, sy).map(move |my| {
                    let x = (mx * sx).max(limits.min_x);
                    let y = (my * sy).max(limits.min_y);
                    (x, y, z)
                })
            })
        }))
    }
}

/// Metatile indices covering tiles `min..max`.
fn metatile_span(min: i64, max: i64, size: i64) -> std::ops::RangeInclusive<i64> {
    min.div_euclid(size)..=(max - 1).div_euclid(size)
}
