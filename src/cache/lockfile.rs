//! Sidecar lock files.
//!
//! Protocol:
//!
//! 1. **acquire**: create the file with create-if-absent semantics. Exactly
//!    one concurrent creator succeeds; the others see `AlreadyExists` and
//!    report the lock as held. The winner then takes an exclusive advisory
//!    lock on the file.
//! 2. **release**: remove the file, then drop the advisory lock.
//! 3. **wait**: open the file and take a shared advisory lock, which blocks
//!    in the kernel until the holder releases. If the file is still there
//!    afterwards, the shared lock was taken in the short window between the
//!    holder's create and its exclusive lock, so wait again.
//!
//! A lock file whose advisory lock is free and which is older than
//! [`STALE_LOCK_AGE`] was left behind by a crashed process and is removed.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, SystemTime};

use fs4::FileExt;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Age after which an unlocked lock file is considered abandoned.
pub const STALE_LOCK_AGE: Duration = Duration::from_secs(120);

/// Pause before re-checking a lock file caught before its exclusive lock.
const RECHECK_DELAY: Duration = Duration::from_millis(10);

/// A held lock file. Dropping it without [`release`](LockFile::release)
/// frees the advisory lock but leaves the file behind.
#[derive(Debug)]
pub struct LockFile {
    path: PathBuf,
    file: File,
}

impl LockFile {
    /// Try to create and lock `path`. `Ok(None)` means someone else holds it.
    pub fn try_acquire(path: &Path) -> Result<Option<LockFile>, CacheError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| CacheError::io(parent, e))?;
        }

        let mut file = match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if remove_if_stale(path) {
                    return Self::try_acquire(path);
                }
                return Ok(None);
            }
            Err(e) => return Err(CacheError::io(path, e)),
        };

        if let Err(e) = FileExt::lock_exclusive(&file) {
            let _ = fs::remove_file(path);
            return Err(CacheError::io(path, e));
        }
        // Holder pid helps operators spot who owns a lock.
        let _ = writeln!(file, "{}", std::process::id());

        debug!(path = %path.display(), "lock acquired");
        Ok(Some(LockFile {
            path: path.to_path_buf(),
            file,
        }))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the file and drop the advisory lock.
    pub fn release(self) -> Result<(), CacheError> {
        let removed = match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "lock file vanished while held");
                Ok(())
            }
            Err(e) => Err(CacheError::io(&self.path, e)),
        };
        let unlocked = FileExt::unlock(&self.file).map_err(|e| CacheError::io(&self.path, e));
        debug!(path = %self.path.display(), "lock released");
        removed.and(unlocked)
    }
}

/// Block until the lock file at `path` is released.
pub fn wait(path: &Path) -> Result<(), CacheError> {
    loop {
        let file = match File::open(path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(CacheError::io(path, e)),
        };

        FileExt::lock_shared(&file).map_err(|e| CacheError::io(path, e))?;
        let _ = FileExt::unlock(&file);
        drop(file);

        if !path.exists() || remove_if_stale(path) {
            return Ok(());
        }
        thread::sleep(RECHECK_DELAY);
    }
}

/// True if a lock file exists at `path`.
pub fn is_locked(path: &Path) -> bool {
    path.exists()
}

/// Remove `path` if nobody holds its advisory lock and it is old enough to
/// have been abandoned. Returns true if it was removed.
fn remove_if_stale(path: &Path) -> bool {
    let Ok(metadata) = fs::metadata(path) else {
        return false;
    };
    let age = metadata
        .modified()
        .ok()
        .and_then(|m| SystemTime::now().duration_since(m).ok())
        .unwrap_or_default();
    if age < STALE_LOCK_AGE {
        return false;
    }
    let Ok(file) = File::open(path) else {
        return false;
    };
    match FileExt::try_lock_exclusive(&file) {
        Ok(()) if still_at(&file, path) => {
            warn!(path = %path.display(), age_secs = age.as_secs(), "removing abandoned lock file");
            let removed = fs::remove_file(path).is_ok();
            let _ = FileExt::unlock(&file);
            removed
        }
        Ok(()) => {
            debug!(path = %path.display(), "lock file replaced while checking staleness");
            let _ = FileExt::unlock(&file);
            false
        }
        Err(_) => false,
    }
}

/// Whether `path` still names the file open as `file`. A new holder may have
/// recreated the lock after the stale one was opened.
#[cfg(unix)]
fn still_at(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;

    match (file.metadata(), fs::metadata(path)) {
        (Ok(open), Ok(named)) => open.dev() == named.dev() && open.ino() == named.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn still_at(_file: &File, path: &Path) -> bool {
    path.exists()
}
