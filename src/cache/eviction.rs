//! LRU eviction sweep
//!
//! Both caches enforce their soft byte budget the same way: scan the
//! entries on disk, sort ascending by last access (mtime, with the entry
//! name as a deterministic tie-break) and delete from the front until the
//! total drops under the budget. An entry whose exclusive lock cannot be
//! taken without blocking is in use and is skipped.
//!
//! Sweeps run opportunistically on the populate path, not on a schedule,
//! so the budget is eventually enforced rather than a hard admission
//! limit. A sweep that cannot meet the budget (e.g. a single entry larger
//! than the whole budget) reports that; the entry is still served.

use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use super::lock::FileLock;

/// One evictable cache entry
pub struct EvictionCandidate {
    /// The entry itself: a cached file or an extracted tile directory
    pub path: PathBuf,
    /// File probed with a non-blocking exclusive lock to detect in-use
    /// entries; for plain files this is the entry itself, for directories
    /// the sidecar lock file
    pub probe_path: PathBuf,
    /// Additional files removed together with the entry (sidecar locks)
    pub extra_paths: Vec<PathBuf>,
    /// Create the probe file when missing. Sidecar locks of directory
    /// entries may not exist; the entry file of a plain cached file must
    /// never be recreated by the probe.
    pub create_probe: bool,
    pub size: u64,
    pub modified: SystemTime,
}

/// Result of one eviction sweep
#[derive(Debug, Clone, Default)]
pub struct SweepOutcome {
    pub evicted: u64,
    pub bytes_freed: u64,
    pub remaining_bytes: u64,
    /// The budget could not be met because remaining entries are in use
    /// or a single entry exceeds it
    pub over_budget: bool,
}

/// Delete least-recently-used candidates until the total size drops under
/// `max_size`. Blocking; run on the blocking thread pool.
pub fn sweep(mut candidates: Vec<EvictionCandidate>, max_size: u64) -> SweepOutcome {
    let mut total: u64 = candidates.iter().map(|c| c.size).sum();
    if total <= max_size {
        return SweepOutcome {
            remaining_bytes: total,
            ..Default::default()
        };
    }

    candidates.sort_by(|a, b| {
        (a.modified, a.path.file_name())
            .cmp(&(b.modified, b.path.file_name()))
    });

    let mut outcome = SweepOutcome::default();
    for candidate in &candidates {
        if total <= max_size {
            break;
        }

        // Entries with active readers or an in-flight extraction are
        // never unlinked out from under them
        let probe = if candidate.create_probe {
            FileLock::try_exclusive_create(&candidate.probe_path)
        } else {
            FileLock::try_exclusive(&candidate.probe_path)
        };
        let guard = match probe {
            Ok(Some(guard)) => Some(guard),
            Ok(None) => {
                debug!(path = %candidate.path.display(), "Skipping in-use cache entry");
                continue;
            }
            Err(err) => {
                warn!(path = %candidate.path.display(), error = %err, "Failed to probe cache entry");
                continue;
            }
        };

        match remove_entry(&candidate.path) {
            Ok(()) => {
                for extra in &candidate.extra_paths {
                    let _ = std::fs::remove_file(extra);
                }
                total = total.saturating_sub(candidate.size);
                outcome.evicted += 1;
                outcome.bytes_freed += candidate.size;
                debug!(path = %candidate.path.display(), size = candidate.size, "Evicted cache entry");
            }
            Err(err) => {
                warn!(path = %candidate.path.display(), error = %err, "Failed to evict cache entry");
            }
        }
        drop(guard);
    }

    outcome.remaining_bytes = total;
    outcome.over_budget = total > max_size;
    if outcome.over_budget {
        warn!(
            remaining = total,
            max_size, "Cache exceeds its soft size budget after eviction"
        );
    }
    outcome
}

fn remove_entry(path: &Path) -> io::Result<()> {
    let metadata = std::fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        std::fs::remove_dir_all(path)
    } else {
        std::fs::remove_file(path)
    }
}

/// Total size of all files under a directory. Blocking.
pub fn dir_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut stack = vec![path.to_path_buf()];
    while let Some(dir) = stack.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                stack.push(entry.path());
            } else {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}
