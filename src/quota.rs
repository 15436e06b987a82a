use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::Result;
use crate::store::{Itinerary, QueueStore};

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub trait DiskUsage: Send + Sync {
    /// Current usage in GB. Measured fresh on every call.
    fn used_gb(&self) -> io::Result<f64>;
}

/// Total size of every regular file below `root`.
pub struct DirectoryUsage {
    root: PathBuf,
}

impl DirectoryUsage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DiskUsage for DirectoryUsage {
    fn used_gb(&self) -> io::Result<f64> {
        if !self.root.exists() {
            return Ok(0.0);
        }
        let mut total: u64 = 0;
        for entry in WalkDir::new(&self.root).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                // Files can vanish mid-walk while a transcode cleans up.
                Err(e) => {
                    debug!("Skipping entry during usage walk: {}", e);
                    continue;
                }
            };
            if entry.file_type().is_file() {
                match entry.metadata() {
                    Ok(metadata) => total += metadata.len(),
                    Err(e) => debug!("No metadata for {}: {}", entry.path().display(), e),
                }
            }
        }
        Ok(total as f64 / BYTES_PER_GB)
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnforceReport {
    pub evicted: usize,
    /// Evicted entries whose file was already gone.
    pub missing: usize,
    pub used_gb: f64,
}

/// FIFO eviction of retained videos until usage drops to the ceiling.
pub struct QuotaEnforcer {
    store: Arc<QueueStore>,
    usage: Box<dyn DiskUsage>,
    ceiling_gb: f64,
    // Concurrent transcodes finishing together must not double-evict.
    running: Mutex<()>,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<QueueStore>, usage: Box<dyn DiskUsage>, ceiling_gb: f64) -> Self {
        Self {
            store,
            usage,
            ceiling_gb,
            running: Mutex::new(()),
        }
    }

    pub fn ceiling_gb(&self) -> f64 {
        self.ceiling_gb
    }

    pub fn enforce(&self) -> Result<EnforceReport> {
        let _running = match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut report = EnforceReport::default();

        loop {
            report.used_gb = self.usage.used_gb()?;
            if report.used_gb <= self.ceiling_gb {
                break;
            }
            // Each pop is its own transaction, so appends from finishing
            // transcodes interleave safely with eviction.
            let item = match self.store.pop_front(Itinerary::Retained)? {
                Some(item) => item,
                None => {
                    warn!(
                        "Usage {:.2} GB is over the {:.2} GB ceiling but nothing is left to evict",
                        report.used_gb, self.ceiling_gb
                    );
                    break;
                }
            };

            let path = item.playable_path();
            match fs::remove_file(&path) {
                Ok(()) => info!("Evicted {}", path.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} already gone", path.display());
                    report.missing += 1;
                }
                Err(e) => warn!("Could not delete {}: {}", path.display(), e),
            }
            // Present only when the transcoder was told to keep it.
            let raw = item.raw_path();
            match fs::remove_file(&raw) {
                Ok(()) => debug!("Evicted kept raw file {}", raw.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not delete {}: {}", raw.display(), e),
            }
            report.evicted += 1;
        }

        if report.evicted > 0 {
            info!(
                "Quota enforced: {} evicted, {:.2} GB used of {:.2} GB",
                report.evicted, report.used_gb, self.ceiling_gb
            );
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::QueueItem;
    use tempfile::tempdir;

    /// Returns the queued readings in order, then repeats the last.
    struct ScriptedUsage {
        readings: Mutex<Vec<f64>>,
    }

    impl ScriptedUsage {
        fn new(readings: &[f64]) -> Self {
            Self {
                readings: Mutex::new(readings.iter().rev().copied().collect()),
            }
        }
    }

    impl DiskUsage for ScriptedUsage {
        fn used_gb(&self) -> io::Result<f64> {
            let mut readings = self.readings.lock().unwrap();
            if readings.len() > 1 {
                Ok(readings.pop().unwrap())
            } else {
                Ok(readings[0])
            }
        }
    }

    #[test]
    fn test_evicts_until_under_ceiling() {
        let dir = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(dir.path().join("q.db")).unwrap());
        let videos = dir.path().join("videos");
        fs::create_dir_all(&videos).unwrap();
        for name in ["a", "b", "c"] {
            let item = QueueItem::new(name, &videos);
            fs::write(item.playable_path(), b"mp4").unwrap();
            store.append(Itinerary::Retained, item).unwrap();
        }

        let enforcer = QuotaEnforcer::new(
            store.clone(),
            Box::new(ScriptedUsage::new(&[60.0, 48.0])),
            50.0,
        );
        let report = enforcer.enforce().unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.used_gb, 48.0);
        assert!(!videos.join("a.mp4").exists());
        assert!(videos.join("b.mp4").exists());
        assert_eq!(
            store.load(Itinerary::Retained).unwrap(),
            vec![QueueItem::new("b", &videos), QueueItem::new("c", &videos)]
        );
    }

    #[test]
    fn test_eviction_removes_kept_raw_file() {
        let dir = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(dir.path().join("q.db")).unwrap());
        let kept = QueueItem::new("kept", dir.path());
        fs::write(kept.playable_path(), b"mp4").unwrap();
        fs::write(kept.raw_path(), b"h264").unwrap();
        store.append(Itinerary::Retained, kept.clone()).unwrap();

        let enforcer = QuotaEnforcer::new(
            store.clone(),
            Box::new(ScriptedUsage::new(&[10.0, 1.0])),
            5.0,
        );
        let report = enforcer.enforce().unwrap();

        assert_eq!(report.evicted, 1);
        assert_eq!(report.missing, 0);
        assert!(!kept.playable_path().exists());
        assert!(!kept.raw_path().exists());
    }

    #[test]
    fn test_missing_file_counts_as_reclaimed() {
        let dir = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(dir.path().join("q.db")).unwrap());
        store
            .append(Itinerary::Retained, QueueItem::new("ghost", dir.path()))
            .unwrap();

        let enforcer = QuotaEnforcer::new(
            store.clone(),
            Box::new(ScriptedUsage::new(&[10.0, 1.0])),
            5.0,
        );
        let report = enforcer.enforce().unwrap();
        assert_eq!(report.evicted, 1);
        assert_eq!(report.missing, 1);
        assert!(store.is_empty(Itinerary::Retained).unwrap());
    }

    #[test]
    fn test_empty_queue_stops_loop() {
        let dir = tempdir().unwrap();
        let store = Arc::new(QueueStore::open(dir.path().join("q.db")).unwrap());
        let enforcer =
            QuotaEnforcer::new(store, Box::new(ScriptedUsage::new(&[99.0])), 5.0);
        let report = enforcer.enforce().unwrap();
        assert_eq!(report.evicted, 0);
        assert_eq!(report.used_gb, 99.0);
    }

    #[test]
    fn test_directory_usage_sums_files() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("one.bin"), vec![0u8; 1024]).unwrap();
        fs::write(dir.path().join("nested/two.bin"), vec![0u8; 2048]).unwrap();

        let used = DirectoryUsage::new(dir.path()).used_gb().unwrap();
        assert!((used * BYTES_PER_GB - 3072.0).abs() < 1e-6);
        assert_eq!(
            DirectoryUsage::new(dir.path().join("absent")).used_gb().unwrap(),
            0.0
        );
    }
}
