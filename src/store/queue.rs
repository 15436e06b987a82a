use rocksdb::{Options, WriteBatch, WriteOptions, DB};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::error::{Error, Result};

pub const RAW_EXTENSION: &str = "h264";
pub const PLAYABLE_EXTENSION: &str = "mp4";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Itinerary {
    /// Raw recordings registered but not yet transcoded.
    Conversion,
    /// Transcoded recordings, oldest first.
    Retained,
    /// Raw recordings the transcoder gave up on.
    Failed,
}

impl Itinerary {
    pub const ALL: [Itinerary; 3] = [
        Itinerary::Conversion,
        Itinerary::Retained,
        Itinerary::Failed,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Itinerary::Conversion => "conversion",
            Itinerary::Retained => "retained",
            Itinerary::Failed => "failed",
        }
    }

    fn key(&self) -> Vec<u8> {
        format!("itinerary|{}", self.name()).into_bytes()
    }
}

impl fmt::Display for Itinerary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueItem {
    /// File stem shared by the raw and the playable file.
    pub filename: String,
    pub save_path: PathBuf,
}

impl QueueItem {
    pub fn new(filename: impl Into<String>, save_path: impl Into<PathBuf>) -> Self {
        Self {
            filename: filename.into(),
            save_path: save_path.into(),
        }
    }

    pub fn raw_path(&self) -> PathBuf {
        self.save_path
            .join(format!("{}.{}", self.filename, RAW_EXTENSION))
    }

    pub fn playable_path(&self) -> PathBuf {
        self.save_path
            .join(format!("{}.{}", self.filename, PLAYABLE_EXTENSION))
    }
}

impl fmt::Display for QueueItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.save_path.join(&self.filename).display())
    }
}

pub struct QueueStore {
    db: Mutex<DB>,
}

impl QueueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut db_options = Options::default();
        db_options.create_if_missing(true);
        let db = DB::open(&db_options, path)?;
        debug!("Using '{}' for itineraries", path.display());

        let store = QueueStore { db: Mutex::new(db) };
        // Surface a corrupt store at startup rather than mid-recording.
        for queue in Itinerary::ALL {
            let len = store.len(queue)?;
            debug!("Itinerary '{}' holds {} entries", queue, len);
        }
        Ok(store)
    }

    fn lock(&self) -> Result<MutexGuard<'_, DB>> {
        self.db
            .lock()
            .map_err(|e| Error::Other(format!("Failed to lock queue store: {}", e)))
    }

    fn read(db: &DB, queue: Itinerary) -> Result<Vec<QueueItem>> {
        match db.get(queue.key())? {
            Some(value) => Ok(bincode::deserialize(&value)?),
            None => Ok(Vec::new()),
        }
    }

    fn commit(db: &DB, batch: WriteBatch) -> Result<()> {
        let mut write_options = WriteOptions::default();
        write_options.set_sync(true);
        db.write_opt(batch, &write_options)?;
        Ok(())
    }

    /// Atomic read-modify-write of one itinerary.
    pub fn transaction<T>(
        &self,
        queue: Itinerary,
        f: impl FnOnce(&mut Vec<QueueItem>) -> T,
    ) -> Result<T> {
        let db = self.lock()?;
        let mut items = Self::read(&db, queue)?;
        let result = f(&mut items);

        let mut batch = WriteBatch::default();
        batch.put(queue.key(), bincode::serialize(&items)?);
        Self::commit(&db, batch)?;
        trace!("Itinerary '{}' written with {} entries", queue, items.len());
        Ok(result)
    }

    pub fn load(&self, queue: Itinerary) -> Result<Vec<QueueItem>> {
        let db = self.lock()?;
        Self::read(&db, queue)
    }

    pub fn len(&self, queue: Itinerary) -> Result<usize> {
        Ok(self.load(queue)?.len())
    }

    pub fn is_empty(&self, queue: Itinerary) -> Result<bool> {
        Ok(self.len(queue)? == 0)
    }

    pub fn append(&self, queue: Itinerary, item: QueueItem) -> Result<()> {
        self.transaction(queue, |items| items.push(item))
    }

    /// Append unless an equal entry is already queued. Returns true when appended.
    pub fn ensure(&self, queue: Itinerary, item: QueueItem) -> Result<bool> {
        self.transaction(queue, |items| {
            if items.contains(&item) {
                false
            } else {
                items.push(item);
                true
            }
        })
    }

    pub fn pop_front(&self, queue: Itinerary) -> Result<Option<QueueItem>> {
        self.transaction(queue, |items| {
            if items.is_empty() {
                None
            } else {
                Some(items.remove(0))
            }
        })
    }

    /// Remove the oldest entry equal to `item`.
    pub fn remove(&self, queue: Itinerary, item: &QueueItem) -> Result<bool> {
        self.transaction(queue, |items| match items.iter().position(|i| i == item) {
            Some(index) => {
                items.remove(index);
                true
            }
            None => false,
        })
    }

    /// Move `item` from one itinerary to the back of another in a single
    /// write batch. Nothing is written when `item` is not in `from`.
    pub fn transfer(&self, from: Itinerary, to: Itinerary, item: &QueueItem) -> Result<bool> {
        let db = self.lock()?;
        let mut source = Self::read(&db, from)?;
        let index = match source.iter().position(|i| i == item) {
            Some(index) => index,
            None => return Ok(false),
        };
        source.remove(index);

        let mut target = Self::read(&db, to)?;
        if !target.contains(item) {
            target.push(item.clone());
        }

        let mut batch = WriteBatch::default();
        batch.put(from.key(), bincode::serialize(&source)?);
        batch.put(to.key(), bincode::serialize(&target)?);
        Self::commit(&db, batch)?;
        debug!("Moved {} from '{}' to '{}'", item, from, to);
        Ok(true)
    }

    pub fn clear(&self, queue: Itinerary) -> Result<usize> {
        self.transaction(queue, |items| {
            let count = items.len();
            items.clear();
            count
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_item_paths() {
        let item = QueueItem::new("18_10_2026__09_30_00", "/cam/sentry");
        assert_eq!(
            item.raw_path(),
            PathBuf::from("/cam/sentry/18_10_2026__09_30_00.h264")
        );
        assert_eq!(
            item.playable_path(),
            PathBuf::from("/cam/sentry/18_10_2026__09_30_00.mp4")
        );
    }

    #[test]
    fn test_fifo_order() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path().join("q.db")).unwrap();
        let a = QueueItem::new("a", "/v");
        let b = QueueItem::new("b", "/v");
        store.append(Itinerary::Retained, a.clone()).unwrap();
        store.append(Itinerary::Retained, b.clone()).unwrap();

        assert_eq!(store.pop_front(Itinerary::Retained).unwrap(), Some(a));
        assert_eq!(store.pop_front(Itinerary::Retained).unwrap(), Some(b));
        assert_eq!(store.pop_front(Itinerary::Retained).unwrap(), None);
    }

    #[test]
    fn test_ensure_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path().join("q.db")).unwrap();
        let a = QueueItem::new("a", "/v");
        assert!(store.ensure(Itinerary::Conversion, a.clone()).unwrap());
        assert!(!store.ensure(Itinerary::Conversion, a).unwrap());
        assert_eq!(store.len(Itinerary::Conversion).unwrap(), 1);
    }

    #[test]
    fn test_transfer_moves_between_itineraries() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path().join("q.db")).unwrap();
        let a = QueueItem::new("a", "/v");
        let b = QueueItem::new("b", "/v");
        store.append(Itinerary::Conversion, a.clone()).unwrap();
        store.append(Itinerary::Conversion, b.clone()).unwrap();

        // Out-of-order completion: b finishes first.
        assert!(store
            .transfer(Itinerary::Conversion, Itinerary::Retained, &b)
            .unwrap());
        assert_eq!(store.load(Itinerary::Conversion).unwrap(), vec![a]);
        assert_eq!(store.load(Itinerary::Retained).unwrap(), vec![b.clone()]);

        // Second transfer of the same item is a no-op.
        assert!(!store
            .transfer(Itinerary::Conversion, Itinerary::Retained, &b)
            .unwrap());
        assert_eq!(store.len(Itinerary::Retained).unwrap(), 1);
    }

    #[test]
    fn test_clear_reports_dropped_entries() {
        let dir = tempdir().unwrap();
        let store = QueueStore::open(dir.path().join("q.db")).unwrap();
        store.append(Itinerary::Failed, QueueItem::new("x", "/v")).unwrap();
        store.append(Itinerary::Failed, QueueItem::new("y", "/v")).unwrap();
        assert_eq!(store.clear(Itinerary::Failed).unwrap(), 2);
        assert!(store.is_empty(Itinerary::Failed).unwrap());
    }

    #[test]
    fn test_queues_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("q.db");
        {
            let store = QueueStore::open(&path).unwrap();
            store
                .append(Itinerary::Conversion, QueueItem::new("crash", "/v"))
                .unwrap();
        }
        let store = QueueStore::open(&path).unwrap();
        assert_eq!(
            store.load(Itinerary::Conversion).unwrap(),
            vec![QueueItem::new("crash", "/v")]
        );
    }

    #[test]
    fn test_concurrent_appends_are_not_lost() {
        let dir = tempdir().unwrap();
        let store = std::sync::Arc::new(QueueStore::open(dir.path().join("q.db")).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..10 {
                        store
                            .append(Itinerary::Retained, QueueItem::new(format!("{}-{}", t, i), "/v"))
                            .unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.len(Itinerary::Retained).unwrap(), 80);
    }
}
