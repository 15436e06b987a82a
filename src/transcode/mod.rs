//! Raw-to-playable conversion, crash recovery and the hand-off to quota
//! enforcement.
//!
//! A raw recording is registered in the conversion itinerary when capture
//! starts and leaves it only once its playable file is recorded in the
//! retained itinerary (or, during recovery, in the failed itinerary).

mod mp4box;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::progress::RecoveryReporter;
use crate::quota::{EnforceReport, QuotaEnforcer};
use crate::store::{ConversionItem, Itinerary, QueueStore};
use crate::worker::{TaskHandle, WorkerPool};

pub use mp4box::Mp4BoxTranscoder;

pub trait Transcoder: Send + Sync {
    /// Convert `raw` and return the playable file's path.
    fn convert(&self, raw: &Path) -> Result<PathBuf>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeOutcome {
    Retained(PathBuf),
    /// Transcode failed; the item stays in the conversion itinerary for the
    /// next startup recovery.
    LeftPending(String),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecoveryReport {
    pub pending: usize,
    pub recovered: usize,
    /// Entries whose raw file was gone, dropped without a trace in `retained`.
    pub dropped: usize,
    /// Entries moved to the failed itinerary.
    pub failed: usize,
    pub quota: Option<EnforceReport>,
}

pub struct TranscodePipeline {
    store: Arc<QueueStore>,
    transcoder: Arc<dyn Transcoder>,
    quota: Arc<QuotaEnforcer>,
    pool: WorkerPool,
}

impl TranscodePipeline {
    pub fn new(
        store: Arc<QueueStore>,
        transcoder: Arc<dyn Transcoder>,
        quota: Arc<QuotaEnforcer>,
        workers: usize,
    ) -> Result<Self> {
        Ok(Self {
            store,
            transcoder,
            quota,
            pool: WorkerPool::new("transcode", workers)?,
        })
    }

    /// Durably record a raw file before any of its bytes are written.
    pub fn register(&self, item: &ConversionItem) -> Result<()> {
        if self.store.ensure(Itinerary::Conversion, item.clone())? {
            debug!("Registered {} for conversion", item);
        }
        Ok(())
    }

    /// Withdraw a registration whose recording never started.
    pub fn unregister(&self, item: &ConversionItem) -> Result<bool> {
        self.store.remove(Itinerary::Conversion, item)
    }

    /// Enqueue (if not yet registered) and convert in the background.
    pub fn submit(&self, item: ConversionItem) -> Result<TaskHandle<TranscodeOutcome>> {
        self.register(&item)?;

        let store = self.store.clone();
        let transcoder = self.transcoder.clone();
        let quota = self.quota.clone();
        let label = format!("transcode {}", item.filename);
        Ok(self
            .pool
            .spawn(label, move || transcode_item(&store, transcoder.as_ref(), &quota, &item)))
    }

    /// Replay conversions left over by a previous run. Runs synchronously and
    /// is meant for startup, before any new recording is registered.
    pub fn recover_pending(&self, reporter: &dyn RecoveryReporter) -> Result<RecoveryReport> {
        let pending = self.store.load(Itinerary::Conversion)?;
        let mut report = RecoveryReport {
            pending: pending.len(),
            ..RecoveryReport::default()
        };
        reporter.on_recovery_start(pending.len());
        if !pending.is_empty() {
            info!("Recovering {} pending conversions", pending.len());
        }

        for (index, item) in pending.iter().enumerate() {
            let step = match settle_without_raw(&self.store, item)? {
                Some(step) => step,
                None => recover_item(&self.store, self.transcoder.as_ref(), item)?,
            };
            match step {
                RecoveryStep::Recovered => report.recovered += 1,
                RecoveryStep::Dropped => report.dropped += 1,
                RecoveryStep::Failed => report.failed += 1,
            }
            reporter.on_item_done(item, index + 1, pending.len());
        }

        report.quota = Some(self.quota.enforce()?);
        reporter.on_recovery_complete(&report);
        Ok(report)
    }

    /// Replay leftovers without holding up the caller. Entries whose raw file
    /// is gone are settled here; the rest are converted on the worker pool.
    /// Returns how many conversions were dispatched.
    pub fn resume_pending(&self) -> Result<usize> {
        let pending = self.store.load(Itinerary::Conversion)?;
        let mut dispatched = 0;
        for item in pending {
            if settle_without_raw(&self.store, &item)?.is_some() {
                continue;
            }
            let store = self.store.clone();
            let transcoder = self.transcoder.clone();
            let quota = self.quota.clone();
            let label = format!("recover {}", item.filename);
            let _detached = self.pool.spawn(label, move || {
                match recover_item(&store, transcoder.as_ref(), &item) {
                    Ok(RecoveryStep::Recovered) => {
                        if let Err(e) = quota.enforce() {
                            error!("Quota enforcement failed: {}", e);
                        }
                    }
                    Ok(_) => {}
                    Err(e) => error!("Could not recover {}: {}", item, e),
                }
            });
            dispatched += 1;
        }
        if dispatched > 0 {
            info!("Resuming {} pending conversions in the background", dispatched);
        }

        let quota = self.quota.clone();
        let _detached = self.pool.spawn("quota", move || {
            if let Err(e) = quota.enforce() {
                error!("Quota enforcement failed: {}", e);
            }
        });
        Ok(dispatched)
    }

    pub fn in_flight(&self) -> Vec<String> {
        self.pool.in_flight()
    }

    /// Let every dispatched conversion run to completion.
    pub fn wait_idle(&self) {
        let in_flight = self.pool.in_flight();
        if !in_flight.is_empty() {
            info!("Waiting for {} conversions: {:?}", in_flight.len(), in_flight);
        }
        self.pool.wait_idle();
    }
}

enum RecoveryStep {
    Recovered,
    Dropped,
    Failed,
}

/// Resolve an entry whose raw file no longer exists. `None` means the raw
/// file is still there and needs converting.
fn settle_without_raw(store: &QueueStore, item: &ConversionItem) -> Result<Option<RecoveryStep>> {
    let raw = item.raw_path();
    if raw.exists() {
        return Ok(None);
    }
    let playable = item.playable_path();
    if playable.exists() {
        // Converted before the crash, itinerary update lost.
        store.transfer(Itinerary::Conversion, Itinerary::Retained, item)?;
        info!("Recovered already converted {}", playable.display());
        Ok(Some(RecoveryStep::Recovered))
    } else {
        store.remove(Itinerary::Conversion, item)?;
        warn!(
            "Dropping {} from conversion itinerary: raw file {} is gone",
            item,
            raw.display()
        );
        Ok(Some(RecoveryStep::Dropped))
    }
}

/// Convert a leftover raw file. A failure here is final and moves the entry
/// to the failed itinerary.
fn recover_item(
    store: &QueueStore,
    transcoder: &dyn Transcoder,
    item: &ConversionItem,
) -> Result<RecoveryStep> {
    let raw = item.raw_path();
    match transcoder.convert(&raw) {
        Ok(path) => {
            store.transfer(Itinerary::Conversion, Itinerary::Retained, item)?;
            info!("Recovered {}", path.display());
            Ok(RecoveryStep::Recovered)
        }
        Err(e) => {
            store.transfer(Itinerary::Conversion, Itinerary::Failed, item)?;
            error!("Giving up on {}: {}", raw.display(), e);
            Ok(RecoveryStep::Failed)
        }
    }
}

fn transcode_item(
    store: &QueueStore,
    transcoder: &dyn Transcoder,
    quota: &QuotaEnforcer,
    item: &ConversionItem,
) -> TranscodeOutcome {
    let raw = item.raw_path();
    let playable = match transcoder.convert(&raw) {
        Ok(path) => path,
        Err(e) => {
            warn!("Conversion of {} failed, left for retry: {}", raw.display(), e);
            return TranscodeOutcome::LeftPending(e.to_string());
        }
    };

    match store.transfer(Itinerary::Conversion, Itinerary::Retained, item) {
        Ok(true) => info!("Converted {}", playable.display()),
        Ok(false) => warn!("{} was no longer pending; not retained twice", item),
        Err(e) => {
            error!("Converted {} but could not record it: {}", playable.display(), e);
            return TranscodeOutcome::LeftPending(e.to_string());
        }
    }

    if let Err(e) = quota.enforce() {
        error!("Quota enforcement failed: {}", e);
    }
    TranscodeOutcome::Retained(playable)
}
