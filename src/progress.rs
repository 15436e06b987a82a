use crate::store::QueueItem;
use crate::transcode::RecoveryReport;

/// Trait for reporting startup recovery progress.
///
/// The CLI implements it with indicatif; the recording daemon stays silent.
/// All methods have default no-op implementations.
pub trait RecoveryReporter: Send + Sync {
    fn on_recovery_start(&self, _pending: usize) {}
    fn on_item_done(&self, _item: &QueueItem, _done: usize, _total: usize) {}
    fn on_recovery_complete(&self, _report: &RecoveryReport) {}
}

/// No-op progress reporter for silent operation.
pub struct SilentReporter;

impl RecoveryReporter for SilentReporter {}
