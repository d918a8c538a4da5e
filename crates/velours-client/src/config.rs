//! Tuning knobs for the read-state synchronisation engine.

use std::time::Duration;

use velours_shared::constants::{
    DRIFT_DEBOUNCE_SECS, JOB_TIMEOUT_SECS, RECEIPT_BATCH_SIZE, RECEIPT_PAGE_SIZE, SYNC_BATCH_SIZE,
    SYNC_PAGE_SIZE,
};
use velours_shared::{AccountId, DeviceId};

/// The local account and device the core acts on behalf of.
#[derive(Debug, Clone, Copy)]
pub struct LocalIdentity {
    pub account: AccountId,
    pub device: DeviceId,
}

/// Policy parameters for read-receipt and device-sync catch-up.
///
/// The defaults match production behaviour; tests shrink the page sizes and
/// the debounce window.
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    /// Page size when scanning unread messages for receipts.
    pub receipt_page_size: usize,
    /// Receipts accumulated before a flush.
    pub receipt_batch_size: usize,
    /// Page size when scanning our own read-position history.
    pub sync_page_size: usize,
    /// Positions accumulated before a device-sync flush.
    pub sync_batch_size: usize,
    /// Gap after which a repeated identical read-position report with a
    /// nonzero cached count is treated as counter drift.
    pub drift_debounce: Duration,
    /// Ceiling on a single serialized conversation job.
    pub job_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            receipt_page_size: RECEIPT_PAGE_SIZE,
            receipt_batch_size: RECEIPT_BATCH_SIZE,
            sync_page_size: SYNC_PAGE_SIZE,
            sync_batch_size: SYNC_BATCH_SIZE,
            drift_debounce: Duration::from_secs(DRIFT_DEBOUNCE_SECS),
            job_timeout: Duration::from_secs(JOB_TIMEOUT_SECS),
        }
    }
}
