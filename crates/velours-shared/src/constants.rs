/// Application name
pub const APP_NAME: &str = "Velours";

/// Page size when scanning unread messages for read-receipt catch-up
pub const RECEIPT_PAGE_SIZE: usize = 50;

/// Receipts accumulated before a flush to the transport
pub const RECEIPT_BATCH_SIZE: usize = 100;

/// Page size when scanning our own read-position history for device sync
pub const SYNC_PAGE_SIZE: usize = 30;

/// Read positions accumulated before a device-sync flush
pub const SYNC_BATCH_SIZE: usize = 100;

/// Gap (seconds) after which a repeated identical read-position report with a
/// nonzero cached unread count is treated as counter drift
pub const DRIFT_DEBOUNCE_SECS: u64 = 3;

/// Ceiling on a single serialized conversation job
pub const JOB_TIMEOUT_SECS: u64 = 60;

/// Capacity of the per-conversation event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;
