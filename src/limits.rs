use std::time::Duration;

use crate::model::Ms;

/// Timestamps outside this window are rejected before touching the log.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000; // 2000-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000; // 2100-01-01T00:00:00Z

/// Widest availability block a stylist may create.
pub const MAX_SPAN_DURATION_MS: Ms = 366 * 86_400_000;

/// Widest window a single list query may cover.
pub const MAX_QUERY_WINDOW_MS: Ms = 92 * 86_400_000;

pub const MAX_STYLISTS: usize = 10_000;
pub const MAX_BLOCKS_PER_STYLIST: usize = 10_000;
pub const MAX_RESERVATIONS_PER_STYLIST: usize = 100_000;
pub const MAX_SERVICES_PER_STYLIST: usize = 100;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_000;

/// Bound on waiting for a WAL append ack. Past this the write outcome is
/// unknown and the caller must re-verify, not retry.
pub const WAL_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
