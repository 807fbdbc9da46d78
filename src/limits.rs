use crate::model::{Money, Ms};

pub const MAX_PLATE_LEN: usize = 16;
pub const MAX_SPACE_CODE_LEN: usize = 32;
pub const MAX_CLIENT_REF_LEN: usize = 64;
pub const MAX_SPACES: usize = 100_000;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

pub const MAX_HOURLY_RATE: Money = 1_000_000_000;

/// Reports cover at most a leap year.
pub const MAX_REPORT_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

pub const DAY_MS: Ms = 24 * 3_600_000;

/// Largest bincode payload a journal record may carry. Real events are a few
/// hundred bytes; a length prefix above this is treated as corruption.
pub const MAX_JOURNAL_RECORD_BYTES: usize = 64 * 1024;
