//! Hard limits applied at the store and query boundaries.

pub const MAX_SALONS: usize = 10_000;
pub const MAX_APPOINTMENTS_PER_SALON: usize = 200_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 1024;
pub const MAX_TIME_ZONE_LEN: usize = 64;

/// One full day. Longer appointments can't fit inside business hours anyway.
pub const MAX_DURATION_MINUTES: i64 = 24 * 60;

pub const MAX_EXCLUDE_IDS: usize = 64;

/// Longest ad-hoc closure, in days (inclusive range).
pub const MAX_CLOSURE_DAYS: i64 = 366;

pub const MAX_CLOSURES_PER_SALON: usize = 4096;
