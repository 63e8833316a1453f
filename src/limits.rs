//! Hard limits. Every externally supplied quantity is capped somewhere in here.

use crate::model::Ms;

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 256;

pub const MAX_PROVIDERS_PER_TENANT: usize = 10_000;
pub const MAX_SERVICES_PER_TENANT: usize = 10_000;
pub const MAX_BOOKINGS_PER_PROVIDER: usize = 100_000;
pub const MAX_PROVIDERS_PER_SERVICE: usize = 256;

/// Split shifts per weekday. The store tolerates overlap but not unbounded rows.
pub const MAX_RANGES_PER_DAY: usize = 16;

/// Date exceptions per provider — two years of daily overrides.
pub const MAX_OVERRIDES_PER_PROVIDER: usize = 730;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_REASON_LEN: usize = 512;
pub const MAX_CLIENT_FIELD_LEN: usize = 256;

/// Widest availability query window, in caller-local days.
pub const MAX_QUERY_DAYS: i64 = 120;

pub const MAX_DURATION_MIN: i64 = 24 * 60;
pub const MAX_BUFFER_MIN: i64 = 24 * 60;
pub const MAX_NOTICE_HOURS: i64 = 24 * 365;
pub const MAX_FUTURE_DAYS: i64 = 730;
pub const MAX_CAPACITY: u32 = 500;

/// Bookings must fall inside [2000-01-01, 2100-01-01) UTC.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;
