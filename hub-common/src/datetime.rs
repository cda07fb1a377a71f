//! Timestamp helpers.
//!
//! Every wire payload carries an RFC 3339 UTC timestamp; `chrono`'s default
//! serde impl for `DateTime<Utc>` already produces that format, so this
//! module is just the one constructor the rest of the crate calls instead of
//! reaching for `chrono::Utc::now()` directly.

use chrono::{DateTime, Utc};

/// Get the current time in UTC.
#[must_use]
pub fn utc_now() -> DateTime<Utc> {
    Utc::now()
}
