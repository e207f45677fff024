//! Time and timestamp helpers.

use chrono::{DateTime, Utc};

/// UTC timestamp used for audit fields.
pub type Timestamp = DateTime<Utc>;

/// Return the current UTC time.
#[must_use]
pub fn now() -> Timestamp {
    Utc::now()
}

/// The timestamp carried by audit fields that were never stamped.
#[must_use]
pub fn epoch() -> Timestamp {
    DateTime::<Utc>::UNIX_EPOCH
}
