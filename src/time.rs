//! Expiry boundary checks for temporal fields.
//!
//! An expiry column is either null or a timestamp. "Now" is always passed in
//! explicitly so that a detection pass evaluates every rule against the same
//! instant.

use chrono::{DateTime, Utc};

use crate::value::Value;

/// Returns true if the value is a timestamp strictly after `now`.
#[must_use]
pub fn is_pending(value: &Value, now: DateTime<Utc>) -> bool {
    matches!(value, Value::Timestamp(at) if *at > now)
}

/// Returns true if the value is null or a timestamp at-or-before `now`.
///
/// Non-timestamp, non-null values are never considered expired.
#[must_use]
pub fn is_expired(value: &Value, now: DateTime<Utc>) -> bool {
    match value {
        Value::Null => true,
        Value::Timestamp(at) => *at <= now,
        _ => false,
    }
}

/// Returns true if a mutation moved an expiry column across the boundary:
/// `before` was still pending and `after` is expired.
#[must_use]
pub fn crossed_expiry(before: &Value, after: &Value, now: DateTime<Utc>) -> bool {
    is_pending(before, now) && is_expired(after, now)
}
