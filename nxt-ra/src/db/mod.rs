//! Database access for nxt-ra
//!
//! Query functions are generic over the executor so the update stage can run
//! them inside its transaction and everything else against the pool.

pub mod audit;
pub mod fingerprints;
pub mod pending;
pub mod projects;
pub mod raid_items;
pub mod runs;
pub mod velocity;

use chrono::{DateTime, NaiveDate, Utc};
use nxt_common::{Error, Result};

/// Parse a stored RFC 3339 timestamp
pub(crate) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| Error::InvalidInput(format!("bad timestamp {:?}: {}", value, e)))
}

/// Parse an optional stored `YYYY-MM-DD` date
pub(crate) fn parse_date(value: Option<String>) -> Result<Option<NaiveDate>> {
    value
        .filter(|v| !v.is_empty())
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d")
                .map_err(|e| Error::InvalidInput(format!("bad date {:?}: {}", v, e)))
        })
        .transpose()
}

/// Parse a stored JSON string array
pub(crate) fn parse_string_list(value: &str) -> Result<Vec<String>> {
    Ok(serde_json::from_str(value)?)
}
