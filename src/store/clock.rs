//! Server-side creation timestamps.

use std::sync::Mutex;

use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::Error;

/// Hands out creation timestamps that never go backwards, even if the system
/// clock does.
#[derive(Debug, Default)]
pub(crate) struct ServerClock {
    last: Mutex<Option<OffsetDateTime>>,
}

impl ServerClock {
    /// The next creation timestamp, as the RFC 3339 text that is stored in documents.
    ///
    /// # Errors
    /// Returns [Error::DatabaseLockError] if the clock's lock is poisoned, or
    /// [Error::TimestampFormatError] if the time cannot be formatted.
    pub(crate) fn next_timestamp(&self) -> Result<Value, Error> {
        let mut last = self.last.lock().map_err(|_| Error::DatabaseLockError)?;

        let now = OffsetDateTime::now_utc();
        let timestamp = match *last {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        *last = Some(timestamp);

        timestamp
            .format(&Rfc3339)
            .map(Value::from)
            .map_err(|error| Error::TimestampFormatError(error.to_string()))
    }
}
