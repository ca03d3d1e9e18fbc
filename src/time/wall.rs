//! Calendar date-times mapped onto a [`Clock`]'s instant timeline.
//!
//! Deadlines are `Instant`s internally. A wall-clock date-time is placed on that timeline
//! by its signed distance from the current UTC time, measured against `clock.now()`.
use std::time::Instant;

use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};

use crate::TickError;

use super::Clock;

/// Instant on `clock`'s timeline corresponding to `when`.
pub fn instant_for<Tz: TimeZone>(
    clock: &dyn Clock,
    when: DateTime<Tz>,
) -> Result<Instant, TickError> {
    let delta = when.signed_duration_since(Utc::now());
    offset(clock.now(), delta)
        .ok_or_else(|| TickError::InvalidDeadline(format!("{delta} from now is out of range")))
}

/// Instant for a naive date-time read in the host's local time zone.
///
/// Ambiguous local times (clocks turned back) resolve to the earlier reading; times that
/// do not exist locally (clocks turned forward) are rejected.
pub fn instant_for_local(clock: &dyn Clock, when: NaiveDateTime) -> Result<Instant, TickError> {
    let local = Local
        .from_local_datetime(&when)
        .earliest()
        .ok_or_else(|| {
            TickError::InvalidDeadline(format!("{when} does not exist in the local time zone"))
        })?;
    instant_for(clock, local)
}

fn offset(now: Instant, delta: chrono::Duration) -> Option<Instant> {
    match delta.to_std() {
        Ok(ahead) => now.checked_add(ahead),
        // the platform may not reach that far back; anything before `now` is already due
        Err(_) => {
            let behind = (-delta).to_std().ok()?;
            Some(now.checked_sub(behind).unwrap_or(now))
        }
    }
}
