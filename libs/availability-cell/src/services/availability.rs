use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

use crate::error::AvailabilityError;
use crate::models::{BookedSlots, ReconciledSchedule, WeeklyAvailability};
use crate::services::{generator, reconciler};

/// Compose slot generation and reconciliation over a booking window.
///
/// Performs no I/O: the caller supplies the booked list for each date it has
/// fetched. Dates without one are reconciled as unknown.
pub fn compute_availability(
    availability: &WeeklyAvailability,
    window_start: NaiveDate,
    window_days: u32,
    now: NaiveDateTime,
    booked: &HashMap<NaiveDate, BookedSlots>,
) -> Result<ReconciledSchedule, AvailabilityError> {
    let candidates = generator::generate(availability, window_start, window_days, now)?;
    let reconciled = reconciler::reconcile_schedule(&candidates, booked);

    debug!(
        "Computed availability for {} days from {} ({} dates with booked lists)",
        window_days,
        window_start,
        booked.len()
    );

    Ok(reconciled)
}
