use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime, Timelike};
use tracing::debug;

use crate::error::AvailabilityError;
use crate::models::{CandidateSlot, SlotSchedule, WeeklyAvailability};

const SECONDS_PER_HOUR: i64 = 3600;

/// Longest window `generate` accepts.
pub const MAX_WINDOW_DAYS: u32 = 366;

/// Generate candidate slots for `days` consecutive dates starting at `from_date`.
///
/// Dates are ascending and slots are ascending within a date; "first
/// available" lookups depend on that ordering. `now` is only used to drop
/// slots that are already in the past, so identical inputs always produce
/// identical output.
pub fn generate(
    availability: &WeeklyAvailability,
    from_date: NaiveDate,
    days: u32,
    now: NaiveDateTime,
) -> Result<SlotSchedule, AvailabilityError> {
    if days == 0 {
        return Err(AvailabilityError::InvalidWindow("days must be at least 1".to_string()));
    }

    if days > MAX_WINDOW_DAYS {
        return Err(AvailabilityError::InvalidWindow(format!(
            "{} days exceeds the maximum of {}",
            days, MAX_WINDOW_DAYS
        )));
    }

    let mut schedule = SlotSchedule::new();

    for offset in 0..days {
        let date = from_date
            .checked_add_days(Days::new(u64::from(offset)))
            .ok_or_else(|| {
                AvailabilityError::InvalidWindow(format!(
                    "{} days from {} is out of calendar range",
                    days, from_date
                ))
            })?;

        schedule.insert(date, slots_for_date(availability, date, now));
    }

    debug!(
        "Generated {} candidate slots over {} days from {}",
        schedule.values().map(Vec::len).sum::<usize>(),
        days,
        from_date
    );

    Ok(schedule)
}

/// Candidate slots for a single date.
pub fn slots_for_date(
    availability: &WeeklyAvailability,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Vec<CandidateSlot> {
    if !availability.is_open_on(date) || date < now.date() {
        return Vec::new();
    }

    let step = i64::from(availability.consultation_minutes()) * 60;
    let window_end = i64::from(availability.working_hours_end()) * SECONDS_PER_HOUR;
    let mut start = i64::from(availability.working_hours_start()) * SECONDS_PER_HOUR;

    if date == now.date() {
        let earliest = same_day_start(now.time(), step);
        if earliest > start {
            start = earliest;
        }
    }

    let mut slots = Vec::new();
    while start + step <= window_end {
        let Some(start_time) = time_from_seconds(start) else {
            break;
        };
        slots.push(CandidateSlot {
            date,
            start_time,
            duration_minutes: availability.consultation_minutes(),
        });
        start += step;
    }

    slots
}

/// `now + step`, rounded up to the next multiple of `step` from midnight.
/// May exceed a day, in which case nothing is bookable today.
fn same_day_start(now: NaiveTime, step: i64) -> i64 {
    let mut seconds = i64::from(now.num_seconds_from_midnight());
    if now.nanosecond() > 0 {
        seconds += 1;
    }

    let earliest = seconds + step;
    (earliest + step - 1) / step * step
}

fn time_from_seconds(seconds: i64) -> Option<NaiveTime> {
    let seconds = u32::try_from(seconds).ok()?;
    NaiveTime::from_num_seconds_from_midnight_opt(seconds, 0)
}

/// First date on or after `from` with at least one slot.
pub fn first_open_date(schedule: &SlotSchedule, from: NaiveDate) -> Option<NaiveDate> {
    schedule
        .range(from..)
        .find(|(_, slots)| !slots.is_empty())
        .map(|(date, _)| *date)
}

/// Earliest slot in the schedule.
pub fn first_available(schedule: &SlotSchedule) -> Option<&CandidateSlot> {
    schedule.values().find_map(|slots| slots.first())
}
