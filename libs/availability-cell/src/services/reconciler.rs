use std::collections::HashMap;

use chrono::NaiveDate;

use crate::models::{BookedSlots, CandidateSlot, ReconciledSchedule, ReconciledSlot, SlotSchedule};

/// Mark candidates against the booked start times fetched for their date.
///
/// The booked list always wins. With [`BookedSlots::Unknown`] every slot is
/// returned as booked and provisional, never as free.
pub fn reconcile(candidates: &[CandidateSlot], booked: &BookedSlots) -> Vec<ReconciledSlot> {
    candidates
        .iter()
        .map(|slot| {
            let (is_booked, is_provisional) = match booked {
                BookedSlots::Known(times) => (times.contains(&slot.start_time), false),
                BookedSlots::Unknown => (true, true),
            };

            ReconciledSlot {
                slot: slot.clone(),
                is_booked,
                is_provisional,
            }
        })
        .collect()
}

/// Reconcile a whole schedule. Dates missing from `booked` are unknown.
pub fn reconcile_schedule(
    schedule: &SlotSchedule,
    booked: &HashMap<NaiveDate, BookedSlots>,
) -> ReconciledSchedule {
    schedule
        .iter()
        .map(|(date, candidates)| {
            let booked_for_date = booked.get(date).unwrap_or(&BookedSlots::Unknown);
            (*date, reconcile(candidates, booked_for_date))
        })
        .collect()
}

/// Earliest slot that can be booked right now.
pub fn first_bookable(schedule: &ReconciledSchedule) -> Option<&ReconciledSlot> {
    schedule
        .values()
        .flat_map(|slots| slots.iter())
        .find(|slot| slot.is_bookable())
}
