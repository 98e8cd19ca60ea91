use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::AvailabilityError;
use crate::models::{
    hhmm, Appointment, AppointmentRequest, AvailabilityKey, BookedSlots, BookingContext,
    BookingNotice, BookingPolicy, BookingSelection, PatientDetails, ReconciledSlot,
    SlotSchedule, WeeklyAvailability,
};
use crate::services::{generator, reconciler};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BookingState {
    Idle,
    DateSelected { date: NaiveDate },
    SlotsLoading { date: NaiveDate },
    SlotsReady { date: NaiveDate },
    SlotSelected { date: NaiveDate, selection: BookingSelection },
    Submitting { date: NaiveDate, selection: BookingSelection },
    Confirmed { appointment: Appointment },
}

impl BookingState {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            BookingState::Idle => None,
            BookingState::DateSelected { date }
            | BookingState::SlotsLoading { date }
            | BookingState::SlotsReady { date }
            | BookingState::SlotSelected { date, .. }
            | BookingState::Submitting { date, .. } => Some(*date),
            BookingState::Confirmed { appointment } => Some(appointment.key.date),
        }
    }

    pub fn selection(&self) -> Option<&BookingSelection> {
        match self {
            BookingState::SlotSelected { selection, .. }
            | BookingState::Submitting { selection, .. } => Some(selection),
            _ => None,
        }
    }
}

/// Ticket for one availability fetch. Only the ticket of the latest
/// generation is applied when its response arrives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityRequest {
    pub generation: u64,
    pub key: AvailabilityKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRequest {
    pub generation: u64,
    pub appointment: AppointmentRequest,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DateSelection {
    Accepted { date: NaiveDate },
    OutsideWindow { date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Ready { date: NaiveDate, free_slots: usize },
    /// Nothing to fetch: the provider is closed on this date.
    Closed { date: NaiveDate },
    Retry { after: Duration },
    /// Retries exhausted; slots stay provisional.
    Unavailable { date: NaiveDate },
    /// A submission is in flight or already confirmed; nothing was fetched.
    Busy { date: NaiveDate },
    /// Response for a superseded request, discarded.
    Stale,
    OutsideWindow { date: NaiveDate },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectOutcome {
    Selected(BookingSelection),
    Rejected(AvailabilityError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Confirmed(Appointment),
    /// Someone else took the slot; the date is being reloaded.
    Conflict { notice: BookingNotice },
    /// Backend refused the booking; the selection is kept for resubmission.
    Failed { message: String },
    /// Rejected locally without contacting the backend.
    Rejected(AvailabilityError),
    Stale,
}

/// I/O-free booking state machine for one session.
///
/// Hands out [`AvailabilityRequest`] and [`SubmissionRequest`] tickets and is
/// fed their results. Every date change or reload bumps the generation, which
/// invalidates responses still in flight.
#[derive(Debug)]
pub struct BookingCoordinator {
    context: BookingContext,
    availability: WeeklyAvailability,
    policy: BookingPolicy,
    now: NaiveDateTime,
    schedule: SlotSchedule,
    state: BookingState,
    slots: Vec<ReconciledSlot>,
    booked: BookedSlots,
    generation: u64,
    failed_attempts: u32,
    /// Selection carried across a reload; restored if still free.
    held_selection: Option<BookingSelection>,
    notice: Option<BookingNotice>,
}

impl BookingCoordinator {
    pub fn new(
        context: BookingContext,
        availability: WeeklyAvailability,
        window_start: NaiveDate,
        now: NaiveDateTime,
        policy: BookingPolicy,
    ) -> Result<Self, AvailabilityError> {
        let schedule = generator::generate(&availability, window_start, policy.window_days, now)?;

        Ok(Self {
            context,
            availability,
            policy,
            now,
            schedule,
            state: BookingState::Idle,
            slots: Vec::new(),
            booked: BookedSlots::Unknown,
            generation: 0,
            failed_attempts: 0,
            held_selection: None,
            notice: None,
        })
    }

    pub fn state(&self) -> &BookingState {
        &self.state
    }

    pub fn context(&self) -> &BookingContext {
        &self.context
    }

    pub fn availability(&self) -> &WeeklyAvailability {
        &self.availability
    }

    pub fn schedule(&self) -> &SlotSchedule {
        &self.schedule
    }

    pub fn current_date(&self) -> Option<NaiveDate> {
        self.state.date()
    }

    pub fn slots(&self) -> &[ReconciledSlot] {
        &self.slots
    }

    pub fn selection(&self) -> Option<&BookingSelection> {
        self.state.selection()
    }

    pub fn notice(&self) -> Option<&BookingNotice> {
        self.notice.as_ref()
    }

    pub fn retry_delay(&self) -> Duration {
        self.policy.retry_delay
    }

    /// Pick the initial date: `proposed` if it has slots, otherwise the first
    /// later date in the window that does. Stays idle when nothing is open.
    pub fn open(&mut self, proposed: NaiveDate) -> Option<NaiveDate> {
        let Some(date) = generator::first_open_date(&self.schedule, proposed) else {
            info!("No open dates on or after {} in the booking window", proposed);
            return None;
        };

        if date != proposed {
            debug!("Proposed date {} has no slots, advancing to {}", proposed, date);
        }

        match self.select_date(date) {
            DateSelection::Accepted { date } => Some(date),
            DateSelection::OutsideWindow { .. } => None,
        }
    }

    /// Move to `date` from any state, dropping the selection and any
    /// in-flight request for the previous date.
    pub fn select_date(&mut self, date: NaiveDate) -> DateSelection {
        let Some(candidates) = self.schedule.get(&date) else {
            debug!("Rejecting date {} outside the booking window", date);
            return DateSelection::OutsideWindow { date };
        };

        self.generation += 1;
        self.failed_attempts = 0;
        self.held_selection = None;
        self.notice = None;
        self.booked = BookedSlots::Unknown;
        self.slots = reconciler::reconcile(candidates, &self.booked);
        self.state = BookingState::DateSelected { date };

        DateSelection::Accepted { date }
    }

    /// Start (or restart) loading booked slots for the current date.
    ///
    /// A live selection is held while loading and restored when the fresh
    /// booked list still shows it free.
    ///
    /// Returns `None` when there is nothing to fetch: no date, a closed
    /// date (moved straight to `SlotsReady`), or a submission in progress.
    pub fn begin_loading(&mut self) -> Option<AvailabilityRequest> {
        let date = match &self.state {
            BookingState::DateSelected { date } | BookingState::SlotsReady { date } => {
                self.held_selection = None;
                *date
            }
            BookingState::SlotsLoading { date } => *date,
            BookingState::SlotSelected { date, selection } => {
                self.held_selection = Some(selection.clone());
                *date
            }
            _ => return None,
        };

        let has_candidates = self.schedule.get(&date).is_some_and(|slots| !slots.is_empty());
        if !has_candidates {
            self.slots.clear();
            self.booked = BookedSlots::none();
            self.state = BookingState::SlotsReady { date };
            return None;
        }

        self.generation += 1;
        self.failed_attempts = 0;
        self.state = BookingState::SlotsLoading { date };
        self.pending_request()
    }

    /// The request the coordinator is currently waiting on, if any.
    pub fn pending_request(&self) -> Option<AvailabilityRequest> {
        match &self.state {
            BookingState::SlotsLoading { date } => Some(AvailabilityRequest {
                generation: self.generation,
                key: self.context.availability_key(*date),
            }),
            _ => None,
        }
    }

    /// Apply the result of an availability fetch.
    pub fn apply_availability(
        &mut self,
        request: &AvailabilityRequest,
        result: Result<BookedSlots, AvailabilityError>,
    ) -> LoadOutcome {
        let date = request.key.date;
        let is_current = request.generation == self.generation
            && self.state == BookingState::SlotsLoading { date };

        if !is_current {
            debug!(
                "Discarding stale availability for {} (generation {}, current {})",
                date, request.generation, self.generation
            );
            return LoadOutcome::Stale;
        }

        let failure = match result {
            Ok(booked @ BookedSlots::Known(_)) => {
                let candidates = self.schedule.get(&date).map(Vec::as_slice).unwrap_or_default();
                self.slots = reconciler::reconcile(candidates, &booked);
                self.booked = booked;
                self.failed_attempts = 0;
                self.state = BookingState::SlotsReady { date };
                self.restore_held_selection(date);

                let free_slots = self.slots.iter().filter(|slot| slot.is_bookable()).count();
                debug!("Availability ready for {}: {} free slots", date, free_slots);
                return LoadOutcome::Ready { date, free_slots };
            }
            Ok(BookedSlots::Unknown) => "backend returned no booked list".to_string(),
            Err(e) => e.to_string(),
        };

        self.failed_attempts += 1;
        if self.failed_attempts <= self.policy.max_retries {
            warn!(
                "Availability fetch for {} failed (attempt {}): {}; retrying",
                date, self.failed_attempts, failure
            );
            return LoadOutcome::Retry { after: self.policy.retry_delay };
        }

        warn!("Availability for {} unavailable after {} attempts: {}", date, self.failed_attempts, failure);
        self.held_selection = None;
        self.booked = BookedSlots::Unknown;
        let candidates = self.schedule.get(&date).map(Vec::as_slice).unwrap_or_default();
        self.slots = reconciler::reconcile(candidates, &self.booked);
        self.notice = Some(BookingNotice::AvailabilityUnavailable { date });
        LoadOutcome::Unavailable { date }
    }

    fn restore_held_selection(&mut self, date: NaiveDate) {
        let Some(selection) = self.held_selection.take() else {
            return;
        };

        let still_free = self
            .slots
            .iter()
            .any(|slot| slot.slot.start_time == selection.start_time && slot.is_bookable());

        if still_free {
            self.state = BookingState::SlotSelected { date, selection };
        } else {
            debug!("Selected slot {} on {} was taken meanwhile", hhmm::format(&selection.start_time), date);
            self.notice = Some(BookingNotice::SlotTaken {
                date,
                start_time: selection.start_time,
            });
        }
    }

    /// Select a free slot on the current date. Booked, provisional or
    /// unknown slots are rejected without any state change.
    pub fn select_slot(&mut self, start_time: NaiveTime) -> SelectOutcome {
        let date = match &self.state {
            BookingState::SlotsReady { date } | BookingState::SlotSelected { date, .. } => *date,
            other => {
                return SelectOutcome::Rejected(AvailabilityError::PreconditionViolation(format!(
                    "cannot select a slot while {:?}",
                    other
                )));
            }
        };

        let Some(slot) = self.slots.iter().find(|slot| slot.slot.start_time == start_time) else {
            return SelectOutcome::Rejected(AvailabilityError::PreconditionViolation(format!(
                "no slot at {} on {}",
                hhmm::format(&start_time),
                date
            )));
        };

        if !slot.is_bookable() {
            debug!("Rejecting selection of booked slot {} on {}", hhmm::format(&start_time), date);
            return SelectOutcome::Rejected(AvailabilityError::PreconditionViolation(format!(
                "slot {} on {} is not available",
                hhmm::format(&start_time),
                date
            )));
        }

        let selection = slot.slot.selection();
        self.state = BookingState::SlotSelected {
            date,
            selection: selection.clone(),
        };

        SelectOutcome::Selected(selection)
    }

    pub fn clear_selection(&mut self) {
        if let BookingState::SlotSelected { date, .. } = self.state {
            self.state = BookingState::SlotsReady { date };
        }
    }

    /// Validate the live selection and move to `Submitting`.
    pub fn begin_submission(
        &mut self,
        selection: &BookingSelection,
        patient: PatientDetails,
    ) -> Result<SubmissionRequest, AvailabilityError> {
        let date = match &self.state {
            BookingState::SlotSelected { date, selection: live } if live == selection => *date,
            BookingState::SlotSelected { .. } => {
                return Err(AvailabilityError::PreconditionViolation(
                    "selection does not match the selected slot".to_string(),
                ));
            }
            other => {
                return Err(AvailabilityError::PreconditionViolation(format!(
                    "cannot submit while {:?}",
                    other
                )));
            }
        };

        let still_free = self
            .slots
            .iter()
            .any(|slot| slot.slot.start_time == selection.start_time && slot.is_bookable());
        if !still_free {
            return Err(AvailabilityError::PreconditionViolation(format!(
                "slot {} on {} is no longer free",
                hhmm::format(&selection.start_time),
                date
            )));
        }

        self.notice = None;
        self.state = BookingState::Submitting {
            date,
            selection: selection.clone(),
        };

        Ok(SubmissionRequest {
            generation: self.generation,
            appointment: AppointmentRequest {
                key: self.context.appointment_key(selection),
                patient,
            },
        })
    }

    /// Apply the backend's answer to a submission.
    ///
    /// A conflict clears the selection, marks the date unknown and leaves the
    /// coordinator in `SlotsLoading` so the date is fetched again. It is never
    /// resubmitted. Transport failures propagate as `Err` with the selection
    /// kept.
    pub fn apply_submission(
        &mut self,
        request: &SubmissionRequest,
        result: Result<Appointment, AvailabilityError>,
    ) -> Result<SubmitOutcome, AvailabilityError> {
        let (date, selection) = match &self.state {
            BookingState::Submitting { date, selection } if request.generation == self.generation => {
                (*date, selection.clone())
            }
            _ => {
                // The user moved on; a created appointment still has to be reported.
                return match result {
                    Ok(appointment) => {
                        warn!(
                            "Appointment {} confirmed after the session moved on",
                            appointment.appointment_id
                        );
                        Ok(SubmitOutcome::Confirmed(appointment))
                    }
                    Err(e) => {
                        debug!("Discarding stale submission result: {}", e);
                        Ok(SubmitOutcome::Stale)
                    }
                };
            }
        };

        match result {
            Ok(appointment) => {
                info!(
                    "Appointment {} confirmed for {} at {}",
                    appointment.appointment_id,
                    date,
                    hhmm::format(&selection.start_time)
                );
                self.slots.clear();
                self.booked = BookedSlots::Unknown;
                self.state = BookingState::Confirmed {
                    appointment: appointment.clone(),
                };
                Ok(SubmitOutcome::Confirmed(appointment))
            }
            Err(AvailabilityError::Conflict { .. }) => {
                let notice = BookingNotice::SlotTaken {
                    date,
                    start_time: selection.start_time,
                };
                warn!("Lost the race for {} on {}, reloading", hhmm::format(&selection.start_time), date);

                self.notice = Some(notice.clone());
                self.booked = BookedSlots::Unknown;
                let candidates = self.schedule.get(&date).map(Vec::as_slice).unwrap_or_default();
                self.slots = reconciler::reconcile(candidates, &self.booked);
                self.generation += 1;
                self.failed_attempts = 0;
                self.held_selection = None;
                self.state = BookingState::SlotsLoading { date };

                Ok(SubmitOutcome::Conflict { notice })
            }
            Err(AvailabilityError::Submission(message)) => {
                warn!("Submission for {} on {} failed: {}", hhmm::format(&selection.start_time), date, message);
                self.notice = Some(BookingNotice::SubmissionFailed { message: message.clone() });
                self.state = BookingState::SlotSelected { date, selection };
                Ok(SubmitOutcome::Failed { message })
            }
            Err(e) => {
                self.state = BookingState::SlotSelected { date, selection };
                Err(e)
            }
        }
    }

    /// Move the clock forward and regenerate candidates for the same window.
    ///
    /// The current date is re-entered, so its booked list must be fetched
    /// again.
    pub fn advance_clock(&mut self, now: NaiveDateTime) -> Result<(), AvailabilityError> {
        let Some(window_start) = self.schedule.keys().next().copied() else {
            return Ok(());
        };

        self.schedule = generator::generate(&self.availability, window_start, self.policy.window_days, now)?;
        self.now = now;

        if let Some(date) = self.current_date() {
            if !matches!(self.state, BookingState::Confirmed { .. }) {
                self.select_date(date);
            }
        }

        Ok(())
    }

    pub fn now(&self) -> NaiveDateTime {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Weekday;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn coordinator() -> BookingCoordinator {
        let availability = WeeklyAvailability::new([Weekday::Mon], 60, 9, 12).unwrap();
        BookingCoordinator::new(
            BookingContext::for_branch("branch-1"),
            availability,
            date(3),
            date(2).and_hms_opt(8, 0, 0).unwrap(),
            BookingPolicy::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_select_date_outside_window_keeps_state() {
        let mut coordinator = coordinator();
        assert_eq!(coordinator.select_date(date(20)), DateSelection::OutsideWindow { date: date(20) });
        assert_eq!(coordinator.state(), &BookingState::Idle);
    }

    #[test]
    fn test_closed_date_skips_fetch() {
        let mut coordinator = coordinator();
        coordinator.select_date(date(4));
        assert_eq!(coordinator.begin_loading(), None);
        assert_eq!(coordinator.state(), &BookingState::SlotsReady { date: date(4) });
        assert!(coordinator.slots().is_empty());
    }

    #[test]
    fn test_unknown_booked_list_counts_as_failure() {
        let mut coordinator = coordinator();
        coordinator.select_date(date(3));
        let request = coordinator.begin_loading().unwrap();

        let outcome = coordinator.apply_availability(&request, Ok(BookedSlots::Unknown));
        assert_matches!(outcome, LoadOutcome::Retry { .. });
        assert!(coordinator.slots().iter().all(|slot| !slot.is_bookable()));
    }

    #[test]
    fn test_clear_selection_returns_to_ready() {
        let mut coordinator = coordinator();
        coordinator.select_date(date(3));
        let request = coordinator.begin_loading().unwrap();
        coordinator.apply_availability(&request, Ok(BookedSlots::none()));

        assert_matches!(coordinator.select_slot(time(10, 0)), SelectOutcome::Selected(_));
        coordinator.clear_selection();
        assert_eq!(coordinator.state(), &BookingState::SlotsReady { date: date(3) });
    }

    #[test]
    fn test_advance_clock_drops_past_slots() {
        let mut coordinator = coordinator();
        coordinator.select_date(date(3));

        coordinator.advance_clock(date(3).and_hms_opt(9, 10, 0).unwrap()).unwrap();

        // 09:10 + 60 rounds up to 11:00, leaving a single slot before noon
        let starts: Vec<_> = coordinator.slots().iter().map(|s| s.slot.start_time).collect();
        assert_eq!(starts, vec![time(11, 0)]);
        assert_eq!(coordinator.state(), &BookingState::DateSelected { date: date(3) });
    }

    #[test]
    fn test_reload_while_selected_restores_free_selection() {
        let mut coordinator = coordinator();
        coordinator.select_date(date(3));
        let request = coordinator.begin_loading().unwrap();
        coordinator.apply_availability(&request, Ok(BookedSlots::none()));
        assert_matches!(coordinator.select_slot(time(10, 0)), SelectOutcome::Selected(_));

        let reload = coordinator.begin_loading().expect("reload issues a fetch");
        assert_eq!(coordinator.state(), &BookingState::SlotsLoading { date: date(3) });

        let booked = BookedSlots::from_start_times(["09:00"]).unwrap();
        assert_matches!(coordinator.apply_availability(&reload, Ok(booked)), LoadOutcome::Ready { .. });
        assert_eq!(coordinator.selection().map(|s| s.start_time), Some(time(10, 0)));
    }

    #[test]
    fn test_exhausted_reload_hides_stale_free_slots() {
        let mut coordinator = coordinator();
        coordinator.select_date(date(3));
        let request = coordinator.begin_loading().unwrap();
        coordinator.apply_availability(&request, Ok(BookedSlots::none()));
        assert_matches!(coordinator.select_slot(time(10, 0)), SelectOutcome::Selected(_));

        let reload = coordinator.begin_loading().unwrap();
        let failure = || Err(AvailabilityError::Transport("timeout".to_string()));
        assert_matches!(coordinator.apply_availability(&reload, failure()), LoadOutcome::Retry { .. });
        assert_matches!(coordinator.apply_availability(&reload, failure()), LoadOutcome::Unavailable { .. });

        assert_eq!(coordinator.selection(), None);
        assert!(coordinator.slots().iter().all(|slot| slot.is_booked && slot.is_provisional));
    }
}
