use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, instrument};

use crate::error::AvailabilityError;
use crate::models::{BookingNotice, BookingSelection, PatientDetails, ReconciledSlot};
use crate::services::client::AvailabilityClient;
use crate::services::coordinator::{
    AvailabilityRequest, BookingCoordinator, BookingState, DateSelection, LoadOutcome,
    SelectOutcome, SubmitOutcome,
};

/// What a presentation layer needs to render the booking panel.
#[derive(Debug, Clone, Serialize)]
pub struct BookingSnapshot {
    #[serde(flatten)]
    pub state: BookingState,
    pub slots: Vec<ReconciledSlot>,
    pub notice: Option<BookingNotice>,
    pub can_submit: bool,
}

/// Drives a [`BookingCoordinator`] against an [`AvailabilityClient`].
///
/// The coordinator lock is never held across a network call, so a date
/// change can overtake a slow fetch; the coordinator discards the late
/// response.
pub struct BookingSession<C: AvailabilityClient> {
    client: Arc<C>,
    coordinator: Mutex<BookingCoordinator>,
}

impl<C: AvailabilityClient> BookingSession<C> {
    pub fn new(client: Arc<C>, coordinator: BookingCoordinator) -> Self {
        Self {
            client,
            coordinator: Mutex::new(coordinator),
        }
    }

    /// Open the session on `proposed`, or the first open date after it.
    #[instrument(skip(self))]
    pub async fn open(&self, proposed: NaiveDate) -> Option<(NaiveDate, LoadOutcome)> {
        let (date, request) = {
            let mut coordinator = self.coordinator.lock().await;
            let date = coordinator.open(proposed)?;
            (date, start_loading(&mut coordinator, date))
        };

        Some((date, self.load(request).await))
    }

    #[instrument(skip(self))]
    pub async fn change_date(&self, date: NaiveDate) -> LoadOutcome {
        let request = {
            let mut coordinator = self.coordinator.lock().await;
            if let DateSelection::OutsideWindow { date } = coordinator.select_date(date) {
                return LoadOutcome::OutsideWindow { date };
            }
            start_loading(&mut coordinator, date)
        };

        self.load(request).await
    }

    /// Fetch the current date's booked list again. A live selection
    /// survives the reload unless the slot has been taken.
    #[instrument(skip(self))]
    pub async fn reload(&self) -> Option<LoadOutcome> {
        let request = {
            let mut coordinator = self.coordinator.lock().await;
            let date = coordinator.current_date()?;
            start_loading(&mut coordinator, date)
        };

        Some(self.load(request).await)
    }

    pub async fn select_slot(&self, start_time: NaiveTime) -> SelectOutcome {
        self.coordinator.lock().await.select_slot(start_time)
    }

    /// Submit the live selection. Conflicts trigger a reload of the date
    /// before returning; the booking is never retried.
    #[instrument(skip(self, patient))]
    pub async fn submit_booking(
        &self,
        selection: BookingSelection,
        patient: PatientDetails,
    ) -> Result<SubmitOutcome, AvailabilityError> {
        let request = match self.coordinator.lock().await.begin_submission(&selection, patient) {
            Ok(request) => request,
            Err(e) => {
                debug!("Submission rejected locally: {}", e);
                return Ok(SubmitOutcome::Rejected(e));
            }
        };

        let result = self.client.create_appointment(&request.appointment).await;

        let (outcome, refresh) = {
            let mut coordinator = self.coordinator.lock().await;
            let outcome = coordinator.apply_submission(&request, result)?;
            (outcome, coordinator.pending_request())
        };

        if let (SubmitOutcome::Conflict { .. }, Some(refresh)) = (&outcome, refresh) {
            self.fetch_until_settled(refresh).await;
        }

        Ok(outcome)
    }

    pub async fn snapshot(&self) -> BookingSnapshot {
        let coordinator = self.coordinator.lock().await;
        BookingSnapshot {
            state: coordinator.state().clone(),
            slots: coordinator.slots().to_vec(),
            notice: coordinator.notice().cloned(),
            can_submit: matches!(coordinator.state(), BookingState::SlotSelected { .. }),
        }
    }

    async fn load(&self, request: Result<AvailabilityRequest, LoadOutcome>) -> LoadOutcome {
        match request {
            Ok(request) => self.fetch_until_settled(request).await,
            Err(outcome) => outcome,
        }
    }

    async fn fetch_until_settled(&self, request: AvailabilityRequest) -> LoadOutcome {
        loop {
            let result = self.client.get_availability(&request.key).await;
            let outcome = self.coordinator.lock().await.apply_availability(&request, result);

            match outcome {
                LoadOutcome::Retry { after } => tokio::time::sleep(after).await,
                other => return other,
            }
        }
    }
}

/// Issue the fetch for `date`, or the outcome explaining why none is needed.
fn start_loading(
    coordinator: &mut BookingCoordinator,
    date: NaiveDate,
) -> Result<AvailabilityRequest, LoadOutcome> {
    match coordinator.begin_loading() {
        Some(request) => Ok(request),
        None if coordinator.state() == &(BookingState::SlotsReady { date }) => {
            Err(LoadOutcome::Closed { date })
        }
        None => {
            debug!("Not reloading {} while {:?}", date, coordinator.state());
            Err(LoadOutcome::Busy { date })
        }
    }
}
