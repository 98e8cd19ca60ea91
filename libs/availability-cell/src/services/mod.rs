pub mod availability;
pub mod client;
pub mod coordinator;
pub mod generator;
pub mod reconciler;
pub mod session;

pub use availability::compute_availability;
pub use client::{AvailabilityClient, HttpAvailabilityClient};
pub use coordinator::{
    AvailabilityRequest, BookingCoordinator, BookingState, DateSelection, LoadOutcome,
    SelectOutcome, SubmissionRequest, SubmitOutcome,
};
pub use session::{BookingSession, BookingSnapshot};
