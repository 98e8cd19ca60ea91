use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::Duration;

use chrono::{Datelike, NaiveDate, NaiveTime, Weekday};
use serde::{Deserialize, Serialize};

use shared_config::AppConfig;

use crate::error::AvailabilityError;

/// Candidate slots per date, ascending by date.
pub type SlotSchedule = BTreeMap<NaiveDate, Vec<CandidateSlot>>;

/// Reconciled slots per date, ascending by date.
pub type ReconciledSchedule = BTreeMap<NaiveDate, Vec<ReconciledSlot>>;

/// `HH:mm` (24h) wire format for slot start times.
pub mod hhmm {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%H:%M";

    pub fn serialize<S>(time: &NaiveTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format(time))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).map_err(serde::de::Error::custom)
    }

    pub fn format(time: &NaiveTime) -> String {
        time.format(FORMAT).to_string()
    }

    /// Accepts `HH:mm` and the `HH:mm:ss` form some backends return.
    pub fn parse(raw: &str) -> Result<NaiveTime, chrono::ParseError> {
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, FORMAT)
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
    }
}

// ==============================================================================
// WEEKLY AVAILABILITY
// ==============================================================================

/// Recurring open days and hours of a provider or branch.
///
/// Always valid once constructed: `working_hours_start < working_hours_end`,
/// both within 0-23, and a positive consultation length. Deserialization runs
/// the same checks, so a malformed pattern is rejected at load time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WeeklyAvailabilityConfig")]
pub struct WeeklyAvailability {
    available_days: HashSet<Weekday>,
    consultation_minutes: u32,
    working_hours_start: u32,
    working_hours_end: u32,
    closed_dates: BTreeSet<NaiveDate>,
}

/// Unvalidated form of [`WeeklyAvailability`] as it arrives over the wire.
#[derive(Debug, Clone, Deserialize)]
pub struct WeeklyAvailabilityConfig {
    pub available_days: HashSet<Weekday>,
    pub consultation_minutes: u32,
    pub working_hours_start: u32,
    pub working_hours_end: u32,
    #[serde(default)]
    pub closed_dates: BTreeSet<NaiveDate>,
}

impl TryFrom<WeeklyAvailabilityConfig> for WeeklyAvailability {
    type Error = AvailabilityError;

    fn try_from(config: WeeklyAvailabilityConfig) -> Result<Self, Self::Error> {
        WeeklyAvailability::new(
            config.available_days,
            config.consultation_minutes,
            config.working_hours_start,
            config.working_hours_end,
        )
        .map(|availability| availability.with_closed_dates(config.closed_dates))
    }
}

impl WeeklyAvailability {
    pub fn new(
        available_days: impl IntoIterator<Item = Weekday>,
        consultation_minutes: u32,
        working_hours_start: u32,
        working_hours_end: u32,
    ) -> Result<Self, AvailabilityError> {
        if consultation_minutes == 0 {
            return Err(AvailabilityError::Configuration(
                "consultation_minutes must be positive".to_string(),
            ));
        }

        if working_hours_start > 23 || working_hours_end > 23 {
            return Err(AvailabilityError::Configuration(format!(
                "working hours must be between 0 and 23, got {}-{}",
                working_hours_start, working_hours_end
            )));
        }

        if working_hours_start >= working_hours_end {
            return Err(AvailabilityError::Configuration(format!(
                "working_hours_start ({}) must be before working_hours_end ({})",
                working_hours_start, working_hours_end
            )));
        }

        Ok(Self {
            available_days: available_days.into_iter().collect(),
            consultation_minutes,
            working_hours_start,
            working_hours_end,
            closed_dates: BTreeSet::new(),
        })
    }

    /// Specific dates (holidays, leave) on which no slots are offered.
    pub fn with_closed_dates(mut self, dates: impl IntoIterator<Item = NaiveDate>) -> Self {
        self.closed_dates.extend(dates);
        self
    }

    pub fn available_days(&self) -> &HashSet<Weekday> {
        &self.available_days
    }

    pub fn consultation_minutes(&self) -> u32 {
        self.consultation_minutes
    }

    pub fn working_hours_start(&self) -> u32 {
        self.working_hours_start
    }

    pub fn working_hours_end(&self) -> u32 {
        self.working_hours_end
    }

    pub fn closed_dates(&self) -> &BTreeSet<NaiveDate> {
        &self.closed_dates
    }

    pub fn is_open_on(&self, date: NaiveDate) -> bool {
        self.available_days.contains(&date.weekday()) && !self.closed_dates.contains(&date)
    }
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandidateSlot {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
    pub duration_minutes: u32,
}

impl CandidateSlot {
    pub fn end_time(&self) -> NaiveTime {
        self.start_time + chrono::Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn selection(&self) -> BookingSelection {
        BookingSelection {
            date: self.date,
            start_time: self.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconciledSlot {
    #[serde(flatten)]
    pub slot: CandidateSlot,
    pub is_booked: bool,
    /// Booked status could not be confirmed; the slot is held as booked.
    pub is_provisional: bool,
}

impl ReconciledSlot {
    pub fn is_bookable(&self) -> bool {
        !self.is_booked && !self.is_provisional
    }
}

/// Booked start times reported by the backend for one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BookedSlots {
    Known(HashSet<NaiveTime>),
    /// The fetch failed or has not resolved yet.
    Unknown,
}

impl BookedSlots {
    pub fn none() -> Self {
        BookedSlots::Known(HashSet::new())
    }

    /// Parses `HH:mm` start times. Any malformed entry fails the whole list.
    pub fn from_start_times<I, S>(times: I) -> Result<Self, AvailabilityError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut booked = HashSet::new();
        for raw in times {
            let raw = raw.as_ref();
            let time = hhmm::parse(raw).map_err(|e| {
                AvailabilityError::InvalidTime(format!("'{}': {}", raw, e))
            })?;
            booked.insert(time);
        }
        Ok(BookedSlots::Known(booked))
    }

    pub fn is_known(&self) -> bool {
        matches!(self, BookedSlots::Known(_))
    }
}

// ==============================================================================
// BOOKING
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookingSelection {
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
}

/// Who a booking session books with. `provider_id` is absent for
/// branch-level availability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingContext {
    pub provider_id: Option<String>,
    pub branch_id: String,
}

impl BookingContext {
    pub fn for_provider(provider_id: impl Into<String>, branch_id: impl Into<String>) -> Self {
        Self {
            provider_id: Some(provider_id.into()),
            branch_id: branch_id.into(),
        }
    }

    pub fn for_branch(branch_id: impl Into<String>) -> Self {
        Self {
            provider_id: None,
            branch_id: branch_id.into(),
        }
    }

    pub fn availability_key(&self, date: NaiveDate) -> AvailabilityKey {
        AvailabilityKey {
            provider_id: self.provider_id.clone(),
            branch_id: self.branch_id.clone(),
            date,
        }
    }

    pub fn appointment_key(&self, selection: &BookingSelection) -> AppointmentKey {
        AppointmentKey {
            provider_id: self.provider_id.clone(),
            branch_id: self.branch_id.clone(),
            date: selection.date,
            start_time: selection.start_time,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AvailabilityKey {
    pub provider_id: Option<String>,
    pub branch_id: String,
    pub date: NaiveDate,
}

/// Natural key of an appointment; unique across all appointments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AppointmentKey {
    pub provider_id: Option<String>,
    pub branch_id: String,
    pub date: NaiveDate,
    #[serde(with = "hhmm")]
    pub start_time: NaiveTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientDetails {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentRequest {
    pub key: AppointmentKey,
    pub patient: PatientDetails,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub appointment_id: String,
    pub key: AppointmentKey,
}

/// User-facing notice raised by the booking flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BookingNotice {
    SlotTaken {
        date: NaiveDate,
        #[serde(with = "hhmm")]
        start_time: NaiveTime,
    },
    AvailabilityUnavailable {
        date: NaiveDate,
    },
    SubmissionFailed {
        message: String,
    },
}

impl BookingNotice {
    pub fn message(&self) -> String {
        match self {
            BookingNotice::SlotTaken { date, start_time } => format!(
                "The {} slot on {} is no longer available. Please choose another time.",
                hhmm::format(start_time),
                date.format("%A, %d %B %Y")
            ),
            BookingNotice::AvailabilityUnavailable { .. } => {
                "Availability temporarily unavailable. Please try again shortly.".to_string()
            }
            BookingNotice::SubmissionFailed { message } => {
                format!("We could not book your appointment: {}", message)
            }
        }
    }
}

// ==============================================================================
// POLICY
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingPolicy {
    pub window_days: u32,
    pub retry_delay: Duration,
    pub max_retries: u32,
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            window_days: 7,
            retry_delay: Duration::from_millis(1500),
            max_retries: 1,
        }
    }
}

impl From<&AppConfig> for BookingPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            window_days: config.booking_window_days,
            retry_delay: Duration::from_millis(config.availability_retry_delay_ms),
            max_retries: config.availability_max_retries,
        }
    }
}
