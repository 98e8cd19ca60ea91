use async_trait::async_trait;
use chrono::{NaiveDate, NaiveTime};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use shared_config::AppConfig;
use shared_database::BackendClient;
use shared_models::error::BackendError;

use crate::error::AvailabilityError;
use crate::models::{
    hhmm, Appointment, AppointmentRequest, AvailabilityKey, BookedSlots,
};

/// Network boundary to the clinic backend.
#[async_trait]
pub trait AvailabilityClient: Send + Sync {
    /// Booked start times for one (provider, branch, date).
    ///
    /// Every failure is reported as [`AvailabilityError::UnknownAvailability`].
    async fn get_availability(&self, key: &AvailabilityKey) -> Result<BookedSlots, AvailabilityError>;

    /// Create an appointment. A taken natural key is reported as
    /// [`AvailabilityError::Conflict`].
    async fn create_appointment(&self, request: &AppointmentRequest) -> Result<Appointment, AvailabilityError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AvailabilityResponse {
    #[serde(default)]
    booked_start_times: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateAppointmentBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    provider_id: Option<&'a str>,
    branch_id: &'a str,
    date: NaiveDate,
    start_time: String,
    full_name: &'a str,
    phone: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    notes: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateAppointmentResponse {
    appointment_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConflictBody {
    date: NaiveDate,
    #[serde(with = "hhmm")]
    start_time: NaiveTime,
}

/// [`AvailabilityClient`] over the clinic REST API.
pub struct HttpAvailabilityClient {
    backend: BackendClient,
}

impl HttpAvailabilityClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            backend: BackendClient::new(config),
        }
    }

    pub fn with_backend(backend: BackendClient) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl AvailabilityClient for HttpAvailabilityClient {
    #[instrument(skip(self), fields(date = %key.date, branch = %key.branch_id))]
    async fn get_availability(&self, key: &AvailabilityKey) -> Result<BookedSlots, AvailabilityError> {
        let mut query = vec![
            ("branchId", key.branch_id.clone()),
            ("date", key.date.format("%Y-%m-%d").to_string()),
        ];
        if let Some(provider_id) = &key.provider_id {
            query.push(("providerId", provider_id.clone()));
        }

        let unknown = |reason: String| AvailabilityError::UnknownAvailability {
            date: key.date,
            reason,
        };

        let response: AvailabilityResponse = self.backend
            .request(Method::GET, "/availability", &query, None)
            .await
            .map_err(|e| unknown(e.to_string()))?;

        let booked = BookedSlots::from_start_times(&response.booked_start_times)
            .map_err(|e| unknown(e.to_string()))?;

        debug!("Fetched {} booked start times", response.booked_start_times.len());
        Ok(booked)
    }

    #[instrument(skip(self, request), fields(date = %request.key.date, start = %hhmm::format(&request.key.start_time)))]
    async fn create_appointment(&self, request: &AppointmentRequest) -> Result<Appointment, AvailabilityError> {
        let body = CreateAppointmentBody {
            provider_id: request.key.provider_id.as_deref(),
            branch_id: &request.key.branch_id,
            date: request.key.date,
            start_time: hhmm::format(&request.key.start_time),
            full_name: &request.patient.full_name,
            phone: &request.patient.phone,
            email: request.patient.email.as_deref(),
            notes: request.patient.notes.as_deref(),
        };

        let payload = serde_json::to_value(&body)
            .map_err(|e| AvailabilityError::Submission(e.to_string()))?;

        let result: Result<CreateAppointmentResponse, BackendError> = self.backend
            .request(Method::POST, "/appointments", &[], Some(payload))
            .await;

        match result {
            Ok(created) => {
                debug!("Appointment created with ID: {}", created.appointment_id);
                Ok(Appointment {
                    appointment_id: created.appointment_id,
                    key: request.key.clone(),
                })
            }
            Err(err) if err.is_conflict() => {
                // Prefer the slot the backend says is taken; fall back to ours.
                let conflict = match &err {
                    BackendError::Status { body, .. } => serde_json::from_str::<ConflictBody>(body).ok(),
                    _ => None,
                };
                let (date, start_time) = match conflict {
                    Some(conflict) => (conflict.date, conflict.start_time),
                    None => (request.key.date, request.key.start_time),
                };
                warn!("Slot {} on {} already taken", hhmm::format(&start_time), date);
                Err(AvailabilityError::Conflict { date, start_time })
            }
            Err(BackendError::Status { status, body }) => {
                let message = extract_error_message(&body).unwrap_or_else(|| format!("backend returned {}", status));
                Err(AvailabilityError::Submission(message))
            }
            Err(BackendError::NotConfigured(msg)) => Err(AvailabilityError::Configuration(msg)),
            Err(e) => Err(AvailabilityError::Transport(e.to_string())),
        }
    }
}

fn extract_error_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value["error"]
        .as_str()
        .or_else(|| value["message"].as_str())
        .map(str::to_string)
}
