use std::collections::HashMap;
use std::sync::Arc;

use axum::{extract::State, Json};
use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

use shared_config::AppConfig;
use shared_models::error::AppError;

use crate::models::{BookedSlots, WeeklyAvailability, WeeklyAvailabilityConfig};
use crate::services::{availability::compute_availability, generator, reconciler};

#[derive(Debug, Deserialize)]
pub struct CandidatesRequest {
    pub weekly_availability: WeeklyAvailabilityConfig,
    pub window_start: NaiveDate,
    pub window_days: Option<u32>,
    pub now: NaiveDateTime,
}

#[derive(Debug, Deserialize)]
pub struct ComputeSlotsRequest {
    pub weekly_availability: WeeklyAvailabilityConfig,
    pub window_start: NaiveDate,
    pub window_days: Option<u32>,
    pub now: NaiveDateTime,
    /// Booked `HH:mm` start times keyed by `YYYY-MM-DD`.
    #[serde(default)]
    pub booked: HashMap<String, Vec<String>>,
}

/// Requested window length, bounded by the configured maximum.
fn window_days(config: &AppConfig, requested: Option<u32>) -> Result<u32, AppError> {
    let days = requested.unwrap_or(config.booking_window_days);
    if days > config.max_window_days {
        return Err(AppError::ValidationError(format!(
            "window_days {} exceeds the maximum of {} days",
            days, config.max_window_days
        )));
    }
    Ok(days)
}

pub async fn health_check(
    State(state): State<Arc<AppConfig>>,
) -> Json<Value> {
    let status = if state.is_configured() { "healthy" } else { "not_configured" };

    Json(json!({
        "status": status,
        "backend_configured": state.is_configured(),
        "booking_window_days": state.booking_window_days,
    }))
}

pub async fn generate_candidates(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<CandidatesRequest>,
) -> Result<Json<Value>, AppError> {
    let window_days = window_days(&state, request.window_days)?;
    let availability = WeeklyAvailability::try_from(request.weekly_availability)?;

    let schedule = generator::generate(
        &availability,
        request.window_start,
        window_days,
        request.now,
    )?;

    let first_available = generator::first_available(&schedule).cloned();
    let days: Vec<Value> = schedule
        .into_iter()
        .map(|(date, slots)| json!({ "date": date, "slots": slots }))
        .collect();

    Ok(Json(json!({
        "days": days,
        "first_available": first_available,
    })))
}

pub async fn compute_slots(
    State(state): State<Arc<AppConfig>>,
    Json(request): Json<ComputeSlotsRequest>,
) -> Result<Json<Value>, AppError> {
    let window_days = window_days(&state, request.window_days)?;
    let availability = WeeklyAvailability::try_from(request.weekly_availability)?;

    let mut booked = HashMap::with_capacity(request.booked.len());
    for (raw_date, times) in &request.booked {
        let date = NaiveDate::parse_from_str(raw_date, "%Y-%m-%d")
            .map_err(|e| AppError::ValidationError(format!("Invalid date '{}': {}", raw_date, e)))?;
        booked.insert(date, BookedSlots::from_start_times(times)?);
    }

    debug!("Computing slots from {} for {} days", request.window_start, window_days);

    let schedule = compute_availability(
        &availability,
        request.window_start,
        window_days,
        request.now,
        &booked,
    )?;

    let first_available = reconciler::first_bookable(&schedule).cloned();
    let days: Vec<Value> = schedule
        .into_iter()
        .map(|(date, slots)| json!({ "date": date, "slots": slots }))
        .collect();

    Ok(Json(json!({
        "days": days,
        "first_available": first_available,
    })))
}
