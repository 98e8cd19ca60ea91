use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

use shared_config::AppConfig;

pub struct TestConfig {
    pub clinic_api_url: String,
    pub clinic_api_key: String,
    pub booking_window_days: u32,
    pub availability_retry_delay_ms: u64,
    pub availability_max_retries: u32,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            clinic_api_url: "http://localhost:54321".to_string(),
            clinic_api_key: "test-api-key".to_string(),
            booking_window_days: 7,
            // Keep retries fast in tests
            availability_retry_delay_ms: 10,
            availability_max_retries: 1,
        }
    }
}

impl TestConfig {
    pub fn with_api_url(url: &str) -> Self {
        Self {
            clinic_api_url: url.to_string(),
            ..Self::default()
        }
    }

    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            clinic_api_url: self.clinic_api_url.clone(),
            clinic_api_key: self.clinic_api_key.clone(),
            booking_window_days: self.booking_window_days,
            max_window_days: 31,
            availability_retry_delay_ms: self.availability_retry_delay_ms,
            availability_max_retries: self.availability_max_retries,
            server_port: 0,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}

/// Fixed calendar helpers so scheduling tests never depend on the wall clock.
pub struct TestCalendar;

impl TestCalendar {
    /// Sunday 2 June 2024, the start of the reference week.
    pub fn reference_sunday() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 2).expect("valid reference date")
    }

    /// First `weekday` on or after the reference Sunday.
    pub fn weekday(weekday: Weekday) -> NaiveDate {
        let start = Self::reference_sunday();
        let offset = (7 + weekday.num_days_from_sunday() - start.weekday().num_days_from_sunday()) % 7;
        start + Duration::days(i64::from(offset))
    }

    pub fn at(date: NaiveDate, hour: u32, minute: u32) -> NaiveDateTime {
        date.and_time(Self::time(hour, minute))
    }

    pub fn time(hour: u32, minute: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(hour, minute, 0).expect("valid test time")
    }

    /// Early on the reference Sunday, before any slot of the week.
    pub fn start_of_week() -> NaiveDateTime {
        Self::at(Self::reference_sunday(), 7, 0)
    }
}
