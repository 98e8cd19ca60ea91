use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub clinic_api_url: String,
    pub clinic_api_key: String,
    pub booking_window_days: u32,
    pub max_window_days: u32,
    pub availability_retry_delay_ms: u64,
    pub availability_max_retries: u32,
    pub server_port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            clinic_api_url: String::new(),
            clinic_api_key: String::new(),
            booking_window_days: 7,
            max_window_days: 92,
            availability_retry_delay_ms: 1500,
            availability_max_retries: 1,
            server_port: 3000,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            clinic_api_url: env::var("CLINIC_API_URL")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_API_URL not set, using empty value");
                    String::new()
                }),
            clinic_api_key: env::var("CLINIC_API_KEY")
                .unwrap_or_else(|_| {
                    warn!("CLINIC_API_KEY not set, using empty value");
                    String::new()
                }),
            booking_window_days: parse_var("BOOKING_WINDOW_DAYS", defaults.booking_window_days),
            max_window_days: parse_var("MAX_WINDOW_DAYS", defaults.max_window_days),
            availability_retry_delay_ms: parse_var(
                "AVAILABILITY_RETRY_DELAY_MS",
                defaults.availability_retry_delay_ms,
            ),
            availability_max_retries: parse_var(
                "AVAILABILITY_MAX_RETRIES",
                defaults.availability_max_retries,
            ),
            server_port: parse_var("SERVER_PORT", defaults.server_port),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.clinic_api_url.is_empty() && !self.clinic_api_key.is_empty()
    }
}

fn parse_var<T>(name: &str, default: T) -> T
where
    T: FromStr + std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value '{}', using default {}", name, raw, default);
            default
        }),
        Err(_) => default,
    }
}
