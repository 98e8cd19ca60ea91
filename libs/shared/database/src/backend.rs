use reqwest::{
    Client,
    header::{HeaderMap, HeaderValue, CONTENT_TYPE},
    Method,
};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error};

use shared_config::AppConfig;
use shared_models::error::BackendError;

/// Thin JSON client for the clinic REST backend.
#[derive(Clone)]
pub struct BackendClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl BackendClient {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            client: Client::new(),
            base_url: config.clinic_api_url.trim_end_matches('/').to_string(),
            api_key: config.clinic_api_key.clone(),
        }
    }

    fn get_headers(&self) -> Result<HeaderMap, BackendError> {
        let mut headers = HeaderMap::new();

        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        if !self.api_key.is_empty() {
            let value = HeaderValue::from_str(&self.api_key)
                .map_err(|_| BackendError::NotConfigured("API key is not a valid header value".to_string()))?;
            headers.insert("apikey", value);
        }

        Ok(headers)
    }

    pub async fn request<T>(&self, method: Method, path: &str,
                            query: &[(&str, String)], body: Option<Value>)
                            -> Result<T, BackendError>
    where T: DeserializeOwned {
        if self.base_url.is_empty() {
            return Err(BackendError::NotConfigured("CLINIC_API_URL is empty".to_string()));
        }

        let url = format!("{}{}", self.base_url, path);
        debug!("Making {} request to {}", method, url);

        let mut req = self.client.request(method, &url)
            .headers(self.get_headers()?);

        if !query.is_empty() {
            req = req.query(query);
        }

        if let Some(body_data) = body {
            req = req.json(&body_data);
        }

        let response = req.send().await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            if status.as_u16() == 409 {
                debug!("Backend reported conflict: {}", error_text);
            } else {
                error!("API error ({}): {}", status, error_text);
            }

            return Err(BackendError::Status {
                status: status.as_u16(),
                body: error_text,
            });
        }

        let bytes = response.bytes().await?;
        let data = serde_json::from_slice::<T>(&bytes)?;
        Ok(data)
    }

    pub fn get_base_url(&self) -> &str {
        &self.base_url
    }
}
