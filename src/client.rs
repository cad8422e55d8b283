//! HTTP client forwarding decoded scans to the attendance endpoint

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Path scans are posted to
pub const SCAN_ENDPOINT: &str = "/leer_qr";

/// Request body for one scan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPayload {
    pub qr_data: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot build request for {url}: {source}")]
    Build { url: String, source: reqwest::Error },
    #[error("request to {url} failed: {source}")]
    Transport { url: String, source: reqwest::Error },
    #[error("response from {url} is not JSON: {source}")]
    InvalidBody { url: String, source: reqwest::Error },
}

/// Posts scans to `<base_url>/leer_qr`
#[derive(Debug, Clone)]
pub struct AttendanceClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AttendanceClient {
    /// Create a client for a server base URL
    ///
    /// # Arguments
    /// * `base_url` - Scheme and authority of the server, e.g. `http://127.0.0.1:5000`
    /// * `timeout` - Upper bound for a single request
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ClientError> {
        let endpoint = format!("{}{}", base_url.trim_end_matches('/'), SCAN_ENDPOINT);
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| ClientError::Build {
                url: endpoint.clone(),
                source,
            })?;

        let client = Self { http, endpoint };
        // Fail early on malformed base URLs instead of on the first scan
        client.build_request("")?;
        Ok(client)
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Build the POST carrying `{"qr_data": text}` as JSON
    pub fn build_request(&self, text: &str) -> Result<reqwest::Request, ClientError> {
        self.http
            .post(&self.endpoint)
            .json(&ScanPayload {
                qr_data: text.to_string(),
            })
            .build()
            .map_err(|source| ClientError::Build {
                url: self.endpoint.clone(),
                source,
            })
    }

    /// Send one scan and parse the JSON response
    ///
    /// Error statuses are not treated as failures: the server answers them
    /// with a JSON body that is returned like any other response.
    pub async fn post_scan(&self, text: &str) -> Result<serde_json::Value, ClientError> {
        let request = self.build_request(text)?;
        let response = self
            .http
            .execute(request)
            .await
            .map_err(|source| ClientError::Transport {
                url: self.endpoint.clone(),
                source,
            })?;

        log::debug!("{} answered {}", self.endpoint, response.status());

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|source| ClientError::InvalidBody {
                url: self.endpoint.clone(),
                source,
            })
    }
}
