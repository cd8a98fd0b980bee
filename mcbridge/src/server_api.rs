//! Thin client for the server-management HTTP API.
//!
//! The daemon manager (MCSManager-style) exposes instance state and a
//! remote console over HTTP, authenticated by an `apikey` query parameter
//! plus daemon/instance identifiers. The bridge only needs two calls:
//! instance status for the chat status command, and command execution for
//! operator-triggered console commands. This is glue around an external
//! collaborator, not part of the bridge core.

use std::time::Duration;

use reqwest::Client;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use mcbridge_core::config::ServerApiConfig;

/// Errors from the management API.
#[derive(Debug, Error)]
pub enum ServerApiError {
    /// The HTTP request failed.
    #[error("Server API request failed: {0}")]
    Request(String),

    /// The API answered with an error status.
    #[error("Server API returned HTTP {0}")]
    Status(u16),

    /// The response did not have the expected shape.
    #[error("Unexpected server API response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ServerApiError {
    fn from(err: reqwest::Error) -> Self {
        Self::Request(err.to_string())
    }
}

/// Client for one configured server instance.
#[derive(Debug, Clone)]
pub struct ServerApiClient {
    http: Client,
    base_url: String,
    api_key: String,
    daemon_id: String,
    instance_uuid: String,
}

impl ServerApiClient {
    /// Build a client from configuration; `None` when no base URL is set.
    #[must_use]
    pub fn from_config(config: &ServerApiConfig) -> Option<Self> {
        if config.base_url.is_empty() {
            return None;
        }
        Some(Self {
            http: Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            daemon_id: config.daemon_id.clone(),
            instance_uuid: config.instance_uuid.clone(),
        })
    }

    fn auth_params(&self) -> [(&'static str, &str); 3] {
        [
            ("apikey", self.api_key.as_str()),
            ("daemonId", self.daemon_id.as_str()),
            ("uuid", self.instance_uuid.as_str()),
        ]
    }

    /// Query the instance's run state, as a human-readable word.
    ///
    /// # Errors
    /// Returns [`ServerApiError`] on network failure, error status, or an
    /// unrecognised payload.
    pub async fn instance_status(&self) -> Result<String, ServerApiError> {
        let url = format!("{}/api/instance", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&self.auth_params())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServerApiError::Status(response.status().as_u16()));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| ServerApiError::Malformed(e.to_string()))?;
        let code = value["data"]["status"]
            .as_i64()
            .ok_or_else(|| ServerApiError::Malformed(format!("no data.status in {value}")))?;

        debug!(code, "Instance status");
        Ok(status_name(code).to_string())
    }

    /// Run a console command on the instance.
    ///
    /// # Errors
    /// Returns [`ServerApiError`] on network failure or error status.
    pub async fn execute_command(&self, command: &str) -> Result<(), ServerApiError> {
        let url = format!("{}/api/protected_instance/command", self.base_url);
        let response = self
            .http
            .get(&url)
            .query(&self.auth_params())
            .query(&[("command", command)])
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ServerApiError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

/// MCSManager instance status codes.
fn status_name(code: i64) -> &'static str {
    match code {
        -1 => "busy",
        0 => "stopped",
        1 => "stopping",
        2 => "starting",
        3 => "running",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_base_url_disables_the_client() {
        let config = ServerApiConfig::default();
        assert!(ServerApiClient::from_config(&config).is_none());
    }

    #[test]
    fn status_codes_have_names() {
        assert_eq!(status_name(3), "running");
        assert_eq!(status_name(0), "stopped");
        assert_eq!(status_name(42), "unknown");
    }
}
