//! ---
//! anvil_section: "05-networking-external-interfaces"
//! anvil_subsection: "module"
//! anvil_type: "source"
//! anvil_scope: "code"
//! anvil_description: "Client for the central provisioning API."
//! anvil_version: "v0.1.0-alpha"
//! anvil_owner: "tbd"
//! ---
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum OverlordError {
    #[error("heartbeat transport failure: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("overlord rejected heartbeat with status {status}")]
    Rejected { status: u16 },
    #[error("malformed heartbeat response: {0}")]
    MalformedResponse(String),
}

/// Identity the agent reports on every heartbeat.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatPayload {
    pub mac_address: String,
    /// Advertise URL the overlord should call back on.
    pub url: String,
    pub version: String,
    pub mode: String,
}

/// Deadline grant returned by the overlord.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HeartbeatResponse {
    /// The agent must heartbeat again before this instant.
    pub heartbeat_before: DateTime<Utc>,
}

/// HTTP client for the central provisioning API.
#[derive(Debug, Clone)]
pub struct OverlordClient {
    http: reqwest::Client,
    base: String,
}

impl OverlordClient {
    /// `base` is the configured overlord URL, already validated by the
    /// configuration layer.
    pub fn new(base: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.trim_end_matches('/').to_owned(),
        }
    }

    fn heartbeat_url(&self, mac_address: &str) -> String {
        format!("{}/v1/agents/{}/heartbeat", self.base, mac_address)
    }

    /// Report liveness; on success the overlord grants the next deadline.
    pub async fn heartbeat(
        &self,
        payload: &HeartbeatPayload,
    ) -> Result<HeartbeatResponse, OverlordError> {
        let url = self.heartbeat_url(&payload.mac_address);
        debug!(%url, mode = %payload.mode, "sending heartbeat");
        let response = self.http.post(&url).json(payload).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(OverlordError::Rejected {
                status: status.as_u16(),
            });
        }
        response
            .json::<HeartbeatResponse>()
            .await
            .map_err(|err| OverlordError::MalformedResponse(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn heartbeat_url_embeds_identity() {
        let client = OverlordClient::new("http://overlord.deploy.local:8080/");
        assert_eq!(
            client.heartbeat_url("52:54:00:12:34:56"),
            "http://overlord.deploy.local:8080/v1/agents/52:54:00:12:34:56/heartbeat"
        );
    }
}
