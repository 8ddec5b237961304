//! Live progress lookup for running deliveries
//!
//! The coordinator locates the worker hosting a delivery through its last
//! status report and asks the delivery endpoint directly for `/api/progress`
//! and `/api/delivery-stats`. When no worker lists the delivery, or its
//! endpoint cannot be reached, the view is built from the central store.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::delivery::store::ParticipantResult;
use crate::models::ParticipantStatus;

use super::client::ClientError;
use super::registry::DeliveryLocation;

/// Per-request timeout when querying a delivery endpoint
pub const LIVE_QUERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Where a progress view came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressSource {
    ExamClient,
    Database,
}

/// Progress of one delivery as served by the coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveProgressView {
    pub delivery_id: i64,
    pub name: String,
    pub source: ProgressSource,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    pub participants: Value,
    pub stats: Value,
}

impl LiveProgressView {
    /// View over the stored final results of a delivery
    pub fn from_results(delivery_id: i64, name: impl Into<String>, results: &[ParticipantResult]) -> Self {
        let completed = results
            .iter()
            .filter(|r| r.status == ParticipantStatus::Completed)
            .count();
        let in_progress = results
            .iter()
            .filter(|r| r.status == ParticipantStatus::InProgress)
            .count();

        Self {
            delivery_id,
            name: name.into(),
            source: ProgressSource::Database,
            client_id: None,
            participants: serde_json::to_value(results).unwrap_or(Value::Array(Vec::new())),
            stats: json!({
                "total": results.len(),
                "completed": completed,
                "in_progress": in_progress,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EndpointEnvelope {
    success: bool,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for delivery endpoints
pub struct LiveProgressClient {
    http: reqwest::Client,
}

impl LiveProgressClient {
    pub fn new(timeout: Duration) -> Result<Self, ClientError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;
        Ok(Self { http })
    }

    /// Fetch participant progress and stats from a running endpoint
    ///
    /// Progress is required; stats are best effort and come back as `null`
    /// when the endpoint cannot produce them.
    pub async fn fetch(
        &self,
        delivery_id: i64,
        name: &str,
        location: &DeliveryLocation,
    ) -> Result<LiveProgressView, ClientError> {
        let base = location.base_url();
        let participants = self.get(&format!("{base}/api/progress")).await?;

        let stats = match self.get(&format!("{base}/api/delivery-stats")).await {
            Ok(stats) => stats,
            Err(e) => {
                tracing::debug!(delivery_id, error = %e, "Delivery stats unavailable");
                Value::Null
            }
        };

        Ok(LiveProgressView {
            delivery_id,
            name: name.to_string(),
            source: ProgressSource::ExamClient,
            client_id: Some(location.client_id.clone()),
            participants,
            stats,
        })
    }

    async fn get(&self, url: &str) -> Result<Value, ClientError> {
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::HttpError {
                status: response.status().as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let envelope: EndpointEnvelope = response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))?;
        if !envelope.success {
            return Err(ClientError::Rejected(envelope.error.unwrap_or_default()));
        }
        Ok(envelope.data)
    }
}
