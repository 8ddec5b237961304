//! Coordinator client for exam-client workers
//!
//! This module provides the HTTP client a worker uses to register, report
//! status, poll for assignments, push events and submit final results.
//! Every call is a single attempt bounded by the configured timeout; callers
//! decide whether to retry.

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

use crate::models::{Assignment, ClientEvent, ExportBundle};

use super::registry::{AckResponse, RegisterRequest, RegisterResponse, StatusReport};

/// Path prefix of the worker protocol
pub const CLIENT_API_PREFIX: &str = "/api/internal/exam-clients";

// ============================================================================
// Client Configuration
// ============================================================================

/// Configuration for the coordinator client
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Coordinator server URL
    pub coordinator_url: String,

    /// Identity this worker registered under
    pub client_id: String,

    /// Per-request timeout
    pub timeout: Duration,
}

impl ClientConfig {
    pub fn new(coordinator_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        Self {
            coordinator_url: coordinator_url.into().trim_end_matches('/').to_string(),
            client_id: client_id.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

// ============================================================================
// Coordinator Client
// ============================================================================

/// Client for communicating with the coordinator server
pub struct CoordinatorClient {
    config: ClientConfig,
    http_client: Client,
}

impl CoordinatorClient {
    /// Create a new coordinator client
    pub fn new(config: ClientConfig) -> Result<Self, ClientError> {
        let http_client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ClientError::InitError(e.to_string()))?;

        Ok(Self {
            config,
            http_client,
        })
    }

    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    pub fn coordinator_url(&self) -> &str {
        &self.config.coordinator_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}{}", self.config.coordinator_url, CLIENT_API_PREFIX, path)
    }

    /// Register this worker
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        let response = self
            .http_client
            .post(self.url("/register"))
            .json(request)
            .send()
            .await?;
        Self::parse(response).await
    }

    /// Send a status report; `success: false` means the coordinator no longer knows us
    pub async fn report_status(&self, report: &StatusReport) -> Result<AckResponse, ClientError> {
        let url = self.url(&format!("/{}/status", self.config.client_id));
        let response = self.http_client.post(url).json(report).send().await?;

        if response.status() == StatusCode::NOT_FOUND {
            let ack = response
                .json::<AckResponse>()
                .await
                .unwrap_or_else(|_| AckResponse::failed("Client not found"));
            return Ok(ack);
        }

        Self::parse(response).await
    }

    /// Ask for the next assignment; `None` when nothing is pending or we are at capacity
    pub async fn poll_assignment(&self) -> Result<Option<Assignment>, ClientError> {
        let url = self.url(&format!("/{}/assignments", self.config.client_id));
        let response = self.http_client.get(url).send().await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(Self::http_error(response).await);
        }

        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let assignment = serde_json::from_slice::<Option<Assignment>>(&body)
            .map_err(|e| ClientError::ParseError(e.to_string()))?;
        Ok(assignment)
    }

    /// Remove this worker from the registry
    pub async fn unregister(&self) -> Result<AckResponse, ClientError> {
        let url = self.url(&format!("/{}", self.config.client_id));
        let response = self.http_client.delete(url).send().await?;
        Self::parse(response).await
    }

    /// Push one delivery event
    pub async fn push_event(&self, event: &ClientEvent) -> Result<AckResponse, ClientError> {
        self.post_json(&self.url("/event"), event).await
    }

    /// Submit the final export of a completed delivery
    pub async fn submit_final_results(&self, bundle: &ExportBundle) -> Result<AckResponse, ClientError> {
        let url = self.url(&format!("/{}/final-results", self.config.client_id));
        let ack: AckResponse = self.post_json(&url, bundle).await?;

        if !ack.success {
            return Err(ClientError::Rejected(ack.message));
        }
        Ok(ack)
    }

    // Internal: POST a JSON body and parse a JSON reply
    async fn post_json<T: Serialize, R: DeserializeOwned>(&self, url: &str, body: &T) -> Result<R, ClientError> {
        let response = self.http_client.post(url).json(body).send().await?;
        Self::parse(response).await
    }

    async fn parse<R: DeserializeOwned>(response: reqwest::Response) -> Result<R, ClientError> {
        if !response.status().is_success() {
            return Err(Self::http_error(response).await);
        }
        response
            .json::<R>()
            .await
            .map_err(|e| ClientError::ParseError(e.to_string()))
    }

    async fn http_error(response: reqwest::Response) -> ClientError {
        ClientError::HttpError {
            status: response.status().as_u16(),
            message: response.text().await.unwrap_or_default(),
        }
    }
}

// ============================================================================
// Client Errors
// ============================================================================

/// Client errors
#[derive(Debug, Clone, Error)]
pub enum ClientError {
    #[error("Initialization error: {0}")]
    InitError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("HTTP error ({status}): {message}")]
    HttpError { status: u16, message: String },

    #[error("Parse error: {0}")]
    ParseError(String),

    /// Coordinator answered but refused the request
    #[error("Rejected by coordinator: {0}")]
    Rejected(String),
}

impl ClientError {
    /// Worth trying again on the next tick
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::NetworkError(_) => true,
            Self::HttpError { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(e: reqwest::Error) -> Self {
        Self::NetworkError(e.to_string())
    }
}

// ============================================================================
// Tests
// ============================================================================
