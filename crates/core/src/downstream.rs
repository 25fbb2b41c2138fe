//! Clients for the dependent services the registration saga talks to.
//!
//! Each client wraps one outbound call and normalizes its failures into a typed
//! [`ServiceError`] carrying the service name and a failure class. Clients do
//! not retry; retry and short-circuit policy belong to the circuit breaker and
//! the saga.

use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use crate::patient::Credentials;

/// The dependent services this process calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    Auth,
    ClinicHistory,
}

impl std::fmt::Display for Dependency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dependency::Auth => write!(f, "auth-service"),
            Dependency::ClinicHistory => write!(f, "clinic-history-service"),
        }
    }
}

/// A normalized downstream failure.
///
/// `Client` covers 4xx responses (caller-attributable, not worth retrying);
/// `Unavailable` covers 5xx responses, timeouts and connection failures.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{service} rejected the request (status {status})")]
    Client { service: Dependency, status: u16 },
    #[error("{service} is unavailable: {reason}")]
    Unavailable { service: Dependency, reason: String },
}

impl ServiceError {
    pub fn service(&self) -> Dependency {
        match self {
            ServiceError::Client { service, .. } => *service,
            ServiceError::Unavailable { service, .. } => *service,
        }
    }
}

/// Client for the auth service that issues user identities.
#[async_trait]
pub trait IdentityService: Send + Sync {
    /// Creates an identity for a freshly persisted patient and returns its id.
    async fn create_identity(
        &self,
        credentials: &Credentials,
        patient_id: Uuid,
        token: &str,
    ) -> Result<String, ServiceError>;

    /// Compensating call: removes a previously created identity.
    ///
    /// Best-effort; the saga logs a failure here but never lets it mask the
    /// error that triggered the rollback.
    async fn delete_identity(&self, identity_id: &str, token: &str) -> Result<(), ServiceError>;
}

/// Client for the clinical-history service.
#[async_trait]
pub trait HistoryService: Send + Sync {
    /// Opens a clinical history referencing the patient and returns its id.
    async fn create_history(&self, patient_id: Uuid, token: &str)
        -> Result<String, ServiceError>;
}

fn classify_status(service: Dependency, status: reqwest::StatusCode) -> ServiceError {
    if status.is_client_error() {
        ServiceError::Client {
            service,
            status: status.as_u16(),
        }
    } else {
        ServiceError::Unavailable {
            service,
            reason: format!("responded with status {}", status.as_u16()),
        }
    }
}

fn transport_error(service: Dependency, err: reqwest::Error) -> ServiceError {
    let reason = if err.is_timeout() {
        "request timed out".to_owned()
    } else if err.is_connect() {
        "connection failed".to_owned()
    } else {
        err.to_string()
    };
    ServiceError::Unavailable { service, reason }
}

fn ensure_success(
    service: Dependency,
    response: reqwest::Response,
) -> Result<reqwest::Response, ServiceError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(classify_status(service, status))
    }
}

/// Builds the two HTTP clients over one shared connection pool.
pub fn http_clients(config: &crate::CoreConfig) -> (HttpIdentityClient, HttpHistoryClient) {
    let http = reqwest::Client::new();
    (
        HttpIdentityClient::new(http.clone(), config.auth_base_url()),
        HttpHistoryClient::new(http, config.history_base_url()),
    )
}

/// HTTP client for the auth service.
#[derive(Clone)]
pub struct HttpIdentityClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpIdentityClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedIdentity {
    user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedHistory {
    history_id: String,
}

#[async_trait]
impl IdentityService for HttpIdentityClient {
    async fn create_identity(
        &self,
        credentials: &Credentials,
        patient_id: Uuid,
        token: &str,
    ) -> Result<String, ServiceError> {
        let service = Dependency::Auth;
        let response = self
            .http
            .post(format!("{}/users", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({
                "email": credentials.email,
                "password": credentials.password,
                "patientId": patient_id,
            }))
            .send()
            .await
            .map_err(|e| transport_error(service, e))?;

        let response = ensure_success(service, response)?;
        let created: CreatedIdentity = response.json().await.map_err(|e| {
            ServiceError::Unavailable {
                service,
                reason: format!("malformed response body: {e}"),
            }
        })?;
        Ok(created.user_id)
    }

    async fn delete_identity(&self, identity_id: &str, token: &str) -> Result<(), ServiceError> {
        let service = Dependency::Auth;
        let response = self
            .http
            .delete(format!("{}/users/{identity_id}", self.base_url))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| transport_error(service, e))?;

        ensure_success(service, response).map(|_| ())
    }
}

/// HTTP client for the clinical-history service.
#[derive(Clone)]
pub struct HttpHistoryClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpHistoryClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            http,
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl HistoryService for HttpHistoryClient {
    async fn create_history(
        &self,
        patient_id: Uuid,
        token: &str,
    ) -> Result<String, ServiceError> {
        let service = Dependency::ClinicHistory;
        let response = self
            .http
            .post(format!("{}/histories", self.base_url))
            .bearer_auth(token)
            .json(&serde_json::json!({ "patientId": patient_id }))
            .send()
            .await
            .map_err(|e| transport_error(service, e))?;

        let response = ensure_success(service, response)?;
        let created: CreatedHistory = response.json().await.map_err(|e| {
            ServiceError::Unavailable {
                service,
                reason: format!("malformed response body: {e}"),
            }
        })?;
        Ok(created.history_id)
    }
}
