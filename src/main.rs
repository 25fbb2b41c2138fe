use std::sync::Arc;

use axum::{
    Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post, put},
};
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::{OpenApi, ToSchema};
use utoipa_swagger_ui::SwaggerUi;
use uuid::Uuid;

use patreg_core::config::breaker_config_from_env_values;
use patreg_core::{
    CircuitBreaker, CoreConfig, Dependency, InMemoryPatientStore, Patient, PatientPatch,
    PatientStore, RegistrationError, RegistrationRequest, RegistrationSaga, StoreError, downstream,
};

/// Application state shared across REST API handlers.
///
/// The saga owns the downstream clients and breakers; the store is also held
/// directly for the plain CRUD endpoints.
#[derive(Clone)]
struct AppState {
    store: Arc<dyn PatientStore>,
    saga: Arc<RegistrationSaga>,
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health,
        register_patient,
        list_patients,
        get_patient,
        update_patient,
        delete_patient
    ),
    components(schemas(
        Patient,
        RegistrationRequest,
        PatientPatch,
        ErrorBody,
        HealthRes
    ))
)]
struct ApiDoc;

#[derive(Serialize, ToSchema)]
struct HealthRes {
    status: String,
}

/// Error body every failing endpoint returns.
#[derive(Serialize, ToSchema)]
struct ErrorBody {
    message: String,
}

/// An HTTP-mapped failure.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found() -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: "Patient not found".to_owned(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ErrorBody {
                message: self.message,
            }),
        )
            .into_response()
    }
}

impl From<RegistrationError> for ApiError {
    fn from(err: RegistrationError) -> Self {
        let status = match &err {
            RegistrationError::MissingFields(_)
            | RegistrationError::InvalidDni(_)
            | RegistrationError::DuplicateDni(_)
            | RegistrationError::InvalidField(_)
            | RegistrationError::DownstreamClient { .. } => StatusCode::BAD_REQUEST,
            RegistrationError::BreakerOpen { .. }
            | RegistrationError::DownstreamUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            RegistrationError::Store(_) | RegistrationError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        // 5xx bodies stay generic except for naming the offending service on
        // 503; internals and compensation detail never reach the caller.
        let message = match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                "An unexpected error occurred".to_owned()
            }
            _ => err.to_string(),
        };
        Self { status, message }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateDni(_) | StoreError::InvalidField(_) => Self {
                status: StatusCode::BAD_REQUEST,
                message: err.to_string(),
            },
            StoreError::Unavailable(_) => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: "An unexpected error occurred".to_owned(),
            },
        }
    }
}

/// Pulls the session token to forward downstream.
///
/// The `token` cookie wins; a bearer `Authorization` header is the fallback.
/// Verifying the token is the gateway's job, not ours.
fn extract_token(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == "token" && !value.is_empty() {
                    return Some(value.to_owned());
                }
            }
        }
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/patients", post(register_patient))
        .route("/patients", get(list_patients))
        .route("/patients/:id", get(get_patient))
        .route("/patients/:id", put(update_patient))
        .route("/patients/:id", delete(delete_patient))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Main entry point for the patient-registration service.
///
/// # Environment Variables
/// - `PATREG_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `AUTH_SVC_URL`: base URL of the auth service
/// - `HISTORY_SVC_URL`: base URL of the clinical-history service
/// - `BREAKER_WINDOW_SIZE`, `BREAKER_FAILURE_RATE`, `BREAKER_COOLDOWN_SECS`,
///   `BREAKER_CALL_TIMEOUT_MS`: circuit-breaker tuning (optional)
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("patreg=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let addr = std::env::var("PATREG_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let auth_url =
        std::env::var("AUTH_SVC_URL").unwrap_or_else(|_| "http://localhost:3001".into());
    let history_url =
        std::env::var("HISTORY_SVC_URL").unwrap_or_else(|_| "http://localhost:3002".into());

    let breaker = breaker_config_from_env_values(
        std::env::var("BREAKER_WINDOW_SIZE").ok(),
        std::env::var("BREAKER_FAILURE_RATE").ok(),
        std::env::var("BREAKER_COOLDOWN_SECS").ok(),
        std::env::var("BREAKER_CALL_TIMEOUT_MS").ok(),
    )?;
    let config = CoreConfig::new(auth_url, history_url, breaker)?;

    let (identity, history) = downstream::http_clients(&config);
    let store: Arc<dyn PatientStore> = Arc::new(InMemoryPatientStore::new());
    let saga = Arc::new(RegistrationSaga::new(
        store.clone(),
        Arc::new(identity),
        Arc::new(history),
        Arc::new(CircuitBreaker::new(
            Dependency::Auth,
            config.breaker().clone(),
        )),
        Arc::new(CircuitBreaker::new(
            Dependency::ClinicHistory,
            config.breaker().clone(),
        )),
    ));

    tracing::info!("++ Starting patient registration REST on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app(AppState { store, saga })).await?;

    Ok(())
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Health check response", body = HealthRes)
    )
)]
async fn health() -> Json<HealthRes> {
    Json(HealthRes {
        status: "ok".to_owned(),
    })
}

#[utoipa::path(
    post,
    path = "/patients",
    request_body = RegistrationRequest,
    responses(
        (status = 201, description = "Patient registered", body = Patient),
        (status = 400, description = "Missing fields, invalid or duplicate DNI, or downstream rejection", body = ErrorBody),
        (status = 503, description = "Dependent service unavailable or circuit open", body = ErrorBody),
        (status = 500, description = "Unexpected error", body = ErrorBody)
    )
)]
/// Register a new patient.
///
/// Runs the full registration saga: local record, identity in the auth
/// service, clinical history. The session token from the `token` cookie (or
/// bearer header) is forwarded to both downstream calls.
async fn register_patient(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<RegistrationRequest>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let token = extract_token(&headers).unwrap_or_default();
    let patient = state.saga.register(body, &token).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

#[utoipa::path(
    get,
    path = "/patients",
    responses(
        (status = 200, description = "All patients", body = [Patient]),
        (status = 500, description = "Unexpected error", body = ErrorBody)
    )
)]
async fn list_patients(State(state): State<AppState>) -> Result<Json<Vec<Patient>>, ApiError> {
    let patients = state.store.list().await?;
    Ok(Json(patients))
}

#[utoipa::path(
    get,
    path = "/patients/{id}",
    params(("id" = Uuid, Path, description = "Patient id")),
    responses(
        (status = 200, description = "Patient found", body = Patient),
        (status = 404, description = "Patient not found", body = ErrorBody)
    )
)]
async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Patient>, ApiError> {
    match state.store.find_by_id(id).await? {
        Some(patient) => Ok(Json(patient)),
        None => Err(ApiError::not_found()),
    }
}

#[utoipa::path(
    put,
    path = "/patients/{id}",
    params(("id" = Uuid, Path, description = "Patient id")),
    request_body = PatientPatch,
    responses(
        (status = 200, description = "Patient updated", body = Patient),
        (status = 400, description = "Invalid field in patch", body = ErrorBody),
        (status = 404, description = "Patient not found", body = ErrorBody)
    )
)]
/// Partially update a patient.
///
/// Only name, surname, birthdate, dni and city are patchable; every present
/// field is re-validated with the rules used at creation.
async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<PatientPatch>,
) -> Result<Json<Patient>, ApiError> {
    match state.store.update_by_id(id, patch).await? {
        Some(patient) => {
            tracing::info!(patient_id = %patient.id, "patient updated");
            Ok(Json(patient))
        }
        None => Err(ApiError::not_found()),
    }
}

#[utoipa::path(
    delete,
    path = "/patients/{id}",
    params(("id" = Uuid, Path, description = "Patient id")),
    responses(
        (status = 204, description = "Patient deleted"),
        (status = 404, description = "Patient not found", body = ErrorBody)
    )
)]
async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    match state.store.delete_by_id(id).await? {
        Some(patient) => {
            tracing::info!(patient_id = %patient.id, "patient deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found()),
    }
}
