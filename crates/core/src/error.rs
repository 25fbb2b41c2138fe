use crate::downstream::Dependency;

/// Errors raised by the patient store adapter.
///
/// The store is atomic at single-record granularity; these variants cover the
/// contract failures the orchestration layer has to distinguish.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("a patient with DNI {0} already exists")]
    DuplicateDni(String),
    #[error("Invalid {0} format")]
    InvalidField(&'static str),
    #[error("patient store unavailable: {0}")]
    Unavailable(String),
}

/// Failure taxonomy for patient registration.
///
/// Variants map one-to-one onto HTTP responses at the API layer:
/// user-input faults become 400, breaker-open and downstream outages become 503
/// with the offending service named, everything unexpected becomes a generic 500.
/// Compensation failures never appear here; they are logged and reported as
/// [`crate::saga::CompensationOutcome`] values.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("All fields are required.")]
    MissingFields(Vec<&'static str>),
    #[error("{0} is not a valid DNI number!")]
    InvalidDni(String),
    #[error("a patient with DNI {0} already exists")]
    DuplicateDni(String),
    #[error("Invalid {0} format")]
    InvalidField(&'static str),
    #[error(transparent)]
    Store(StoreError),
    #[error("{service} is unavailable (circuit open)")]
    BreakerOpen { service: Dependency },
    #[error("{service} rejected the request (status {status})")]
    DownstreamClient { service: Dependency, status: u16 },
    #[error("{service} is unavailable: {reason}")]
    DownstreamUnavailable { service: Dependency, reason: String },
    #[error("internal error: {0}")]
    Internal(String),
}

pub type RegistrationResult<T> = std::result::Result<T, RegistrationError>;
