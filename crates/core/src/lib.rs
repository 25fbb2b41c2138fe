//! # Patient Registration Core
//!
//! Core business logic for the patient-registration service:
//! - DNI checksum validation
//! - the patient store adapter contract and in-memory implementation
//! - clients for the auth and clinical-history services
//! - a circuit breaker per dependent service
//! - the registration saga with reverse-order compensation
//!
//! **No API concerns**: HTTP routing, status mapping and OpenAPI belong to the
//! server binary.

pub mod breaker;
pub mod config;
pub mod dni;
pub mod downstream;
pub mod error;
pub mod patient;
pub mod saga;
pub mod store;

pub use breaker::{BreakerConfig, BreakerError, CircuitBreaker, CircuitState};
pub use config::CoreConfig;
pub use downstream::{
    Dependency, HistoryService, HttpHistoryClient, HttpIdentityClient, IdentityService,
    ServiceError,
};
pub use error::{RegistrationError, RegistrationResult, StoreError};
pub use patient::{Patient, PatientPatch, RegistrationRequest};
pub use saga::{CompensationOutcome, CompensationStep, RegistrationSaga, SagaContext};
pub use store::{InMemoryPatientStore, PatientField, PatientStore};
