//! Registration saga.
//!
//! Creating one registered patient spans the local store and two remote
//! services, with no distributed transaction across them. Atomicity is
//! approximated by running the steps strictly in order and compensating in
//! reverse order of what committed when a later step fails: a half-finished
//! patient must never stay addressable.

use std::sync::Arc;

use uuid::Uuid;

use crate::breaker::CircuitBreaker;
use crate::downstream::{HistoryService, IdentityService};
use crate::error::{RegistrationError, RegistrationResult, StoreError};
use crate::patient::{Patient, RegistrationRequest, ValidRegistration};
use crate::store::{PatientField, PatientStore};

/// Which steps of one registration have committed.
///
/// Ephemeral, one per request; compensation reads it to know what to undo.
#[derive(Debug, Default)]
pub struct SagaContext {
    pub patient_id: Option<Uuid>,
    pub identity_id: Option<String>,
    pub history_id: Option<String>,
}

/// A compensating action the saga may have to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationStep {
    DeleteIdentity,
    DeleteLocalRecord,
}

impl std::fmt::Display for CompensationStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompensationStep::DeleteIdentity => write!(f, "delete-identity"),
            CompensationStep::DeleteLocalRecord => write!(f, "delete-local-record"),
        }
    }
}

/// Result of one compensating action.
///
/// Failures are logged and surfaced here for operators and tests; they never
/// replace the error that triggered the rollback.
#[derive(Debug)]
pub enum CompensationOutcome {
    Succeeded(CompensationStep),
    Failed {
        step: CompensationStep,
        detail: String,
    },
}

/// Orchestrates patient registration across the store and the two services.
///
/// Collaborators are injected once at process start; the breakers are the only
/// state shared across requests.
pub struct RegistrationSaga {
    store: Arc<dyn PatientStore>,
    auth: Arc<dyn IdentityService>,
    history: Arc<dyn HistoryService>,
    auth_breaker: Arc<CircuitBreaker>,
    history_breaker: Arc<CircuitBreaker>,
}

impl RegistrationSaga {
    pub fn new(
        store: Arc<dyn PatientStore>,
        auth: Arc<dyn IdentityService>,
        history: Arc<dyn HistoryService>,
        auth_breaker: Arc<CircuitBreaker>,
        history_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            store,
            auth,
            history,
            auth_breaker,
            history_breaker,
        }
    }

    /// Registers one patient.
    ///
    /// Steps, each gated on the previous one:
    /// 1. validate the request (no side effects on failure),
    /// 2. check DNI uniqueness in the store,
    /// 3. persist the local record without a `userId`,
    /// 4. create the identity through the auth breaker and store its id,
    /// 5. open the clinical history through the history breaker.
    ///
    /// Any failure after step 3 compensates in reverse order of what
    /// committed before the error is returned.
    pub async fn register(
        &self,
        request: RegistrationRequest,
        token: &str,
    ) -> RegistrationResult<Patient> {
        let valid = request.validate()?;

        let existing = self
            .store
            .find_by_field(PatientField::Dni, &valid.dni)
            .await?;
        if !existing.is_empty() {
            return Err(RegistrationError::DuplicateDni(valid.dni));
        }

        let mut ctx = SagaContext::default();
        match self.run(&valid, &mut ctx, token).await {
            Ok(patient) => {
                tracing::info!(patient_id = %patient.id, "patient registered");
                Ok(patient)
            }
            Err(err) => {
                tracing::error!(error = %err, "registration failed, compensating");
                for outcome in self.compensate(&ctx, token).await {
                    match outcome {
                        CompensationOutcome::Succeeded(step) => {
                            tracing::info!(%step, "compensation succeeded");
                        }
                        CompensationOutcome::Failed { step, detail } => {
                            tracing::error!(%step, %detail, "compensation failed");
                        }
                    }
                }
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        valid: &ValidRegistration,
        ctx: &mut SagaContext,
        token: &str,
    ) -> RegistrationResult<Patient> {
        let record = Patient::new(
            valid.name.clone(),
            valid.surname.clone(),
            valid.birthdate,
            valid.dni.clone(),
            valid.city.clone(),
        );
        let patient_id = record.id;
        self.store.create(record).await?;
        ctx.patient_id = Some(patient_id);

        let user_id = self
            .auth_breaker
            .call(|| {
                self.auth
                    .create_identity(&valid.credentials, patient_id, token)
            })
            .await?;
        ctx.identity_id = Some(user_id.clone());

        let patient = self
            .store
            .set_user_id(patient_id, &user_id)
            .await?
            .ok_or_else(|| {
                RegistrationError::Internal("patient record disappeared mid-registration".into())
            })?;

        let history_id = self
            .history_breaker
            .call(|| self.history.create_history(patient_id, token))
            .await?;
        ctx.history_id = Some(history_id);

        Ok(patient)
    }

    /// Undoes committed steps in reverse order.
    ///
    /// Each action is best-effort and idempotent: a record that is already
    /// gone counts as compensated. Failures are reported, never propagated.
    pub async fn compensate(&self, ctx: &SagaContext, token: &str) -> Vec<CompensationOutcome> {
        let mut outcomes = Vec::new();

        if let Some(identity_id) = &ctx.identity_id {
            outcomes.push(match self.auth.delete_identity(identity_id, token).await {
                Ok(()) => CompensationOutcome::Succeeded(CompensationStep::DeleteIdentity),
                Err(err) => CompensationOutcome::Failed {
                    step: CompensationStep::DeleteIdentity,
                    detail: err.to_string(),
                },
            });
        }

        if let Some(patient_id) = ctx.patient_id {
            outcomes.push(match self.store.delete_by_id(patient_id).await {
                Ok(_) => CompensationOutcome::Succeeded(CompensationStep::DeleteLocalRecord),
                Err(err) => CompensationOutcome::Failed {
                    step: CompensationStep::DeleteLocalRecord,
                    detail: err.to_string(),
                },
            });
        }

        outcomes
    }
}

impl From<StoreError> for RegistrationError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::DuplicateDni(dni) => RegistrationError::DuplicateDni(dni),
            StoreError::InvalidField(field) => RegistrationError::InvalidField(field),
            other => RegistrationError::Store(other),
        }
    }
}
