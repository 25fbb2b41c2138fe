//! Patient store adapter.
//!
//! The persistent store is an external collaborator; [`PatientStore`] is its
//! contract. Operations are atomic at single-record granularity and no
//! multi-record transactions are assumed. [`InMemoryPatientStore`] backs the
//! server binary and the tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use patreg_types::NonEmptyText;
use uuid::Uuid;

use crate::dni;
use crate::error::StoreError;
use crate::patient::{Patient, PatientPatch};

/// Fields the store can be queried by.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatientField {
    Dni,
    City,
    UserId,
}

/// Contract of the patient store collaborator.
#[async_trait]
pub trait PatientStore: Send + Sync {
    /// Persists a new record. Fails on a DNI uniqueness violation.
    async fn create(&self, patient: Patient) -> Result<Patient, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Patient>, StoreError>;

    async fn find_by_field(
        &self,
        field: PatientField,
        value: &str,
    ) -> Result<Vec<Patient>, StoreError>;

    /// Applies a whitelist patch, re-validating every present field with the
    /// same rules used at creation. Returns `None` when the record is absent.
    async fn update_by_id(
        &self,
        id: Uuid,
        patch: PatientPatch,
    ) -> Result<Option<Patient>, StoreError>;

    /// Records the identity issued by the auth service during registration.
    async fn set_user_id(&self, id: Uuid, user_id: &str) -> Result<Option<Patient>, StoreError>;

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Patient>, StoreError>;

    async fn list(&self) -> Result<Vec<Patient>, StoreError>;
}

/// Mutex-guarded map store used by the binary and the test suite.
#[derive(Default)]
pub struct InMemoryPatientStore {
    records: Mutex<HashMap<Uuid, Patient>>,
}

impl InMemoryPatientStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, Patient>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Validates a patch and applies it to a record, bumping `updated_at`.
///
/// Lives outside the store so any adapter implementation re-validates patched
/// fields identically.
pub fn apply_patch(patient: &mut Patient, patch: PatientPatch) -> Result<(), StoreError> {
    if let Some(name) = patch.name {
        let name = NonEmptyText::new(&name).map_err(|_| StoreError::InvalidField("name"))?;
        patient.name = name.into_inner();
    }
    if let Some(surname) = patch.surname {
        let surname =
            NonEmptyText::new(&surname).map_err(|_| StoreError::InvalidField("surname"))?;
        patient.surname = surname.into_inner();
    }
    if let Some(birthdate) = patch.birthdate {
        patient.birthdate = birthdate
            .parse()
            .map_err(|_| StoreError::InvalidField("birthdate"))?;
    }
    if let Some(new_dni) = patch.dni {
        if !dni::validate(&new_dni) {
            return Err(StoreError::InvalidField("dni"));
        }
        patient.dni = new_dni;
    }
    if let Some(city) = patch.city {
        let city = NonEmptyText::new(&city).map_err(|_| StoreError::InvalidField("city"))?;
        patient.city = city.into_inner();
    }
    patient.updated_at = Utc::now();
    Ok(())
}

#[async_trait]
impl PatientStore for InMemoryPatientStore {
    async fn create(&self, patient: Patient) -> Result<Patient, StoreError> {
        let mut records = self.lock();
        if records.values().any(|p| p.dni == patient.dni) {
            return Err(StoreError::DuplicateDni(patient.dni));
        }
        records.insert(patient.id, patient.clone());
        Ok(patient)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Patient>, StoreError> {
        Ok(self.lock().get(&id).cloned())
    }

    async fn find_by_field(
        &self,
        field: PatientField,
        value: &str,
    ) -> Result<Vec<Patient>, StoreError> {
        let records = self.lock();
        let matches = records
            .values()
            .filter(|p| match field {
                PatientField::Dni => p.dni == value,
                PatientField::City => p.city == value,
                PatientField::UserId => p.user_id.as_deref() == Some(value),
            })
            .cloned()
            .collect();
        Ok(matches)
    }

    async fn update_by_id(
        &self,
        id: Uuid,
        patch: PatientPatch,
    ) -> Result<Option<Patient>, StoreError> {
        let mut records = self.lock();

        if let Some(new_dni) = patch.dni.as_deref() {
            let taken = records.values().any(|p| p.id != id && p.dni == new_dni);
            if taken {
                return Err(StoreError::DuplicateDni(new_dni.to_owned()));
            }
        }

        let Some(patient) = records.get(&id) else {
            return Ok(None);
        };

        // Patch a copy first so a rejected field leaves the record untouched.
        let mut patched = patient.clone();
        apply_patch(&mut patched, patch)?;
        records.insert(id, patched.clone());
        Ok(Some(patched))
    }

    async fn set_user_id(&self, id: Uuid, user_id: &str) -> Result<Option<Patient>, StoreError> {
        let mut records = self.lock();
        let Some(patient) = records.get_mut(&id) else {
            return Ok(None);
        };
        patient.user_id = Some(user_id.to_owned());
        patient.updated_at = Utc::now();
        Ok(Some(patient.clone()))
    }

    async fn delete_by_id(&self, id: Uuid) -> Result<Option<Patient>, StoreError> {
        Ok(self.lock().remove(&id))
    }

    async fn list(&self) -> Result<Vec<Patient>, StoreError> {
        Ok(self.lock().values().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn patient(dni: &str, city: &str) -> Patient {
        Patient::new(
            NonEmptyText::new("John").unwrap(),
            NonEmptyText::new("Doe").unwrap(),
            NaiveDate::from_ymd_opt(1990, 1, 1).unwrap(),
            dni.into(),
            NonEmptyText::new(city).unwrap(),
        )
    }

    #[tokio::test]
    async fn create_rejects_duplicate_dni() {
        let store = InMemoryPatientStore::new();
        store.create(patient("78106136E", "Madrid")).await.unwrap();

        let err = store
            .create(patient("78106136E", "Sevilla"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDni(d) if d == "78106136E"));
        assert_eq!(store.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn find_by_field_matches_dni_and_city() {
        let store = InMemoryPatientStore::new();
        store.create(patient("78106136E", "Madrid")).await.unwrap();
        store.create(patient("12345678Z", "Madrid")).await.unwrap();

        let by_dni = store
            .find_by_field(PatientField::Dni, "78106136E")
            .await
            .unwrap();
        assert_eq!(by_dni.len(), 1);

        let by_city = store
            .find_by_field(PatientField::City, "Madrid")
            .await
            .unwrap();
        assert_eq!(by_city.len(), 2);
    }

    #[tokio::test]
    async fn update_patches_only_present_fields() {
        let store = InMemoryPatientStore::new();
        let created = store.create(patient("78106136E", "Madrid")).await.unwrap();

        let patch = PatientPatch {
            city: Some("Sevilla".into()),
            ..Default::default()
        };
        let updated = store.update_by_id(created.id, patch).await.unwrap().unwrap();

        assert_eq!(updated.city, "Sevilla");
        assert_eq!(updated.name, "John");
        assert_eq!(updated.dni, "78106136E");
        assert!(updated.updated_at >= created.updated_at);
    }

    #[tokio::test]
    async fn update_revalidates_patched_dni() {
        let store = InMemoryPatientStore::new();
        let created = store.create(patient("78106136E", "Madrid")).await.unwrap();

        let patch = PatientPatch {
            dni: Some("78106136A".into()),
            ..Default::default()
        };
        let err = store.update_by_id(created.id, patch).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidField("dni")));

        // Record untouched after the rejected patch.
        let stored = store.find_by_id(created.id).await.unwrap().unwrap();
        assert_eq!(stored.dni, "78106136E");
    }

    #[tokio::test]
    async fn update_rejects_dni_already_taken_by_another_record() {
        let store = InMemoryPatientStore::new();
        store.create(patient("78106136E", "Madrid")).await.unwrap();
        let second = store.create(patient("12345678Z", "Madrid")).await.unwrap();

        let patch = PatientPatch {
            dni: Some("78106136E".into()),
            ..Default::default()
        };
        let err = store.update_by_id(second.id, patch).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateDni(_)));
    }

    #[tokio::test]
    async fn update_of_absent_record_returns_none() {
        let store = InMemoryPatientStore::new();
        let result = store
            .update_by_id(Uuid::new_v4(), PatientPatch::default())
            .await
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn delete_returns_the_removed_record_once() {
        let store = InMemoryPatientStore::new();
        let created = store.create(patient("78106136E", "Madrid")).await.unwrap();

        let removed = store.delete_by_id(created.id).await.unwrap();
        assert_eq!(removed.map(|p| p.id), Some(created.id));
        assert!(store.delete_by_id(created.id).await.unwrap().is_none());
        assert!(store.find_by_id(created.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_user_id_completes_the_record() {
        let store = InMemoryPatientStore::new();
        let created = store.create(patient("78106136E", "Madrid")).await.unwrap();

        let updated = store
            .set_user_id(created.id, "user-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.user_id.as_deref(), Some("user-1"));

        let by_user = store
            .find_by_field(PatientField::UserId, "user-1")
            .await
            .unwrap();
        assert_eq!(by_user.len(), 1);
    }
}
