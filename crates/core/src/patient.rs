//! Patient record and request/patch types.
//!
//! The JSON field names stay camelCase (`userId`, `createdAt`, `updatedAt`) to
//! preserve the wire contract existing consumers rely on.

use chrono::{DateTime, NaiveDate, Utc};
use patreg_types::NonEmptyText;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::dni;
use crate::error::RegistrationError;

/// A persisted patient record.
///
/// `user_id` is `None` only while a registration saga is in flight; a record is
/// complete once it references the identity created in the auth service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    pub id: Uuid,
    pub name: String,
    pub surname: String,
    pub birthdate: NaiveDate,
    pub dni: String,
    pub city: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Patient {
    /// Builds a new record with a fresh id and current timestamps.
    ///
    /// `user_id` starts out empty; the registration saga fills it in once the
    /// auth service has issued an identity.
    pub fn new(
        name: NonEmptyText,
        surname: NonEmptyText,
        birthdate: NaiveDate,
        dni: String,
        city: NonEmptyText,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into_inner(),
            surname: surname.into_inner(),
            birthdate,
            dni,
            city: city.into_inner(),
            user_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Credentials forwarded to the auth service when creating an identity.
///
/// `Debug` is implemented by hand so the password never reaches the logs.
#[derive(Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Raw registration request body.
///
/// All fields are optional at the deserialization boundary so the saga can
/// report exactly which required fields are missing before any side effect.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct RegistrationRequest {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub birthdate: Option<String>,
    pub dni: Option<String>,
    pub city: Option<String>,
    pub password: Option<String>,
    pub email: Option<String>,
}

/// A registration request with every field present and validated.
#[derive(Debug, Clone)]
pub struct ValidRegistration {
    pub name: NonEmptyText,
    pub surname: NonEmptyText,
    pub birthdate: NaiveDate,
    pub dni: String,
    pub city: NonEmptyText,
    pub credentials: Credentials,
}

impl RegistrationRequest {
    /// Checks presence of every required field, then validates each one.
    ///
    /// Presence is checked first so a request missing several fields gets the
    /// blanket missing-fields error rather than a complaint about one of them.
    pub fn validate(self) -> Result<ValidRegistration, RegistrationError> {
        let mut missing = Vec::new();

        fn require<'a>(
            field: &'a Option<String>,
            name: &'static str,
            missing: &mut Vec<&'static str>,
        ) -> &'a str {
            match field.as_deref().filter(|v| !v.trim().is_empty()) {
                Some(v) => v,
                None => {
                    missing.push(name);
                    ""
                }
            }
        }

        let name = require(&self.name, "name", &mut missing);
        let surname = require(&self.surname, "surname", &mut missing);
        let birthdate = require(&self.birthdate, "birthdate", &mut missing);
        let dni = require(&self.dni, "dni", &mut missing);
        let city = require(&self.city, "city", &mut missing);
        let password = require(&self.password, "password", &mut missing);
        let email = require(&self.email, "email", &mut missing);

        if !missing.is_empty() {
            return Err(RegistrationError::MissingFields(missing));
        }

        if !dni::validate(dni) {
            return Err(RegistrationError::InvalidDni(dni.to_owned()));
        }

        let birthdate = birthdate
            .parse::<NaiveDate>()
            .map_err(|_| RegistrationError::InvalidField("birthdate"))?;

        // Presence was checked above, so these cannot fail on emptiness.
        let name =
            NonEmptyText::new(name).map_err(|_| RegistrationError::InvalidField("name"))?;
        let surname =
            NonEmptyText::new(surname).map_err(|_| RegistrationError::InvalidField("surname"))?;
        let city =
            NonEmptyText::new(city).map_err(|_| RegistrationError::InvalidField("city"))?;

        Ok(ValidRegistration {
            name,
            surname,
            birthdate,
            dni: dni.to_owned(),
            city,
            credentials: Credentials {
                email: email.to_owned(),
                password: password.to_owned(),
            },
        })
    }
}

/// Whitelist of fields a `PUT /patients/:id` may change.
///
/// The store re-validates every present field with the same rules used at
/// creation; anything outside this set is not patchable.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct PatientPatch {
    pub name: Option<String>,
    pub surname: Option<String>,
    pub birthdate: Option<String>,
    pub dni: Option<String>,
    pub city: Option<String>,
}

impl PatientPatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.surname.is_none()
            && self.birthdate.is_none()
            && self.dni.is_none()
            && self.city.is_none()
    }
}
