//! crates/elder_ally_core/src/flows/registration.rs
//!
//! Creates a remote account and its role-tagged profile.

use std::sync::Arc;
use tracing::{info, warn};

use super::{require, validate_details, Authenticated, FlowError, InFlight, Origin};
use super::{Field, ValidationError, MIN_PASSWORD_LENGTH};
use crate::domain::Registration;
use crate::ports::RemoteProfileService;

pub struct RegistrationFlow {
    remote: Arc<dyn RemoteProfileService>,
    in_flight: InFlight,
}

impl RegistrationFlow {
    pub fn new(remote: Arc<dyn RemoteProfileService>) -> Self {
        Self {
            remote,
            in_flight: InFlight::default(),
        }
    }

    /// Checks every required field in form order, then the password length.
    pub fn validate(registration: &Registration) -> Result<(), ValidationError> {
        require(Field::FirstName, &registration.first_name)?;
        require(Field::LastName, &registration.last_name)?;
        require(Field::Email, &registration.email)?;
        require(Field::Phone, &registration.phone)?;
        validate_details(&registration.details)?;
        require(Field::Password, &registration.password)?;

        if registration.password.chars().count() < MIN_PASSWORD_LENGTH {
            return Err(ValidationError::PasswordTooShort {
                min: MIN_PASSWORD_LENGTH,
            });
        }
        Ok(())
    }

    /// Whether the submit action should be enabled.
    pub fn can_submit(&self, registration: &Registration) -> bool {
        !self.in_flight.is_active() && Self::validate(registration).is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.is_active()
    }

    /// Creates the account, then the profile keyed by the new account id.
    ///
    /// The caller is responsible for saving the returned profile to the
    /// session store.
    pub async fn register(&self, registration: Registration) -> Result<Authenticated, FlowError> {
        Self::validate(&registration)?;
        let _guard = self.in_flight.try_begin()?;

        let role = registration.role();
        info!(email = %registration.email.trim(), %role, "Starting registration");

        let account_id = self
            .remote
            .create_account(&registration.credentials())
            .await
            .map_err(|e| {
                warn!(error = %e, "Account creation failed");
                FlowError::AccountCreationFailed(e)
            })?;
        info!(%account_id, "Account created");

        let profile = registration.into_profile(account_id);
        if let Err(e) = self.remote.create_profile(&profile).await {
            // The remote account is left in place; there is no rollback.
            warn!(%account_id, error = %e, "Profile creation failed after account was created");
            return Err(FlowError::ProfileCreationFailed {
                account_id,
                source: e,
            });
        }

        info!(%account_id, %role, "Registration complete");
        Ok(Authenticated::new(profile, Origin::Registration))
    }
}
