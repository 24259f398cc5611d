//! crates/elder_ally_core/src/flows/sign_in.rs
//!
//! Authenticates an existing account and fetches its profile.

use std::sync::Arc;
use tracing::{info, warn};

use super::{require, Authenticated, Field, FlowError, InFlight, Origin, ValidationError};
use crate::domain::Credentials;
use crate::ports::RemoteProfileService;

pub struct SignInFlow {
    remote: Arc<dyn RemoteProfileService>,
    in_flight: InFlight,
}

impl SignInFlow {
    pub fn new(remote: Arc<dyn RemoteProfileService>) -> Self {
        Self {
            remote,
            in_flight: InFlight::default(),
        }
    }

    pub fn validate(credentials: &Credentials) -> Result<(), ValidationError> {
        require(Field::Email, &credentials.email)?;
        require(Field::Password, &credentials.password)
    }

    pub fn can_submit(&self, credentials: &Credentials) -> bool {
        !self.in_flight.is_active() && Self::validate(credentials).is_ok()
    }

    pub fn is_pending(&self) -> bool {
        self.in_flight.is_active()
    }

    /// The caller is responsible for saving the returned profile to the
    /// session store.
    pub async fn sign_in(&self, credentials: Credentials) -> Result<Authenticated, FlowError> {
        Self::validate(&credentials)?;
        let _guard = self.in_flight.try_begin()?;

        let credentials = Credentials::new(credentials.email.trim(), credentials.password);
        info!(email = %credentials.email, "Signing in");

        let account_id = self
            .remote
            .authenticate(&credentials)
            .await
            .map_err(|e| {
                warn!(email = %credentials.email, error = %e, "Authentication failed");
                FlowError::SignInFailed(e)
            })?;

        let profile = self
            .remote
            .fetch_profile(account_id)
            .await
            .map_err(|e| {
                warn!(%account_id, error = %e, "Failed to fetch profile");
                FlowError::SignInFailed(e)
            })?
            .ok_or_else(|| {
                warn!(%account_id, "Authenticated account has no profile");
                FlowError::ProfileNotFound(account_id)
            })?;

        info!(%account_id, role = %profile.role(), "Signed in");
        Ok(Authenticated::new(profile, Origin::SignIn))
    }
}
