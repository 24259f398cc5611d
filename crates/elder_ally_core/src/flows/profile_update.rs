//! crates/elder_ally_core/src/flows/profile_update.rs
//!
//! Replaces the signed-in user's profile at the remote service and refreshes
//! the local session with the result.

use std::sync::Arc;
use tracing::{info, warn};

use super::{validate_contact, FlowError, InFlight, ValidationError};
use crate::domain::Profile;
use crate::ports::RemoteProfileService;
use crate::session::SessionStore;

pub struct ProfileUpdateFlow {
    remote: Arc<dyn RemoteProfileService>,
    session: Arc<SessionStore>,
    in_flight: InFlight,
}

impl ProfileUpdateFlow {
    pub fn new(remote: Arc<dyn RemoteProfileService>, session: Arc<SessionStore>) -> Self {
        Self {
            remote,
            session,
            in_flight: InFlight::default(),
        }
    }

    pub fn validate(profile: &Profile) -> Result<(), ValidationError> {
        validate_contact(profile)
    }

    /// Sends the whole edited record. Identity, role and `created_at` are
    /// taken from the current session and cannot be changed here.
    pub async fn update(&self, edited: Profile) -> Result<Profile, FlowError> {
        Self::validate(&edited)?;
        let current = self.session.current().ok_or(FlowError::NotSignedIn)?;
        if edited.id != current.id {
            return Err(ValidationError::IdentityChanged.into());
        }
        if edited.role() != current.role() {
            return Err(ValidationError::RoleChanged.into());
        }
        let _guard = self.in_flight.try_begin()?;

        let profile = Profile {
            created_at: current.created_at,
            ..edited
        };
        self.remote.update_profile(&profile).await.map_err(|e| {
            warn!(account_id = %profile.id, error = %e, "Profile update failed");
            FlowError::ProfileUpdateFailed(e)
        })?;

        if let Err(e) = self.session.save(&profile).await {
            warn!(account_id = %profile.id, error = %e, "Profile updated remotely but local session was not refreshed");
        }
        info!(account_id = %profile.id, "Profile updated");
        Ok(profile)
    }
}
