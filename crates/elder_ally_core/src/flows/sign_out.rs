//! crates/elder_ally_core/src/flows/sign_out.rs

use std::sync::Arc;
use tracing::{info, warn};

use super::{FlowError, InFlight};
use crate::ports::RemoteProfileService;
use crate::session::SessionStore;

/// Ends the remote session and always forgets the local one.
pub struct SignOutFlow {
    remote: Arc<dyn RemoteProfileService>,
    session: Arc<SessionStore>,
    in_flight: InFlight,
}

impl SignOutFlow {
    pub fn new(remote: Arc<dyn RemoteProfileService>, session: Arc<SessionStore>) -> Self {
        Self {
            remote,
            session,
            in_flight: InFlight::default(),
        }
    }

    /// A remote failure is still reported, but only after the local session
    /// has been cleared.
    pub async fn sign_out(&self) -> Result<(), FlowError> {
        let _guard = self.in_flight.try_begin()?;

        let remote_result = self.remote.sign_out().await;
        if let Err(e) = self.session.clear().await {
            warn!(error = %e, "Failed to clear persisted session");
        }

        match remote_result {
            Ok(()) => {
                info!("Signed out");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Remote sign out failed; local session cleared anyway");
                Err(FlowError::SignOutFailed(e))
            }
        }
    }
}
