pub mod domain;
pub mod flows;
pub mod ports;
pub mod router;
pub mod session;

#[cfg(test)]
mod testing;

pub use domain::{AccountId, Credentials, Profile, Registration, Role, RoleDetails};
pub use flows::{
    Authenticated, Field, FlowError, Notice, Origin, ProfileUpdateFlow, RegistrationFlow,
    SignInFlow, SignOutFlow, ValidationError,
};
pub use ports::{LocalStorage, PortError, PortResult, RemoteProfileService};
pub use router::{RouterError, RouterEvent, Screen, ScreenRouter, Transition};
pub use session::{SessionError, SessionStore};
