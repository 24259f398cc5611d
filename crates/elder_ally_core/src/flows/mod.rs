//! crates/elder_ally_core/src/flows/mod.rs
//!
//! Validate-then-call-then-map units that sit between the screens and the
//! remote service. Every remote failure is converted into a [`FlowError`] at
//! this boundary, and every outcome has a displayable [`Notice`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::domain::{AccountId, Profile, RoleDetails};
use crate::ports::PortError;

pub mod profile_update;
pub mod registration;
pub mod sign_in;
pub mod sign_out;

pub use profile_update::ProfileUpdateFlow;
pub use registration::RegistrationFlow;
pub use sign_in::SignInFlow;
pub use sign_out::SignOutFlow;

/// Shortest password the registration form accepts.
pub const MIN_PASSWORD_LENGTH: usize = 6;

//=========================================================================================
// Errors
//=========================================================================================

/// A form field, named the way the screens label it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    FirstName,
    LastName,
    Email,
    Phone,
    Password,
    EmergencyContactName,
    EmergencyContactPhone,
    ClinicName,
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::FirstName => "First Name",
            Self::LastName => "Last Name",
            Self::Email => "Email",
            Self::Phone => "Phone",
            Self::Password => "Password",
            Self::EmergencyContactName => "Emergency Contact",
            Self::EmergencyContactPhone => "Emergency Phone",
            Self::ClinicName => "Clinic Name",
        };
        write!(f, "{label}")
    }
}

/// Local, pre-network rejection. Never reaches the remote service.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingField(Field),
    #[error("Password must be at least {min} characters")]
    PasswordTooShort { min: usize },
    #[error("The account role cannot be changed")]
    RoleChanged,
    #[error("The profile belongs to a different account")]
    IdentityChanged,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FlowError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("A request is already in progress")]
    AttemptInProgress,
    #[error("Failed to create user account: {0}")]
    AccountCreationFailed(PortError),
    /// The account exists remotely but its profile row was not written.
    #[error("Failed to create user profile: {source}")]
    ProfileCreationFailed {
        account_id: AccountId,
        source: PortError,
    },
    #[error("Failed to sign in: {0}")]
    SignInFailed(PortError),
    #[error("Profile not found")]
    ProfileNotFound(AccountId),
    #[error("Nobody is signed in")]
    NotSignedIn,
    #[error("Failed to update profile: {0}")]
    ProfileUpdateFailed(PortError),
    #[error("Failed to sign out: {0}")]
    SignOutFailed(PortError),
}

impl FlowError {
    /// Both an auth failure and a missing profile read as "couldn't sign in".
    pub fn is_sign_in_failure(&self) -> bool {
        matches!(self, Self::SignInFailed(_) | Self::ProfileNotFound(_))
    }

    pub fn is_registration_failure(&self) -> bool {
        matches!(
            self,
            Self::AccountCreationFailed(_) | Self::ProfileCreationFailed { .. }
        )
    }

    /// The alert shown to the user for this failure.
    pub fn notice(&self) -> Notice {
        match self {
            Self::Validation(e) => Notice::new("Missing Information", e.to_string()),
            Self::AttemptInProgress => Notice::new(
                "Please Wait",
                "Your previous request is still being processed.",
            ),
            Self::AccountCreationFailed(_) | Self::ProfileCreationFailed { .. } => Notice::new(
                "Registration Failed",
                format!(
                    "There was an error creating your account. Please try again.\n\nError: {self}"
                ),
            ),
            Self::SignInFailed(_) | Self::ProfileNotFound(_) => Notice::new(
                "Sign In Failed",
                format!("We couldn't sign you in. Please try again.\n\nError: {self}"),
            ),
            Self::ProfileUpdateFailed(_) | Self::NotSignedIn => {
                Notice::new("Update Failed", self.to_string())
            }
            Self::SignOutFailed(_) => Notice::new("Sign Out Failed", self.to_string()),
        }
    }
}

//=========================================================================================
// Outcomes
//=========================================================================================

/// Which flow produced an [`Authenticated`] result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Registration,
    SignIn,
}

/// Proof that a flow completed successfully for `profile`.
///
/// Only flows construct this, so holding one means a remote round trip
/// actually succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authenticated {
    profile: Profile,
    origin: Origin,
}

impl Authenticated {
    pub(crate) fn new(profile: Profile, origin: Origin) -> Self {
        Self { profile, origin }
    }

    pub fn profile(&self) -> &Profile {
        &self.profile
    }

    pub fn origin(&self) -> Origin {
        self.origin
    }

    pub fn into_profile(self) -> Profile {
        self.profile
    }

    pub fn notice(&self) -> Notice {
        match self.origin {
            Origin::Registration => Notice::new(
                "Welcome!",
                "Your account has been created successfully.",
            ),
            Origin::SignIn => Notice::new("Welcome Back!", "You have successfully signed in"),
        }
    }
}

/// A user-facing alert. Presentation only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
        }
    }
}

//=========================================================================================
// Shared helpers
//=========================================================================================

/// Allows at most one attempt per flow instance at a time.
#[derive(Debug, Default)]
pub(crate) struct InFlight(AtomicBool);

impl InFlight {
    pub(crate) fn try_begin(&self) -> Result<InFlightGuard<'_>, FlowError> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| InFlightGuard(&self.0))
            .map_err(|_| FlowError::AttemptInProgress)
    }

    pub(crate) fn is_active(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the slot when the attempt finishes, including on cancellation.
pub(crate) struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub(crate) fn require(field: Field, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::MissingField(field));
    }
    Ok(())
}

pub(crate) fn validate_details(details: &RoleDetails) -> Result<(), ValidationError> {
    match details {
        RoleDetails::Patient {
            emergency_contact_name,
            emergency_contact_phone,
        } => {
            require(Field::EmergencyContactName, emergency_contact_name)?;
            require(Field::EmergencyContactPhone, emergency_contact_phone)
        }
        RoleDetails::Provider { clinic_name, .. } => require(Field::ClinicName, clinic_name),
    }
}

pub(crate) fn validate_contact(profile: &Profile) -> Result<(), ValidationError> {
    require(Field::FirstName, &profile.first_name)?;
    require(Field::LastName, &profile.last_name)?;
    require(Field::Email, &profile.email)?;
    require(Field::Phone, &profile.phone)?;
    validate_details(&profile.details)
}
