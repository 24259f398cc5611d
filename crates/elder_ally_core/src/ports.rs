//! crates/elder_ally_core/src/ports.rs
//!
//! Defines the service contracts (traits) the onboarding core depends on.
//! These traits form the boundary of the hexagonal architecture, so the flows
//! never know whether they talk to the hosted backend, SQLite, or a test double.

use async_trait::async_trait;

use crate::domain::{AccountId, Credentials, Profile};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (HTTP, SQLite).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized: {0}")]
    Unauthorized(String),
    /// The service understood the request and refused it (duplicate email,
    /// weak password, constraint violation).
    #[error("{0}")]
    Rejected(String),
    #[error("Network error: {0}")]
    Network(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

/// Hosted authentication + single-table profile store.
#[async_trait]
pub trait RemoteProfileService: Send + Sync {
    // --- Auth ---
    async fn create_account(&self, credentials: &Credentials) -> PortResult<AccountId>;

    async fn authenticate(&self, credentials: &Credentials) -> PortResult<AccountId>;

    async fn sign_out(&self) -> PortResult<()>;

    // --- Profiles ---
    async fn create_profile(&self, profile: &Profile) -> PortResult<()>;

    /// Returns `Ok(None)` when no profile row exists for the account.
    async fn fetch_profile(&self, id: AccountId) -> PortResult<Option<Profile>>;

    /// Replaces the whole record keyed by `profile.id`.
    async fn update_profile(&self, profile: &Profile) -> PortResult<()>;

    /// Cheap round trip used to verify the backend is reachable.
    async fn ping(&self) -> PortResult<()>;
}

/// Durable key/value storage local to this device.
#[async_trait]
pub trait LocalStorage: Send + Sync {
    async fn get(&self, key: &str) -> PortResult<Option<String>>;

    async fn put(&self, key: &str, value: &str) -> PortResult<()>;

    async fn remove(&self, key: &str) -> PortResult<()>;
}
