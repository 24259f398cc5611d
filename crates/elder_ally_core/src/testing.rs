//! Test doubles shared by the unit tests in this crate.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use uuid::Uuid;

use crate::domain::{AccountId, Credentials, Profile, Registration, RoleDetails};
use crate::ports::{LocalStorage, PortError, PortResult, RemoteProfileService};

pub fn patient_registration() -> Registration {
    Registration {
        first_name: "Jane".to_string(),
        last_name: "Doe".to_string(),
        email: "jane@x.com".to_string(),
        phone: "555-0001".to_string(),
        password: "secret1".to_string(),
        details: RoleDetails::Patient {
            emergency_contact_name: "John Doe".to_string(),
            emergency_contact_phone: "555-0002".to_string(),
        },
    }
}

pub fn provider_registration() -> Registration {
    Registration {
        first_name: "Ana".to_string(),
        last_name: "Lima".to_string(),
        email: "ana@clinic.org".to_string(),
        phone: "555-0100".to_string(),
        password: "hunter22".to_string(),
        details: RoleDetails::Provider {
            clinic_name: "Oak Street Clinic".to_string(),
            license_number: Some("MD-1234".to_string()),
        },
    }
}

pub fn patient_profile() -> Profile {
    patient_registration().into_profile(AccountId(Uuid::new_v4()))
}

//=========================================================================================
// In-memory LocalStorage
//=========================================================================================

#[derive(Default)]
pub struct MemoryStorage {
    entries: Mutex<HashMap<String, String>>,
    failure: Mutex<Option<PortError>>,
}

impl MemoryStorage {
    /// Every subsequent call fails with `error`.
    pub fn fail_with(&self, error: PortError) {
        *self.failure.lock().unwrap() = Some(error);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    fn check(&self) -> PortResult<()> {
        match self.failure.lock().unwrap().clone() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl LocalStorage for MemoryStorage {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        self.check()?;
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> PortResult<()> {
        self.check()?;
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        self.check()?;
        self.entries.lock().unwrap().remove(key);
        Ok(())
    }
}

//=========================================================================================
// Recording RemoteProfileService
//=========================================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCall {
    CreateAccount { email: String, password: String },
    Authenticate { email: String, password: String },
    CreateProfile(Profile),
    FetchProfile(AccountId),
    UpdateProfile(Profile),
    SignOut,
    Ping,
}

/// A scripted backend that records every call in order.
pub struct FakeRemote {
    pub account_id: AccountId,
    calls: Mutex<Vec<RemoteCall>>,
    profiles: Mutex<HashMap<AccountId, Profile>>,
    failures: Mutex<HashMap<&'static str, PortError>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl Default for FakeRemote {
    fn default() -> Self {
        Self {
            account_id: AccountId(Uuid::new_v4()),
            calls: Mutex::new(Vec::new()),
            profiles: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashMap::new()),
            gate: Mutex::new(None),
        }
    }
}

impl FakeRemote {
    pub fn calls(&self) -> Vec<RemoteCall> {
        self.calls.lock().unwrap().clone()
    }

    /// Makes the named operation fail with `error`.
    pub fn fail(&self, operation: &'static str, error: PortError) {
        self.failures.lock().unwrap().insert(operation, error);
    }

    pub fn insert_profile(&self, profile: Profile) {
        self.profiles.lock().unwrap().insert(profile.id, profile);
    }

    /// Holds `create_account`/`authenticate` until the returned handle is notified.
    pub fn hold_auth(&self) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        *self.gate.lock().unwrap() = Some(notify.clone());
        notify
    }

    fn record(&self, call: RemoteCall, operation: &'static str) -> PortResult<()> {
        self.calls.lock().unwrap().push(call);
        match self.failures.lock().unwrap().get(operation) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    async fn wait_at_gate(&self) {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
    }
}

#[async_trait]
impl RemoteProfileService for FakeRemote {
    async fn create_account(&self, credentials: &Credentials) -> PortResult<AccountId> {
        self.record(
            RemoteCall::CreateAccount {
                email: credentials.email.clone(),
                password: credentials.password.clone(),
            },
            "create_account",
        )?;
        self.wait_at_gate().await;
        Ok(self.account_id)
    }

    async fn authenticate(&self, credentials: &Credentials) -> PortResult<AccountId> {
        self.record(
            RemoteCall::Authenticate {
                email: credentials.email.clone(),
                password: credentials.password.clone(),
            },
            "authenticate",
        )?;
        self.wait_at_gate().await;
        Ok(self.account_id)
    }

    async fn sign_out(&self) -> PortResult<()> {
        self.record(RemoteCall::SignOut, "sign_out")
    }

    async fn create_profile(&self, profile: &Profile) -> PortResult<()> {
        self.record(RemoteCall::CreateProfile(profile.clone()), "create_profile")?;
        self.insert_profile(profile.clone());
        Ok(())
    }

    async fn fetch_profile(&self, id: AccountId) -> PortResult<Option<Profile>> {
        self.record(RemoteCall::FetchProfile(id), "fetch_profile")?;
        Ok(self.profiles.lock().unwrap().get(&id).cloned())
    }

    async fn update_profile(&self, profile: &Profile) -> PortResult<()> {
        self.record(RemoteCall::UpdateProfile(profile.clone()), "update_profile")?;
        self.insert_profile(profile.clone());
        Ok(())
    }

    async fn ping(&self) -> PortResult<()> {
        self.record(RemoteCall::Ping, "ping")
    }
}
