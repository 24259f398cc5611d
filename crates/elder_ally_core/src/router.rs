//! crates/elder_ally_core/src/router.rs
//!
//! Selects which onboarding screen is active.
//!
//! Welcome → RoleSelection → Registration | SignIn, with back edges. A
//! successful flow raises the completion signal instead of moving to a new
//! screen; after that the host stops driving this router.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::domain::{Profile, Role};
use crate::flows::{Authenticated, Origin};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Screen {
    #[default]
    Welcome,
    RoleSelection,
    Registration,
    SignIn,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Welcome => "welcome",
            Self::RoleSelection => "role_selection",
            Self::Registration => "registration",
            Self::SignIn => "sign_in",
        };
        write!(f, "{s}")
    }
}

/// User actions (and flow results) the router reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouterEvent {
    /// "Get started" on the welcome screen.
    GetStarted,
    ChooseRole(Role),
    /// "Already have an account?"
    HaveAccount,
    /// "Create an account" from the sign-in screen.
    NeedAccount,
    Back,
    Completed(Authenticated),
}

impl RouterEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::GetStarted => "get_started",
            Self::ChooseRole(_) => "choose_role",
            Self::HaveAccount => "have_account",
            Self::NeedAccount => "need_account",
            Self::Back => "back",
            Self::Completed(_) => "completed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Moved(Screen),
    /// Onboarding is over; the host should show the authenticated shell.
    Exited(Profile),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    #[error("Cannot handle {event} on the {from} screen")]
    InvalidTransition { from: Screen, event: &'static str },
    #[error("Onboarding has already completed")]
    AlreadyExited,
}

type CompletionCallback = Box<dyn FnOnce(&Profile) + Send>;

pub struct ScreenRouter {
    screen: Screen,
    selected_role: Option<Role>,
    exited: bool,
    on_complete: Option<CompletionCallback>,
}

impl Default for ScreenRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl ScreenRouter {
    pub fn new() -> Self {
        Self {
            screen: Screen::default(),
            selected_role: None,
            exited: false,
            on_complete: None,
        }
    }

    /// Registers the callback invoked once when onboarding completes.
    pub fn with_on_complete(mut self, callback: impl FnOnce(&Profile) + Send + 'static) -> Self {
        self.on_complete = Some(Box::new(callback));
        self
    }

    pub fn screen(&self) -> Screen {
        self.screen
    }

    /// The role picked on the role-selection screen, if any.
    pub fn selected_role(&self) -> Option<Role> {
        self.selected_role
    }

    pub fn has_exited(&self) -> bool {
        self.exited
    }

    /// Applies `event`. Invalid events leave the router unchanged.
    pub fn handle(&mut self, event: RouterEvent) -> Result<Transition, RouterError> {
        use Screen::*;

        if self.exited {
            return Err(RouterError::AlreadyExited);
        }

        let next = match (self.screen, event) {
            (Welcome, RouterEvent::GetStarted) => RoleSelection,
            (RoleSelection, RouterEvent::ChooseRole(role)) => {
                self.selected_role = Some(role);
                Registration
            }
            (RoleSelection, RouterEvent::HaveAccount) => SignIn,
            (RoleSelection, RouterEvent::Back) => Welcome,
            (Registration, RouterEvent::Back) => RoleSelection,
            (SignIn, RouterEvent::Back) => Welcome,
            (SignIn, RouterEvent::NeedAccount) => RoleSelection,
            (Registration, RouterEvent::Completed(auth)) if auth.origin() == Origin::Registration => {
                return Ok(self.exit(auth));
            }
            (SignIn, RouterEvent::Completed(auth)) if auth.origin() == Origin::SignIn => {
                return Ok(self.exit(auth));
            }
            (from, event) => {
                return Err(RouterError::InvalidTransition {
                    from,
                    event: event.name(),
                })
            }
        };

        debug!(from = %self.screen, to = %next, "Screen transition");
        self.screen = next;
        Ok(Transition::Moved(next))
    }

    fn exit(&mut self, auth: Authenticated) -> Transition {
        self.exited = true;
        info!(account_id = %auth.profile().id, screen = %self.screen, "Onboarding complete");
        if let Some(callback) = self.on_complete.take() {
            callback(auth.profile());
        }
        Transition::Exited(auth.into_profile())
    }
}
