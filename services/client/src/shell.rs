//! services/client/src/shell.rs
//!
//! A line-oriented terminal host for the onboarding screens.
//!
//! The shell renders whichever screen the router has selected, collects form
//! input, runs the flows, and shows each outcome's notice. Once a flow reports
//! success it stores the session and switches to the signed-in menu.

use elder_ally_core::domain::{Credentials, Profile, Registration, Role, RoleDetails};
use elder_ally_core::flows::{
    Authenticated, FlowError, Notice, ProfileUpdateFlow, RegistrationFlow, SignInFlow,
    SignOutFlow,
};
use elder_ally_core::ports::RemoteProfileService;
use elder_ally_core::router::{RouterEvent, Screen, ScreenRouter, Transition};
use elder_ally_core::session::SessionStore;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use crate::error::ClientError;

/// Typed at any form prompt to leave the form.
pub const BACK_COMMAND: &str = ":back";
/// Typed on the sign-in screen to switch to registration.
pub const NEW_ACCOUNT_COMMAND: &str = ":new";

const PASSWORD_LABEL: &str = "Password";
/// SGR conceal and reset.
const CONCEAL: &str = "\x1b[8m";
const REVEAL: &str = "\x1b[0m";

/// What a form screen produced.
enum FormOutcome {
    Back,
    NeedAccount,
    Completed(Authenticated),
    Quit,
}

pub struct Shell<R, W> {
    input: R,
    output: W,
    session: Arc<SessionStore>,
    registration: RegistrationFlow,
    sign_in: SignInFlow,
    profile_update: ProfileUpdateFlow,
    sign_out: SignOutFlow,
    conceal_secrets: bool,
}

impl<R, W> Shell<R, W>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(
        remote: Arc<dyn RemoteProfileService>,
        session: Arc<SessionStore>,
        input: R,
        output: W,
    ) -> Self {
        Self {
            input,
            output,
            registration: RegistrationFlow::new(remote.clone()),
            sign_in: SignInFlow::new(remote.clone()),
            profile_update: ProfileUpdateFlow::new(remote.clone(), session.clone()),
            sign_out: SignOutFlow::new(remote, session.clone()),
            session,
            conceal_secrets: false,
        }
    }

    /// Hides password input on terminals that honor the SGR conceal code.
    pub fn conceal_secrets(mut self, conceal: bool) -> Self {
        self.conceal_secrets = conceal;
        self
    }

    /// Restores a saved session or onboards, then serves the signed-in menu
    /// until the user quits or input ends.
    ///
    /// Storage is only read at startup; after a sign out the in-memory
    /// session decides, so a row that failed to delete cannot sign back in.
    pub async fn run(&mut self) -> Result<(), ClientError> {
        let mut signed_in = self.session.load().await;
        loop {
            let profile = match signed_in.take() {
                Some(profile) => profile,
                None => match self.onboard().await? {
                    Some(profile) => profile,
                    None => return Ok(()),
                },
            };

            if !self.home(profile).await? {
                return Ok(());
            }
            signed_in = self.session.current();
        }
    }

    /// Drives the onboarding screens until a flow succeeds (`Some`) or the
    /// user quits (`None`).
    pub async fn onboard(&mut self) -> Result<Option<Profile>, ClientError> {
        let mut router = ScreenRouter::new();

        loop {
            let event = match router.screen() {
                Screen::Welcome => {
                    self.say("\nWelcome to Elder Ally\n  1) Get started\n  q) Quit\n")
                        .await?;
                    match self.read_line().await?.as_deref() {
                        Some("1") => RouterEvent::GetStarted,
                        Some("q") | None => return Ok(None),
                        Some(_) => continue,
                    }
                }
                Screen::RoleSelection => {
                    self.say(
                        "\nWho is this account for?\n  1) I'm a patient\n  2) I'm a healthcare provider\n  3) I already have an account\n  b) Back\n",
                    )
                    .await?;
                    match self.read_line().await?.as_deref() {
                        Some("1") => RouterEvent::ChooseRole(Role::Patient),
                        Some("2") => RouterEvent::ChooseRole(Role::Provider),
                        Some("3") => RouterEvent::HaveAccount,
                        Some("b") => RouterEvent::Back,
                        None => return Ok(None),
                        Some(_) => continue,
                    }
                }
                Screen::Registration => {
                    let Some(role) = router.selected_role() else {
                        router.handle(RouterEvent::Back)?;
                        continue;
                    };
                    match self.registration_form(role).await? {
                        FormOutcome::Back | FormOutcome::NeedAccount => RouterEvent::Back,
                        FormOutcome::Completed(auth) => RouterEvent::Completed(auth),
                        FormOutcome::Quit => return Ok(None),
                    }
                }
                Screen::SignIn => match self.sign_in_form().await? {
                    FormOutcome::Back => RouterEvent::Back,
                    FormOutcome::NeedAccount => RouterEvent::NeedAccount,
                    FormOutcome::Completed(auth) => RouterEvent::Completed(auth),
                    FormOutcome::Quit => return Ok(None),
                },
            };

            match router.handle(event)? {
                Transition::Moved(_) => {}
                Transition::Exited(profile) => {
                    if let Err(e) = self.session.save(&profile).await {
                        warn!(error = %e, "Signed in but the session could not be persisted");
                    }
                    return Ok(Some(profile));
                }
            }
        }
    }

    async fn registration_form(&mut self, role: Role) -> Result<FormOutcome, ClientError> {
        loop {
            self.say(&format!(
                "\nCreate Account ({role})\nType {BACK_COMMAND} at any prompt to go back.\n"
            ))
            .await?;

            let mut labels = vec!["First Name", "Last Name", "Email", "Phone"];
            match role {
                Role::Patient => labels.extend(["Emergency Contact", "Emergency Phone"]),
                Role::Provider => labels.extend(["Clinic Name", "License Number (optional)"]),
            }
            labels.push(PASSWORD_LABEL);

            let mut values = Vec::with_capacity(labels.len());
            for label in labels {
                match self.prompt(label).await? {
                    Prompted::Value(value) => values.push(value),
                    Prompted::Back => return Ok(FormOutcome::Back),
                    Prompted::Eof => return Ok(FormOutcome::Quit),
                }
            }

            let mut values = values.into_iter();
            let mut next = || values.next().unwrap_or_default();
            let (first_name, last_name, email, phone) = (next(), next(), next(), next());
            let details = match role {
                Role::Patient => RoleDetails::Patient {
                    emergency_contact_name: next(),
                    emergency_contact_phone: next(),
                },
                Role::Provider => RoleDetails::Provider {
                    clinic_name: next(),
                    license_number: Some(next()).filter(|l| !l.trim().is_empty()),
                },
            };
            let registration = Registration {
                first_name,
                last_name,
                email,
                phone,
                password: next(),
                details,
            };

            if let Err(e) = RegistrationFlow::validate(&registration) {
                self.show(&FlowError::Validation(e).notice()).await?;
                continue;
            }

            match self.registration.register(registration).await {
                Ok(auth) => {
                    self.show(&auth.notice()).await?;
                    return Ok(FormOutcome::Completed(auth));
                }
                Err(e) => self.show(&e.notice()).await?,
            }
        }
    }

    async fn sign_in_form(&mut self) -> Result<FormOutcome, ClientError> {
        loop {
            self.say(&format!(
                "\nSign In\nType {BACK_COMMAND} to go back, or {NEW_ACCOUNT_COMMAND} to create an account.\n"
            ))
            .await?;

            let mut fields = Vec::with_capacity(2);
            for label in ["Email", PASSWORD_LABEL] {
                match self.prompt(label).await? {
                    Prompted::Value(value) if value == NEW_ACCOUNT_COMMAND => {
                        return Ok(FormOutcome::NeedAccount);
                    }
                    Prompted::Value(value) => fields.push(value),
                    Prompted::Back => return Ok(FormOutcome::Back),
                    Prompted::Eof => return Ok(FormOutcome::Quit),
                }
            }
            let password = fields.pop().unwrap_or_default();
            let email = fields.pop().unwrap_or_default();
            let credentials = Credentials::new(email, password);

            if let Err(e) = SignInFlow::validate(&credentials) {
                self.show(&FlowError::Validation(e).notice()).await?;
                continue;
            }

            match self.sign_in.sign_in(credentials).await {
                Ok(auth) => {
                    self.show(&auth.notice()).await?;
                    return Ok(FormOutcome::Completed(auth));
                }
                Err(e) => self.show(&e.notice()).await?,
            }
        }
    }

    /// The signed-in menu. Returns `false` when the user quits.
    async fn home(&mut self, profile: Profile) -> Result<bool, ClientError> {
        let mut profile = profile;
        loop {
            self.say(&format!(
                "\nSigned in as {} ({})\n  1) Update phone number\n  2) Sign out\n  q) Quit\n",
                profile.display_name(),
                profile.role()
            ))
            .await?;

            match self.read_line().await?.as_deref() {
                Some("1") => {
                    let phone = match self.prompt("New Phone").await? {
                        Prompted::Value(phone) => phone,
                        Prompted::Back => continue,
                        Prompted::Eof => return Ok(false),
                    };
                    let edited = Profile {
                        phone,
                        ..profile.clone()
                    };
                    match self.profile_update.update(edited).await {
                        Ok(updated) => {
                            self.show(&Notice::new("Saved", "Your profile has been updated."))
                                .await?;
                            profile = updated;
                        }
                        Err(e) => self.show(&e.notice()).await?,
                    }
                }
                Some("2") => {
                    if let Err(e) = self.sign_out.sign_out().await {
                        self.show(&e.notice()).await?;
                    }
                    info!(account_id = %profile.id, "Returned to onboarding after sign out");
                    return Ok(true);
                }
                Some("q") | None => return Ok(false),
                Some(_) => {}
            }
        }
    }

    /// Password prompts are concealed when enabled. Echo itself is left to
    /// the terminal, so one that ignores SGR 8 still shows the typed text.
    async fn prompt(&mut self, label: &str) -> Result<Prompted, ClientError> {
        let conceal = self.conceal_secrets && label == PASSWORD_LABEL;
        if conceal {
            self.say(&format!("{label}: {CONCEAL}")).await?;
        } else {
            self.say(&format!("{label}: ")).await?;
        }
        let line = self.read_line().await?;
        if conceal {
            self.say(REVEAL).await?;
        }

        Ok(match line {
            Some(line) if line == BACK_COMMAND => Prompted::Back,
            Some(line) => Prompted::Value(line),
            None => Prompted::Eof,
        })
    }

    /// Reads one trimmed line; `None` at end of input.
    async fn read_line(&mut self) -> Result<Option<String>, ClientError> {
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }

    async fn show(&mut self, notice: &Notice) -> Result<(), ClientError> {
        self.say(&format!("\n[{}]\n{}\n", notice.title, notice.message))
            .await
    }

    async fn say(&mut self, text: &str) -> Result<(), ClientError> {
        self.output.write_all(text.as_bytes()).await?;
        self.output.flush().await?;
        Ok(())
    }
}

enum Prompted {
    Value(String),
    Back,
    Eof,
}
