//! Credential handling for the QA client.
//!
//! The service issues an opaque bearer token at login; the client persists it
//! (plus the "initial password must be changed" flag) under the state
//! directory so a restarted client resumes its session. Front ends observe
//! the login / password-change signals after a turn settles.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use qa_core::paths;

/// External authentication collaborator as seen by the controller.
pub trait AuthGateway: Send + Sync {
    /// Current bearer token, if any.
    fn credential(&self) -> Option<String>;

    fn store_credential(&self, token: &str, must_change_password: bool);

    fn clear_credential(&self);

    fn password_change_required(&self) -> bool;

    /// Signal that the user must be routed to the login entry point.
    fn request_login(&self);

    /// Signal that the mandatory password-change flow must be surfaced.
    /// Implementations persist the flag so the next start also routes there.
    fn request_password_change(&self);
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredCredential {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    must_change_password: bool,
}

/// File-backed [`AuthGateway`] persisting to `credentials.json`.
pub struct CredentialStore {
    path: PathBuf,
    state: Mutex<StoredCredential>,
    login_requested: AtomicBool,
    password_change_requested: AtomicBool,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::at(paths::credentials_json_path())
    }

    /// Open a store at an explicit path (tests, alternate profiles).
    pub fn at(path: PathBuf) -> Self {
        let state = paths::load_json::<StoredCredential>(&path).unwrap_or_default();
        Self {
            path,
            state: Mutex::new(state),
            login_requested: AtomicBool::new(false),
            password_change_requested: AtomicBool::new(false),
        }
    }

    /// Mark a completed password change: drops the persisted flag.
    pub fn password_changed(&self) {
        let mut state = self.state.lock().unwrap();
        state.must_change_password = false;
        self.persist(&state);
    }

    /// Consume the pending "route to login" signal.
    pub fn take_login_requested(&self) -> bool {
        self.login_requested.swap(false, Ordering::SeqCst)
    }

    /// Consume the pending "open password change" signal.
    pub fn take_password_change_requested(&self) -> bool {
        self.password_change_requested.swap(false, Ordering::SeqCst)
    }

    fn persist(&self, state: &StoredCredential) {
        if let Err(err) = paths::save_json(&self.path, state) {
            log::warn!("failed to persist credentials: {err}");
        }
    }
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthGateway for CredentialStore {
    fn credential(&self) -> Option<String> {
        self.state.lock().unwrap().token.clone()
    }

    fn store_credential(&self, token: &str, must_change_password: bool) {
        let mut state = self.state.lock().unwrap();
        state.token = Some(token.to_string());
        state.must_change_password = must_change_password;
        self.persist(&state);
    }

    fn clear_credential(&self) {
        let mut state = self.state.lock().unwrap();
        state.token = None;
        self.persist(&state);
    }

    fn password_change_required(&self) -> bool {
        self.state.lock().unwrap().must_change_password
    }

    fn request_login(&self) {
        log::info!("credential rejected; routing to login");
        self.login_requested.store(true, Ordering::SeqCst);
    }

    fn request_password_change(&self) {
        log::info!("service requires a password change before queries");
        {
            let mut state = self.state.lock().unwrap();
            state.must_change_password = true;
            self.persist(&state);
        }
        self.password_change_requested.store(true, Ordering::SeqCst);
    }
}
