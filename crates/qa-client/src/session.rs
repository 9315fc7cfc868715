//! Session management.
//!
//! Owns the active session id and the cached summary list, and renders
//! transcript history through the [`Renderer`]. The active id is persisted
//! under the state directory so a restarted client picks up where it left
//! off. Cancellation ordering for switches is enforced one level up by the
//! request lifecycle controller, which owns the in-flight slot.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use qa_core::paths;

use crate::api::QaService;
use crate::auth::AuthGateway;
use crate::error::{QaError, Result};
use crate::models::{SessionCreateResponse, SessionSummary};
use crate::renderer::{Renderer, Role};

/// Placeholder when no session exists yet - distinct from an empty one.
pub const NO_SESSION_NOTICE: &str = "尚未创建会话，发送问题即可开始";
/// Placeholder for a session whose transcript is empty.
pub const EMPTY_TRANSCRIPT_NOTICE: &str = "当前会话暂无历史消息";

#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default)]
    session_id: Option<String>,
}

pub struct SessionManager {
    service: Arc<QaService>,
    auth: Arc<dyn AuthGateway>,
    renderer: Arc<dyn Renderer>,
    active: Option<String>,
    summaries: Vec<SessionSummary>,
    state_path: PathBuf,
}

impl SessionManager {
    pub fn new(
        service: Arc<QaService>,
        auth: Arc<dyn AuthGateway>,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self::with_state_path(service, auth, renderer, paths::last_session_json_path())
    }

    /// Construct against an explicit state file (tests, alternate profiles).
    pub fn with_state_path(
        service: Arc<QaService>,
        auth: Arc<dyn AuthGateway>,
        renderer: Arc<dyn Renderer>,
        state_path: PathBuf,
    ) -> Self {
        let active = paths::load_json::<PersistedSession>(&state_path)
            .ok()
            .and_then(|state| state.session_id);
        if let Some(id) = &active {
            log::debug!("restored last session {id}");
        }
        Self {
            service,
            auth,
            renderer,
            active,
            summaries: Vec::new(),
            state_path,
        }
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_deref()
    }

    pub fn summaries(&self) -> &[SessionSummary] {
        &self.summaries
    }

    /// Return a usable session id, creating one when needed. `Ok(None)`
    /// means no credential is available and the caller must route to login.
    pub async fn ensure_session(&mut self, force_new: bool) -> Result<Option<String>> {
        if !force_new {
            if let Some(id) = &self.active {
                return Ok(Some(id.clone()));
            }
        }
        let Some(token) = self.auth.credential() else {
            return Ok(None);
        };
        let created = self.service.create_session(&token, None).await?;
        self.activate(created.session_id.clone());
        Ok(Some(created.session_id))
    }

    /// Create a session, make it active and persist the id. With
    /// `clear_transcript` the visible transcript is reset to the
    /// empty-session placeholder.
    pub async fn create_session(
        &mut self,
        title: Option<&str>,
        clear_transcript: bool,
    ) -> Result<SessionCreateResponse> {
        let token = self.token()?;
        let created = self.service.create_session(&token, title).await?;
        log::info!("created session {}", created.session_id);
        self.activate(created.session_id.clone());
        self.renderer.set_session_badge(&created.title);
        if clear_transcript {
            self.renderer.clear_transcript();
            self.renderer.show_notice(EMPTY_TRANSCRIPT_NOTICE);
        }
        Ok(created)
    }

    /// Reassign the active session id. Callers holding an in-flight request
    /// must cancel it first; see the controller's switch operation.
    pub fn set_active(&mut self, session_id: &str) {
        if self.active.as_deref() == Some(session_id) {
            return;
        }
        self.activate(session_id.to_string());
    }

    /// Fetch and render the active session's transcript.
    pub async fn load_history(&mut self) -> Result<()> {
        let Some(session_id) = self.active.clone() else {
            self.renderer.clear_transcript();
            self.renderer.show_notice(NO_SESSION_NOTICE);
            return Ok(());
        };
        let token = self.token()?;
        let history = self.service.session_history(&token, &session_id).await?;

        self.renderer.clear_transcript();
        if let Some(title) = &history.title {
            self.renderer.set_session_badge(title);
        }
        if history.history.is_empty() {
            self.renderer.show_notice(EMPTY_TRANSCRIPT_NOTICE);
            return Ok(());
        }
        for message in &history.history {
            let unit = self.renderer.create_unit(Role::from_wire(&message.role));
            self.renderer.update_unit(unit, &message.content);
        }
        log::debug!(
            "loaded {} messages for session {session_id}",
            history.history.len()
        );
        Ok(())
    }

    pub async fn rename_session(&mut self, session_id: &str, title: &str) -> Result<SessionSummary> {
        let token = self.token()?;
        let summary = self.service.rename_session(&token, session_id, title).await?;
        if let Some(cached) = self
            .summaries
            .iter_mut()
            .find(|cached| cached.session_id == session_id)
        {
            *cached = summary.clone();
        }
        if self.active.as_deref() == Some(session_id) {
            self.renderer.set_session_badge(&summary.title);
        }
        Ok(summary)
    }

    /// Delete a session. Deleting the active one creates and loads a fresh
    /// session in its place.
    pub async fn delete_session(&mut self, session_id: &str) -> Result<()> {
        let token = self.token()?;
        self.service.delete_session(&token, session_id).await?;
        self.summaries.retain(|cached| cached.session_id != session_id);

        if self.active.as_deref() == Some(session_id) {
            log::info!("active session {session_id} deleted; starting a fresh one");
            self.active = None;
            self.persist_active();
            self.create_session(None, true).await?;
        }
        Ok(())
    }

    /// Reload the summary cache and refresh the badge of the active session.
    pub async fn refresh_sessions(&mut self) -> Result<&[SessionSummary]> {
        let token = self.token()?;
        self.summaries = self.service.list_sessions(&token).await?;
        if let Some(active) = &self.active {
            if let Some(summary) = self
                .summaries
                .iter()
                .find(|summary| &summary.session_id == active)
            {
                self.renderer.set_session_badge(&summary.title);
            }
        }
        Ok(&self.summaries)
    }

    fn token(&self) -> Result<String> {
        self.auth.credential().ok_or(QaError::AuthExpired)
    }

    fn activate(&mut self, session_id: String) {
        log::info!("session {session_id} is now active");
        self.active = Some(session_id);
        self.persist_active();
    }

    fn persist_active(&self) {
        let state = PersistedSession {
            session_id: self.active.clone(),
        };
        if let Err(err) = paths::save_json(&self.state_path, &state) {
            log::warn!("failed to persist active session id: {err}");
        }
    }
}
