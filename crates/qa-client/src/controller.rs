//! Request lifecycle controller.
//!
//! Owns the single in-flight-request slot, the cancellation token and the
//! timeout watchdog, and drives one query turn end to end:
//! `Idle → Sending → {Streaming | Awaiting} → terminal → Idle`. Session
//! switches cancel first and only touch session state after the in-flight
//! turn has settled, so content from an old stream can never land in the
//! new session's transcript.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::Mutex as TokioMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use qa_core::sanitize::scrub_citations;

use crate::api::QaService;
use crate::auth::AuthGateway;
use crate::error::{QaError, Result};
use crate::models::{MetaRecord, QueryRequest, SessionSummary, StreamFrame};
use crate::renderer::{RenderUnit, Renderer, Role};
use crate::session::SessionManager;

/// Fixed wall-clock limit for one turn; firing it cancels with a timeout reason.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

pub const MANUAL_CANCEL_REASON: &str = "已手动停止生成";
pub const TIMEOUT_CANCEL_REASON: &str = "请求超时，已自动取消";
pub const SWITCH_CANCEL_REASON: &str = "已切换会话，当前请求已取消";
const DEFAULT_CANCEL_REASON: &str = "请求已取消";
const GENERATING_PLACEHOLDER: &str = "正在生成回答…";
const EMPTY_ANSWER_NOTICE: &str = "（未返回内容）";
const AUTH_EXPIRED_NOTICE: &str = "登录已过期，请重新登录";
const PASSWORD_REQUIRED_NOTICE: &str = "需要先修改初始密码，完成后重试";

/// Terminal state of one query turn.
#[derive(Debug, Clone, PartialEq)]
pub enum TurnState {
    Completed,
    Cancelled { reason: String },
    AuthExpired,
    PasswordRequired,
    Failed { detail: String },
}

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub top_k: Option<u32>,
    pub max_tokens: Option<u32>,
    pub streaming: bool,
}

impl Default for SendOptions {
    fn default() -> Self {
        Self {
            top_k: None,
            max_tokens: None,
            streaming: true,
        }
    }
}

/// The one reservation representing a request in flight. Dropping it aborts
/// the timeout watchdog, so the timer is cleared on every exit path.
struct InFlight {
    cancel: CancellationToken,
    /// Fires once the turn has fully settled (terminal state rendered).
    settled: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
    watchdog: JoinHandle<()>,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.watchdog.abort();
    }
}

pub struct QueryController {
    service: Arc<QaService>,
    auth: Arc<dyn AuthGateway>,
    renderer: Arc<dyn Renderer>,
    sessions: Arc<TokioMutex<SessionManager>>,
    slot: Arc<Mutex<Option<InFlight>>>,
    turn: Option<JoinHandle<TurnState>>,
}

impl QueryController {
    pub fn new(
        service: Arc<QaService>,
        auth: Arc<dyn AuthGateway>,
        renderer: Arc<dyn Renderer>,
        sessions: SessionManager,
    ) -> Self {
        Self {
            service,
            auth,
            renderer,
            sessions: Arc::new(TokioMutex::new(sessions)),
            slot: Arc::new(Mutex::new(None)),
            turn: None,
        }
    }

    /// Shared handle to the session manager for read-mostly front-end use.
    pub fn sessions(&self) -> Arc<TokioMutex<SessionManager>> {
        self.sessions.clone()
    }

    pub fn is_busy(&self) -> bool {
        self.slot.lock().unwrap().is_some()
    }

    /// Begin one query turn. Rejects with [`QaError::RequestInFlight`] while
    /// the slot is occupied; the caller must cancel first.
    pub fn send_query(&mut self, query: &str, options: SendOptions) -> Result<()> {
        let (cancel, reason) = {
            let mut slot = self.slot.lock().unwrap();
            if slot.is_some() {
                return Err(QaError::RequestInFlight);
            }
            let cancel = CancellationToken::new();
            let settled = CancellationToken::new();
            let reason = Arc::new(Mutex::new(None));
            let watchdog = tokio::spawn(watchdog(cancel.clone(), reason.clone()));
            *slot = Some(InFlight {
                cancel: cancel.clone(),
                settled,
                reason: reason.clone(),
                watchdog,
            });
            (cancel, reason)
        };

        log::info!("turn start streaming={}", options.streaming);
        let task = run_turn(TurnContext {
            service: self.service.clone(),
            auth: self.auth.clone(),
            renderer: self.renderer.clone(),
            sessions: self.sessions.clone(),
            slot: self.slot.clone(),
            cancel,
            reason,
            query: query.to_string(),
            options,
        });
        self.turn = Some(tokio::spawn(task));
        Ok(())
    }

    /// Trigger cancellation of the in-flight request with a human-readable
    /// reason. Returns false when the slot is idle. The first reason set
    /// wins; later callers do not overwrite it.
    pub fn cancel(&self, reason: &str) -> bool {
        cancel_slot(&self.slot, reason)
    }

    /// Detached handle for cancelling from outside the controller borrow
    /// (e.g. a signal listener while the owner awaits the turn).
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            slot: self.slot.clone(),
        }
    }

    /// Await the terminal state of the most recently started turn.
    pub async fn wait_turn(&mut self) -> Option<TurnState> {
        let handle = self.turn.take()?;
        match handle.await {
            Ok(state) => Some(state),
            Err(err) => {
                log::warn!("turn task failed: {err}");
                None
            }
        }
    }

    /// Switch to another session. The active session only changes after any
    /// in-flight request has been cancelled and has settled.
    pub async fn switch_session(&mut self, session_id: &str) -> Result<()> {
        let already_active = {
            let sessions = self.sessions.lock().await;
            sessions.active_session() == Some(session_id)
        };
        if already_active {
            return self.sessions.lock().await.load_history().await;
        }

        self.cancel_and_settle(SWITCH_CANCEL_REASON).await;

        let mut sessions = self.sessions.lock().await;
        sessions.set_active(session_id);
        sessions.load_history().await
    }

    /// Start a fresh session (cancelling any in-flight request first) and
    /// reset the transcript.
    pub async fn create_session(&mut self, title: Option<&str>) -> Result<String> {
        self.cancel_and_settle(SWITCH_CANCEL_REASON).await;
        let created = self
            .sessions
            .lock()
            .await
            .create_session(title, true)
            .await?;
        Ok(created.session_id)
    }

    /// Delete a session; deleting the active one cancels any in-flight
    /// request before the replacement session is created.
    pub async fn delete_session(&mut self, session_id: &str) -> Result<()> {
        let deleting_active = {
            let sessions = self.sessions.lock().await;
            sessions.active_session() == Some(session_id)
        };
        if deleting_active {
            self.cancel_and_settle(SWITCH_CANCEL_REASON).await;
        }
        self.sessions.lock().await.delete_session(session_id).await
    }

    pub async fn rename_session(&mut self, session_id: &str, title: &str) -> Result<()> {
        self.sessions
            .lock()
            .await
            .rename_session(session_id, title)
            .await?;
        Ok(())
    }

    pub async fn refresh_sessions(&mut self) -> Result<Vec<SessionSummary>> {
        Ok(self
            .sessions
            .lock()
            .await
            .refresh_sessions()
            .await?
            .to_vec())
    }

    pub async fn load_history(&mut self) -> Result<()> {
        self.sessions.lock().await.load_history().await
    }

    async fn cancel_and_settle(&mut self, reason: &str) {
        let settled = {
            let slot = self.slot.lock().unwrap();
            slot.as_ref().map(|in_flight| in_flight.settled.clone())
        };
        let Some(settled) = settled else {
            return;
        };
        self.cancel(reason);
        settled.cancelled().await;
        // The task has settled; reap its handle so the next wait starts clean.
        if let Some(handle) = self.turn.take() {
            let _ = handle.await;
        }
    }
}

/// Cloneable cancellation access to the in-flight slot.
#[derive(Clone)]
pub struct CancelHandle {
    slot: Arc<Mutex<Option<InFlight>>>,
}

impl CancelHandle {
    pub fn cancel(&self, reason: &str) -> bool {
        cancel_slot(&self.slot, reason)
    }
}

fn cancel_slot(slot: &Mutex<Option<InFlight>>, reason: &str) -> bool {
    let slot = slot.lock().unwrap();
    let Some(in_flight) = slot.as_ref() else {
        return false;
    };
    {
        let mut pending = in_flight.reason.lock().unwrap();
        if pending.is_none() {
            *pending = Some(reason.to_string());
        }
    }
    log::info!("cancelling in-flight request: {reason}");
    in_flight.cancel.cancel();
    true
}

async fn watchdog(cancel: CancellationToken, reason: Arc<Mutex<Option<String>>>) {
    tokio::time::sleep(REQUEST_TIMEOUT).await;
    {
        let mut pending = reason.lock().unwrap();
        if pending.is_none() {
            *pending = Some(TIMEOUT_CANCEL_REASON.to_string());
        }
    }
    log::info!(
        "request exceeded {}s; cancelling",
        REQUEST_TIMEOUT.as_secs()
    );
    cancel.cancel();
}

struct TurnContext {
    service: Arc<QaService>,
    auth: Arc<dyn AuthGateway>,
    renderer: Arc<dyn Renderer>,
    sessions: Arc<TokioMutex<SessionManager>>,
    slot: Arc<Mutex<Option<InFlight>>>,
    cancel: CancellationToken,
    reason: Arc<Mutex<Option<String>>>,
    query: String,
    options: SendOptions,
}

/// Drive one turn to a terminal state. The slot is released on every path,
/// which also clears the timeout watchdog.
async fn run_turn(ctx: TurnContext) -> TurnState {
    let user_unit = ctx.renderer.create_unit(Role::User);
    ctx.renderer.update_unit(user_unit, &ctx.query);
    let answer_unit = ctx.renderer.create_unit(Role::Assistant);
    ctx.renderer.update_unit(answer_unit, GENERATING_PLACEHOLDER);

    let outcome = execute_turn(&ctx, answer_unit).await;

    let state = match outcome {
        Ok(()) => TurnState::Completed,
        Err(QaError::Cancelled) => {
            let reason = ctx
                .reason
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
            ctx.renderer.update_unit(answer_unit, &reason);
            TurnState::Cancelled { reason }
        }
        Err(QaError::AuthExpired) => {
            ctx.auth.clear_credential();
            ctx.auth.request_login();
            ctx.renderer.error_unit(answer_unit, AUTH_EXPIRED_NOTICE);
            TurnState::AuthExpired
        }
        Err(QaError::PasswordRequired) => {
            ctx.auth.request_password_change();
            ctx.renderer
                .error_unit(answer_unit, PASSWORD_REQUIRED_NOTICE);
            TurnState::PasswordRequired
        }
        Err(err) => {
            let detail = match err {
                QaError::Api(detail) => detail,
                other => other.to_string(),
            };
            ctx.renderer.error_unit(answer_unit, &detail);
            TurnState::Failed { detail }
        }
    };
    log::info!("turn settled: {state:?}");

    let released = ctx.slot.lock().unwrap().take();
    if let Some(in_flight) = released {
        in_flight.settled.cancel();
    }

    if state == TurnState::Completed {
        if let Err(err) = ctx.sessions.lock().await.refresh_sessions().await {
            log::warn!("session refresh after turn failed: {err}");
        }
    }
    state
}

async fn execute_turn(ctx: &TurnContext, answer_unit: RenderUnit) -> Result<()> {
    let session_id = {
        let mut sessions = ctx.sessions.lock().await;
        match sessions.ensure_session(false).await? {
            Some(id) => id,
            None => return Err(QaError::AuthExpired),
        }
    };
    let token = ctx.auth.credential().ok_or(QaError::AuthExpired)?;

    let request = QueryRequest {
        query: ctx.query.clone(),
        top_k: ctx.options.top_k,
        max_tokens: ctx.options.max_tokens,
        streaming: ctx.options.streaming,
        session_id: Some(session_id),
    };

    if ctx.options.streaming {
        stream_turn(ctx, answer_unit, &token, &request).await
    } else {
        await_turn(ctx, answer_unit, &token, &request).await
    }
}

/// Non-streaming path: one response, rendered once with its footer.
async fn await_turn(
    ctx: &TurnContext,
    answer_unit: RenderUnit,
    token: &str,
    request: &QueryRequest,
) -> Result<()> {
    let response = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(QaError::Cancelled),
        response = ctx.service.query(token, request) => response?,
    };
    if ctx.cancel.is_cancelled() {
        return Err(QaError::Cancelled);
    }

    let meta = MetaRecord {
        sources: response.sources,
        latency_ms: response.latency_ms,
        low_relevance: false,
        best_score: None,
    };
    ctx.renderer
        .update_unit(answer_unit, &compose_answer(&response.answer, Some(&meta)));
    Ok(())
}

/// Streaming path: frames are sanitized and forwarded incrementally; frames
/// resolved after cancellation are never rendered.
async fn stream_turn(
    ctx: &TurnContext,
    answer_unit: RenderUnit,
    token: &str,
    request: &QueryRequest,
) -> Result<()> {
    let mut frames = tokio::select! {
        biased;
        _ = ctx.cancel.cancelled() => return Err(QaError::Cancelled),
        frames = ctx.service.query_stream(token, request) => frames?,
    };

    let mut raw = String::new();
    let mut meta: Option<MetaRecord> = None;
    loop {
        let next = tokio::select! {
            biased;
            _ = ctx.cancel.cancelled() => return Err(QaError::Cancelled),
            frame = frames.next() => frame,
        };
        match next {
            Some(Ok(StreamFrame::Content(fragment))) => {
                raw.push_str(&fragment);
                ctx.renderer
                    .update_unit(answer_unit, &scrub_citations(&raw));
            }
            Some(Ok(StreamFrame::Meta(record))) => {
                meta = Some(record);
                break;
            }
            Some(Err(err)) => return Err(err),
            None => break,
        }
    }
    if ctx.cancel.is_cancelled() {
        return Err(QaError::Cancelled);
    }

    ctx.renderer
        .update_unit(answer_unit, &compose_answer(&raw, meta.as_ref()));
    Ok(())
}

fn compose_answer(raw: &str, meta: Option<&MetaRecord>) -> String {
    let mut text = scrub_citations(raw);
    if text.is_empty() {
        text = EMPTY_ANSWER_NOTICE.to_string();
    }
    if let Some(meta) = meta {
        let footer = format_footer(meta);
        if !footer.is_empty() {
            text.push_str("\n\n");
            text.push_str(&footer);
        }
    }
    text
}

fn format_footer(meta: &MetaRecord) -> String {
    let mut lines = Vec::new();
    if meta.low_relevance {
        lines.push("提示：知识库中未检索到高相关内容，回答仅供参考".to_string());
    }
    if !meta.sources.is_empty() {
        lines.push("参考资料：".to_string());
        for (index, source) in meta.sources.iter().enumerate() {
            lines.push(format!(
                "{}. {}（相关度 {:.2}）",
                index + 1,
                source.source,
                source.score
            ));
        }
    }
    if let Some(latency) = meta.latency_ms {
        lines.push(format!("耗时 {latency:.0} ms"));
    }
    lines.join("\n")
}
