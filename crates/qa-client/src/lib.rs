//! qa-client - Streaming query session client for the campus QA service.
//!
//! The crate is organized around one query turn: [`QueryController`] owns the
//! single in-flight slot and drives [`SessionManager`], the frame decoder in
//! [`stream`], and the external [`Renderer`]/[`AuthGateway`] collaborators.

pub mod api;
pub mod auth;
pub mod controller;
pub mod error;
pub mod models;
pub mod renderer;
pub mod session;
pub mod stream;

pub use api::QaService;
pub use auth::{AuthGateway, CredentialStore};
pub use controller::{
    CancelHandle, QueryController, SendOptions, TurnState, MANUAL_CANCEL_REASON,
    REQUEST_TIMEOUT, SWITCH_CANCEL_REASON, TIMEOUT_CANCEL_REASON,
};
pub use error::{QaError, Result};
pub use models::{
    HealthStatus, LoginResponse, MetaRecord, QueryRequest, QueryResponse, SessionSummary,
    SourceAttribution, StreamFrame,
};
pub use renderer::{RenderUnit, Renderer, Role};
pub use session::{SessionManager, EMPTY_TRANSCRIPT_NOTICE, NO_SESSION_NOTICE};
pub use stream::{frames_from_response, QaFrameStream, StreamDecoder, META_SENTINEL};
