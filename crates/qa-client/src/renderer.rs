//! Renderer abstraction.
//!
//! The core drives the visible transcript exclusively through this trait so
//! it stays independent of any particular UI toolkit. A front end maps render
//! units onto whatever it draws with (terminal lines, DOM nodes, widgets).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Map a wire-format role string; anything unrecognized renders as the
    /// assistant side, matching how the service labels generated turns.
    pub fn from_wire(role: &str) -> Role {
        if role.eq_ignore_ascii_case("user") {
            Role::User
        } else {
            Role::Assistant
        }
    }
}

/// Opaque handle to one displayed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RenderUnit(u64);

impl RenderUnit {
    pub fn new(id: u64) -> Self {
        RenderUnit(id)
    }

    pub fn id(&self) -> u64 {
        self.0
    }
}

pub trait Renderer: Send + Sync {
    /// Append a new message slot to the transcript and return its handle.
    fn create_unit(&self, role: Role) -> RenderUnit;

    /// Replace the unit's content (streaming updates pass the accumulated
    /// text, not a delta).
    fn update_unit(&self, unit: RenderUnit, content: &str);

    /// Put the unit into its error presentation with the given message.
    fn error_unit(&self, unit: RenderUnit, message: &str);

    /// Drop every visible unit (session switch, transcript reset).
    fn clear_transcript(&self);

    /// Show a transient notice outside the transcript (placeholders, hints).
    fn show_notice(&self, text: &str);

    /// Update the active-session badge/title display.
    fn set_session_badge(&self, title: &str);
}
