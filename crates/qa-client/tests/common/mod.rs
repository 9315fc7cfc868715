#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;

use qa_client::{AuthGateway, RenderUnit, Renderer, Role};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Create { unit: u64, role: Role },
    Update { unit: u64, content: String },
    Error { unit: u64, message: String },
    Clear,
    Notice(String),
    Badge(String),
}

/// Renderer double recording every operation in order.
#[derive(Default)]
pub struct RecordingRenderer {
    next_id: AtomicU64,
    ops: Mutex<Vec<RenderOp>>,
}

impl RecordingRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ops(&self) -> Vec<RenderOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn units_with_role(&self, role: Role) -> Vec<u64> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Create { unit, role: r } if r == role => Some(unit),
                _ => None,
            })
            .collect()
    }

    /// Content updates applied to one unit, in order.
    pub fn updates(&self, unit: u64) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Update { unit: u, content } if u == unit => Some(content),
                _ => None,
            })
            .collect()
    }

    /// Last content shown for a unit, whether a normal update or an error.
    pub fn final_content(&self, unit: u64) -> Option<String> {
        self.ops()
            .into_iter()
            .rev()
            .find_map(|op| match op {
                RenderOp::Update { unit: u, content } if u == unit => Some(content),
                RenderOp::Error { unit: u, message } if u == unit => Some(message),
                _ => None,
            })
    }

    pub fn notices(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Notice(text) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn badges(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Badge(title) => Some(title),
                _ => None,
            })
            .collect()
    }
}

impl Renderer for RecordingRenderer {
    fn create_unit(&self, role: Role) -> RenderUnit {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.ops
            .lock()
            .unwrap()
            .push(RenderOp::Create { unit: id, role });
        RenderUnit::new(id)
    }

    fn update_unit(&self, unit: RenderUnit, content: &str) {
        self.ops.lock().unwrap().push(RenderOp::Update {
            unit: unit.id(),
            content: content.to_string(),
        });
    }

    fn error_unit(&self, unit: RenderUnit, message: &str) {
        self.ops.lock().unwrap().push(RenderOp::Error {
            unit: unit.id(),
            message: message.to_string(),
        });
    }

    fn clear_transcript(&self) {
        self.ops.lock().unwrap().push(RenderOp::Clear);
    }

    fn show_notice(&self, text: &str) {
        self.ops
            .lock()
            .unwrap()
            .push(RenderOp::Notice(text.to_string()));
    }

    fn set_session_badge(&self, title: &str) {
        self.ops
            .lock()
            .unwrap()
            .push(RenderOp::Badge(title.to_string()));
    }
}

/// In-memory auth double with observable signal counters.
pub struct TestAuth {
    token: Mutex<Option<String>>,
    must_change: AtomicBool,
    login_requests: AtomicUsize,
    password_change_requests: AtomicUsize,
}

impl TestAuth {
    pub fn with_token(token: &str) -> Self {
        Self {
            token: Mutex::new(Some(token.to_string())),
            must_change: AtomicBool::new(false),
            login_requests: AtomicUsize::new(0),
            password_change_requests: AtomicUsize::new(0),
        }
    }

    pub fn unauthenticated() -> Self {
        Self {
            token: Mutex::new(None),
            must_change: AtomicBool::new(false),
            login_requests: AtomicUsize::new(0),
            password_change_requests: AtomicUsize::new(0),
        }
    }

    pub fn login_requests(&self) -> usize {
        self.login_requests.load(Ordering::SeqCst)
    }

    pub fn password_change_requests(&self) -> usize {
        self.password_change_requests.load(Ordering::SeqCst)
    }
}

impl AuthGateway for TestAuth {
    fn credential(&self) -> Option<String> {
        self.token.lock().unwrap().clone()
    }

    fn store_credential(&self, token: &str, must_change_password: bool) {
        *self.token.lock().unwrap() = Some(token.to_string());
        self.must_change
            .store(must_change_password, Ordering::SeqCst);
    }

    fn clear_credential(&self) {
        *self.token.lock().unwrap() = None;
    }

    fn password_change_required(&self) -> bool {
        self.must_change.load(Ordering::SeqCst)
    }

    fn request_login(&self) {
        self.login_requests.fetch_add(1, Ordering::SeqCst);
    }

    fn request_password_change(&self) {
        self.must_change.store(true, Ordering::SeqCst);
        self.password_change_requests.fetch_add(1, Ordering::SeqCst);
    }
}
