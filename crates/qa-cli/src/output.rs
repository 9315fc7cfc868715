//! Terminal implementation of the [`Renderer`] contract.
//!
//! Streaming updates replace the unit's whole content, so the renderer keeps
//! what it already printed per unit and emits only the new suffix; a rewrite
//! that is not a pure extension (sanitizer shrank the text, footer attached,
//! cancel notice) restarts the unit on a fresh line.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Mutex;

use colored::Colorize;

use qa_client::{RenderUnit, Renderer, Role};

struct Inner {
    next_id: u64,
    printed: HashMap<u64, String>,
    line_open: bool,
}

pub struct TerminalRenderer {
    inner: Mutex<Inner>,
}

impl TerminalRenderer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 0,
                printed: HashMap::new(),
                line_open: false,
            }),
        }
    }

    fn close_line(inner: &mut Inner) {
        if inner.line_open {
            println!();
            inner.line_open = false;
        }
    }
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for TerminalRenderer {
    fn create_unit(&self, role: Role) -> RenderUnit {
        let mut inner = self.inner.lock().unwrap();
        Self::close_line(&mut inner);
        let label = match role {
            Role::User => "你：".cyan().bold(),
            Role::Assistant => "助手：".green().bold(),
        };
        println!("{label}");
        let id = inner.next_id;
        inner.next_id += 1;
        inner.printed.insert(id, String::new());
        RenderUnit::new(id)
    }

    fn update_unit(&self, unit: RenderUnit, content: &str) {
        let mut inner = self.inner.lock().unwrap();
        let Some(previous) = inner.printed.get(&unit.id()).cloned() else {
            return;
        };
        match content.strip_prefix(previous.as_str()) {
            Some(delta) => {
                if !delta.is_empty() {
                    print!("{delta}");
                    let _ = io::stdout().flush();
                    inner.line_open = !delta.ends_with('\n');
                }
            }
            None => {
                Self::close_line(&mut inner);
                print!("{content}");
                let _ = io::stdout().flush();
                inner.line_open = !content.ends_with('\n');
            }
        }
        inner.printed.insert(unit.id(), content.to_string());
    }

    fn error_unit(&self, unit: RenderUnit, message: &str) {
        let mut inner = self.inner.lock().unwrap();
        Self::close_line(&mut inner);
        println!("{}", format!("✗ {message}").red());
        inner.printed.insert(unit.id(), message.to_string());
    }

    fn clear_transcript(&self) {
        let mut inner = self.inner.lock().unwrap();
        Self::close_line(&mut inner);
        println!("{}", "─".repeat(42).dimmed());
        inner.printed.clear();
    }

    fn show_notice(&self, text: &str) {
        let mut inner = self.inner.lock().unwrap();
        Self::close_line(&mut inner);
        println!("{}", text.dimmed());
    }

    fn set_session_badge(&self, title: &str) {
        let mut inner = self.inner.lock().unwrap();
        Self::close_line(&mut inner);
        println!("{}", format!("当前会话：{title}").dimmed());
    }
}
