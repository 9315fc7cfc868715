//! qa_core - Foundation crate for the campus QA client
//!
//! This crate provides the pieces shared by the client library and the CLI:
//! - `config` - layered client configuration (file + environment)
//! - `paths` - state directory resolution and JSON state files
//! - `sanitize` - citation scrubbing applied to generated answer text

pub mod config;
pub mod paths;
pub mod sanitize;

pub use config::ClientConfig;
pub use sanitize::scrub_citations;
