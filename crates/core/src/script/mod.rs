//! Embedded Lua scripting: source resolution, sandboxed runtimes and
//! the shared calling conventions for column and directory scripts.

mod resolver;
mod runtime;

pub use resolver::ScriptResolver;
pub use runtime::{ScriptRuntime, ValidationOutcome};

use thiserror::Error;

/// A script failed to compile or raised at run time.
///
/// The message is the interpreter's own description; the traceback, when
/// captured, is carried separately so callers can decide how to render it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ScriptError {
    pub message: String,
    pub traceback: Option<String>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            traceback: None,
        }
    }

}

impl From<mlua::Error> for ScriptError {
    fn from(e: mlua::Error) -> Self {
        Self::new(e.to_string())
    }
}

impl From<std::io::Error> for ScriptError {
    fn from(e: std::io::Error) -> Self {
        Self::new(e.to_string())
    }
}
