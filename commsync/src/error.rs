use std::sync::OnceLock;

use commsync_core::{DecodeError, PatchError};
use regex::Regex;
use serde_json::Value;

/// A position in the loaded (generated) application code, 1-based as in
/// stack traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratedPosition {
    pub line: u32,
    pub column: u32,
}

/// A failure raised by the loaded application: by its `reduce`, or by one of
/// its methods or actions.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct ApplicationError {
    pub message: String,
    /// Where in the generated code the failure was raised, if known.
    pub position: Option<GeneratedPosition>,
    /// Arguments of an error raised by the application's own runtime. The
    /// first one is the user-facing message.
    pub args: Option<Vec<Value>>,
}

impl ApplicationError {
    pub fn new(message: impl Into<String>) -> Self {
        ApplicationError {
            message: message.into(),
            position: None,
            args: None,
        }
    }

    pub fn at(mut self, line: u32, column: u32) -> Self {
        self.position = Some(GeneratedPosition { line, column });
        self
    }

    pub fn with_args(mut self, args: Vec<Value>) -> Self {
        self.args = Some(args);
        self
    }

    /// Build an error from a message and a textual stack trace, taking the
    /// first frame that points into evaluated code (`<anonymous>:LINE:COL`).
    pub fn from_stack(message: impl Into<String>, stack: &str) -> Self {
        let error = Self::new(message);
        match stack_position(stack) {
            Some(p) => error.at(p.line, p.column),
            None => error,
        }
    }
}

fn stack_position(stack: &str) -> Option<GeneratedPosition> {
    static FRAME: OnceLock<Regex> = OnceLock::new();
    let frame = FRAME.get_or_init(|| {
        Regex::new(r"<anonymous>:(\d+):(\d+)").expect("frame pattern is valid")
    });
    let captures = frame.captures(stack)?;
    Some(GeneratedPosition {
        line: captures[1].parse().ok()?,
        column: captures[2].parse().ok()?,
    })
}

impl From<crate::draft::DraftError> for ApplicationError {
    fn from(e: crate::draft::DraftError) -> Self {
        ApplicationError::new(e.to_string())
    }
}

impl From<RpcError> for ApplicationError {
    fn from(e: RpcError) -> Self {
        ApplicationError::new(e.to_string())
    }
}

/// Malformed or out-of-order input from the backend. Logged and dropped.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("unexpected inbound {0:?} message")]
    Unexpected(&'static str),
    #[error("method_return for unknown callback_id {0:?}")]
    UnknownCallback(String),
    #[error("patch could not be applied: {0}")]
    PatchRejected(#[source] PatchError),
    #[error("method_call {0:?} before any application code was loaded")]
    NoApplication(String),
    #[error("application has no method {0:?}")]
    UnknownMethod(String),
}

/// Failure of the channel collaborator.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("could not open channel: {0}")]
    Open(#[source] std::io::Error),
    #[error("could not send message: {0}")]
    Send(#[source] std::io::Error),
    #[error("could not encode message: {0}")]
    Encode(String),
    #[error("channel closed")]
    Closed,
}

#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("remote call {0:?} was abandoned before a reply arrived")]
    Abandoned(String),
}

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("no application registered as {0:?}")]
    UnknownApplication(String),
    #[error("application code rejected: {0}")]
    Rejected(String),
}
