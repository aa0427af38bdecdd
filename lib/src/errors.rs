use thiserror::Error;

/// Error returned when a pattern can't be compiled.
///
/// `message` has the same wording that Vim uses for the equivalent error
/// (e.g: `unmatched \(`), and `position` is the byte offset within the
/// pattern where the error was detected, when known.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[error("{message}")]
pub struct CompileError {
    pub message: String,
    pub position: Option<usize>,
}

impl CompileError {
    pub(crate) fn new<M: Into<String>>(message: M, position: usize) -> Self {
        Self { message: message.into(), position: Some(position) }
    }
}

/// Errors that can occur while matching.
#[derive(Error, Debug, Clone, Eq, PartialEq)]
#[non_exhaustive]
pub enum MatchError {
    /// The time limit was exceeded.
    #[error("timeout")]
    Timeout,

    /// The caller raised the interrupt flag.
    #[error("interrupted")]
    Interrupted,

    /// The backtracking state exceeded the memory limit.
    #[error("pattern uses too much memory")]
    TooExpensive,

    /// The program contains an unknown node or a broken link. This never
    /// happens with programs produced by the compiler.
    #[error("corrupted program at {addr:#x}")]
    Corrupted { addr: usize },
}
