//! # Error Module
//!
//! Unified error type for program construction. Every failure the core can
//! signal carries a classification (`kind`) and a human-readable message,
//! so callers can match on the kind while logs stay descriptive.

use std::fmt;

// -----------------------------------------------------------------------------
// ERROR KIND — Failure Classification
// -----------------------------------------------------------------------------

/// Classifies which construction failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The `bpf(BPF_MAP_CREATE)` syscall returned a negative fd.
    MapCreationFailed,
    /// The generator strategy produced no root instruction.
    EmptyProgram,
    /// A conditional jump was authored with a false-branch size of 0.
    InvalidZeroOffset,
    /// A jump's false-branch size exceeds the remaining instruction count.
    JumpOutOfBounds,
    /// The branch splitter was invoked with no instructions.
    EmptyJumpContext,
    /// A register number outside 0..=10 was requested.
    UnknownRegister,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::MapCreationFailed => write!(f, "MapCreationFailed"),
            ErrorKind::EmptyProgram => write!(f, "EmptyProgram"),
            ErrorKind::InvalidZeroOffset => write!(f, "InvalidZeroOffset"),
            ErrorKind::JumpOutOfBounds => write!(f, "JumpOutOfBounds"),
            ErrorKind::EmptyJumpContext => write!(f, "EmptyJumpContext"),
            ErrorKind::UnknownRegister => write!(f, "UnknownRegister"),
        }
    }
}

// -----------------------------------------------------------------------------
// ERROR — Unified Error Type
// -----------------------------------------------------------------------------

/// The unified error type for the generator.
///
/// Every error carries a classification (`kind`) and a human-readable
/// `message`. Callers match on the kind; the message is for diagnostics.
#[derive(Debug, Clone)]
pub struct Error {
    /// Which failure occurred.
    pub kind: ErrorKind,
    /// Human-readable description of what went wrong.
    pub message: String,
}

impl Error {
    /// Creates a new error of the given kind.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a map-creation error.
    #[inline]
    pub fn map_creation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MapCreationFailed, message)
    }

    /// Creates an empty-program error.
    #[inline]
    pub fn empty_program(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyProgram, message)
    }

    /// Creates an invalid-zero-offset error.
    #[inline]
    pub fn invalid_zero_offset(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidZeroOffset, message)
    }

    /// Creates a jump-out-of-bounds error.
    #[inline]
    pub fn jump_out_of_bounds(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::JumpOutOfBounds, message)
    }

    /// Creates an empty-jump-context error.
    #[inline]
    pub fn empty_jump_context(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::EmptyJumpContext, message)
    }

    /// Creates an unknown-register error.
    #[inline]
    pub fn unknown_register(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownRegister, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Convenience type alias for Results throughout the generator.
pub type Result<T> = std::result::Result<T, Error>;
