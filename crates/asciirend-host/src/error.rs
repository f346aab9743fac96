//! Typed errors and result aliases for the asciirend host.
//!
//! Every boundary failure surfaces as a [`HostError`]. Nothing is retried
//! internally: the guest is deterministic per call, so retry policy belongs to
//! the caller. Bootstrap paths (configuration, module loading) use
//! [`HostReport`] so file paths and other context can be attached as the
//! error propagates.

use error_stack::Report;
use thiserror::Error;

use crate::session::{SceneHandle, SceneOp, SceneState};

/// Result type for host operations.
pub type HostResult<T> = Result<T, HostError>;

/// Error-stack–backed result alias for bootstrap operations.
///
/// Equivalent to `Result<T, error_stack::Report<HostError>>`.
pub type HostReport<T> = ::std::result::Result<T, Report<HostError>>;

/// Extension trait to convert `Result<T, HostError>` into [`HostReport<T>`].
pub trait IntoHostReport<T> {
    /// Wrap the error in an `error_stack::Report`.
    fn into_report(self) -> HostReport<T>;
}

impl<T> IntoHostReport<T> for ::std::result::Result<T, HostError> {
    #[inline]
    fn into_report(self) -> HostReport<T> {
        self.map_err(Report::new)
    }
}

/// Errors raised while driving the guest renderer.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HostError {
    /// Module bytes were malformed, incompatible, or failed to instantiate.
    #[error("Failed to load guest module: {0}")]
    Load(String),

    /// The guest faulted while executing an export.
    #[error("Guest trapped in `{export}`: {message}")]
    GuestTrap { export: String, message: String },

    /// A raw memory access fell outside the current linear memory.
    #[error("Memory access out of bounds: offset={offset}, len={len}, memory size={memory_size}")]
    OutOfBounds {
        offset: u32,
        len: u32,
        memory_size: usize,
    },

    /// The guest rejected the scene description (sentinel `-1`).
    #[error("Guest rejected the scene description")]
    SceneParse,

    /// The scene handle was already removed.
    #[error("Scene {handle} was already removed")]
    UseAfterFree { handle: SceneHandle },

    /// The scene handle was produced by a different session.
    #[error("Scene {handle} belongs to another session")]
    ForeignHandle { handle: SceneHandle },

    /// The operation is not valid in the scene's current state.
    #[error("Cannot {op} scene {handle} in state {state}")]
    InvalidState {
        handle: SceneHandle,
        op: SceneOp,
        state: SceneState,
    },

    /// A previous guest trap left the scene unusable; it may only be removed.
    #[error("Scene {handle} faulted in a previous call and must be removed")]
    SceneFaulted { handle: SceneHandle },

    /// Bytes read back from the guest were not valid UTF-8.
    #[error("Invalid UTF-8{}: {source}", .row.map(|r| format!(" in row {r}")).unwrap_or_default())]
    InvalidEncoding {
        row: Option<usize>,
        #[source]
        source: std::str::Utf8Error,
    },

    /// A write or release disagreed with the allocation it targets.
    #[error("Allocation mismatch at {ptr:#x}: allocated {expected} bytes, got {actual}")]
    AllocationMismatch {
        ptr: u32,
        expected: u32,
        actual: u32,
    },

    /// The pixel grid does not fit in 32-bit guest memory.
    #[error("Invalid frame dimensions {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    /// The export exists but was called with the wrong signature.
    #[error("Invalid call to `{export}`: {reason}")]
    InvalidCall { export: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HostError {
    /// Whether the failure came from the guest faulting.
    pub fn is_guest_fault(&self) -> bool {
        matches!(self, HostError::GuestTrap { .. })
    }

    pub(crate) fn encoding(row: Option<usize>, source: std::str::Utf8Error) -> Self {
        HostError::InvalidEncoding { row, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use error_stack::Report;

    #[test]
    fn trap_is_guest_fault() {
        let err = HostError::GuestTrap {
            export: "render_raw".to_string(),
            message: "unreachable".to_string(),
        };
        assert!(err.is_guest_fault());
        assert!(err.to_string().contains("render_raw"));
        assert!(!HostError::SceneParse.is_guest_fault());
    }

    #[test]
    fn encoding_error_names_row() {
        let source = String::from_utf8(vec![0xff]).unwrap_err().utf8_error();

        let err = HostError::encoding(Some(3), source);
        assert!(err.to_string().contains("row 3"));

        let err = HostError::encoding(None, source);
        assert!(!err.to_string().contains("row"));
    }

    #[test]
    fn into_report_keeps_context() {
        let result: HostResult<()> = Err(HostError::Config("missing module".to_string()));
        let report: Report<HostError> = result.into_report().unwrap_err();
        assert!(matches!(report.current_context(), HostError::Config(_)));
    }
}
