//! Error types for the rrdgate bindings.

use std::ffi::NulError;
use std::path::PathBuf;

use thiserror::Error;

/// The main error type for all rrdgate operations.
///
/// Every public operation either succeeds or returns exactly one of these.
/// There is no partial success: a failed engine call has no effect that the
/// binding knows about.
#[derive(Error, Debug)]
pub enum RrdError {
    /// The storage engine rejected the call.
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),

    /// A string argument could not be passed across the foreign boundary.
    #[error("argument {argument:?} cannot be passed to the engine: {source}")]
    InvalidArgument {
        /// The offending argument.
        argument: String,
        /// The underlying conversion error.
        #[source]
        source: NulError,
    },

    /// A store definition file could not be read.
    #[error("failed to read store definition '{}': {source}", path.display())]
    DefinitionRead {
        /// The definition file path.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A store definition document is not valid JSON for the expected shape.
    #[error("failed to parse store definition: {0}")]
    DefinitionParse(#[from] serde_json::Error),
}

/// A failure reported by the storage engine.
///
/// The engine reports failures as a single human-readable message; no
/// structured codes cross the boundary. The binding also uses this type for
/// engine replies it cannot make sense of (a zero step, a negative time span),
/// since those are engine faults from the caller's point of view.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct EngineError {
    message: String,
}

impl EngineError {
    /// Creates an engine error carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Returns the engine's message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl RrdError {
    /// Shorthand for an [`RrdError::Engine`] with the given message.
    pub(crate) fn engine(message: impl Into<String>) -> Self {
        Self::Engine(EngineError::new(message))
    }

    /// Returns the engine error, if this is one.
    pub fn as_engine(&self) -> Option<&EngineError> {
        match self {
            Self::Engine(e) => Some(e),
            _ => None,
        }
    }
}

/// Type alias for `Result<T, RrdError>`.
pub type Result<T> = std::result::Result<T, RrdError>;

#[cfg(test)]
mod tests {
    use std::ffi::CString;

    use super::*;

    #[test]
    fn test_engine_error_displays_message_verbatim() {
        let err = EngineError::new("opening '/tmp/x.rrd': No such file or directory");
        assert_eq!(
            err.to_string(),
            "opening '/tmp/x.rrd': No such file or directory"
        );

        let wrapped: RrdError = err.clone().into();
        assert_eq!(wrapped.as_engine(), Some(&err));
        assert!(wrapped.to_string().starts_with("engine error: "));
    }

    #[test]
    fn test_invalid_argument_message() {
        let source = CString::new("DS:a\0b").unwrap_err();
        let err = RrdError::InvalidArgument {
            argument: "DS:a\0b".to_string(),
            source,
        };
        assert!(err.as_engine().is_none());
        assert!(err.to_string().contains("cannot be passed to the engine"));
    }
}
