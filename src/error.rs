use std::io;

use thiserror::Error;

use crate::archive::ExtractError;
use crate::registry::RegistryError;

/// Exit status for a successful run.
pub const EXIT_SUCCESS: u8 = 0;
/// Exit status for any failure without a more specific code.
pub const EXIT_FAILURE: u8 = 1;
/// Exit status for invalid arguments.
pub const EXIT_ARGUMENT: u8 = 2;
/// Exit status when removal is blocked by dependent products.
pub const EXIT_HAS_DEPENDENTS: u8 = 3;
/// Exit status after Ctrl-C.
pub const EXIT_CANCELLED: u8 = 130;

/// Errors surfaced by install, repair and remove.
#[derive(Error, Debug)]
pub enum LifecycleError {
    /// Invalid product id or option combination; nothing was changed
    #[error("{0}")]
    Argument(String),

    /// Other products still depend on this one; nothing was changed
    #[error("Aborting: {id} has {count} dependent product(s)")]
    DependencyBlocked { id: String, count: usize },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Extraction failed: {0}")]
    Extraction(#[source] ExtractError),

    #[error("Operation cancelled")]
    Cancelled,

    /// Files on disk were already changed when recording the result failed
    #[error("{message}: {source}")]
    Partial {
        message: String,
        #[source]
        source: RegistryError,
    },
}

impl LifecycleError {
    pub fn io(context: impl Into<String>, source: io::Error) -> Self {
        LifecycleError::Io {
            context: context.into(),
            source,
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            LifecycleError::Argument(_) => EXIT_ARGUMENT,
            LifecycleError::DependencyBlocked { .. } => EXIT_HAS_DEPENDENTS,
            LifecycleError::Cancelled => EXIT_CANCELLED,
            _ => EXIT_FAILURE,
        }
    }
}

impl From<ExtractError> for LifecycleError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Cancelled => LifecycleError::Cancelled,
            other => LifecycleError::Extraction(other),
        }
    }
}

/// Result type alias using the lifecycle error
pub type Result<T> = std::result::Result<T, LifecycleError>;
