//! Error types for the saving system

use thiserror::Error;

/// Errors that can occur while opening, reading or committing saves.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SavingError {
    /// Save names are lowercase ASCII letters, digits and `-`.
    #[error("Invalid save name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Another handle for this save is still open.
    #[error("Save is already open: {name}")]
    AlreadyOpen { name: String },

    /// Enumeration is refused while any handle is open.
    #[error("Cannot enumerate saves while {count} handle(s) are open")]
    HandlesOpen { count: usize },

    /// The commit would leave the save without any file.
    #[error("Refusing to commit an empty save: {name}")]
    EmptyArchive { name: String },

    /// The stored save failed validation.
    #[error("Save '{name}' is corrupted: {reason}")]
    Corrupted { name: String, reason: String },

    /// No save with this name exists.
    #[error("Save not found: {name}")]
    NotFound { name: String },

    /// The save exists but does not contain this file.
    #[error("File '{file}' not found in save '{name}'")]
    FileNotFound { name: String, file: String },
}

impl SavingError {
    /// Check if this error is a misuse of the saving API.
    pub fn is_precondition_error(&self) -> bool {
        matches!(
            self,
            SavingError::InvalidName { .. }
                | SavingError::AlreadyOpen { .. }
                | SavingError::HandlesOpen { .. }
                | SavingError::EmptyArchive { .. }
        )
    }

    /// Check if this error indicates corrupted stored data.
    pub fn is_corruption(&self) -> bool {
        matches!(self, SavingError::Corrupted { .. })
    }

    /// Check if this error indicates a missing save or file.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SavingError::NotFound { .. } | SavingError::FileNotFound { .. }
        )
    }

    /// Check if this error is caused by an open handle.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            SavingError::AlreadyOpen { .. } | SavingError::HandlesOpen { .. }
        )
    }
}

impl From<SavingError> for crate::Error {
    fn from(err: SavingError) -> Self {
        crate::Error::Saving(err)
    }
}
