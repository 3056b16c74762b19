//! Error types for the achievement system

use thiserror::Error;

/// Errors that can occur in the achievement system.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum AchievementError {
    /// No achievement with this id was registered.
    #[error("Achievement not found: {id}")]
    NotFound { id: String },

    /// Two definitions share an id.
    #[error("Duplicate achievement definition: {id}")]
    DuplicateDefinition { id: String },

    /// Progress targets start at one.
    #[error("Achievement '{id}' must have a progress target of at least 1")]
    InvalidTarget { id: String },

    /// A native progress report used a range that cannot be mapped.
    #[error("Cannot map native progress {progress} of {upper_bound} for achievement '{id}'")]
    InvalidNativeRange {
        id: String,
        progress: f64,
        upper_bound: f64,
    },

    /// `initialize` was called on a system that is initialized or initializing.
    #[error("Achievement system is already initialized")]
    AlreadyInitialized,

    /// The operation needs a successfully initialized system.
    #[error("Achievement system is not initialized")]
    NotInitialized,

    /// The platform probe failed; the system stays unusable until reinitialized.
    #[error("Achievement system initialization failed: {reason}")]
    InitializationFailed { reason: String },

    /// The platform permanently refused this achievement.
    ///
    /// Backends return this from `do_update` to mark the achievement invalid.
    #[error("Platform rejected achievement '{id}': {reason}")]
    Rejected { id: String, reason: String },
}

impl AchievementError {
    /// Check if this error is a call-order or definition mistake.
    pub fn is_precondition_error(&self) -> bool {
        matches!(
            self,
            AchievementError::NotFound { .. }
                | AchievementError::DuplicateDefinition { .. }
                | AchievementError::InvalidTarget { .. }
                | AchievementError::InvalidNativeRange { .. }
                | AchievementError::AlreadyInitialized
                | AchievementError::NotInitialized
        )
    }

    /// Check if this error indicates an unknown achievement.
    pub fn is_not_found(&self) -> bool {
        matches!(self, AchievementError::NotFound { .. })
    }

    /// Check if the platform refused the achievement for good.
    pub fn is_rejected(&self) -> bool {
        matches!(self, AchievementError::Rejected { .. })
    }
}

impl From<AchievementError> for crate::Error {
    fn from(err: AchievementError) -> Self {
        crate::Error::Achievement(err)
    }
}
