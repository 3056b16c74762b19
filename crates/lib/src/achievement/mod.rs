//! Achievement progress tracking.
//!
//! Gameplay code reports progress as often as it likes through
//! [`AchievementSystem::update_progress`]. Reports are clamped, filtered
//! against the monotonic per-achievement floor and coalesced into at most one
//! pending update per achievement. A background loop sends those updates to
//! the [`AchievementBackend`] in small batches with a fixed interval in
//! between, because platform achievement APIs throttle writes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

pub mod errors;
mod state;
mod system;

pub use errors::AchievementError;
pub use system::{AchievementSystem, AchievementStatus};

/// Whether an achievement unlocks at once or accumulates progress.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AchievementKind {
    Single,
    Progressive,
}

/// Immutable description of one achievement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AchievementDefinition {
    id: String,
    target: u32,
    kind: AchievementKind,
}

impl AchievementDefinition {
    /// An achievement that unlocks on its first report.
    pub fn single(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            target: 1,
            kind: AchievementKind::Single,
        }
    }

    /// An achievement that unlocks once progress reaches `target`.
    pub fn progressive(id: impl Into<String>, target: u32) -> Result<Self> {
        let id = id.into();
        if target < 1 {
            return Err(AchievementError::InvalidTarget { id }.into());
        }
        Ok(Self {
            id,
            target,
            kind: AchievementKind::Progressive,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    pub fn kind(&self) -> AchievementKind {
        self.kind
    }
}

/// State the platform reports for an achievement during initialization.
#[derive(Clone, Debug, PartialEq)]
pub enum ProgressReport {
    /// Already unlocked on the platform.
    Unlocked { id: String },
    /// Partial progress on the platform's own scale.
    Native {
        id: String,
        progress: f64,
        upper_bound: f64,
    },
    /// The platform does not know this achievement; it will never be updated.
    Invalid { id: String },
}

/// Read-only view of one achievement.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AchievementProgress {
    pub id: String,
    pub target: u32,
    /// Floor for future updates
    pub next_progress: u32,
    pub unlocked: bool,
    pub invalid: bool,
    /// Value waiting to be sent to the platform
    pub pending: Option<u32>,
}

/// Platform adapter that stores achievements.
///
/// Calls are never concurrent for one [`AchievementSystem`]: updates are sent
/// while holding the system's resource lock.
#[async_trait]
pub trait AchievementBackend: Send + Sync {
    /// Probe the platform once and report what it already knows.
    async fn initialize_system(
        &self,
        definitions: &[AchievementDefinition],
    ) -> Result<Vec<ProgressReport>>;

    /// Store `progress` for `definition`.
    ///
    /// Failures are swallowed by the system; the update is dropped and only
    /// a later report retries it. Return [`AchievementError::Rejected`] to
    /// mark the achievement invalid for good.
    async fn do_update(&self, definition: &AchievementDefinition, progress: u32) -> Result<()>;
}
