//! Download task model: key, state machine, and persisted record.

use std::fmt;

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Identity of one download: a piece of content at one quality variant.
///
/// At most one download may be in flight per key at any instant.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TaskKey {
    /// Content identifier.
    pub content_id: String,
    /// Quality variant (e.g. `hd`, `sd`).
    pub quality: String,
}

impl TaskKey {
    /// Creates a task key.
    #[must_use]
    pub fn new(content_id: impl Into<String>, quality: impl Into<String>) -> Self {
        Self {
            content_id: content_id.into(),
            quality: quality.into(),
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.content_id, self.quality)
    }
}

/// Lifecycle state of a download task.
///
/// The single source of truth for a task's condition; no auxiliary boolean
/// flags exist beside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadState {
    /// Created, not yet started.
    Pending,
    /// Copy loop is running.
    InProgress,
    /// Stopped cooperatively; `.part` artifact preserved for resume.
    Paused,
    /// Finalized and visible in the vault.
    Completed,
    /// Failed; `.part` artifact may remain for a future resume.
    Failed,
}

impl DownloadState {
    /// Returns the database string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Whether the state machine permits moving to `next`.
    ///
    /// `Pending -> InProgress -> {Completed | Failed | Paused}`,
    /// `Paused -> InProgress` (resume), `Failed -> Pending` (explicit
    /// retry), and `Pending -> Failed` for preflight failures.
    #[must_use]
    pub fn can_transition_to(&self, next: DownloadState) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Failed)
                | (
                    Self::InProgress,
                    Self::Completed | Self::Failed | Self::Paused
                )
                | (Self::Paused, Self::InProgress)
                | (Self::Failed, Self::Pending)
        )
    }

    /// True for states a new download request may restart from.
    #[must_use]
    pub fn is_restartable(&self) -> bool {
        matches!(self, Self::Pending | Self::Paused | Self::Failed)
    }
}

impl fmt::Display for DownloadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DownloadState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("invalid download state: {s}")),
        }
    }
}

/// Persisted record of one download task.
///
/// Survives restarts so interrupted downloads keep their `.part` artifact
/// and byte count available for resume.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DownloadTask {
    /// Content identifier.
    pub content_id: String,
    /// Quality variant.
    pub quality: String,
    /// Source URL the content is fetched from.
    pub source_url: String,
    /// Path the finalized file is published at.
    pub final_path: String,
    /// Path of the in-flight `.part` artifact.
    pub temp_path: String,
    /// Expected total size in bytes, when known.
    pub expected_size: Option<i64>,
    /// Bytes written to the `.part` artifact so far.
    pub bytes_written: i64,
    /// Current lifecycle state (stored as text, parsed via `state()`).
    #[sqlx(rename = "state")]
    pub state_str: String,
    /// Whether the on-disk bytes are encrypted.
    pub encrypted: bool,
    /// SHA-256 of the finalized file, recorded at finalize time.
    pub checksum: Option<String>,
    /// Last error message if failed.
    pub last_error: Option<String>,
    /// When the task was created.
    pub created_at: String,
    /// When the task was last updated.
    pub updated_at: String,
}

impl DownloadTask {
    /// Returns the parsed state enum.
    ///
    /// Falls back to `Pending` if the state string is invalid.
    #[must_use]
    pub fn state(&self) -> DownloadState {
        self.state_str.parse().unwrap_or(DownloadState::Pending)
    }

    /// Returns this task's key.
    #[must_use]
    pub fn key(&self) -> TaskKey {
        TaskKey::new(self.content_id.clone(), self.quality.clone())
    }
}

impl fmt::Display for DownloadTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "DownloadTask {{ {}, state: {}, bytes: {}/{} }}",
            self.key(),
            self.state(),
            self.bytes_written,
            self.expected_size
                .map_or_else(|| "?".to_string(), |v| v.to_string())
        )
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trips_through_strings() {
        for state in [
            DownloadState::Pending,
            DownloadState::InProgress,
            DownloadState::Paused,
            DownloadState::Completed,
            DownloadState::Failed,
        ] {
            assert_eq!(state.as_str().parse::<DownloadState>().unwrap(), state);
        }
    }

    #[test]
    fn test_invalid_state_string_rejected() {
        assert!("bogus".parse::<DownloadState>().is_err());
    }

    #[test]
    fn test_state_machine_allowed_transitions() {
        use DownloadState::{Completed, Failed, InProgress, Paused, Pending};

        assert!(Pending.can_transition_to(InProgress));
        assert!(InProgress.can_transition_to(Completed));
        assert!(InProgress.can_transition_to(Failed));
        assert!(InProgress.can_transition_to(Paused));
        assert!(Paused.can_transition_to(InProgress));
        assert!(Failed.can_transition_to(Pending));
    }

    #[test]
    fn test_state_machine_forbidden_transitions() {
        use DownloadState::{Completed, Failed, InProgress, Paused, Pending};

        // Completed is terminal
        assert!(!Completed.can_transition_to(InProgress));
        assert!(!Completed.can_transition_to(Pending));
        // Failed resumes only via explicit retry (-> Pending)
        assert!(!Failed.can_transition_to(InProgress));
        // No skipping the copy loop
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Paused.can_transition_to(Completed));
    }

    #[test]
    fn test_task_key_display() {
        assert_eq!(TaskKey::new("episode-42", "hd").to_string(), "episode-42@hd");
    }

    #[test]
    fn test_restartable_states() {
        assert!(DownloadState::Paused.is_restartable());
        assert!(DownloadState::Failed.is_restartable());
        assert!(DownloadState::Pending.is_restartable());
        assert!(!DownloadState::InProgress.is_restartable());
        assert!(!DownloadState::Completed.is_restartable());
    }
}
