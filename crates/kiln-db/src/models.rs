use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Status values that never transition further.
///
/// Task rows store `status` as a plain string rather than this enum because
/// the set of *non-terminal* statuses is mode-defined (see `kiln_core::modes`)
/// and not fixed at the schema level; only the terminal set is fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalStatus {
    Done,
    Merged,
    Failed,
    DeadLetter,
}

impl TerminalStatus {
    pub const ALL: [TerminalStatus; 4] = [
        TerminalStatus::Done,
        TerminalStatus::Merged,
        TerminalStatus::Failed,
        TerminalStatus::DeadLetter,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TerminalStatus::Done => "done",
            TerminalStatus::Merged => "merged",
            TerminalStatus::Failed => "failed",
            TerminalStatus::DeadLetter => "dead_letter",
        }
    }
}

impl std::fmt::Display for TerminalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `retry` pseudo-status: a mode-independent active status assigned by
/// the retry routine (see §4.5 of the design) which re-enters whichever
/// phase was in flight when the task failed.
pub const RETRY_STATUS: &str = "retry";

/// A task -- the durable primary entity dispatched through a mode's phase
/// chain by the scheduler and phase executor.
///
/// `status` holds either one of the active mode's phase names, the
/// [`RETRY_STATUS`] pseudo-status, or one of [`TerminalStatus`]'s string
/// forms. Fields that the spec describes as "`\"\"` when unset" (`branch`,
/// `session_id`, `last_error`) keep that convention; `retry_after` and
/// `dispatched_at`, which are always well-formed timestamps or absent, are
/// modeled as `Option<DateTime<Utc>>` instead of an empty-string sentinel.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Task {
    pub id: i64,
    pub title: String,
    pub description: String,
    pub repo_path: String,
    pub mode: String,
    pub status: String,
    pub branch: String,
    pub session_id: String,
    pub attempt: i32,
    pub max_attempts: i32,
    pub last_error: String,
    pub retry_after: Option<DateTime<Utc>>,
    /// Phase to resume when `status == "retry"`; `""` otherwise. Not part of
    /// the spec's literal field list -- see DESIGN.md for why it exists.
    pub retry_phase: String,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub created_by: String,
    pub notify_chat: String,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// `true` once `status` has settled into a [`TerminalStatus`].
    pub fn is_terminal(&self) -> bool {
        TerminalStatus::ALL
            .iter()
            .any(|t| t.as_str() == self.status)
    }
}

/// Status of a single run-history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Done,
    Failed,
    Error,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Done => "done",
            RunStatus::Failed => "failed",
            RunStatus::Error => "error",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row of the append-only phase run-history log.
///
/// Written once by `logRunStart` (status = running, `finished_at` absent)
/// and updated once by `logRunFinish`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunHistoryEntry {
    pub id: i64,
    pub task_id: i64,
    pub phase: String,
    pub repo_path: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_s: Option<f64>,
    pub bytes_out: i64,
    pub error_msg: String,
}

/// Aggregate counts over `tasks`, as returned by `getStats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: i64,
    pub active: i64,
    pub merged: i64,
    /// Includes both `failed` and `dead_letter` tasks.
    pub failed: i64,
}

/// Aggregate counts over `run_history`, as returned by `getRunStats`.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct RunStats {
    pub total: i64,
    pub done: i64,
    pub failed: i64,
    pub running: i64,
    /// Computed only over rows with a finished status (excludes `running`).
    pub avg_duration_s: f64,
    pub total_bytes_out: i64,
}

/// Chat-binding side table row. Persisted but otherwise opaque to the core;
/// the core only needs the upsert-by-jid round trip.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RegisteredGroup {
    pub jid: String,
    pub name: String,
    pub folder: String,
    pub trigger_word: String,
    pub requires_trigger: bool,
}
