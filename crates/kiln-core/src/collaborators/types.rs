use thiserror::Error;

/// The result of one successful agent turn.
#[derive(Debug, Clone)]
pub struct AgentOutcome {
    pub output: String,
    pub new_session_id: Option<String>,
}

/// Error kinds an [`super::AgentRunner`] can produce, per §4.9.
#[derive(Debug, Error)]
pub enum AgentRunnerError {
    #[error("failed to spawn agent: {0}")]
    SpawnFailed(String),
    #[error("agent killed by watchdog timeout")]
    KilledByTimeout,
    #[error("agent i/o error: {0}")]
    Io(String),
}

/// Result of [`super::Vcs::create_worktree`]: the branch it created plus the
/// filesystem path the phase executor must run the agent and test command
/// in. `run_tests`/agent invocation use `path`; `commit` only needs `branch`,
/// since a `Vcs` implementation is expected to remember the mapping itself.
#[derive(Debug, Clone)]
pub struct Workspace {
    pub branch: String,
    pub path: std::path::PathBuf,
}

/// Result of [`super::Vcs::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitOutcome {
    pub ok: bool,
    pub no_changes: bool,
}

/// Result of [`super::Vcs::run_tests`].
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}
