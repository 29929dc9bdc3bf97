//! Collaborator interfaces: the boundaries at which this crate talks to
//! agent runtimes, source control, and chat front-ends.
//!
//! Every trait here is object-safe and `async_trait`-based. Full
//! implementations (a real sandboxed agent runner, a real git/GitHub `Vcs`,
//! a real Telegram/Discord `Chat`) are out of scope for this crate; only the
//! interface and a test-double implementation live here.

mod sanitize;
mod types;

pub use sanitize::sanitize_title;
pub use types::{AgentOutcome, AgentRunnerError, CommitOutcome, RunOutcome, Workspace};

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

/// A single line of agent stdout/stderr, as delivered to the phase
/// executor's stream callback.
pub type AgentLine = String;

/// Configuration for one agent invocation, built by the phase executor from
/// a [`crate::modes::Phase`] and the current [`kiln_db::models::Task`].
#[derive(Debug, Clone)]
pub struct AgentRunConfig {
    pub system_prompt: String,
    pub allowed_tools: Vec<String>,
    pub prompt: String,
    pub sandbox: bool,
    pub session_id: Option<String>,
    pub timeout_s: u64,
    pub working_dir: std::path::PathBuf,
}

/// Adapter interface for invoking an LLM coding agent.
///
/// The core passes a line-streaming callback and expects the runner to
/// invoke it as output is produced, then resolve with the aggregate result
/// once the agent process exits.
#[async_trait]
pub trait AgentRunner: Send + Sync {
    /// Run one agent turn. `on_line` is called once per line of combined
    /// stdout/stderr, in order, as it is produced.
    async fn run(
        &self,
        config: AgentRunConfig,
        on_line: Box<dyn FnMut(&str) + Send>,
    ) -> Result<AgentOutcome, AgentRunnerError>;

    /// Forcibly terminate the in-flight invocation this runner is driving,
    /// if any. Used by the watchdog on timeout.
    async fn kill(&self);
}

const _: () = {
    fn _assert_object_safe(_: &dyn AgentRunner) {}
};

/// Source-control operations used by the phase executor.
#[async_trait]
pub trait Vcs: Send + Sync {
    /// Create a task-scoped worktree/branch for `task_id` inside `repo`.
    async fn create_worktree(&self, repo: &str, task_id: i64) -> anyhow::Result<Workspace>;

    /// Resolve the filesystem path of a worktree previously created for
    /// `branch`. Implementations that do not use worktrees (e.g. `legal`
    /// mode) are never asked this; the phase executor only calls it when the
    /// task's mode has `uses_worktrees = true`.
    async fn workspace_path(&self, branch: &str) -> anyhow::Result<std::path::PathBuf>;

    /// Commit any pending changes on `branch` with `message`.
    async fn commit(&self, branch: &str, message: &str) -> anyhow::Result<CommitOutcome>;

    /// Run the repo's test command inside the task's workspace.
    async fn run_tests(&self, repo: &str, cmd: &str) -> anyhow::Result<RunOutcome>;

    /// Rebase `branch` onto `base`.
    async fn rebase(&self, branch: &str, base: &str) -> anyhow::Result<()>;

    /// Open a pull request for `branch`, with `title` already sanitized by
    /// [`sanitize_title`].
    async fn open_pr(&self, branch: &str, title: &str) -> anyhow::Result<()>;

    /// List the repo's tracked files, used to build the `include_file_listing`
    /// section of a phase's prompt.
    async fn list_tracked_files(&self, repo: &str) -> anyhow::Result<Vec<String>>;
}

const _: () = {
    fn _assert_object_safe(_: &dyn Vcs) {}
};

/// Optional external hook (§4.4 step 2) that prepends project-specific
/// context to every phase prompt. Absent by default; a project wanting to
/// inject its own conventions implements this and wires it into
/// [`crate::Engine`].
#[async_trait]
pub trait RepoPromptHook: Send + Sync {
    /// Return project-specific prompt context for `repo_path`, or `None` if
    /// this repo has none.
    async fn get_repo_prompt(&self, repo_path: &str) -> Option<String>;
}

/// Default hook: no project ever has extra context.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRepoPromptHook;

#[async_trait]
impl RepoPromptHook for NoRepoPromptHook {
    async fn get_repo_prompt(&self, _repo_path: &str) -> Option<String> {
        None
    }
}

/// Chat front-end notification sink.
#[async_trait]
pub trait Chat: Send + Sync {
    /// Best-effort notification; no return status is consumed by callers.
    async fn notify(&self, target: &str, message: &str);
}

const _: () = {
    fn _assert_object_safe(_: &dyn Chat) {}
};

/// Abstraction over wall-clock time, so the scheduler's `retry_after`
/// comparisons and the watchdog's deadline polling are testable without
/// sleeping in real time.
pub trait Clock: Send + Sync {
    fn now(&self) -> chrono::DateTime<chrono::Utc>;
}

/// The system clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> chrono::DateTime<chrono::Utc> {
        chrono::Utc::now()
    }
}

/// A line stream produced by a collaborator, used where the caller wants a
/// `Stream` rather than a callback (e.g. piping agent output straight into
/// [`crate::stream::StreamFanOut`]).
pub type LineStream = Pin<Box<dyn Stream<Item = AgentLine> + Send>>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// A no-op agent runner: emits no lines, returns an empty outcome.
    /// Stands in for the real sandboxed-agent integration, which is out of
    /// scope for this crate.
    struct NoopAgentRunner {
        killed: Arc<Mutex<bool>>,
    }

    #[async_trait]
    impl AgentRunner for NoopAgentRunner {
        async fn run(
            &self,
            _config: AgentRunConfig,
            _on_line: Box<dyn FnMut(&str) + Send>,
        ) -> Result<AgentOutcome, AgentRunnerError> {
            Ok(AgentOutcome {
                output: String::new(),
                new_session_id: None,
            })
        }

        async fn kill(&self) {
            *self.killed.lock().unwrap() = true;
        }
    }

    struct NoopChat {
        notified: Arc<Mutex<Vec<(String, String)>>>,
    }

    #[async_trait]
    impl Chat for NoopChat {
        async fn notify(&self, target: &str, message: &str) {
            self.notified
                .lock()
                .unwrap()
                .push((target.to_string(), message.to_string()));
        }
    }

    #[tokio::test]
    async fn agent_runner_is_object_safe_and_invokes_kill() {
        let killed = Arc::new(Mutex::new(false));
        let runner: Box<dyn AgentRunner> = Box::new(NoopAgentRunner {
            killed: killed.clone(),
        });

        let outcome = runner
            .run(
                AgentRunConfig {
                    system_prompt: String::new(),
                    allowed_tools: vec![],
                    prompt: String::new(),
                    sandbox: false,
                    session_id: None,
                    timeout_s: 0,
                    working_dir: std::path::PathBuf::from("/tmp"),
                },
                Box::new(|_| {}),
            )
            .await
            .unwrap();
        assert!(outcome.output.is_empty());

        runner.kill().await;
        assert!(*killed.lock().unwrap());
    }

    #[tokio::test]
    async fn chat_notify_records_calls() {
        let notified = Arc::new(Mutex::new(Vec::new()));
        let chat: Box<dyn Chat> = Box::new(NoopChat {
            notified: notified.clone(),
        });

        chat.notify("+1555", "hello").await;
        assert_eq!(
            notified.lock().unwrap().as_slice(),
            &[("+1555".to_string(), "hello".to_string())]
        );
    }

    #[test]
    fn system_clock_returns_current_time() {
        let clock = SystemClock;
        let before = chrono::Utc::now();
        let now = clock.now();
        assert!(now >= before);
    }
}
