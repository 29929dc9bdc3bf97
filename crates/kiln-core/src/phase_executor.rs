//! Per-task phase state machine (§4.4): prepares the workspace, invokes the
//! agent, runs the post-run checks, and routes the outcome to either the
//! next phase (looping immediately, in-process, on success), the
//! `qa_fix` detour, or the retry/dead-letter routine.
//!
//! One call to [`run_task`] drives a task through as many consecutive
//! successful phase transitions as it can in one sitting; it only returns
//! control to the scheduler when a phase fails (handled via retry or
//! dead-letter), when a test failure routes to `qa_fix`, or when the task
//! reaches a terminal status.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kiln_db::models::{RETRY_STATUS, RunStatus, Task};
use kiln_db::queries::{run_history, tasks};

use crate::Engine;
use crate::collaborators::{AgentOutcome, AgentRunConfig, AgentRunnerError};
use crate::modes::{Mode, NextPhase, Phase, PhaseRole};
use crate::retry::{self, TestFailureKind, classify_test_failure};
use crate::sentinel::{self, SentinelScanner};

/// Grace period between a watchdog's graceful-terminate signal and its
/// force-kill, per §4.4.
const SIGKILL_GRACE_S: u64 = 30;

/// The reason one phase turn ended, used to decide whether [`run_task`]
/// loops immediately into the next phase or returns to the scheduler.
enum PhaseOutcome {
    /// Advanced to another phase; keep looping.
    Advanced,
    /// Reached a terminal status, or handed off to retry/dead-letter/qa_fix;
    /// the scheduler owns what happens next.
    Stopped,
}

/// A classified phase failure, carrying everything the retry routine and
/// the run-history row need.
enum Failure {
    Phase(String),
    Test { combined: String, stdout: String, stderr: String },
    Timeout(u64),
    Spawn(String),
    Io(String),
}

impl Failure {
    fn message(&self) -> String {
        match self {
            Failure::Phase(msg) => msg.clone(),
            Failure::Test { combined, .. } => combined.clone(),
            Failure::Timeout(s) => format!("agent timeout after {s}s"),
            Failure::Spawn(msg) => format!("failed to spawn agent: {msg}"),
            Failure::Io(msg) => format!("i/o error: {msg}"),
        }
    }

    fn run_status(&self) -> RunStatus {
        match self {
            Failure::Phase(_) | Failure::Test { .. } => RunStatus::Failed,
            Failure::Timeout(_) | Failure::Spawn(_) | Failure::Io(_) => RunStatus::Error,
        }
    }
}

/// Drive `task` through its mode's phase chain until it stops advancing.
///
/// Ownership of the task row's in-memory copy belongs to this call for its
/// duration; the caller (the scheduler's dispatched worker) is responsible
/// for `dispatched_at`/in-flight bookkeeping before and after this returns.
pub async fn run_task(engine: Engine, mut task: Task) {
    loop {
        if engine.stop_requested() {
            tracing::info!(task_id = task.id, "worker stopping at phase boundary");
            return;
        }

        let Some(mode) = engine.registry.get(&task.mode) else {
            tracing::error!(task_id = task.id, mode = %task.mode, "unknown mode, abandoning task");
            return;
        };
        let mode = mode.clone();

        let phase_name = if task.status == RETRY_STATUS {
            task.retry_phase.clone()
        } else {
            task.status.clone()
        };

        let Some(phase) = mode.phase(&phase_name) else {
            tracing::error!(task_id = task.id, phase = %phase_name, "unknown phase, abandoning task");
            return;
        };
        let phase = phase.clone();

        match run_one_phase(&engine, &mode, &phase, &mut task).await {
            PhaseOutcome::Advanced => continue,
            PhaseOutcome::Stopped => return,
        }
    }
}

/// Resolve the phase's working directory: a worktree path for
/// worktree-using modes, the bare repo path otherwise.
async fn resolve_workspace_dir(
    engine: &Engine,
    mode: &Mode,
    task: &Task,
) -> anyhow::Result<PathBuf> {
    if mode.uses_worktrees {
        engine.vcs.workspace_path(&task.branch).await
    } else {
        Ok(PathBuf::from(&task.repo_path))
    }
}

/// The identifier [`crate::collaborators::Vcs::commit`] expects: the
/// worktree branch for worktree-using modes, the bare repo path otherwise
/// (a `Vcs` backing a non-worktree mode is expected to treat its `branch`
/// argument as a repo-path key in that case -- see DESIGN.md).
fn commit_target<'a>(mode: &Mode, task: &'a Task) -> &'a str {
    if mode.uses_worktrees {
        &task.branch
    } else {
        &task.repo_path
    }
}

async fn run_one_phase(engine: &Engine, mode: &Mode, phase: &Phase, task: &mut Task) -> PhaseOutcome {
    let run_id = run_history::log_run_start(&engine.pool, task.id, &phase.name, &task.repo_path)
        .await
        .ok();
    let started_at = engine.clock.now();

    let outcome = execute_phase_body(engine, mode, phase, task).await;

    if let Some(run_id) = run_id {
        let duration_s = (engine.clock.now() - started_at).num_milliseconds() as f64 / 1000.0;
        let (status, bytes_out, error_msg) = match &outcome {
            Ok(bytes) => (RunStatus::Done, *bytes, String::new()),
            Err((failure, bytes)) => (failure.run_status(), *bytes, failure.message()),
        };
        let _ = run_history::log_run_finish(
            &engine.pool,
            run_id,
            status.as_str(),
            duration_s,
            bytes_out,
            &error_msg,
        )
        .await;
    }

    match outcome {
        Ok(_bytes) => route_success(engine, phase, task).await,
        Err((failure, _bytes)) => route_failure(engine, phase, task, failure).await,
    }
}

/// Run the body of one phase: workspace prep, agent invocation (if any),
/// and post-run checks. Returns the number of bytes streamed either way,
/// paired with a [`Failure`] on the error path.
async fn execute_phase_body(
    engine: &Engine,
    mode: &Mode,
    phase: &Phase,
    task: &mut Task,
) -> Result<i64, (Failure, i64)> {
    // Step 1: prepare workspace.
    if mode.uses_worktrees && task.branch.is_empty() {
        match engine.vcs.create_worktree(&task.repo_path, task.id).await {
            Ok(workspace) => {
                task.branch = workspace.branch.clone();
                if let Err(e) = tasks::update_task_branch(&engine.pool, task.id, &workspace.branch).await {
                    return Err((Failure::Io(e.to_string()), 0));
                }
            }
            Err(e) => return Err((Failure::Phase(format!("failed to prepare workspace: {e}")), 0)),
        }
    }

    let mut bytes_out: i64 = 0;

    if phase.is_agent() {
        bytes_out = run_agent_turn(engine, mode, phase, task).await.map_err(|f| (f, 0))?;
    }

    if phase.role == PhaseRole::Rebase {
        let target = commit_target(mode, task).to_string();
        engine
            .vcs
            .rebase(&target, &phase.rebase_base)
            .await
            .map_err(|e| (Failure::Phase(format!("rebase failed: {e}")), bytes_out))?;
    }

    // Post-run checks, in the order §4.4 step 6 specifies.
    if let Some(artifact) = &phase.post_run.check_artifact {
        let workspace_dir = resolve_workspace_dir(engine, mode, task)
            .await
            .map_err(|e| (Failure::Phase(e.to_string()), bytes_out))?;
        if !workspace_dir.join(artifact).exists() {
            return Err((
                Failure::Phase(format!("expected artifact missing: {artifact}")),
                bytes_out,
            ));
        }
    }

    if phase.post_run.commits {
        let target = commit_target(mode, task).to_string();
        match engine.vcs.commit(&target, &phase.post_run.commit_message).await {
            Ok(outcome) if outcome.no_changes && !phase.post_run.allow_no_changes => {
                return Err((Failure::Phase("commit produced no changes".to_string()), bytes_out));
            }
            Ok(_) => {}
            Err(e) => return Err((Failure::Phase(format!("commit failed: {e}")), bytes_out)),
        }
    }

    if phase.post_run.runs_tests {
        let Some(test_cmd) = engine.config.test_cmd_for(&task.repo_path).map(str::to_string) else {
            return Err((
                Failure::Phase(format!("no test command configured for {}", task.repo_path)),
                bytes_out,
            ));
        };
        let outcome = engine
            .vcs
            .run_tests(&task.repo_path, &test_cmd)
            .await
            .map_err(|e| (Failure::Phase(format!("failed to run tests: {e}")), bytes_out))?;
        if outcome.exit_code != 0 {
            let combined = format!("{}\n{}", outcome.stdout, outcome.stderr);
            return Err((
                Failure::Test {
                    combined,
                    stdout: outcome.stdout,
                    stderr: outcome.stderr,
                },
                bytes_out,
            ));
        }
    }

    Ok(bytes_out)
}

/// Build the phase prompt per §4.4 step 2.
async fn build_prompt(engine: &Engine, phase: &Phase, task: &Task) -> String {
    let mut out = String::new();

    if let Some(prefix) = engine.repo_prompt_hook.get_repo_prompt(&task.repo_path).await {
        out.push_str("## Project Context\n");
        out.push_str(&prefix);
        out.push_str("\n---\n");
    }

    if phase.include_task_context {
        out.push_str(&format!(
            "Task #{}: {}\nDescription:\n{}\n\n",
            task.id, task.title, task.description
        ));
    }

    out.push_str(&phase.instruction);

    if phase.include_file_listing {
        let files = engine
            .vcs
            .list_tracked_files(&task.repo_path)
            .await
            .unwrap_or_default();
        out.push_str("\n\nTracked files:\n");
        out.push_str(&files.join("\n"));
    }

    if !task.last_error.is_empty() {
        if let Some(err_instruction) = &phase.error_instruction {
            out.push('\n');
            out.push('\n');
            out.push_str(&crate::modes::substitute_error(err_instruction, &task.last_error));
        }
    }

    out
}

async fn run_agent_turn(
    engine: &Engine,
    mode: &Mode,
    phase: &Phase,
    task: &mut Task,
) -> Result<i64, Failure> {
    let working_dir = resolve_workspace_dir(engine, mode, task)
        .await
        .map_err(|e| Failure::Phase(e.to_string()))?;

    let prompt = build_prompt(engine, phase, task).await;
    let session_id = if phase.fresh_session || task.session_id.is_empty() {
        None
    } else {
        Some(task.session_id.clone())
    };

    let config = AgentRunConfig {
        system_prompt: phase.system_prompt.clone(),
        allowed_tools: phase.allowed_tools.clone(),
        prompt,
        sandbox: phase.use_sandbox,
        session_id,
        timeout_s: engine.config.agent_timeout_s,
        working_dir,
    };

    let scanner = Arc::new(Mutex::new(SentinelScanner::new()));
    let bytes = Arc::new(AtomicU64::new(0));
    let task_id = task.id;
    let stream = engine.stream.clone();
    let scanner_cb = scanner.clone();
    let bytes_cb = bytes.clone();

    let on_line = Box::new(move |line: &str| {
        bytes_cb.fetch_add(line.len() as u64 + 1, Ordering::Relaxed);
        stream.broadcast(task_id, line);
        scanner_cb.lock().unwrap().feed(line);
    });

    let result = run_with_watchdog(engine, config, on_line).await;
    let bytes_out = bytes.load(Ordering::Relaxed) as i64;

    let outcome = match result {
        WatchdogResult::TimedOut(timeout_s) => return Err(Failure::Timeout(timeout_s)),
        WatchdogResult::Completed(Ok(outcome)) => outcome,
        WatchdogResult::Completed(Err(AgentRunnerError::SpawnFailed(msg))) => {
            return Err(Failure::Spawn(msg));
        }
        WatchdogResult::Completed(Err(AgentRunnerError::KilledByTimeout)) => {
            return Err(Failure::Timeout(engine.config.agent_timeout_s));
        }
        WatchdogResult::Completed(Err(AgentRunnerError::Io(msg))) => return Err(Failure::Io(msg)),
    };

    if let Some(new_session_id) = &outcome.new_session_id {
        if let Err(e) = tasks::set_task_session_id(&engine.pool, task.id, new_session_id).await {
            tracing::warn!(task_id = task.id, error = %e, "failed to persist agent session id");
        } else {
            task.session_id = new_session_id.clone();
        }
    }

    let scanner_guard = scanner.lock().unwrap();
    if let Some(body) = sentinel::extract_phase_result(&scanner_guard, &outcome.output) {
        push_phase_result(engine, task, &phase.name, &body).await;
    }
    drop(scanner_guard);

    Ok(bytes_out)
}

enum WatchdogResult {
    TimedOut(u64),
    Completed(Result<AgentOutcome, AgentRunnerError>),
}

/// Run the agent invocation under the watchdog described in §4.4: a
/// companion timer polls every second, sends a graceful-terminate signal
/// on deadline, waits [`SIGKILL_GRACE_S`] more seconds, then force-kills.
/// `timeout_s <= 0` disables the watchdog entirely.
async fn run_with_watchdog(
    engine: &Engine,
    config: AgentRunConfig,
    on_line: Box<dyn FnMut(&str) + Send>,
) -> WatchdogResult {
    let timeout_s = config.timeout_s;
    if timeout_s == 0 {
        return WatchdogResult::Completed(engine.agent_runner.run(config, on_line).await);
    }

    let done = Arc::new(AtomicBool::new(false));
    let fired = Arc::new(AtomicBool::new(false));

    let watchdog = {
        let done = done.clone();
        let fired = fired.clone();
        let runner = engine.agent_runner.clone();
        tokio::spawn(async move {
            for _ in 0..timeout_s {
                if done.load(Ordering::SeqCst) {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if done.load(Ordering::SeqCst) {
                return;
            }
            fired.store(true, Ordering::SeqCst);
            runner.kill().await;

            for _ in 0..SIGKILL_GRACE_S {
                if done.load(Ordering::SeqCst) {
                    return;
                }
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            if !done.load(Ordering::SeqCst) {
                runner.kill().await;
            }
        })
    };

    let result = engine.agent_runner.run(config, on_line).await;
    done.store(true, Ordering::SeqCst);
    let _ = watchdog.await;

    if fired.load(Ordering::SeqCst) {
        WatchdogResult::TimedOut(timeout_s)
    } else {
        WatchdogResult::Completed(result)
    }
}

/// Deliver a sentinel-extracted phase result to SSE and chat (§4.6).
async fn push_phase_result(engine: &Engine, task: &Task, phase_name: &str, body: &str) {
    let line = format!("[phase-result:{phase_name}] {body}");
    engine.stream.broadcast(task.id, &line);
    if !task.notify_chat.is_empty() {
        engine
            .chat
            .notify(&task.notify_chat, &sentinel::truncate_for_chat(body))
            .await;
    }
}

async fn route_success(engine: &Engine, phase: &Phase, task: &mut Task) -> PhaseOutcome {
    match &phase.next {
        NextPhase::Terminal(terminal) => {
            if let Err(e) = tasks::update_task_status(&engine.pool, task.id, terminal.as_str()).await {
                tracing::error!(task_id = task.id, error = %e, "failed to persist terminal status");
            } else {
                task.status = terminal.as_str().to_string();
            }
            tracing::info!(task_id = task.id, status = terminal.as_str(), "task reached terminal status");
            PhaseOutcome::Stopped
        }
        NextPhase::Phase(next_name) => {
            if let Err(e) = tasks::update_task_status(&engine.pool, task.id, next_name).await {
                tracing::error!(task_id = task.id, error = %e, "failed to persist phase advance");
                return PhaseOutcome::Stopped;
            }
            task.status = next_name.clone();
            task.retry_phase.clear();
            task.last_error.clear();
            PhaseOutcome::Advanced
        }
    }
}

async fn route_failure(engine: &Engine, phase: &Phase, task: &mut Task, failure: Failure) -> PhaseOutcome {
    if phase.has_qa_fix_routing {
        if let Failure::Test { stdout, stderr, combined } = &failure {
            if classify_test_failure(stderr, stdout) == TestFailureKind::TestFile {
                if let Err(e) = tasks::update_task_status(&engine.pool, task.id, "qa_fix").await {
                    tracing::error!(task_id = task.id, error = %e, "failed to route to qa_fix");
                    return PhaseOutcome::Stopped;
                }
                if let Err(e) = tasks::update_task_error(&engine.pool, task.id, combined).await {
                    tracing::error!(task_id = task.id, error = %e, "failed to persist qa_fix error");
                }
                task.status = "qa_fix".to_string();
                task.last_error = combined.clone();
                tracing::info!(task_id = task.id, "test failure classified as test_file, routed to qa_fix");
                return PhaseOutcome::Stopped;
            }
        }
    }

    let err_text = failure.message();
    if let Err(e) = retry::retry_or_dead_letter(
        &engine.pool,
        engine.chat.as_ref(),
        task.id,
        &task.notify_chat,
        &phase.name,
        &err_text,
    )
    .await
    {
        tracing::error!(task_id = task.id, error = %e, "retry/dead-letter routine failed");
    }

    PhaseOutcome::Stopped
}
