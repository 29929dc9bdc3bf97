//! Tick-based dispatcher (§4.3): one dispatcher tick fetches the active,
//! priority-sorted task list and spawns one worker per task it can afford,
//! gating strictly on capacity before in-flight membership.

use std::sync::atomic::Ordering;

use futures::FutureExt;
use kiln_db::queries::tasks;

use crate::Engine;
use crate::phase_executor;

/// Run one dispatcher tick: fetch eligible tasks, apply the capacity and
/// in-flight gates in order, and spawn a worker for everything that passes.
///
/// Mirrors §4.3 exactly: the capacity check comes first and `break`s the
/// whole iteration (not just skips this task) once `active_workers` reaches
/// `max_workers`, so a full queue behind a capacity wall isn't repeatedly
/// walked every tick.
pub async fn tick(engine: &Engine) {
    let statuses: Vec<String> = engine.registry.active_statuses().into_iter().collect();
    let priority = engine.registry.status_priority();

    // The store can't express mode priority in its own ORDER BY (see
    // `kiln_db::queries::tasks::get_next_task`'s comment); pull everything
    // eligible and sort here before dispatching.
    let mut eligible = match tasks::get_active_tasks(&engine.pool, &statuses, i64::MAX).await {
        Ok(tasks) => tasks,
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch active tasks");
            return;
        }
    };
    tasks::sort_by_priority(&mut eligible, &priority);

    for task in eligible {
        if engine.active_worker_count() >= engine.config.max_workers {
            break;
        }

        {
            let mut inflight = engine.inflight.lock().unwrap();
            if inflight.contains(&task.id) {
                continue;
            }
            inflight.insert(task.id);
        }

        if let Err(e) = tasks::mark_dispatched(&engine.pool, task.id).await {
            tracing::error!(task_id = task.id, error = %e, "failed to mark task dispatched");
            engine.inflight.lock().unwrap().remove(&task.id);
            continue;
        }

        engine.active_workers.fetch_add(1, Ordering::SeqCst);

        let worker_engine = engine.clone();
        let task_id = task.id;
        tokio::spawn(async move {
            dispatch(worker_engine, task).await;
            tracing::debug!(task_id, "worker finished");
        });
    }
}

/// Run the phase executor for `task`, then release its in-flight/dispatched
/// bookkeeping unconditionally -- including if the worker panics, so one
/// broken task can't wedge the scheduler's capacity accounting.
async fn dispatch(engine: Engine, task: kiln_db::models::Task) {
    let task_id = task.id;

    let run = std::panic::AssertUnwindSafe(phase_executor::run_task(engine.clone(), task));
    if let Err(panic) = run.catch_unwind().await {
        let msg = panic
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        tracing::error!(task_id, panic = %msg, "worker panicked");
    }

    if let Err(e) = tasks::clear_dispatched(&engine.pool, task_id).await {
        tracing::warn!(task_id, error = %e, "failed to clear dispatched flag");
    }
    engine.inflight.lock().unwrap().remove(&task_id);
    engine.active_workers.fetch_sub(1, Ordering::SeqCst);
}

/// Configured polling/shutdown loop: tick at `tick_interval_s` cadence until
/// [`Engine::stop_requested`]. Clears any stale `dispatched_at` flags left
/// over from a prior process (§4.1) before the first tick.
pub async fn run(engine: Engine) {
    if let Err(e) = tasks::clear_all_dispatched(&engine.pool).await {
        tracing::error!(error = %e, "failed to clear stale dispatched flags at startup");
    }

    let interval = std::time::Duration::from_secs(engine.config.tick_interval_s.max(1));
    loop {
        if engine.stop_requested() {
            tracing::info!("scheduler observed stop request, exiting tick loop");
            break;
        }
        tick(&engine).await;
        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{AgentOutcome, AgentRunConfig, AgentRunnerError, Chat, Vcs, Workspace};
    use crate::config::PipelineConfig;
    use crate::modes::ModeRegistry;
    use async_trait::async_trait;
    use kiln_test_utils::{create_test_db, drop_test_db};
    use std::sync::Arc;

    struct NoopRunner;

    #[async_trait]
    impl crate::collaborators::AgentRunner for NoopRunner {
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
        async fn kill(&self) {}
    }

    struct NoopVcs;

    #[async_trait]
    impl Vcs for NoopVcs {
        async fn create_worktree(&self, _repo: &str, task_id: i64) -> anyhow::Result<Workspace> {
            Ok(Workspace {
                branch: format!("task-{task_id}"),
                path: std::path::PathBuf::from("/tmp"),
            })
        }
        async fn workspace_path(&self, _branch: &str) -> anyhow::Result<std::path::PathBuf> {
            Ok(std::path::PathBuf::from("/tmp"))
        }
        async fn commit(&self, _branch: &str, _message: &str) -> anyhow::Result<crate::collaborators::CommitOutcome> {
            Ok(crate::collaborators::CommitOutcome {
                ok: true,
                no_changes: true,
            })
        }
        async fn run_tests(&self, _repo: &str, _cmd: &str) -> anyhow::Result<crate::collaborators::RunOutcome> {
            Ok(crate::collaborators::RunOutcome {
                stdout: String::new(),
                stderr: String::new(),
                exit_code: 0,
            })
        }
        async fn rebase(&self, _branch: &str, _base: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn open_pr(&self, _branch: &str, _title: &str) -> anyhow::Result<()> {
            Ok(())
        }
        async fn list_tracked_files(&self, _repo: &str) -> anyhow::Result<Vec<String>> {
            Ok(vec![])
        }
    }

    struct NoopChat;

    #[async_trait]
    impl Chat for NoopChat {
        async fn notify(&self, _target: &str, _message: &str) {}
    }

    #[tokio::test]
    async fn capacity_gate_stops_dispatch_before_inflight_check() {
        let (pool, db_name) = create_test_db().await;

        let mut config = PipelineConfig::default();
        config.max_workers = 1;
        config.pipeline_repo = "/tmp/repo".to_string();
        config.pipeline_test_cmd = "true".to_string();

        let engine = Engine::new(
            pool.clone(),
            Arc::new(ModeRegistry::new()),
            Arc::new(NoopRunner),
            Arc::new(NoopVcs),
            Arc::new(NoopChat),
            config,
        );

        for i in 0..3 {
            tasks::create_task(
                &pool,
                &format!("task {i}"),
                "",
                "/tmp/repo",
                "legal",
                "intake",
                3,
                "chat",
                "",
            )
            .await
            .unwrap();
        }

        engine.active_workers.store(1, Ordering::SeqCst);
        tick(&engine).await;

        // max_workers == 1 and active_workers already at 1: the capacity
        // gate must fire before any task is even inflight-checked.
        assert_eq!(engine.active_worker_count(), 1);
        assert!(engine.inflight.lock().unwrap().is_empty());

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn inflight_task_is_skipped_not_redispatched() {
        let (pool, db_name) = create_test_db().await;

        let mut config = PipelineConfig::default();
        config.max_workers = 4;

        let engine = Engine::new(
            pool.clone(),
            Arc::new(ModeRegistry::new()),
            Arc::new(NoopRunner),
            Arc::new(NoopVcs),
            Arc::new(NoopChat),
            config,
        );

        let task = tasks::create_task(&pool, "t", "", "/tmp/repo", "legal", "intake", 3, "chat", "")
            .await
            .unwrap();
        engine.inflight.lock().unwrap().insert(task.id);

        tick(&engine).await;

        assert_eq!(engine.active_worker_count(), 0);
        assert!(!tasks::is_dispatched(&pool, task.id).await.unwrap());

        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn clear_all_dispatched_runs_before_first_tick_in_run_loop_setup() {
        let (pool, db_name) = create_test_db().await;
        let task = tasks::create_task(&pool, "t", "", "/tmp/repo", "legal", "intake", 3, "chat", "")
            .await
            .unwrap();
        tasks::mark_dispatched(&pool, task.id).await.unwrap();
        assert!(tasks::is_dispatched(&pool, task.id).await.unwrap());

        tasks::clear_all_dispatched(&pool).await.unwrap();
        assert!(!tasks::is_dispatched(&pool, task.id).await.unwrap());

        drop_test_db(&db_name).await;
    }
}
