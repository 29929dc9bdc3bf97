//! Queue store query functions for the `tasks` table.

use std::collections::HashMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::error::{StoreError, StoreResult};
use crate::models::{Task, TaskStats, TerminalStatus};

/// Insert a new task, defaulting `status` to the mode's entry phase.
///
/// `created_by` and `notify_chat` identify the collaborator-side origin of
/// the task (e.g. a chat JID); both default to `""` when absent, matching
/// the "`""` when unset" convention used throughout the table.
#[allow(clippy::too_many_arguments)]
pub async fn create_task(
    pool: &PgPool,
    title: &str,
    description: &str,
    repo_path: &str,
    mode: &str,
    entry_status: &str,
    max_attempts: i32,
    created_by: &str,
    notify_chat: &str,
) -> Result<Task> {
    let task = sqlx::query_as::<_, Task>(
        "INSERT INTO tasks \
            (title, description, repo_path, mode, status, max_attempts, created_by, notify_chat) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(title)
    .bind(description)
    .bind(repo_path)
    .bind(mode)
    .bind(entry_status)
    .bind(max_attempts)
    .bind(created_by)
    .bind(notify_chat)
    .fetch_one(pool)
    .await
    .context("failed to insert task")?;

    Ok(task)
}

/// Fetch a single task by id.
pub async fn get_task(pool: &PgPool, id: i64) -> Result<Option<Task>> {
    let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch task")?;

    Ok(task)
}

/// Fetch up to `limit` tasks whose status is one of `statuses` and whose
/// `retry_after` has either elapsed or was never set.
///
/// Rows come back ordered by arrival (`created_at ASC`); callers that need
/// mode-defined priority ordering should run the result through
/// [`sort_by_priority`], keeping the priority comparator itself (a concern
/// of the mode registry) out of this crate.
pub async fn get_active_tasks(
    pool: &PgPool,
    statuses: &[String],
    limit: i64,
) -> Result<Vec<Task>> {
    let tasks = sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks \
         WHERE status = ANY($1) AND (retry_after IS NULL OR retry_after <= now()) \
         ORDER BY created_at ASC \
         LIMIT $2",
    )
    .bind(statuses)
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to fetch active tasks")?;

    Ok(tasks)
}

/// Stable-sort `tasks` by ascending priority (lower value dispatched first),
/// keeping arrival order (`created_at ASC`, already the incoming order) as
/// the tiebreak.
///
/// `priority` maps a status name to an integer priority; a status absent
/// from the map sorts as if it had priority 0.
pub fn sort_by_priority(tasks: &mut [Task], priority: &HashMap<String, i32>) {
    tasks.sort_by_key(|t| priority.get(&t.status).copied().unwrap_or(0));
}

/// Fetch and sort the active task list in one call, applying `priority`.
///
/// The database cannot express the mode's priority ordering in its own
/// `ORDER BY`, so this pulls every eligible row (no `LIMIT`) and sorts in
/// memory before taking the head — the "limit 1" in the store contract
/// describes the result, not the query plan.
pub async fn get_next_task(
    pool: &PgPool,
    statuses: &[String],
    priority: &HashMap<String, i32>,
) -> Result<Option<Task>> {
    let mut tasks = get_active_tasks(pool, statuses, i64::MAX).await?;
    sort_by_priority(&mut tasks, priority);
    Ok(tasks.into_iter().next())
}

/// Count tasks matching exactly the [`get_active_tasks`] predicate: status
/// in `statuses` and `retry_after` either unset or already elapsed.
pub async fn get_active_task_count(pool: &PgPool, statuses: &[String]) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM tasks \
         WHERE status = ANY($1) AND (retry_after IS NULL OR retry_after <= now())",
    )
    .bind(statuses)
    .fetch_one(pool)
    .await
    .context("failed to count active tasks")?;

    Ok(count)
}

fn require_row(result: sqlx::postgres::PgQueryResult, id: i64) -> StoreResult<()> {
    if result.rows_affected() == 0 {
        return Err(StoreError::TaskNotFound(id));
    }
    Ok(())
}

/// Set `status` unconditionally. Also clears `retry_after` and
/// `retry_phase`, since a direct status write supersedes any pending retry.
pub async fn update_task_status(pool: &PgPool, id: i64, status: &str) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks SET status = $1, retry_after = NULL, retry_phase = '' WHERE id = $2",
    )
    .bind(status)
    .bind(id)
    .execute(pool)
    .await?;

    require_row(result, id)
}

/// Record the branch a phase created or operated on.
pub async fn update_task_branch(pool: &PgPool, id: i64, branch: &str) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET branch = $1 WHERE id = $2")
        .bind(branch)
        .bind(id)
        .execute(pool)
        .await?;

    require_row(result, id)
}

/// Record the most recent failure message.
pub async fn update_task_error(pool: &PgPool, id: i64, last_error: &str) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET last_error = $1 WHERE id = $2")
        .bind(last_error)
        .bind(id)
        .execute(pool)
        .await?;

    require_row(result, id)
}

/// Record the agent session id used for the current phase attempt.
pub async fn set_task_session_id(pool: &PgPool, id: i64, session_id: &str) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET session_id = $1 WHERE id = $2")
        .bind(session_id)
        .bind(id)
        .execute(pool)
        .await?;

    require_row(result, id)
}

/// Increment the attempt counter by one and return the new value.
pub async fn increment_task_attempt(pool: &PgPool, id: i64) -> StoreResult<i32> {
    let row: Option<(i32,)> =
        sqlx::query_as("UPDATE tasks SET attempt = attempt + 1 WHERE id = $1 RETURNING attempt")
            .bind(id)
            .fetch_optional(pool)
            .await?;

    row.map(|(attempt,)| attempt)
        .ok_or(StoreError::TaskNotFound(id))
}

/// Schedule a retry: set `status` to the `retry` pseudo-status, remember
/// which phase to resume in `retry_phase`, and set `retry_after` to the
/// backoff deadline.
pub async fn set_task_retry_after(
    pool: &PgPool,
    id: i64,
    retry_phase: &str,
    retry_after: DateTime<Utc>,
) -> StoreResult<()> {
    let result = sqlx::query(
        "UPDATE tasks SET status = 'retry', retry_phase = $1, retry_after = $2 WHERE id = $3",
    )
    .bind(retry_phase)
    .bind(retry_after)
    .bind(id)
    .execute(pool)
    .await?;

    require_row(result, id)
}

/// Mark a task as currently dispatched to a worker. Leaves `retry_after`
/// untouched, since dispatch and backoff are independent concerns.
pub async fn mark_dispatched(pool: &PgPool, id: i64) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET dispatched_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    require_row(result, id)
}

/// Clear the dispatched marker once a worker has finished with the task.
pub async fn clear_dispatched(pool: &PgPool, id: i64) -> StoreResult<()> {
    let result = sqlx::query("UPDATE tasks SET dispatched_at = NULL WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    require_row(result, id)
}

/// Whether a task is currently marked as dispatched.
pub async fn is_dispatched(pool: &PgPool, id: i64) -> Result<bool> {
    let row: Option<(Option<DateTime<Utc>>,)> =
        sqlx::query_as("SELECT dispatched_at FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await
            .context("failed to check dispatch state")?;

    Ok(row.and_then(|(ts,)| ts).is_some())
}

/// Clear every dispatched marker. Used on scheduler startup to recover from
/// a crash that left tasks stuck mid-dispatch.
pub async fn clear_all_dispatched(pool: &PgPool) -> Result<u64> {
    let result =
        sqlx::query("UPDATE tasks SET dispatched_at = NULL WHERE dispatched_at IS NOT NULL")
            .execute(pool)
            .await
            .context("failed to clear dispatched markers")?;

    Ok(result.rows_affected())
}

/// Requeue a dead-lettered task back to `entry_status` with a fresh attempt
/// budget. A no-op, not an error, if the task is not currently
/// `dead_letter` or does not exist.
pub async fn requeue_dead_letter(
    pool: &PgPool,
    id: i64,
    entry_status: &str,
    max_attempts: i32,
) -> Result<bool> {
    let result = sqlx::query(
        "UPDATE tasks SET \
            status = $1, \
            attempt = 0, \
            max_attempts = $2, \
            last_error = '', \
            retry_after = NULL, \
            retry_phase = '', \
            dispatched_at = NULL \
         WHERE id = $3 AND status = $4",
    )
    .bind(entry_status)
    .bind(max_attempts)
    .bind(id)
    .bind(TerminalStatus::DeadLetter.as_str())
    .execute(pool)
    .await
    .context("failed to requeue dead-lettered task")?;

    Ok(result.rows_affected() > 0)
}

/// List every task currently in the `dead_letter` status.
pub async fn get_dead_letter_tasks(pool: &PgPool) -> Result<Vec<Task>> {
    let tasks =
        sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE status = $1 ORDER BY created_at ASC")
            .bind(TerminalStatus::DeadLetter.as_str())
            .fetch_all(pool)
            .await
            .context("failed to list dead-letter tasks")?;

    Ok(tasks)
}

/// Aggregate task counts for the stats surface.
///
/// `active` counts every task not yet in a terminal status (including the
/// `retry` pseudo-status); `failed` counts both `failed` and `dead_letter`.
pub async fn get_stats(pool: &PgPool) -> Result<TaskStats> {
    let row: (i64, i64, i64, i64) = sqlx::query_as(
        "SELECT \
            COUNT(*), \
            COUNT(*) FILTER (WHERE status NOT IN ('done', 'merged', 'failed', 'dead_letter')), \
            COUNT(*) FILTER (WHERE status = 'merged'), \
            COUNT(*) FILTER (WHERE status IN ('failed', 'dead_letter')) \
         FROM tasks",
    )
    .fetch_one(pool)
    .await
    .context("failed to compute task stats")?;

    Ok(TaskStats {
        total: row.0,
        active: row.1,
        merged: row.2,
        failed: row.3,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn task_with(status: &str, created_at: DateTime<Utc>) -> Task {
        Task {
            id: 1,
            title: "t".to_string(),
            description: String::new(),
            repo_path: "/tmp/repo".to_string(),
            mode: "software-engineering".to_string(),
            status: status.to_string(),
            branch: String::new(),
            session_id: String::new(),
            attempt: 0,
            max_attempts: 3,
            last_error: String::new(),
            retry_after: None,
            retry_phase: String::new(),
            dispatched_at: None,
            created_by: String::new(),
            notify_chat: String::new(),
            created_at,
        }
    }

    #[test]
    fn sort_by_priority_orders_ascending_and_keeps_ties_stable() {
        let now = Utc::now();
        let mut tasks = vec![
            task_with("spec", now),
            task_with("impl", now),
            task_with("qa", now),
        ];
        let mut priority = HashMap::new();
        priority.insert("spec".to_string(), 5);
        priority.insert("qa".to_string(), 2);
        priority.insert("impl".to_string(), 0);

        sort_by_priority(&mut tasks, &priority);

        let statuses: Vec<&str> = tasks.iter().map(|t| t.status.as_str()).collect();
        assert_eq!(statuses, vec!["impl", "qa", "spec"]);
    }

    #[test]
    fn sort_by_priority_defaults_unknown_status_to_zero() {
        let now = Utc::now();
        let mut tasks = vec![task_with("unknown", now), task_with("backlog", now)];
        let mut priority = HashMap::new();
        priority.insert("backlog".to_string(), -1);

        sort_by_priority(&mut tasks, &priority);

        assert_eq!(tasks[0].status, "backlog");
        assert_eq!(tasks[1].status, "unknown");
    }
}
