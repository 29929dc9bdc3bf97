//! Query functions for the append-only `run_history` table.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{RunHistoryEntry, RunStats};

/// Insert a `running` row for a phase attempt and return its id.
pub async fn log_run_start(pool: &PgPool, task_id: i64, phase: &str, repo_path: &str) -> Result<i64> {
    let id: (i64,) = sqlx::query_as(
        "INSERT INTO run_history (task_id, phase, repo_path, status) \
         VALUES ($1, $2, $3, 'running') \
         RETURNING id",
    )
    .bind(task_id)
    .bind(phase)
    .bind(repo_path)
    .fetch_one(pool)
    .await
    .context("failed to log run start")?;

    Ok(id.0)
}

/// Close out a run-history row with its final status, duration, and byte
/// count. A silent no-op if `id` does not name an existing row.
pub async fn log_run_finish(
    pool: &PgPool,
    id: i64,
    status: &str,
    duration_s: f64,
    bytes_out: i64,
    error_msg: &str,
) -> Result<()> {
    sqlx::query(
        "UPDATE run_history \
         SET status = $1, finished_at = now(), duration_s = $2, bytes_out = $3, error_msg = $4 \
         WHERE id = $5",
    )
    .bind(status)
    .bind(duration_s)
    .bind(bytes_out)
    .bind(error_msg)
    .bind(id)
    .execute(pool)
    .await
    .context("failed to log run finish")?;

    Ok(())
}

/// Fetch the most recent runs, most recent first.
///
/// `status` filters to an exact string match when given; an unrecognized
/// filter value simply yields no rows, matching plain SQL equality.
pub async fn get_recent_runs(
    pool: &PgPool,
    status: Option<&str>,
    limit: i64,
) -> Result<Vec<RunHistoryEntry>> {
    let rows = match status {
        Some(status) => {
            sqlx::query_as::<_, RunHistoryEntry>(
                "SELECT * FROM run_history WHERE status = $1 \
                 ORDER BY started_at DESC, id DESC LIMIT $2",
            )
            .bind(status)
            .bind(limit)
            .fetch_all(pool)
            .await
        }
        None => {
            sqlx::query_as::<_, RunHistoryEntry>(
                "SELECT * FROM run_history ORDER BY started_at DESC, id DESC LIMIT $1",
            )
            .bind(limit)
            .fetch_all(pool)
            .await
        }
    }
    .context("failed to fetch recent runs")?;

    Ok(rows)
}

/// Aggregate run statistics. `avg_duration_s` is computed only over rows
/// that have finished (i.e. excludes `running`).
pub async fn get_run_stats(pool: &PgPool) -> Result<RunStats> {
    let row: (i64, i64, i64, i64, Option<f64>, Option<i64>) = sqlx::query_as(
        "SELECT \
            COUNT(*), \
            COUNT(*) FILTER (WHERE status = 'done'), \
            COUNT(*) FILTER (WHERE status IN ('failed', 'error')), \
            COUNT(*) FILTER (WHERE status = 'running'), \
            AVG(duration_s) FILTER (WHERE status != 'running'), \
            SUM(bytes_out) \
         FROM run_history",
    )
    .fetch_one(pool)
    .await
    .context("failed to compute run stats")?;

    Ok(RunStats {
        total: row.0,
        done: row.1,
        failed: row.2,
        running: row.3,
        avg_duration_s: row.4.unwrap_or(0.0),
        total_bytes_out: row.5.unwrap_or(0),
    })
}
