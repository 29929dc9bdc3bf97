//! `kiln task` and `kiln dead-letter` subcommands: thin wrappers over the
//! queue store (§4.1), resolving a task's mode through the [`ModeRegistry`]
//! for its default `max_attempts` and initial status.

use anyhow::{Context, Result, bail};
use sqlx::PgPool;

use kiln_core::modes::ModeRegistry;
use kiln_db::models::Task;
use kiln_db::queries::tasks;

fn print_task_row(task: &Task) {
    println!(
        "#{id}  {status:<12} attempt {attempt}/{max_attempts}  {title}",
        id = task.id,
        status = task.status,
        attempt = task.attempt,
        max_attempts = task.max_attempts,
        title = task.title,
    );
}

fn print_task_detail(task: &Task) {
    println!("Task #{}", task.id);
    println!("  title:        {}", task.title);
    println!("  description:  {}", task.description);
    println!("  repo_path:    {}", task.repo_path);
    println!("  mode:         {}", task.mode);
    println!("  status:       {}", task.status);
    println!("  branch:       {}", task.branch);
    println!("  session_id:   {}", task.session_id);
    println!("  attempt:      {}/{}", task.attempt, task.max_attempts);
    println!(
        "  retry_after:  {}",
        task.retry_after
            .map(|t| t.to_rfc3339())
            .unwrap_or_default()
    );
    println!("  last_error:   {}", task.last_error);
    println!("  created_by:   {}", task.created_by);
    println!("  notify_chat:  {}", task.notify_chat);
    println!("  created_at:   {}", task.created_at.to_rfc3339());
}

/// `kiln task create`.
#[allow(clippy::too_many_arguments)]
pub async fn run_create(
    pool: &PgPool,
    registry: &ModeRegistry,
    title: &str,
    description: &str,
    repo_path: &str,
    mode_name: &str,
    created_by: &str,
    notify_chat: &str,
) -> Result<()> {
    let mode = registry
        .get(mode_name)
        .with_context(|| format!("unknown mode: {mode_name}"))?;

    let task = tasks::create_task(
        pool,
        title,
        description,
        repo_path,
        mode_name,
        &mode.initial_status,
        mode.default_max_attempts,
        created_by,
        notify_chat,
    )
    .await?;

    println!("Created task #{} (mode {mode_name}, status {})", task.id, task.status);
    Ok(())
}

/// `kiln task list`.
pub async fn run_list(pool: &PgPool, registry: &ModeRegistry) -> Result<()> {
    let statuses: Vec<String> = registry.active_statuses().into_iter().collect();
    let mut active = tasks::get_active_tasks(pool, &statuses, i64::MAX).await?;
    let priority = registry.status_priority();
    tasks::sort_by_priority(&mut active, &priority);

    if active.is_empty() {
        println!("No active tasks.");
        return Ok(());
    }
    for task in &active {
        print_task_row(task);
    }
    Ok(())
}

/// `kiln task show <id>`.
pub async fn run_show(pool: &PgPool, id: i64) -> Result<()> {
    let task = tasks::get_task(pool, id)
        .await?
        .with_context(|| format!("task {id} not found"))?;
    print_task_detail(&task);
    Ok(())
}

/// `kiln task requeue <id>`: reset a dead-lettered task back to its mode's
/// initial active status with a fresh attempt budget. Errors (rather than
/// silently no-op'ing, as the underlying store call does) when the task is
/// not currently dead-lettered, since a CLI operator issuing this command
/// expects to be told why nothing happened.
pub async fn run_requeue(pool: &PgPool, registry: &ModeRegistry, id: i64) -> Result<()> {
    let task = tasks::get_task(pool, id)
        .await?
        .with_context(|| format!("task {id} not found"))?;
    let mode = registry
        .get(&task.mode)
        .with_context(|| format!("unknown mode: {}", task.mode))?;

    let requeued = tasks::requeue_dead_letter(
        pool,
        id,
        &mode.initial_status,
        mode.default_max_attempts,
    )
    .await?;

    if !requeued {
        bail!("task #{id} is not dead-lettered (status: {})", task.status);
    }

    println!("Task #{id} requeued to {}", mode.initial_status);
    Ok(())
}

/// `kiln dead-letter list`.
pub async fn run_dead_letter_list(pool: &PgPool) -> Result<()> {
    let tasks = tasks::get_dead_letter_tasks(pool).await?;
    if tasks.is_empty() {
        println!("No dead-lettered tasks.");
        return Ok(());
    }
    for task in &tasks {
        println!("#{id}  {title}  ({error})", id = task.id, title = task.title, error = task.last_error);
    }
    Ok(())
}

/// `kiln stats`.
pub async fn run_stats(pool: &PgPool) -> Result<()> {
    let stats = tasks::get_stats(pool).await?;
    println!("total:  {}", stats.total);
    println!("active: {}", stats.active);
    println!("merged: {}", stats.merged);
    println!("failed: {}", stats.failed);
    Ok(())
}
