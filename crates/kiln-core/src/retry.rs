//! Backoff schedule, test-failure classification, and the retry /
//! dead-letter routine (§4.5).

use kiln_db::models::TerminalStatus;
use kiln_db::queries::tasks;
use sqlx::PgPool;

use crate::collaborators::Chat;
use crate::error::EngineResult;

/// `backoff(attempt)`: doubling delay with a ceiling, in seconds.
///
/// `attempt < 6` yields `60 * 2^attempt` (60, 120, 240, 480, 960, 1920);
/// `attempt >= 6` is clamped to the 3600s ceiling. Negative attempts (which
/// should not occur) are treated as 0.
pub fn backoff(attempt: i32) -> i64 {
    let attempt = attempt.max(0);
    if attempt < 6 {
        60 * 2i64.pow(attempt as u32)
    } else {
        3600
    }
}

/// Result of [`classify_test_failure`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestFailureKind {
    /// Failure looks like the agent authored a broken test, not broken code.
    TestFile,
    Code,
}

/// Classify a test failure by scanning `stderr` and `stdout` *independently*
/// (no cross-stream matching) for the patterns in §4.5. `TestFile` wins if
/// either stream alone satisfies any rule.
pub fn classify_test_failure(stderr: &str, stdout: &str) -> TestFailureKind {
    if stream_looks_like_test_file(stderr) || stream_looks_like_test_file(stdout) {
        TestFailureKind::TestFile
    } else {
        TestFailureKind::Code
    }
}

fn stream_looks_like_test_file(s: &str) -> bool {
    let has_error = s.contains("error:");
    (s.contains("_test") && has_error)
        || (s.contains("/tests/") && has_error)
        || s.contains("Segmentation fault")
        || (s.contains("panicked") && s.contains("_test"))
}

/// Retry / dead-letter routine (§4.5). Called on any non-success,
/// non-`qa_fix` phase failure, with `retry_phase` set to the phase that was
/// in flight when the failure occurred (so a subsequent `retry` dispatch
/// resumes there).
pub async fn retry_or_dead_letter(
    pool: &PgPool,
    chat: &dyn Chat,
    task_id: i64,
    notify_chat: &str,
    retry_phase: &str,
    err_text: &str,
) -> EngineResult<()> {
    tasks::update_task_error(pool, task_id, err_text).await?;
    let attempt = tasks::increment_task_attempt(pool, task_id).await?;
    let task = tasks::get_task(pool, task_id)
        .await
        .map_err(|e| crate::error::EngineError::Io(e.to_string()))?
        .ok_or(kiln_db::error::StoreError::TaskNotFound(task_id))?;

    if attempt >= task.max_attempts {
        tasks::update_task_status(pool, task_id, TerminalStatus::DeadLetter.as_str()).await?;
        tracing::warn!(
            task_id,
            attempt,
            "task exhausted retry budget, moved to dead_letter"
        );
        if !notify_chat.is_empty() {
            chat.notify(
                notify_chat,
                &crate::sentinel::truncate_for_chat(&format!(
                    "Task #{task_id} moved to dead-letter after {attempt} attempts: {err_text}"
                )),
            )
            .await;
        }
    } else {
        let delay = backoff(attempt);
        let retry_after = chrono::Utc::now() + chrono::Duration::seconds(delay);
        tasks::set_task_retry_after(pool, task_id, retry_phase, retry_after).await?;
        tracing::info!(task_id, attempt, delay, "task scheduled for retry");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_boundary_values() {
        assert_eq!(backoff(0), 60);
        assert_eq!(backoff(5), 1920);
        assert_eq!(backoff(6), 3600);
        assert_eq!(backoff(100), 3600);
    }

    #[test]
    fn backoff_is_always_a_positive_multiple_of_sixty_within_ceiling() {
        for attempt in 0..50 {
            let b = backoff(attempt);
            assert!(b > 0);
            assert_eq!(b % 60, 0);
            assert!(b <= 3600);
        }
    }

    #[test]
    fn classify_test_file_suffix_with_error() {
        assert_eq!(
            classify_test_failure("src/foo_test.zig:1:1: error: boom", ""),
            TestFailureKind::TestFile
        );
    }

    #[test]
    fn classify_tests_directory_with_error() {
        assert_eq!(
            classify_test_failure("", "tests/integration.rs:4: error: assertion failed"),
            TestFailureKind::TestFile
        );
    }

    #[test]
    fn classify_segfault_alone_is_sufficient() {
        assert_eq!(
            classify_test_failure("Segmentation fault (core dumped)", ""),
            TestFailureKind::TestFile
        );
    }

    #[test]
    fn classify_panicked_requires_test_cooccurrence() {
        assert_eq!(classify_test_failure("thread panicked", ""), TestFailureKind::Code);
        assert_eq!(
            classify_test_failure("foo_test.rs panicked at", ""),
            TestFailureKind::TestFile
        );
    }

    #[test]
    fn classify_falls_back_to_code() {
        assert_eq!(
            classify_test_failure("error: mismatched types", "compiling..."),
            TestFailureKind::Code
        );
    }

    #[test]
    fn classify_checks_streams_independently() {
        // "_test" in stdout, "error:" in stderr -- neither stream alone
        // satisfies rule 1, so this must not classify as test_file.
        assert_eq!(
            classify_test_failure("error: build failed", "ran foo_test"),
            TestFailureKind::Code
        );
    }
}
