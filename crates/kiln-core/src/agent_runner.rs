//! Default, minimal subprocess-based [`AgentRunner`] (§4.9): spawns a
//! configured command, writes the constructed prompt to its stdin, and
//! streams merged stdout/stderr lines to the phase executor's callback.
//! This makes the engine runnable end-to-end in tests and examples; it is
//! explicitly not a production LLM-sandbox integration.

use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::Mutex;

use crate::collaborators::{AgentOutcome, AgentRunConfig, AgentRunner, AgentRunnerError};

/// Spawns `command` (with `args`) for every phase. If the task carries a
/// `session_id`, it is forwarded as `--session-id <id>`; the phase's
/// constructed prompt is written to the child's stdin and the process's
/// stdin is then closed.
pub struct SubprocessAgentRunner {
    command: String,
    args: Vec<String>,
    child: Arc<Mutex<Option<Child>>>,
}

impl SubprocessAgentRunner {
    pub fn new(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            command: command.into(),
            args,
            child: Arc::new(Mutex::new(None)),
        }
    }
}

#[async_trait]
impl AgentRunner for SubprocessAgentRunner {
    async fn run(
        &self,
        config: AgentRunConfig,
        mut on_line: Box<dyn FnMut(&str) + Send>,
    ) -> Result<AgentOutcome, AgentRunnerError> {
        let mut args = self.args.clone();
        if let Some(session_id) = &config.session_id {
            args.push("--session-id".to_string());
            args.push(session_id.clone());
        }

        let mut child = Command::new(&self.command)
            .args(&args)
            .current_dir(&config.working_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AgentRunnerError::SpawnFailed(e.to_string()))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(config.prompt.as_bytes())
                .await
                .map_err(|e| AgentRunnerError::Io(e.to_string()))?;
        }

        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");

        *self.child.lock().await = Some(child);

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
        let tx_err = tx.clone();

        let stdout_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).is_err() {
                    break;
                }
            }
        });
        let stderr_task = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx_err.send(line).is_err() {
                    break;
                }
            }
        });

        let mut output = String::new();
        while let Some(line) = rx.recv().await {
            on_line(&line);
            output.push_str(&line);
            output.push('\n');
        }
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        let mut guard = self.child.lock().await;
        if let Some(mut child) = guard.take() {
            let status = child
                .wait()
                .await
                .map_err(|e| AgentRunnerError::Io(e.to_string()))?;
            if !status.success() {
                tracing::warn!(status = ?status, "agent process exited non-zero");
            }
        }

        Ok(AgentOutcome {
            output,
            new_session_id: None,
        })
    }

    async fn kill(&self) {
        if let Some(child) = self.child.lock().await.as_mut() {
            let _ = child.start_kill();
        }
    }
}
