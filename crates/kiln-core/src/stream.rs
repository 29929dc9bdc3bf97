//! Per-task stream fan-out and bounded history ring (§4.7).
//!
//! Every task gets a live SSE feed plus a capped in-memory replay buffer.
//! History admission and live delivery are independent: a line that does
//! not fit in history is still pushed to connected clients.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::mpsc;

/// Upper bound, in bytes, on a task's retained history -- SSE frame
/// overhead included. Enforced with a strict `<` admission rule: a line
/// that would land exactly on the cap (or over it) is dropped from
/// history, though live subscribers still receive it.
pub const HIST_CAP: usize = 2 * 1024 * 1024;

/// Frame one line of agent output as an SSE `data:` event. Adds exactly 8
/// bytes of overhead (`"data: "` + `"\n\n"`).
fn frame(line: &str) -> String {
    format!("data: {line}\n\n")
}

struct TaskStream {
    history: String,
    clients: Vec<mpsc::UnboundedSender<String>>,
}

impl TaskStream {
    fn new() -> Self {
        Self {
            history: String::new(),
            clients: Vec::new(),
        }
    }
}

/// Fan-out hub for every task's live agent output plus the history replay
/// new subscribers see on connect. Per-entry locking (a single `Mutex`
/// around each task's history and client set) so writers to different
/// tasks never contend.
#[derive(Default)]
pub struct StreamFanOut {
    tasks: Mutex<HashMap<i64, TaskStream>>,
}

impl StreamFanOut {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `line` to `task_id`'s history (subject to the `HIST_CAP`
    /// admission rule above) and push the framed line to every live
    /// subscriber. A send that fails (the client disconnected) removes
    /// that client from the set; it never panics or blocks the writer.
    pub fn broadcast(&self, task_id: i64, line: &str) {
        let framed = frame(line);
        let mut tasks = self.tasks.lock().unwrap();
        let stream = tasks.entry(task_id).or_insert_with(TaskStream::new);

        if stream.history.len() + framed.len() < HIST_CAP {
            stream.history.push_str(&framed);
        }

        stream.clients.retain(|tx| tx.send(framed.clone()).is_ok());
    }

    /// Subscribe to `task_id`'s stream: returns the current history replay
    /// followed by a receiver for everything broadcast from this point on.
    pub fn subscribe(&self, task_id: i64) -> (String, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut tasks = self.tasks.lock().unwrap();
        let stream = tasks.entry(task_id).or_insert_with(TaskStream::new);
        stream.clients.push(tx);
        (stream.history.clone(), rx)
    }
}
