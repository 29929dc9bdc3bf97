//! Default [`Chat`] implementation (§4.9, §10.6): logs every notification
//! and republishes it on a broadcast channel so the web layer's
//! `/stream/chat` SSE endpoint has something to subscribe to. A real
//! Telegram/Discord/WhatsApp front-end is out of scope for this crate; this
//! stands in for it the same way [`crate::agent_runner::SubprocessAgentRunner`]
//! stands in for a real sandboxed agent runtime.

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::collaborators::Chat;

/// Capacity of the broadcast channel. A slow or absent subscriber just
/// misses old notifications past this depth; `notify` itself never blocks
/// on a reader.
const CHANNEL_CAPACITY: usize = 256;

/// Broadcasts every [`Chat::notify`] call to any number of SSE subscribers,
/// in addition to logging it. `target` and `message` are joined into one
/// line (`"{target}: {message}"`) since the broadcast channel carries plain
/// strings, not structured events.
pub struct BroadcastChat {
    tx: broadcast::Sender<String>,
}

impl BroadcastChat {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to future chat notifications. Does not replay history --
    /// unlike the per-task stream fan-out (§4.7), chat notifications have
    /// no bounded-history requirement in the spec.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastChat {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Chat for BroadcastChat {
    async fn notify(&self, target: &str, message: &str) {
        let line = format!("{target}: {message}");
        tracing::info!(target = target, "chat notification");
        // An error here just means there are currently no subscribers;
        // notify is best-effort and never fails the caller.
        let _ = self.tx.send(line);
    }
}
