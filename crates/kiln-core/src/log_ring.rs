//! Fixed-capacity ring buffer mirroring formatted `tracing` events, so the
//! web surface can expose recent log lines without re-reading the
//! process's stdout (§4.8, §10.1).

use std::sync::{Arc, Mutex};

use tracing_subscriber::layer::{Context, Layer};

pub const LOG_RING_SIZE: usize = 500;
pub const LOG_MSG_CAP: usize = 512;
const LOG_LEVEL_CAP: usize = 8;

#[derive(Debug, Clone, serde::Serialize)]
pub struct LogEntry {
    pub level: String,
    pub message: String,
}

struct Inner {
    buf: Vec<Option<LogEntry>>,
    head: usize,
    count: usize,
}

/// Fixed `LOG_RING_SIZE`-slot ring buffer. Pushes never panic: both the
/// level and message are silently truncated to their byte caps, and an
/// empty message is a normal push rather than a special case.
pub struct LogRingBuffer {
    inner: Mutex<Inner>,
}

impl LogRingBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                buf: vec![None; LOG_RING_SIZE],
                head: 0,
                count: 0,
            }),
        }
    }

    pub fn push(&self, level: &str, message: &str) {
        let level = truncate_bytes(level, LOG_LEVEL_CAP);
        let message = truncate_bytes(message, LOG_MSG_CAP);

        let mut inner = self.inner.lock().unwrap();
        let head = inner.head;
        inner.buf[head] = Some(LogEntry { level, message });
        inner.head = (head + 1) % LOG_RING_SIZE;
        inner.count = (inner.count + 1).min(LOG_RING_SIZE);
    }

    /// Snapshot of currently retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<LogEntry> {
        let inner = self.inner.lock().unwrap();
        let start = if inner.count < LOG_RING_SIZE {
            0
        } else {
            inner.head
        };

        (0..inner.count)
            .filter_map(|i| inner.buf[(start + i) % LOG_RING_SIZE].clone())
            .collect()
    }

    #[cfg(test)]
    fn head_and_count(&self) -> (usize, usize) {
        let inner = self.inner.lock().unwrap();
        (inner.head, inner.count)
    }
}

impl Default for LogRingBuffer {
    fn default() -> Self {
        Self::new()
    }
}

fn truncate_bytes(s: &str, cap: usize) -> String {
    if s.len() <= cap {
        return s.to_string();
    }
    let mut end = cap;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    s[..end].to_string()
}

/// A `tracing_subscriber::Layer` that mirrors every formatted event into a
/// [`LogRingBuffer`], rather than running a second, independent logging
/// path.
pub struct LogRingLayer {
    ring: Arc<LogRingBuffer>,
}

impl LogRingLayer {
    pub fn new(ring: Arc<LogRingBuffer>) -> Self {
        Self { ring }
    }
}

impl<S: tracing::Subscriber> Layer<S> for LogRingLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.ring
            .push(event.metadata().level().as_str(), &visitor.message);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_beyond_capacity_wraps_head_and_caps_count() {
        let ring = LogRingBuffer::new();
        for _ in 0..(2 * LOG_RING_SIZE + 1) {
            ring.push("info", "same message");
        }
        let (head, count) = ring.head_and_count();
        assert_eq!(count, LOG_RING_SIZE);
        assert_eq!(head, 1);
    }

    #[test]
    fn long_message_and_level_are_silently_truncated() {
        let ring = LogRingBuffer::new();
        ring.push(&"x".repeat(100), &"y".repeat(1000));
        let entry = ring.snapshot().pop().unwrap();
        assert_eq!(entry.level.len(), LOG_LEVEL_CAP);
        assert_eq!(entry.message.len(), LOG_MSG_CAP);
    }

    #[test]
    fn empty_message_counts_as_a_normal_push() {
        let ring = LogRingBuffer::new();
        ring.push("info", "");
        let (_, count) = ring.head_and_count();
        assert_eq!(count, 1);
        assert_eq!(ring.snapshot()[0].message, "");
    }

    #[test]
    fn snapshot_is_oldest_first() {
        let ring = LogRingBuffer::new();
        ring.push("info", "one");
        ring.push("info", "two");
        let snap = ring.snapshot();
        assert_eq!(snap[0].message, "one");
        assert_eq!(snap[1].message, "two");
    }
}
