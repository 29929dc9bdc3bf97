//! The autonomous task-pipeline engine: mode registry, scheduler, phase
//! executor, retry/dead-letter routine, stream fan-out, sentinel notifier,
//! and log ring, wired together through one [`Engine`] value.
//!
//! There is no process-wide global state (§9): every piece of mutable
//! state the scheduler and phase executor touch -- the in-flight task set,
//! the active-worker count, the log ring, the per-task stream hub, the
//! store handle -- is a field on `Engine`, constructed once at startup and
//! passed by reference or by cheap `Clone` from there.

pub mod agent_runner;
pub mod chat;
pub mod collaborators;
pub mod config;
pub mod error;
pub mod log_ring;
pub mod modes;
pub mod phase_executor;
pub mod retry;
pub mod scheduler;
pub mod sentinel;
pub mod stream;
pub mod vcs;
pub mod worktree;

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Mutex};

use sqlx::PgPool;

use crate::collaborators::{AgentRunner, Chat, Clock, NoRepoPromptHook, RepoPromptHook, SystemClock, Vcs};
use crate::config::PipelineConfig;
use crate::log_ring::LogRingBuffer;
use crate::modes::ModeRegistry;
use crate::stream::StreamFanOut;

/// The engine's full set of collaborators and shared state, cloneable at
/// the cost of one refcount bump per field. Every `agent()` scheduler
/// dispatch gets its own clone to move into its worker task.
#[derive(Clone)]
pub struct Engine {
    pub pool: PgPool,
    pub registry: Arc<ModeRegistry>,
    pub log_ring: Arc<LogRingBuffer>,
    pub stream: Arc<StreamFanOut>,
    pub agent_runner: Arc<dyn AgentRunner>,
    pub vcs: Arc<dyn Vcs>,
    pub chat: Arc<dyn Chat>,
    pub clock: Arc<dyn Clock>,
    pub repo_prompt_hook: Arc<dyn RepoPromptHook>,
    pub config: PipelineConfig,
    pub(crate) inflight: Arc<Mutex<HashSet<i64>>>,
    pub(crate) active_workers: Arc<AtomicUsize>,
    /// Set at shutdown; workers observe it at phase boundaries only (§5).
    pub(crate) stop: Arc<std::sync::atomic::AtomicBool>,
}

impl Engine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: PgPool,
        registry: Arc<ModeRegistry>,
        agent_runner: Arc<dyn AgentRunner>,
        vcs: Arc<dyn Vcs>,
        chat: Arc<dyn Chat>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            pool,
            registry,
            log_ring: Arc::new(LogRingBuffer::new()),
            stream: Arc::new(StreamFanOut::new()),
            agent_runner,
            vcs,
            chat,
            clock: Arc::new(SystemClock),
            repo_prompt_hook: Arc::new(NoRepoPromptHook),
            config,
            inflight: Arc::new(Mutex::new(HashSet::new())),
            active_workers: Arc::new(AtomicUsize::new(0)),
            stop: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    /// Swap in a [`LogRingBuffer`] shared with the process's `tracing`
    /// subscriber (§4.8, §10.1), so `GET /logs` mirrors what was actually
    /// installed via [`crate::log_ring::LogRingLayer`] rather than a
    /// second, disconnected ring nobody writes into.
    pub fn with_log_ring(mut self, log_ring: Arc<LogRingBuffer>) -> Self {
        self.log_ring = log_ring;
        self
    }

    pub fn active_worker_count(&self) -> usize {
        self.active_workers.load(std::sync::atomic::Ordering::SeqCst)
    }

    pub fn is_inflight(&self, task_id: i64) -> bool {
        self.inflight.lock().unwrap().contains(&task_id)
    }

    /// Signal every worker to stop at its next phase boundary (§9 shutdown).
    pub fn request_stop(&self) {
        self.stop.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(std::sync::atomic::Ordering::SeqCst)
    }
}
