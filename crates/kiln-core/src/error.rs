//! The engine-wide error taxonomy (§7). The kinds described in the design
//! are not separate Rust types; they are variants of one `thiserror` enum
//! at the Queue Store / Phase Executor boundary, mirroring the split the
//! rest of this codebase draws between library-style modules (`thiserror`)
//! and orchestration glue (`anyhow::Context`).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] kiln_db::error::StoreError),

    #[error("phase failure: {0}")]
    PhaseFailure(String),

    #[error("test failure: {0}")]
    TestFailure(String),

    #[error("agent timed out after {0}s")]
    AgentTimeout(u64),

    #[error("agent failed to start: {0}")]
    AgentSpawnFailure(String),

    #[error("i/o error: {0}")]
    Io(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
