use thiserror::Error;

/// A mode definition that fails one of §4.2's startup self-test invariants.
#[derive(Debug, Error)]
pub enum ModeError {
    #[error("mode {mode:?} has duplicate phase name {phase:?}")]
    DuplicatePhaseName { mode: String, phase: String },

    #[error("mode {mode:?} has duplicate phase priority {priority}")]
    DuplicatePriority { mode: String, priority: i32 },

    #[error("mode {mode:?} phase {phase:?} has an empty system prompt or instruction")]
    EmptyAgentContract { mode: String, phase: String },

    #[error("mode {mode:?} phase {phase:?} has a next pointer to unknown phase {next:?}")]
    DanglingNext {
        mode: String,
        phase: String,
        next: String,
    },
}
