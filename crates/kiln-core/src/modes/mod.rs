//! Mode Registry: static, compile-time-known descriptions of the ordered
//! phase sequences a task can be dispatched through.
//!
//! A [`Mode`] owns a DAG of [`Phase`]s with a single designated entry phase
//! (`initial_status`) and one or more terminal exits. The registry's job is
//! to validate that DAG once at startup (§4.2's four invariants) and then
//! hand the scheduler two derived artifacts: a priority comparator and the
//! set of active (non-terminal) statuses.

mod error;
mod presets;

pub use error::ModeError;

use std::collections::{HashMap, HashSet};

use kiln_db::models::TerminalStatus;

/// What kind of work a phase performs. Drives which fields of [`Phase`] the
/// executor reads and how it logs the phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRole {
    /// Non-agent bookkeeping step (e.g. allocating a worktree).
    Setup,
    /// Invokes an LLM agent.
    Agent,
    /// PR-time branch repair, invoked outside the automatic `next` chain.
    Rebase,
}

/// Where a phase's `next` pointer leads.
#[derive(Debug, Clone)]
pub enum NextPhase {
    Phase(String),
    Terminal(TerminalStatus),
}

/// Post-run checks the executor performs after a phase's agent turn (or
/// immediately, for `Setup`/`Rebase` phases) completes.
#[derive(Debug, Clone, Default)]
pub struct PostRunActions {
    pub runs_tests: bool,
    pub commits: bool,
    pub commit_message: String,
    /// Path (relative to the workspace) that must exist after the phase.
    pub check_artifact: Option<String>,
    pub allow_no_changes: bool,
}

/// One stage in a mode's phase graph.
#[derive(Debug, Clone)]
pub struct Phase {
    pub name: String,
    pub label: String,
    pub role: PhaseRole,
    pub system_prompt: String,
    pub instruction: String,
    pub error_instruction: Option<String>,
    pub allowed_tools: Vec<String>,
    pub use_sandbox: bool,
    /// Smaller sorts first; must be unique within a mode.
    pub priority: i32,
    pub post_run: PostRunActions,
    pub next: NextPhase,
    /// On a `test_file`-classified test failure, route to `qa_fix` instead
    /// of the normal retry/dead-letter routine.
    pub has_qa_fix_routing: bool,
    /// Always start a fresh agent session for this phase, ignoring any
    /// `session_id` carried on the task.
    pub fresh_session: bool,
    pub include_task_context: bool,
    pub include_file_listing: bool,
    /// For `PhaseRole::Rebase` phases, the branch to rebase onto. Ignored
    /// for every other role.
    pub rebase_base: String,
}

impl Phase {
    pub fn is_agent(&self) -> bool {
        self.role == PhaseRole::Agent
    }
}

/// A named ordered phase graph plus the policies that govern how tasks in
/// this mode are dispatched.
#[derive(Debug, Clone)]
pub struct Mode {
    pub name: String,
    pub label: String,
    pub phases: Vec<Phase>,
    pub uses_worktrees: bool,
    pub uses_sandbox: bool,
    pub uses_test_commands: bool,
    pub uses_vcs: bool,
    pub default_max_attempts: i32,
    pub initial_status: String,
}

impl Mode {
    pub fn phase(&self, name: &str) -> Option<&Phase> {
        self.phases.iter().find(|p| p.name == name)
    }

    /// Non-terminal statuses this mode can assign to a task: every phase
    /// name, plus the mode-independent `retry` pseudo-status.
    pub fn active_statuses(&self) -> HashSet<String> {
        let mut set: HashSet<String> = self.phases.iter().map(|p| p.name.clone()).collect();
        set.insert(kiln_db::models::RETRY_STATUS.to_string());
        set
    }

    /// Validate the four startup invariants from §4.2. Returns every
    /// violation found, not just the first, so a misconfigured mode fails
    /// loudly and completely at startup.
    pub fn self_test(&self) -> Result<(), ModeError> {
        let mut seen_names = HashSet::new();
        for phase in &self.phases {
            if !seen_names.insert(phase.name.as_str()) {
                return Err(ModeError::DuplicatePhaseName {
                    mode: self.name.clone(),
                    phase: phase.name.clone(),
                });
            }
        }

        let mut seen_priorities = HashSet::new();
        for phase in &self.phases {
            if !seen_priorities.insert(phase.priority) {
                return Err(ModeError::DuplicatePriority {
                    mode: self.name.clone(),
                    priority: phase.priority,
                });
            }
        }

        for phase in &self.phases {
            if phase.is_agent() && (phase.system_prompt.is_empty() || phase.instruction.is_empty())
            {
                return Err(ModeError::EmptyAgentContract {
                    mode: self.name.clone(),
                    phase: phase.name.clone(),
                });
            }
        }

        for phase in &self.phases {
            if let NextPhase::Phase(next_name) = &phase.next {
                if self.phase(next_name).is_none() {
                    return Err(ModeError::DanglingNext {
                        mode: self.name.clone(),
                        phase: phase.name.clone(),
                        next: next_name.clone(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// The set of registered modes, validated once at construction.
#[derive(Debug, Clone)]
pub struct ModeRegistry {
    modes: HashMap<String, Mode>,
}

impl ModeRegistry {
    /// Build the registry with the built-in modes (software-engineering,
    /// legal, web), self-testing each one. Panics on an invariant
    /// violation: a broken mode definition is a programming error, not a
    /// runtime condition callers can recover from.
    pub fn new() -> Self {
        let modes = vec![
            presets::software_engineering(),
            presets::legal(),
            presets::web(),
        ];

        let mut by_name = HashMap::new();
        for mode in modes {
            mode.self_test()
                .unwrap_or_else(|e| panic!("invalid mode definition: {e}"));
            by_name.insert(mode.name.clone(), mode);
        }

        Self { modes: by_name }
    }

    pub fn get(&self, name: &str) -> Option<&Mode> {
        self.modes.get(name)
    }

    pub fn modes(&self) -> impl Iterator<Item = &Mode> {
        self.modes.values()
    }

    /// Priority comparator, derived by unioning every mode's phase
    /// priorities. A status absent from the map (including any terminal
    /// status or an unrecognized string) sorts at the default priority, 0,
    /// via [`kiln_db::queries::tasks::sort_by_priority`]'s own fallback.
    ///
    /// Phase names collide across modes only if two modes intentionally
    /// share a phase name; the later-registered mode's priority wins in
    /// that case (see DESIGN.md).
    pub fn status_priority(&self) -> HashMap<String, i32> {
        let mut map = HashMap::new();
        for mode in self.modes.values() {
            for phase in &mode.phases {
                map.insert(phase.name.clone(), phase.priority);
            }
        }
        map
    }

    /// Union of every mode's active (non-terminal) statuses.
    pub fn active_statuses(&self) -> HashSet<String> {
        let mut set = HashSet::new();
        for mode in self.modes.values() {
            set.extend(mode.active_statuses());
        }
        set
    }
}

impl Default for ModeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// `substituteError(template, err)`: if `template` contains the literal
/// `{ERROR}` placeholder, replace its first occurrence with `err`;
/// otherwise append `err` on a new line.
pub fn substitute_error(template: &str, err: &str) -> String {
    match template.find("{ERROR}") {
        Some(idx) => {
            let mut out = String::with_capacity(template.len() + err.len());
            out.push_str(&template[..idx]);
            out.push_str(err);
            out.push_str(&template[idx + "{ERROR}".len()..]);
            out
        }
        None => format!("{template}\n{err}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_builds_without_panicking() {
        let registry = ModeRegistry::new();
        assert!(registry.get("software-engineering").is_some());
        assert!(registry.get("legal").is_some());
        assert!(registry.get("web").is_some());
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn software_engineering_impl_has_lowest_priority_value() {
        let registry = ModeRegistry::new();
        let mode = registry.get("software-engineering").unwrap();
        let impl_priority = mode.phase("impl").unwrap().priority;
        for phase in &mode.phases {
            assert!(impl_priority <= phase.priority);
        }
    }

    #[test]
    fn self_test_catches_duplicate_phase_name() {
        let mut mode = presets::software_engineering();
        let dup = mode.phases[0].clone();
        mode.phases.push(dup);
        assert!(matches!(
            mode.self_test(),
            Err(ModeError::DuplicatePhaseName { .. })
        ));
    }

    #[test]
    fn self_test_catches_duplicate_priority() {
        let mut mode = presets::software_engineering();
        mode.phases[1].priority = mode.phases[0].priority;
        assert!(matches!(
            mode.self_test(),
            Err(ModeError::DuplicatePriority { .. })
        ));
    }

    #[test]
    fn self_test_catches_dangling_next() {
        let mut mode = presets::software_engineering();
        mode.phases[0].next = NextPhase::Phase("does-not-exist".to_string());
        assert!(matches!(
            mode.self_test(),
            Err(ModeError::DanglingNext { .. })
        ));
    }

    #[test]
    fn self_test_catches_empty_agent_contract() {
        let mut mode = presets::software_engineering();
        let agent_phase = mode
            .phases
            .iter_mut()
            .find(|p| p.is_agent())
            .expect("mode should have at least one agent phase");
        agent_phase.system_prompt.clear();
        assert!(matches!(
            mode.self_test(),
            Err(ModeError::EmptyAgentContract { .. })
        ));
    }

    #[test]
    fn substitute_error_replaces_first_placeholder_only() {
        let out = substitute_error("retry: {ERROR} ({ERROR})", "boom");
        assert_eq!(out, "retry: boom ({ERROR})");
    }

    #[test]
    fn substitute_error_appends_when_no_placeholder() {
        let out = substitute_error("please retry", "boom");
        assert_eq!(out, "please retry\nboom");
    }

    #[test]
    fn status_priority_and_active_statuses_cover_all_modes() {
        let registry = ModeRegistry::new();
        let priority = registry.status_priority();
        let active = registry.active_statuses();

        for mode in registry.modes() {
            for phase in &mode.phases {
                assert!(priority.contains_key(&phase.name));
                assert!(active.contains(&phase.name));
            }
            assert!(active.contains(kiln_db::models::RETRY_STATUS));
        }
    }
}
