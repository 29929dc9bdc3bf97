//! Concrete mode definitions.
//!
//! Priorities follow §8/E1's "priority of impl is lowest" requirement:
//! smaller values are processed first, and `impl` (finishing in-flight
//! work) is given the smallest value so it pre-empts fresh `backlog`
//! dispatch when scheduler capacity is scarce.

use kiln_db::models::TerminalStatus;

use super::{Mode, NextPhase, Phase, PhaseRole, PostRunActions};

pub fn software_engineering() -> Mode {
    let backlog = Phase {
        name: "backlog".to_string(),
        label: "Backlog".to_string(),
        role: PhaseRole::Setup,
        system_prompt: String::new(),
        instruction: String::new(),
        error_instruction: None,
        allowed_tools: vec![],
        use_sandbox: false,
        priority: 6,
        post_run: PostRunActions::default(),
        next: NextPhase::Phase("spec".to_string()),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: false,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    let spec = Phase {
        name: "spec".to_string(),
        label: "Write spec".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a senior engineer writing an implementation spec.".to_string(),
        instruction: "Write a short implementation spec for the task below, then stop."
            .to_string(),
        error_instruction: Some(
            "The previous attempt to write a spec failed: {ERROR}\nTry again, addressing the error."
                .to_string(),
        ),
        allowed_tools: vec!["read".to_string(), "grep".to_string()],
        use_sandbox: true,
        priority: 5,
        post_run: PostRunActions::default(),
        next: NextPhase::Phase("qa".to_string()),
        has_qa_fix_routing: false,
        fresh_session: true,
        include_task_context: true,
        include_file_listing: true,
        rebase_base: String::new(),
    };

    let qa = Phase {
        name: "qa".to_string(),
        label: "Implement + test".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a senior engineer implementing a spec with tests.".to_string(),
        instruction: "Implement the spec above and add or update tests covering it.".to_string(),
        error_instruction: Some(
            "The previous attempt failed: {ERROR}\nFix the issue and try again.".to_string(),
        ),
        allowed_tools: vec![
            "read".to_string(),
            "edit".to_string(),
            "write".to_string(),
            "bash".to_string(),
        ],
        use_sandbox: true,
        priority: 2,
        post_run: PostRunActions {
            runs_tests: true,
            commits: true,
            commit_message: "qa: implement and test".to_string(),
            check_artifact: None,
            allow_no_changes: false,
        },
        next: NextPhase::Phase("impl".to_string()),
        has_qa_fix_routing: true,
        fresh_session: false,
        include_task_context: true,
        include_file_listing: true,
        rebase_base: String::new(),
    };

    let qa_fix = Phase {
        name: "qa_fix".to_string(),
        label: "Fix failing tests".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a senior engineer fixing a failing test suite.".to_string(),
        instruction: "The test run below failed inside a test file. Fix the test or the code \
                       under test so the suite passes."
            .to_string(),
        error_instruction: Some(
            "The test output was: {ERROR}\nAddress it directly.".to_string(),
        ),
        allowed_tools: vec![
            "read".to_string(),
            "edit".to_string(),
            "write".to_string(),
            "bash".to_string(),
        ],
        use_sandbox: true,
        priority: 1,
        post_run: PostRunActions {
            runs_tests: true,
            commits: true,
            commit_message: "qa_fix: repair failing tests".to_string(),
            check_artifact: None,
            allow_no_changes: false,
        },
        next: NextPhase::Phase("impl".to_string()),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: true,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    let imp = Phase {
        name: "impl".to_string(),
        label: "Finalize".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a senior engineer finalizing a change before merge.".to_string(),
        instruction: "Review the diff for correctness and style, make any final fixes, then stop."
            .to_string(),
        error_instruction: Some(
            "Finalization failed: {ERROR}\nTry again.".to_string(),
        ),
        allowed_tools: vec!["read".to_string(), "edit".to_string(), "bash".to_string()],
        use_sandbox: true,
        priority: 0,
        post_run: PostRunActions {
            runs_tests: true,
            commits: true,
            commit_message: "impl: finalize change".to_string(),
            check_artifact: None,
            allow_no_changes: true,
        },
        next: NextPhase::Terminal(TerminalStatus::Done),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: true,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    let rebase = Phase {
        name: "rebase".to_string(),
        label: "Rebase for merge".to_string(),
        role: PhaseRole::Rebase,
        system_prompt: String::new(),
        instruction: String::new(),
        error_instruction: None,
        allowed_tools: vec![],
        use_sandbox: false,
        priority: 4,
        post_run: PostRunActions::default(),
        next: NextPhase::Terminal(TerminalStatus::Merged),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: false,
        include_file_listing: false,
        rebase_base: "main".to_string(),
    };

    Mode {
        name: "software-engineering".to_string(),
        label: "Software Engineering".to_string(),
        phases: vec![backlog, spec, qa, qa_fix, imp, rebase],
        uses_worktrees: true,
        uses_sandbox: true,
        uses_test_commands: true,
        uses_vcs: true,
        default_max_attempts: 3,
        initial_status: "backlog".to_string(),
    }
}

pub fn legal() -> Mode {
    let intake = Phase {
        name: "intake".to_string(),
        label: "Intake".to_string(),
        role: PhaseRole::Setup,
        system_prompt: String::new(),
        instruction: String::new(),
        error_instruction: None,
        allowed_tools: vec![],
        use_sandbox: false,
        priority: 2,
        post_run: PostRunActions::default(),
        next: NextPhase::Phase("draft".to_string()),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: false,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    let draft = Phase {
        name: "draft".to_string(),
        label: "Draft document".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a paralegal drafting a document from a request.".to_string(),
        instruction: "Draft the requested document.".to_string(),
        error_instruction: Some("Drafting failed: {ERROR}\nRevise and try again.".to_string()),
        allowed_tools: vec!["read".to_string(), "write".to_string()],
        use_sandbox: false,
        priority: 1,
        post_run: PostRunActions {
            commits: true,
            commit_message: "draft: document".to_string(),
            allow_no_changes: false,
            ..PostRunActions::default()
        },
        next: NextPhase::Phase("review".to_string()),
        has_qa_fix_routing: false,
        fresh_session: true,
        include_task_context: true,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    let review = Phase {
        name: "review".to_string(),
        label: "Review document".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a senior reviewer checking a drafted document.".to_string(),
        instruction: "Review the draft above for correctness and completeness.".to_string(),
        error_instruction: Some("Review failed: {ERROR}\nTry again.".to_string()),
        allowed_tools: vec!["read".to_string()],
        use_sandbox: false,
        priority: 0,
        post_run: PostRunActions::default(),
        next: NextPhase::Terminal(TerminalStatus::Done),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: true,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    Mode {
        name: "legal".to_string(),
        label: "Legal Drafting".to_string(),
        phases: vec![intake, draft, review],
        uses_worktrees: false,
        uses_sandbox: false,
        uses_test_commands: false,
        uses_vcs: true,
        default_max_attempts: 2,
        initial_status: "intake".to_string(),
    }
}

pub fn web() -> Mode {
    let backlog = Phase {
        name: "web_backlog".to_string(),
        label: "Backlog".to_string(),
        role: PhaseRole::Setup,
        system_prompt: String::new(),
        instruction: String::new(),
        error_instruction: None,
        allowed_tools: vec![],
        use_sandbox: false,
        priority: 3,
        post_run: PostRunActions::default(),
        next: NextPhase::Phase("build".to_string()),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: false,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    let build = Phase {
        name: "build".to_string(),
        label: "Build page".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a front-end engineer building a web page.".to_string(),
        instruction: "Implement the requested page or component.".to_string(),
        error_instruction: Some("Build failed: {ERROR}\nFix and retry.".to_string()),
        allowed_tools: vec![
            "read".to_string(),
            "edit".to_string(),
            "write".to_string(),
            "bash".to_string(),
        ],
        use_sandbox: true,
        priority: 1,
        post_run: PostRunActions {
            runs_tests: true,
            commits: true,
            commit_message: "build: page".to_string(),
            check_artifact: None,
            allow_no_changes: false,
        },
        next: NextPhase::Phase("screenshot".to_string()),
        has_qa_fix_routing: true,
        fresh_session: true,
        include_task_context: true,
        include_file_listing: true,
        rebase_base: String::new(),
    };

    let screenshot = Phase {
        name: "screenshot".to_string(),
        label: "Verify visually".to_string(),
        role: PhaseRole::Agent,
        system_prompt: "You are a front-end engineer verifying a page renders correctly."
            .to_string(),
        instruction: "Check the built page against the request and fix any visual issues."
            .to_string(),
        error_instruction: Some("Verification failed: {ERROR}\nTry again.".to_string()),
        allowed_tools: vec!["read".to_string(), "edit".to_string(), "bash".to_string()],
        use_sandbox: true,
        priority: 0,
        post_run: PostRunActions {
            check_artifact: Some("dist/index.html".to_string()),
            ..PostRunActions::default()
        },
        next: NextPhase::Terminal(TerminalStatus::Done),
        has_qa_fix_routing: false,
        fresh_session: false,
        include_task_context: true,
        include_file_listing: false,
        rebase_base: String::new(),
    };

    Mode {
        name: "web".to_string(),
        label: "Web".to_string(),
        phases: vec![backlog, build, screenshot],
        uses_worktrees: true,
        uses_sandbox: true,
        uses_test_commands: true,
        uses_vcs: true,
        default_max_attempts: 3,
        initial_status: "web_backlog".to_string(),
    }
}
