//! Environment-derived engine configuration (§6, §10.3).
//!
//! Every key here has a documented default so the engine is constructible
//! in tests with no environment set at all. Boolean parsing is
//! exact-string only: `"true"`/`"false"` (lowercase) are recognized,
//! anything else -- including `"True"`, `"TRUE"`, `"1"` -- falls back to
//! the default. Unparseable numeric values fall back the same way.

use std::str::FromStr;

/// One entry of `WATCHED_REPOS`: a secondary repo the pipeline dispatches
/// tasks against alongside the primary `PIPELINE_REPO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedRepo {
    pub path: String,
    pub test_cmd: String,
    pub prompt_file: Option<String>,
    /// `false` when the entry carried a `!manual` suffix on its test
    /// command, which disables PR auto-merge for this repo specifically.
    pub auto_merge: bool,
}

/// Parse the pipe-separated `WATCHED_REPOS` value into its entries.
///
/// Each entry is `path:test_cmd[:prompt_file]`, with whitespace trimmed
/// around every colon-delimited field. A `!manual` suffix on `test_cmd` is
/// stripped and sets `auto_merge = false` for that entry; its absence
/// leaves `auto_merge = true`. An entry whose `path` matches `primary_repo`
/// is silently skipped, since the primary repo is already covered by
/// `PIPELINE_REPO`/`PIPELINE_TEST_CMD`.
pub fn parse_watched_repos(raw: &str, primary_repo: &str) -> Vec<WatchedRepo> {
    let mut out = Vec::new();

    for entry in raw.split('|') {
        let entry = entry.trim();
        if entry.is_empty() {
            continue;
        }

        let mut fields = entry.splitn(3, ':').map(str::trim);
        let path = match fields.next() {
            Some(p) if !p.is_empty() => p.to_string(),
            _ => continue,
        };
        if path == primary_repo {
            continue;
        }

        let mut test_cmd = fields.next().unwrap_or_default().to_string();
        let prompt_file = fields.next().filter(|s| !s.is_empty()).map(str::to_string);

        let auto_merge = match test_cmd.strip_suffix("!manual") {
            Some(stripped) => {
                test_cmd = stripped.trim_end().to_string();
                false
            }
            None => true,
        };

        out.push(WatchedRepo {
            path,
            test_cmd,
            prompt_file,
            auto_merge,
        });
    }

    out
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool_exact(key: &str, default: bool) -> bool {
    match std::env::var(key).as_deref() {
        Ok("true") => true,
        Ok("false") => false,
        _ => default,
    }
}

/// The full set of pipeline-level environment knobs from §6, resolved once
/// at startup. CLI-flag/config-file overrides for the database connection
/// live separately in `kiln-cli`'s own resolution chain; this struct only
/// covers the engine's own ambient settings.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_backlog_size: u32,
    pub container_memory_mb: u64,
    pub web_port: u16,
    pub tick_interval_s: u64,
    pub seed_cooldown_s: i64,
    pub continuous_mode: bool,
    pub pipeline_auto_merge: bool,
    pub whatsapp_enabled: bool,
    pub discord_enabled: bool,
    pub pipeline_repo: String,
    pub pipeline_test_cmd: String,
    pub watched_repos: Vec<WatchedRepo>,
    pub max_workers: usize,
    pub agent_timeout_s: u64,
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let pipeline_repo = std::env::var("PIPELINE_REPO").unwrap_or_default();
        let watched_raw = std::env::var("WATCHED_REPOS").unwrap_or_default();

        Self {
            max_backlog_size: env_or("MAX_BACKLOG_SIZE", 5),
            container_memory_mb: env_or("CONTAINER_MEMORY_MB", 1024),
            web_port: env_or("WEB_PORT", 3131),
            tick_interval_s: env_or("TICK_INTERVAL_S", 30),
            seed_cooldown_s: env_or("SEED_COOLDOWN_S", 3600),
            continuous_mode: env_bool_exact("CONTINUOUS_MODE", false),
            pipeline_auto_merge: env_bool_exact("PIPELINE_AUTO_MERGE", true),
            whatsapp_enabled: env_bool_exact("WHATSAPP_ENABLED", false),
            discord_enabled: env_bool_exact("DISCORD_ENABLED", false),
            pipeline_test_cmd: std::env::var("PIPELINE_TEST_CMD").unwrap_or_default(),
            watched_repos: parse_watched_repos(&watched_raw, &pipeline_repo),
            pipeline_repo,
            max_workers: env_or("KILN_MAX_WORKERS", 4),
            agent_timeout_s: env_or("KILN_AGENT_TIMEOUT_S", 900),
        }
    }

    /// Resolve the test command for `repo_path`: the primary repo's
    /// `PIPELINE_TEST_CMD` if it matches, else the matching watched-repo
    /// entry's command, else `None` if the repo is unrecognized.
    pub fn test_cmd_for(&self, repo_path: &str) -> Option<&str> {
        if repo_path == self.pipeline_repo && !self.pipeline_test_cmd.is_empty() {
            return Some(&self.pipeline_test_cmd);
        }
        self.watched_repos
            .iter()
            .find(|r| r.path == repo_path)
            .map(|r| r.test_cmd.as_str())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_backlog_size: 5,
            container_memory_mb: 1024,
            web_port: 3131,
            tick_interval_s: 30,
            seed_cooldown_s: 3600,
            continuous_mode: false,
            pipeline_auto_merge: true,
            whatsapp_enabled: false,
            discord_enabled: false,
            pipeline_repo: String::new(),
            pipeline_test_cmd: String::new(),
            watched_repos: Vec::new(),
            max_workers: 4,
            agent_timeout_s: 900,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_entry_with_test_cmd_only() {
        let repos = parse_watched_repos("/repo/a:cargo test", "/repo/primary");
        assert_eq!(
            repos,
            vec![WatchedRepo {
                path: "/repo/a".to_string(),
                test_cmd: "cargo test".to_string(),
                prompt_file: None,
                auto_merge: true,
            }]
        );
    }

    #[test]
    fn parses_prompt_file_field_and_trims_whitespace() {
        let repos = parse_watched_repos(" /repo/a : cargo test : PROMPT.md ", "/primary");
        assert_eq!(repos[0].path, "/repo/a");
        assert_eq!(repos[0].test_cmd, "cargo test");
        assert_eq!(repos[0].prompt_file, Some("PROMPT.md".to_string()));
    }

    #[test]
    fn manual_suffix_disables_auto_merge_and_is_stripped() {
        let repos = parse_watched_repos("/repo/a:cargo test!manual", "/primary");
        assert_eq!(repos[0].test_cmd, "cargo test");
        assert!(!repos[0].auto_merge);
    }

    #[test]
    fn duplicate_of_primary_repo_is_skipped() {
        let repos = parse_watched_repos("/primary:cargo test|/repo/a:make test", "/primary");
        assert_eq!(repos.len(), 1);
        assert_eq!(repos[0].path, "/repo/a");
    }

    #[test]
    fn multiple_entries_and_blank_segments() {
        let repos = parse_watched_repos("/a:t1||/b:t2!manual", "/primary");
        assert_eq!(repos.len(), 2);
        assert!(repos[0].auto_merge);
        assert!(!repos[1].auto_merge);
    }

    #[test]
    fn bool_env_is_exact_string_only() {
        // SAFETY (test-only): single-threaded access to env vars guarded by
        // this test's own key, not shared with other tests' keys.
        unsafe {
            std::env::set_var("KILN_TEST_BOOL_A", "True");
            std::env::set_var("KILN_TEST_BOOL_B", "true");
        }
        assert!(!env_bool_exact("KILN_TEST_BOOL_A", false));
        assert!(env_bool_exact("KILN_TEST_BOOL_B", false));
        unsafe {
            std::env::remove_var("KILN_TEST_BOOL_A");
            std::env::remove_var("KILN_TEST_BOOL_B");
        }
    }

    #[test]
    fn numeric_env_falls_back_to_default_when_unparseable() {
        unsafe {
            std::env::set_var("KILN_TEST_NUM", "not-a-number");
        }
        assert_eq!(env_or::<u32>("KILN_TEST_NUM", 5), 5);
        unsafe {
            std::env::remove_var("KILN_TEST_NUM");
        }
    }

    #[test]
    fn test_cmd_for_resolves_primary_then_watched_then_none() {
        let mut cfg = PipelineConfig {
            pipeline_repo: "/primary".to_string(),
            pipeline_test_cmd: "cargo test".to_string(),
            ..PipelineConfig::default()
        };
        cfg.watched_repos.push(WatchedRepo {
            path: "/repo/a".to_string(),
            test_cmd: "make test".to_string(),
            prompt_file: None,
            auto_merge: true,
        });

        assert_eq!(cfg.test_cmd_for("/primary"), Some("cargo test"));
        assert_eq!(cfg.test_cmd_for("/repo/a"), Some("make test"));
        assert_eq!(cfg.test_cmd_for("/unknown"), None);
    }
}
