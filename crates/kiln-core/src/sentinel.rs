//! Sentinel-marker notifier (§4.6): extracts a delimited result block from
//! an agent phase's stdout, at most once per phase, and the chat-truncation
//! helper used before delivering that block to a `Chat` front-end.

/// Line that opens a sentinel-delimited result block.
pub const BEGIN_MARKER: &str = "===KILN_RESULT_BEGIN===";
/// Line that closes a sentinel-delimited result block.
pub const END_MARKER: &str = "===KILN_RESULT_END===";

/// Streaming state machine: watches a line at a time for the begin/end
/// marker pair and commits the block between them exactly once.
#[derive(Debug, Default)]
pub struct SentinelScanner {
    found: bool,
    in_block: bool,
    buffer: String,
    result: Option<String>,
}

impl SentinelScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line of streamed agent output. Returns `true` the moment
    /// the end marker closes a block; returns `false` on every other call,
    /// including every call after the first fire (at-most-once semantics).
    pub fn feed(&mut self, line: &str) -> bool {
        if self.found {
            return false;
        }

        if self.in_block {
            if line.trim_end() == END_MARKER {
                self.found = true;
                self.result = Some(std::mem::take(&mut self.buffer));
                return true;
            }
            self.buffer.push_str(line);
            self.buffer.push('\n');
            return false;
        }

        if line.trim_end() == BEGIN_MARKER {
            self.in_block = true;
        }
        false
    }

    pub fn has_fired(&self) -> bool {
        self.found
    }

    pub fn result(&self) -> Option<&str> {
        self.result.as_deref()
    }
}

/// Post-run fallback (§4.4 step 7): re-scan the full agent output for a
/// sentinel block if the streaming scanner never fired. Never re-fires once
/// the scanner already has a result; returns `None` if no markers are found
/// anywhere, which is the expected, silent outcome for phases that never
/// emit one.
pub fn extract_phase_result(scanner: &SentinelScanner, full_output: &str) -> Option<String> {
    if scanner.has_fired() {
        return scanner.result().map(str::to_string);
    }

    let begin = full_output.find(BEGIN_MARKER)?;
    let after_begin = begin + BEGIN_MARKER.len();
    let end_rel = full_output[after_begin..].find(END_MARKER)?;
    Some(full_output[after_begin..after_begin + end_rel].trim().to_string())
}

/// Chat messages are capped at this many bytes (§4.6).
pub const CHAT_TRUNCATE_CAP: usize = 2000;
const ELLIPSIS: &str = "\u{2026}";

/// Truncate `body` for chat delivery: bodies of 2000 bytes or fewer pass
/// through unchanged; longer bodies are cut to 1997 bytes plus a trailing
/// `"…"` (3 UTF-8 bytes), landing on exactly 2000 bytes total.
pub fn truncate_for_chat(body: &str) -> String {
    if body.len() <= CHAT_TRUNCATE_CAP {
        return body.to_string();
    }

    let mut end = CHAT_TRUNCATE_CAP - 3;
    while end > 0 && !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{ELLIPSIS}", &body[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_commits_block_between_markers() {
        let mut scanner = SentinelScanner::new();
        assert!(!scanner.feed(BEGIN_MARKER));
        assert!(!scanner.feed("line one"));
        assert!(!scanner.feed("line two"));
        assert!(scanner.feed(END_MARKER));
        assert_eq!(scanner.result(), Some("line one\nline two\n"));
    }

    #[test]
    fn scanner_ignores_everything_after_first_fire() {
        let mut scanner = SentinelScanner::new();
        scanner.feed(BEGIN_MARKER);
        scanner.feed("first");
        assert!(scanner.feed(END_MARKER));

        assert!(!scanner.feed(BEGIN_MARKER));
        assert!(!scanner.feed("second"));
        assert!(!scanner.feed(END_MARKER));
        assert_eq!(scanner.result(), Some("first\n"));
    }

    #[test]
    fn scanner_never_fires_without_markers() {
        let mut scanner = SentinelScanner::new();
        scanner.feed("just some output");
        scanner.feed("more output");
        assert!(!scanner.has_fired());
        assert_eq!(scanner.result(), None);
    }

    #[test]
    fn extract_phase_result_fallback_scans_full_output() {
        let scanner = SentinelScanner::new();
        let output = format!("noise\n{BEGIN_MARKER}\nbody\n{END_MARKER}\nmore noise");
        assert_eq!(
            extract_phase_result(&scanner, &output),
            Some("body".to_string())
        );
    }

    #[test]
    fn extract_phase_result_prefers_streamed_result_over_fallback() {
        let mut scanner = SentinelScanner::new();
        scanner.feed(BEGIN_MARKER);
        scanner.feed("streamed");
        scanner.feed(END_MARKER);

        assert_eq!(
            extract_phase_result(&scanner, "unrelated full output"),
            Some("streamed\n".to_string())
        );
    }

    #[test]
    fn extract_phase_result_silent_when_no_markers_anywhere() {
        let scanner = SentinelScanner::new();
        assert_eq!(extract_phase_result(&scanner, "nothing to see here"), None);
    }

    #[test]
    fn chat_truncation_boundary_behavior() {
        let body_1999 = "a".repeat(1999);
        assert_eq!(truncate_for_chat(&body_1999), body_1999);

        let body_2000 = "a".repeat(2000);
        assert_eq!(truncate_for_chat(&body_2000), body_2000);

        let body_2001 = "a".repeat(2001);
        let truncated = truncate_for_chat(&body_2001);
        assert_eq!(truncated.len(), 2000);
        assert!(truncated.ends_with('\u{2026}'));
        assert_eq!(&truncated[..1997], &"a".repeat(1997));
    }
}
