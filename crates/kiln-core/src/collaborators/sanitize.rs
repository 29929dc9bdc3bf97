/// Characters considered dangerous in a shell/markdown context (PR titles).
const DANGEROUS: [char; 6] = ['"', '\\', '$', '`', '\n', '\r'];

/// Strip the six dangerous characters (each independently replaced by a
/// single space) and then truncate to `max_len` bytes.
///
/// Replacement happens before truncation, so a dangerous character sitting
/// exactly at the truncation boundary is still replaced. Truncation never
/// splits a UTF-8 multi-byte sequence: it backs off to the nearest
/// preceding character boundary.
pub fn sanitize_title(input: &str, max_len: usize) -> String {
    let replaced: String = input
        .chars()
        .map(|c| if DANGEROUS.contains(&c) { ' ' } else { c })
        .collect();

    if replaced.len() <= max_len {
        return replaced;
    }

    let mut end = max_len;
    while end > 0 && !replaced.is_char_boundary(end) {
        end -= 1;
    }
    replaced[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_each_dangerous_character_with_a_space() {
        let input = "fix \"bug\" in $HOME `cmd`\r\n";
        let out = sanitize_title(input, 100);
        assert!(!out.contains(['"', '\\', '$', '`', '\n', '\r']));
        assert_eq!(out, "fix  bug  in  HOME  cmd    ");
    }

    #[test]
    fn crlf_becomes_two_spaces() {
        let out = sanitize_title("a\r\nb", 100);
        assert_eq!(out, "a  b");
    }

    #[test]
    fn truncates_to_max_len_bytes() {
        let out = sanitize_title(&"a".repeat(150), 100);
        assert_eq!(out.len(), 100);
    }

    #[test]
    fn dangerous_char_at_truncation_boundary_is_replaced_before_cut() {
        // Boundary sits right on the quote: it must be replaced first, so
        // the result is a plain space, not a dropped/garbled character.
        let input = format!("{}\"{}", "a".repeat(10), "b".repeat(10));
        let out = sanitize_title(&input, 11);
        assert_eq!(out, format!("{} ", "a".repeat(10)));
    }

    #[test]
    fn truncation_backs_off_to_char_boundary() {
        // "é" is 2 bytes in UTF-8; a max_len landing inside it should back
        // off rather than splitting the sequence.
        let input = "caf\u{e9}terie"; // "café" + "terie"
        let out = sanitize_title(input, 4);
        assert!(out.len() <= 4);
        assert!(out.is_char_boundary(out.len()));
    }

    #[test]
    fn idempotent_on_clean_short_input() {
        let input = "a perfectly normal title";
        assert_eq!(sanitize_title(input, 100), input);
        assert_eq!(
            sanitize_title(&sanitize_title(input, 100), 100),
            sanitize_title(input, 100)
        );
    }

    #[test]
    fn preserves_non_ascii_utf8_continuation_bytes() {
        let input = "日本語のタイトル";
        let out = sanitize_title(input, 100);
        assert_eq!(out, input);
    }
}
