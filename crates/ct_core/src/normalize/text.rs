use sha2::{Digest, Sha256};

/// Canonical line endings, no NUL bytes. Extracted PDF/OCR text regularly carries both.
pub fn normalize_text(s: &str) -> String {
    s.replace("\r\n", "\n").replace('\r', "\n").replace('\0', "")
}

/// First `max_chars` characters of `text` (trimmed), with `...` appended when cut.
pub fn snippet_first_chars(text: &str, max_chars: usize) -> String {
    let t = text.trim();
    match t.char_indices().nth(max_chars) {
        None => t.to_string(),
        Some((byte_idx, _)) => {
            let mut s = t[..byte_idx].to_string();
            s.push_str("...");
            s
        }
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snippet_cuts_on_char_boundaries() {
        assert_eq!(snippet_first_chars("  short  ", 10), "short");
        assert_eq!(snippet_first_chars("héllo wörld", 5), "héllo...");
        assert_eq!(snippet_first_chars("abc", 3), "abc");
    }

    #[test]
    fn normalizes_line_endings_and_nul() {
        assert_eq!(normalize_text("a\r\nb\rc\0d"), "a\nb\ncd");
    }
}
