use cow_utils::CowUtils;
use rustc_hash::FxHasher;
use std::borrow::Cow;
use std::hash::Hasher;

/// Normalize line endings to LF (\n) for cross-platform consistency
/// This ensures reproducible builds regardless of the platform where bundling occurs
pub fn normalize_line_endings(content: &str) -> Cow<'_, str> {
    match content.cow_replace("\r\n", "\n") {
        Cow::Borrowed(s) => s.cow_replace('\r', "\n"),
        Cow::Owned(s) => Cow::Owned(s.cow_replace('\r', "\n").into_owned()),
    }
}

/// Strips the UTF-8 byte order mark from the start of text, if present.
pub fn strip_bom(text: &str) -> &str {
    text.strip_prefix('\u{FEFF}').unwrap_or(text)
}

/// Blank out a leading `#!` line. The line itself is kept so line numbers
/// inside the bundle still match the original file.
pub fn strip_shebang(text: &str) -> Cow<'_, str> {
    match text.strip_prefix("#!") {
        Some(rest) => Cow::Owned(format!("//{rest}")),
        None => Cow::Borrowed(text),
    }
}

/// Cheap fingerprint of a file's bytes, compared between the graph scan and
/// the emit pass
pub fn content_fingerprint(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings("a\r\nb\rc\n"), "a\nb\nc\n");
        assert!(matches!(normalize_line_endings("plain\n"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_bom() {
        assert_eq!(strip_bom("\u{FEFF}hello"), "hello");
        assert_eq!(strip_bom("hello"), "hello");
    }

    #[test]
    fn test_strip_shebang() {
        assert_eq!(
            strip_shebang("#!/usr/bin/env node\nmodule.exports = 1;"),
            "///usr/bin/env node\nmodule.exports = 1;"
        );
        assert_eq!(strip_shebang("#!node"), "//node");
        assert_eq!(strip_shebang("var a;"), "var a;");
    }

    #[test]
    fn test_content_fingerprint() {
        assert_eq!(content_fingerprint(b"abc"), content_fingerprint(b"abc"));
        assert_ne!(content_fingerprint(b"abc"), content_fingerprint(b"abd"));
        assert_ne!(content_fingerprint(b""), content_fingerprint(b"\0"));
    }
}
