//! UTF-8 safe string preview helpers.
//!
//! WeChat bodies are mostly CJK text; log previews must cut on char
//! boundaries, never byte indices.

/// Return the first `n` characters of `s` as a `String` (no ellipsis).
pub fn prefix_chars(s: &str, n: usize) -> String {
    s.chars().take(n).collect()
}

/// Return a preview of `s` up to `n` characters. If `s` is longer than `n`
/// characters, the returned string will include a trailing ellipsis `...`.
pub fn preview(s: &str, n: usize) -> String {
    let mut prefix = prefix_chars(s, n);
    if s.chars().count() > n {
        prefix.push_str("...");
    }
    prefix
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_basic_ascii() {
        let s = "hello world";
        assert_eq!(preview(s, 5), "hello...");
        assert_eq!(preview(s, 20), "hello world");
    }

    #[test]
    fn preview_cjk_characters() {
        let s = "你好，今天下午三点开会，请准时参加";
        assert_eq!(preview(s, 5), "你好，今天...");
        assert_eq!(prefix_chars(s, 2), "你好");
        assert_eq!(preview("在群聊中", 4), "在群聊中");
    }
}
