/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("abc", 10), "abc");

        let body = format!("{}é", "x".repeat(199));
        assert_eq!(truncate(&body, 200), "x".repeat(199));
    }
}
