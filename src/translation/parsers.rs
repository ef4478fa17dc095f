fn pair_at(bytes: &[u8], idx: usize, first: u8, second: u8) -> bool {
    bytes.get(idx) == Some(&first) && bytes.get(idx + 1) == Some(&second)
}

pub(super) fn is_line_comment_start(bytes: &[u8], idx: usize) -> bool {
    pair_at(bytes, idx, b'-', b'-')
}

pub(super) fn is_block_comment_start(bytes: &[u8], idx: usize) -> bool {
    pair_at(bytes, idx, b'/', b'*')
}

pub(super) fn is_block_comment_end(bytes: &[u8], idx: usize) -> bool {
    pair_at(bytes, idx, b'*', b'/')
}

/// Recognise `$tag$` (or `$$`) starting at `start`; returns the tag and the index of the
/// closing `$` of the opener.
pub(super) fn try_start_dollar_quote(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let rest = bytes.get(start + 1..)?;
    let len = rest
        .iter()
        .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))?;
    if rest[len] != b'$' {
        return None;
    }
    // `$1` is a positional parameter, not a tag.
    if rest.first().is_some_and(u8::is_ascii_digit) {
        return None;
    }
    let tag = std::str::from_utf8(&rest[..len]).ok()?.to_string();
    Some((tag, start + 1 + len))
}

/// Whether the `$` at `idx` begins the closing `$tag$` of a dollar-quoted body.
pub(super) fn matches_tag(bytes: &[u8], idx: usize, tag: &str) -> bool {
    let end = idx + 1 + tag.len();
    bytes.get(idx + 1..end) == Some(tag.as_bytes()) && bytes.get(end) == Some(&b'$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dollar_quote_openers() {
        assert_eq!(try_start_dollar_quote(b"$$ body", 0), Some((String::new(), 1)));
        assert_eq!(try_start_dollar_quote(b"x $fn$", 2), Some(("fn".into(), 5)));
        assert_eq!(try_start_dollar_quote(b"$1 + $2", 0), None);
        assert_eq!(try_start_dollar_quote(b"$abc", 0), None);
    }

    #[test]
    fn closing_tags() {
        assert!(matches_tag(b"end $fn$", 4, "fn"));
        assert!(!matches_tag(b"end $fx$", 4, "fn"));
        assert!(matches_tag(b"$$", 0, ""));
    }
}
