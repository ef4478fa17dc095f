use crate::types::Dialect;

use super::parsers::{
    is_block_comment_end, is_block_comment_start, is_line_comment_start, matches_tag,
    try_start_dollar_quote,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub(super) enum State {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    Backticked,
    Bracketed,
    LineComment,
    BlockComment(u32),
    DollarQuoted(String),
}

/// Lexical features that depend on the dialect.
#[derive(Clone, Copy)]
struct Quoting {
    backticks: bool,
    brackets: bool,
    dollar_quotes: bool,
}

impl Quoting {
    fn for_dialect(dialect: Dialect) -> Self {
        Quoting {
            backticks: matches!(dialect, Dialect::Mysql | Dialect::Sqlite),
            brackets: matches!(dialect, Dialect::Mssql),
            dollar_quotes: matches!(dialect, Dialect::Postgres),
        }
    }
}

/// Visit every byte of `sql` that sits outside string literals, quoted identifiers and
/// comments. Opening delimiters are reported as code; their contents are not.
pub(super) fn for_each_code_byte(sql: &str, dialect: Dialect, mut on_code: impl FnMut(usize, u8)) {
    let quoting = Quoting::for_dialect(dialect);
    let bytes = sql.as_bytes();
    let mut state = State::Normal;
    let mut idx = 0;

    while idx < bytes.len() {
        let b = bytes[idx];
        match state {
            State::Normal => match b {
                b'\'' => {
                    on_code(idx, b);
                    state = State::SingleQuoted;
                }
                b'"' => {
                    on_code(idx, b);
                    state = State::DoubleQuoted;
                }
                b'`' if quoting.backticks => {
                    on_code(idx, b);
                    state = State::Backticked;
                }
                b'[' if quoting.brackets => {
                    on_code(idx, b);
                    state = State::Bracketed;
                }
                _ if is_line_comment_start(bytes, idx) => state = State::LineComment,
                _ if is_block_comment_start(bytes, idx) => {
                    state = State::BlockComment(1);
                    idx += 1;
                }
                b'$' if quoting.dollar_quotes => {
                    on_code(idx, b);
                    if let Some((tag, advance)) = try_start_dollar_quote(bytes, idx) {
                        state = State::DollarQuoted(tag);
                        idx = advance;
                    }
                }
                _ => on_code(idx, b),
            },
            State::SingleQuoted => {
                if closes_quote(bytes, &mut idx, b'\'') {
                    state = State::Normal;
                }
            }
            State::DoubleQuoted => {
                if closes_quote(bytes, &mut idx, b'"') {
                    state = State::Normal;
                }
            }
            State::Backticked => {
                if closes_quote(bytes, &mut idx, b'`') {
                    state = State::Normal;
                }
            }
            State::Bracketed => {
                if closes_quote(bytes, &mut idx, b']') {
                    state = State::Normal;
                }
            }
            State::LineComment => {
                if b == b'\n' {
                    on_code(idx, b);
                    state = State::Normal;
                }
            }
            State::BlockComment(depth) => {
                if is_block_comment_start(bytes, idx) {
                    state = State::BlockComment(depth + 1);
                    idx += 1;
                } else if is_block_comment_end(bytes, idx) {
                    state = if depth == 1 {
                        State::Normal
                    } else {
                        State::BlockComment(depth - 1)
                    };
                    idx += 1;
                }
            }
            State::DollarQuoted(ref tag) => {
                if b == b'$' && matches_tag(bytes, idx, tag) {
                    idx += tag.len() + 1;
                    state = State::Normal;
                }
            }
        }
        idx += 1;
    }
}

/// Whether the byte at `idx` closes a quoted section. A doubled delimiter is an escape and
/// is stepped over.
fn closes_quote(bytes: &[u8], idx: &mut usize, closing: u8) -> bool {
    if bytes[*idx] != closing {
        return false;
    }
    if bytes.get(*idx + 1) == Some(&closing) {
        *idx += 1;
        false
    } else {
        true
    }
}
