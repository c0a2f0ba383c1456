//! Splitting scripts on `go` separators.
//!
//! `go` is a client-side convention: a line holding only `go` (any case,
//! trailing blanks allowed) ends a batch. A `go` inside a string literal,
//! a quoted identifier or a comment is ordinary text.

use once_cell::sync::Lazy;
use regex::Regex;

#[allow(clippy::unwrap_used)]
static GO_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^go[ \t]*\r?$").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lexical {
    Code,
    Quoted(char),
    Bracketed,
    LineComment,
    BlockComment(u32),
}

impl Lexical {
    /// State after scanning `line`, starting in `self`.
    fn scan(mut self, line: &str) -> Self {
        let mut chars = line.chars().peekable();
        while let Some(c) = chars.next() {
            self = match self {
                Self::Code => match c {
                    '-' if chars.peek() == Some(&'-') => {
                        chars.next();
                        Self::LineComment
                    }
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        Self::BlockComment(1)
                    }
                    '\'' | '"' => Self::Quoted(c),
                    '[' => Self::Bracketed,
                    _ => Self::Code,
                },
                // a doubled quote leaves and re-enters the literal
                Self::Quoted(q) if c == q => Self::Code,
                Self::Bracketed if c == ']' => Self::Code,
                Self::LineComment if c == '\n' => Self::Code,
                Self::BlockComment(depth) => match c {
                    '/' if chars.peek() == Some(&'*') => {
                        chars.next();
                        Self::BlockComment(depth + 1)
                    }
                    '*' if chars.peek() == Some(&'/') => {
                        chars.next();
                        if depth == 1 {
                            Self::Code
                        } else {
                            Self::BlockComment(depth - 1)
                        }
                    }
                    _ => self,
                },
                other => other,
            };
        }
        self
    }
}

/// Split `script` into batches at `go` lines.
///
/// Separator lines are dropped, as are batches holding only whitespace.
/// A script without separators comes back as a single batch equal to the
/// input.
#[must_use]
pub fn split_batches(script: &str) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut state = Lexical::Code;
    let mut split = false;

    for line in script.split_inclusive('\n') {
        let bare = line.strip_suffix('\n').unwrap_or(line);
        if state == Lexical::Code && GO_LINE.is_match(bare) {
            split = true;
            push_batch(&mut batches, std::mem::take(&mut current));
            continue;
        }
        state = state.scan(line);
        current.push_str(line);
    }

    if !split {
        return vec![script.to_owned()];
    }
    push_batch(&mut batches, current);
    batches
}

fn push_batch(batches: &mut Vec<String>, batch: String) {
    if !batch.trim().is_empty() {
        batches.push(batch);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_no_separator_is_identity() {
        let sql = "select 1;\nselect 2";
        assert_eq!(split_batches(sql), vec![sql.to_owned()]);
        assert_eq!(split_batches(""), vec![String::new()]);
    }

    #[test]
    fn test_splits_on_go_lines() {
        let sql = "create table t (a int)\nGO\ninsert t values (1)\ngo  \r\nselect * from t\n";
        assert_eq!(
            split_batches(sql),
            vec![
                "create table t (a int)\n".to_owned(),
                "insert t values (1)\n".to_owned(),
                "select * from t\n".to_owned(),
            ]
        );
    }

    #[test]
    fn test_go_must_stand_alone() {
        let sql = "select 'a' as go\n  go\ngoto_label:\n";
        assert_eq!(split_batches(sql), vec![sql.to_owned()]);
    }

    #[test]
    fn test_go_inside_literals_and_comments() {
        let sql = "select 'x\ngo\n'\n/* outer /* inner\ngo\n*/\ngo\n*/\n-- go\nselect [a\ngo\n]";
        assert_eq!(split_batches(sql), vec![sql.to_owned()]);
    }

    #[test]
    fn test_doubled_quote_stays_in_literal() {
        let sql = "select 'it''s\ngo\n'";
        assert_eq!(split_batches(sql), vec![sql.to_owned()]);
    }

    #[test]
    fn test_empty_batches_dropped() {
        let sql = "go\nselect 1\ngo\n\ngo\n";
        assert_eq!(split_batches(sql), vec!["select 1\n".to_owned()]);
    }

    proptest! {
        #[test]
        fn prop_go_in_strings_is_not_a_separator(
            parts in proptest::collection::vec("[a-z ]{0,8}", 1..6),
        ) {
            // every `go` line sits inside a string literal
            let body = parts.join("\ngo\n");
            let sql = format!("select '{body}'");
            prop_assert_eq!(split_batches(&sql), vec![sql.clone()]);
        }

        #[test]
        fn prop_batches_rejoin_to_script(
            batches in proptest::collection::vec("select [0-9]{1,3}\n", 1..6),
        ) {
            let script = batches.join("go\n");
            prop_assert_eq!(split_batches(&script), if batches.len() == 1 {
                vec![script.clone()]
            } else {
                batches.clone()
            });
        }
    }
}
