//! Scanning of user supplied SQL fragments: session variables and
//! client-side placeholders.

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Normal,
    InString,
    Escape,
}

/// Turn a `key=value;key=value` session variable option into the
/// comma separated list used in a `SET` statement.
///
/// Separators (`;` or `,`) inside quoted strings are kept, so a value cannot
/// smuggle an extra statement into the session query.
pub fn parse_session_variables(session_variables: &str) -> String {
    let mut out = String::new();
    let mut current = String::new();
    let mut state = ScanState::Normal;
    let mut is_key = true;
    let mut single_quotes = true;
    let mut key = String::new();

    for c in session_variables.chars() {
        if state == ScanState::Escape {
            current.push(c);
            state = ScanState::InString;
            continue;
        }

        match c {
            '"' => {
                if state == ScanState::Normal {
                    state = ScanState::InString;
                    single_quotes = false;
                } else if !single_quotes {
                    state = ScanState::Normal;
                }
            }
            '\'' => {
                if state == ScanState::Normal {
                    state = ScanState::InString;
                    single_quotes = true;
                } else if single_quotes {
                    state = ScanState::Normal;
                }
            }
            '\\' if state == ScanState::InString => state = ScanState::Escape,
            ';' | ',' if state == ScanState::Normal => {
                if is_key {
                    push_entry(&mut out, current.trim());
                } else {
                    push_entry(&mut out, &format!("{key}{current}"));
                }
                is_key = true;
                key.clear();
                current.clear();
                continue;
            }
            '=' if state == ScanState::Normal && is_key => {
                key = current.trim().to_string();
                is_key = false;
                current.clear();
            }
            _ => {}
        }
        current.push(c);
    }

    if is_key {
        push_entry(&mut out, current.trim());
    } else {
        push_entry(&mut out, &format!("{key}{current}"));
    }
    out
}

fn push_entry(out: &mut String, entry: &str) {
    if !out.is_empty() && !entry.is_empty() {
        out.push(',');
    }
    out.push_str(entry);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum SqlState {
    Normal,
    Quoted(u8),
    Escape(u8),
    LineComment,
    BlockComment,
}

/// Split `sql` around its `?` placeholders.
///
/// Question marks inside string literals, quoted identifiers and comments
/// are not placeholders. The result always has one more part than there are
/// placeholders.
pub fn split_placeholders(sql: &str) -> Vec<&str> {
    let bytes = sql.as_bytes();
    let mut parts = Vec::new();
    let mut start = 0;
    let mut state = SqlState::Normal;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        let next = bytes.get(i + 1).copied();
        match state {
            SqlState::Normal => match b {
                b'\'' | b'"' | b'`' => state = SqlState::Quoted(b),
                b'#' => state = SqlState::LineComment,
                b'-' if next == Some(b'-')
                    && bytes.get(i + 2).is_none_or(|c| c.is_ascii_whitespace()) =>
                {
                    state = SqlState::LineComment;
                }
                b'/' if next == Some(b'*') => {
                    state = SqlState::BlockComment;
                    i += 1;
                }
                b'?' => {
                    parts.push(&sql[start..i]);
                    start = i + 1;
                }
                _ => {}
            },
            SqlState::Quoted(quote) => {
                if b == b'\\' && quote != b'`' {
                    state = SqlState::Escape(quote);
                } else if b == quote {
                    state = SqlState::Normal;
                }
            }
            SqlState::Escape(quote) => state = SqlState::Quoted(quote),
            SqlState::LineComment => {
                if b == b'\n' {
                    state = SqlState::Normal;
                }
            }
            SqlState::BlockComment => {
                if b == b'*' && next == Some(b'/') {
                    state = SqlState::Normal;
                    i += 1;
                }
            }
        }
        i += 1;
    }
    parts.push(&sql[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicolons_become_commas() {
        assert_eq!(
            parse_session_variables("sql_mode='ANSI';wait_timeout=100"),
            "sql_mode='ANSI',wait_timeout=100"
        );
    }

    #[test]
    fn test_separator_inside_string_is_kept() {
        assert_eq!(
            parse_session_variables("a='x;y', b = \"1,2\""),
            "a='x;y',b= \"1,2\""
        );
    }

    #[test]
    fn test_escape_in_string() {
        assert_eq!(
            parse_session_variables(r"a='it\'s;fine';b=2"),
            r"a='it\'s;fine',b=2"
        );
    }

    #[test]
    fn test_empty_entries_are_dropped() {
        assert_eq!(parse_session_variables(";;a=1;;"), "a=1");
        assert_eq!(parse_session_variables(""), "");
        assert_eq!(parse_session_variables("autocommit"), "autocommit");
    }

    #[test]
    fn test_split_placeholders() {
        assert_eq!(
            split_placeholders("INSERT INTO t VALUES (?, ?)"),
            vec!["INSERT INTO t VALUES (", ", ", ")"]
        );
        assert_eq!(split_placeholders("SELECT 1"), vec!["SELECT 1"]);
        assert_eq!(split_placeholders("?"), vec!["", ""]);
    }

    #[test]
    fn test_question_marks_in_literals_and_comments() {
        let sql = "SELECT '?', \"a\\\"?\", `c?` /* ? */ FROM t -- ?\nWHERE a = ? # ?";
        let parts = split_placeholders(sql);
        assert_eq!(parts.len(), 2);
        assert!(parts[0].ends_with("WHERE a = "));
        assert_eq!(parts[1], " # ?");

        let escaped = split_placeholders(r"SELECT 'it\'s ?', ?");
        assert_eq!(escaped, vec![r"SELECT 'it\'s ?', ", ""]);
    }

    #[test]
    fn test_double_dash_needs_whitespace() {
        assert_eq!(split_placeholders("SELECT 1--?").len(), 2);
        assert_eq!(split_placeholders("SELECT 1-- ?").len(), 1);
    }
}
