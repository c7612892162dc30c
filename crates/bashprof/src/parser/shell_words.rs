//! Shell word splitting for trace fields.
//!
//! Both wire formats print their fields the way the shell quotes them:
//! xtrace quotes words that need it, the debug hook uses `printf %q`.
//! This splitter undoes `'...'`, `"..."`, backslash escapes and `$'...'`.

use std::iter::Peekable;
use std::str::Chars;
use thiserror::Error;

/// Why a line could not be split into words
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("unterminated {0} quote")]
    UnterminatedQuote(char),

    #[error("trailing backslash")]
    TrailingBackslash,
}

/// Split a line into unquoted shell words
///
/// # Example
/// ```
/// use bashprof::parser::split_words;
///
/// let words = split_words(r#"echo 'a b' "c\"d" $'e\tf'"#).unwrap();
/// assert_eq!(words, vec!["echo", "a b", "c\"d", "e\tf"]);
/// ```
pub fn split_words(line: &str) -> Result<Vec<String>, SplitError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' | '\n' | '\r' => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\\' => {
                match chars.next() {
                    Some('\n') => {}
                    Some(next) => current.push(next),
                    None => return Err(SplitError::TrailingBackslash),
                }
                in_word = true;
            }
            '\'' => {
                read_single_quoted(&mut chars, &mut current)?;
                in_word = true;
            }
            '"' => {
                read_double_quoted(&mut chars, &mut current)?;
                in_word = true;
            }
            '$' if chars.peek() == Some(&'\'') => {
                chars.next();
                read_ansi_c_quoted(&mut chars, &mut current)?;
                in_word = true;
            }
            other => {
                current.push(other);
                in_word = true;
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}

fn read_single_quoted(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Result<(), SplitError> {
    for c in chars.by_ref() {
        if c == '\'' {
            return Ok(());
        }
        out.push(c);
    }
    Err(SplitError::UnterminatedQuote('\''))
}

fn read_double_quoted(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Result<(), SplitError> {
    while let Some(c) = chars.next() {
        match c {
            '"' => return Ok(()),
            '\\' => match chars.next() {
                Some(next @ ('$' | '`' | '"' | '\\')) => out.push(next),
                Some('\n') => {}
                Some(next) => {
                    out.push('\\');
                    out.push(next);
                }
                None => break,
            },
            other => out.push(other),
        }
    }
    Err(SplitError::UnterminatedQuote('"'))
}

/// `$'...'` strings may encode raw bytes, so they are decoded as bytes and
/// converted lossily at the end.
fn read_ansi_c_quoted(chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Result<(), SplitError> {
    let mut bytes: Vec<u8> = Vec::new();
    let mut buf = [0u8; 4];

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push_str(&String::from_utf8_lossy(&bytes));
                return Ok(());
            }
            '\\' => {
                let Some(esc) = chars.next() else { break };
                match esc {
                    'n' => bytes.push(b'\n'),
                    't' => bytes.push(b'\t'),
                    'r' => bytes.push(b'\r'),
                    'a' => bytes.push(0x07),
                    'b' => bytes.push(0x08),
                    'e' | 'E' => bytes.push(0x1b),
                    'f' => bytes.push(0x0c),
                    'v' => bytes.push(0x0b),
                    '\\' | '\'' | '"' | '?' => bytes.push(esc as u8),
                    'x' => {
                        let value = take_digits(chars, 16, 2);
                        match value {
                            Some(v) => bytes.push(v as u8),
                            None => bytes.extend_from_slice(b"\\x"),
                        }
                    }
                    '0'..='7' => {
                        let mut value = esc.to_digit(8).unwrap_or(0);
                        for _ in 0..2 {
                            match chars.peek().and_then(|d| d.to_digit(8)) {
                                Some(d) => {
                                    value = value * 8 + d;
                                    chars.next();
                                }
                                None => break,
                            }
                        }
                        bytes.push((value & 0xff) as u8);
                    }
                    other => {
                        bytes.push(b'\\');
                        bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes());
                    }
                }
            }
            other => bytes.extend_from_slice(other.encode_utf8(&mut buf).as_bytes()),
        }
    }
    Err(SplitError::UnterminatedQuote('$'))
}

fn take_digits(chars: &mut Peekable<Chars<'_>>, radix: u32, max: usize) -> Option<u32> {
    let mut value = None;
    for _ in 0..max {
        match chars.peek().and_then(|d| d.to_digit(radix)) {
            Some(d) => {
                value = Some(value.unwrap_or(0) * radix + d);
                chars.next();
            }
            None => break,
        }
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_words() {
        assert_eq!(
            split_words("  a  bb\tccc ").unwrap(),
            vec!["a", "bb", "ccc"]
        );
        assert!(split_words("").unwrap().is_empty());
    }

    #[test]
    fn test_single_and_double_quotes() {
        assert_eq!(
            split_words(r#"'it''s' "a \"b\" \x""#).unwrap(),
            vec!["its", r#"a "b" \x"#]
        );
    }

    #[test]
    fn test_printf_q_escapes() {
        // printf %q output for `echo "hello world"`
        assert_eq!(
            split_words(r#"echo\ \"hello\ world\""#).unwrap(),
            vec![r#"echo "hello world""#]
        );
    }

    #[test]
    fn test_ansi_c_quoting() {
        assert_eq!(split_words(r"$'a\nb'").unwrap(), vec!["a\nb"]);
        assert_eq!(split_words(r"$'\x41\101\e'").unwrap(), vec!["AA\u{1b}"]);
        // bash renders a lone quote as $'\''
        assert_eq!(split_words(r"x$'\''y").unwrap(), vec!["x'y"]);
    }

    #[test]
    fn test_empty_quoted_word_is_kept() {
        assert_eq!(split_words("a '' b").unwrap(), vec!["a", "", "b"]);
    }

    #[test]
    fn test_unterminated_quotes() {
        assert_eq!(
            split_words("'abc"),
            Err(SplitError::UnterminatedQuote('\''))
        );
        assert_eq!(split_words("\"abc"), Err(SplitError::UnterminatedQuote('"')));
        assert_eq!(split_words("$'abc"), Err(SplitError::UnterminatedQuote('$')));
        assert_eq!(split_words("abc\\"), Err(SplitError::TrailingBackslash));
    }
}
