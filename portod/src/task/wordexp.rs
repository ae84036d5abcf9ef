/* -------------------------------------------------------------------------- *\
 *                         Linux Container Supervisor                         *
 * -------------------------------------------------------------------------- *
 * Copyright 2024, the portod contributors                                    *
 * SPDX-License-Identifier: Apache-2.0                                        *
\* -------------------------------------------------------------------------- */

//! Restricted POSIX-style word expansion for container command lines.
//!
//! Supports quoting, backslash escapes and `$VAR`/`${VAR}` expansion
//! against the payload environment. Shell control operators, command
//! substitution and references to undefined variables are rejected, so
//! a command line can never smuggle in extra processes.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum WordExpError {
    #[error("illegal occurrence of newline or one of |, &, ;, <, >, (, ), {{, }}")]
    BadChar,
    #[error("command substitution is not supported")]
    CommandSubstitution,
    #[error("undefined variable '{0}' was referenced")]
    UndefinedVariable(String),
    #[error("syntax error: {0}")]
    Syntax(&'static str),
}

const FORBIDDEN: &[char] =
    &['|', '&', ';', '<', '>', '(', ')', '{', '}', '\n'];

/// Splits `command` into argv words, expanding variables from `env`.
pub fn expand(
    command: &str,
    env: &[(String, String)],
) -> Result<Vec<String>, WordExpError> {
    let mut words = Vec::new();
    let mut word = String::new();
    // distinguishes "" (an empty word) from no word at all
    let mut in_word = false;

    let mut chars = command.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            ' ' | '\t' => {
                if in_word {
                    words.push(std::mem::take(&mut word));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => word.push(inner),
                        None => {
                            return Err(WordExpError::Syntax(
                                "unterminated single quote",
                            ))
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('`') => {
                            return Err(WordExpError::CommandSubstitution)
                        }
                        Some('$') => {
                            word.push_str(&expand_variable(&mut chars, env)?)
                        }
                        Some('\\') => match chars.next() {
                            Some(escaped @ ('"' | '\\' | '$' | '`')) => {
                                word.push(escaped)
                            }
                            Some(other) => {
                                word.push('\\');
                                word.push(other);
                            }
                            None => {
                                return Err(WordExpError::Syntax(
                                    "trailing backslash",
                                ))
                            }
                        },
                        Some(inner) => word.push(inner),
                        None => {
                            return Err(WordExpError::Syntax(
                                "unterminated double quote",
                            ))
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => word.push(escaped),
                    None => {
                        return Err(WordExpError::Syntax("trailing backslash"))
                    }
                }
            }
            '`' => return Err(WordExpError::CommandSubstitution),
            '$' => {
                in_word = true;
                word.push_str(&expand_variable(&mut chars, env)?);
            }
            c if FORBIDDEN.contains(&c) => return Err(WordExpError::BadChar),
            c => {
                in_word = true;
                word.push(c);
            }
        }
    }

    if in_word {
        words.push(word);
    }

    Ok(words)
}

fn expand_variable(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    env: &[(String, String)],
) -> Result<String, WordExpError> {
    let mut name = String::new();

    match chars.peek() {
        Some('(') => return Err(WordExpError::CommandSubstitution),
        Some('{') => {
            let _ = chars.next();
            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(c) if is_name_char(c) => name.push(c),
                    Some(_) => {
                        return Err(WordExpError::Syntax(
                            "bad character in variable name",
                        ))
                    }
                    None => {
                        return Err(WordExpError::Syntax("unterminated ${"))
                    }
                }
            }
        }
        _ => {
            while let Some(&c) = chars.peek() {
                if is_name_char(c) {
                    name.push(c);
                    let _ = chars.next();
                } else {
                    break;
                }
            }
        }
    }

    // a lone '$' is literal
    if name.is_empty() {
        return Ok(String::from("$"));
    }

    env.iter()
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.clone())
        .ok_or(WordExpError::UndefinedVariable(name))
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_simple_split() {
        let words = expand("/bin/sleep 1000", &[]).expect("expand");
        assert_eq!(words, vec!["/bin/sleep", "1000"]);
    }

    #[test]
    fn test_quotes_keep_spaces() {
        let words =
            expand("echo 'hello world' \"a  b\"", &[]).expect("expand");
        assert_eq!(words, vec!["echo", "hello world", "a  b"]);
    }

    #[test]
    fn test_empty_quoted_word_survives() {
        let words = expand("echo '' after", &[]).expect("expand");
        assert_eq!(words, vec!["echo", "", "after"]);
    }

    #[test]
    fn test_variable_expansion() {
        let env = env(&[("HOME", "/home/alice"), ("USER", "alice")]);
        let words = expand("ls ${HOME}/logs $USER", &env).expect("expand");
        assert_eq!(words, vec!["ls", "/home/alice/logs", "alice"]);
    }

    #[test]
    fn test_undefined_variable_rejected() {
        assert_eq!(
            expand("echo $NOPE", &[]),
            Err(WordExpError::UndefinedVariable("NOPE".to_string()))
        );
    }

    #[test]
    fn test_command_substitution_rejected() {
        assert_eq!(expand("echo `id`", &[]), Err(WordExpError::CommandSubstitution));
        assert_eq!(
            expand("echo $(id)", &[]),
            Err(WordExpError::CommandSubstitution)
        );
        assert_eq!(
            expand("echo \"x`id`\"", &[]),
            Err(WordExpError::CommandSubstitution)
        );
    }

    #[test]
    fn test_control_operators_rejected() {
        for command in
            ["a | b", "a && b", "a; b", "a > f", "a < f", "(a)", "a {b}"]
        {
            assert_eq!(expand(command, &[]), Err(WordExpError::BadChar));
        }
    }

    #[test]
    fn test_escaped_operator_is_literal() {
        let words = expand("echo \\| '-;-'", &[]).expect("expand");
        assert_eq!(words, vec!["echo", "|", "-;-"]);
    }

    #[test]
    fn test_unterminated_quote_is_syntax_error() {
        assert!(matches!(
            expand("echo 'oops", &[]),
            Err(WordExpError::Syntax(_))
        ));
    }

    #[test]
    fn test_single_quotes_do_not_expand() {
        let words = expand("echo '$HOME `x`'", &[]).expect("expand");
        assert_eq!(words, vec!["echo", "$HOME `x`"]);
    }

    #[test]
    fn test_lone_dollar_is_literal() {
        let words = expand("echo $ end", &[]).expect("expand");
        assert_eq!(words, vec!["echo", "$", "end"]);
    }
}
