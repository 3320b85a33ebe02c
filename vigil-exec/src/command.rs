//! Shell-style command-line splitting.
//!
//! Enough of sh word splitting for exec command lines: whitespace
//! separation, single quotes (literal), double quotes (backslash escapes),
//! bare backslash escapes. No expansion of any kind.

use crate::error::ExecError;

pub fn shell_split(line: &str) -> Result<Vec<String>, ExecError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut chars = line.chars();

    while let Some(c) = chars.next() {
        match c {
            c if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            '\'' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('\'') => break,
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ExecError::BadCommand {
                                cmd: line.to_string(),
                                reason: "unterminated single quote".to_string(),
                            })
                        }
                    }
                }
            }
            '"' => {
                in_word = true;
                loop {
                    match chars.next() {
                        Some('"') => break,
                        Some('\\') => match chars.next() {
                            Some(escaped) => current.push(escaped),
                            None => {
                                return Err(ExecError::BadCommand {
                                    cmd: line.to_string(),
                                    reason: "trailing backslash in double quote".to_string(),
                                })
                            }
                        },
                        Some(inner) => current.push(inner),
                        None => {
                            return Err(ExecError::BadCommand {
                                cmd: line.to_string(),
                                reason: "unterminated double quote".to_string(),
                            })
                        }
                    }
                }
            }
            '\\' => {
                in_word = true;
                match chars.next() {
                    Some(escaped) => current.push(escaped),
                    None => {
                        return Err(ExecError::BadCommand {
                            cmd: line.to_string(),
                            reason: "trailing backslash".to_string(),
                        })
                    }
                }
            }
            other => {
                in_word = true;
                current.push(other);
            }
        }
    }

    if in_word {
        words.push(current);
    }
    Ok(words)
}
