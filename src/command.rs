//! Shell-like splitting of build traces into commands and arguments.
//!
//! The accepted syntax is a small subset of POSIX shell:
//!
//! - commands are separated by newlines, `;` and `|`;
//! - arguments are separated by runs of spaces and tabs;
//! - `'...'` and `"..."` quote everything up to the matching quote character;
//! - `\` removes the special meaning of the next character and is itself dropped,
//!   except that `\` followed by a newline is dropped together with the newline.
//!
//! Empty commands and empty arguments are skipped.

use crate::error::{ComposerError, Result};

/// Split `input` into commands, each an ordered list of arguments.
///
/// # Examples
///
/// ```
/// use variant_composer::command::parse_commands;
///
/// let commands = parse_commands("gcc -c 'my file.c'; echo done").unwrap();
/// assert_eq!(commands, vec![vec!["gcc", "-c", "my file.c"], vec!["echo", "done"]]);
/// ```
pub fn parse_commands(input: &str) -> Result<Vec<Vec<String>>> {
    CommandParser::new(input).parse()
}

fn is_command_separator(c: char) -> bool {
    matches!(c, '\n' | ';' | '|')
}

fn is_blank(c: char) -> bool {
    matches!(c, ' ' | '\t')
}

struct CommandParser<'a> {
    input: &'a str,
    chars: Vec<(usize, char)>,
    cursor: usize,
}

impl<'a> CommandParser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.char_indices().collect(),
            cursor: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.cursor).map(|&(_, c)| c)
    }

    fn offset(&self, cursor: usize) -> usize {
        self.chars.get(cursor).map_or(self.input.len(), |&(i, _)| i)
    }

    fn parse(mut self) -> Result<Vec<Vec<String>>> {
        let mut commands = Vec::new();
        while self.cursor < self.chars.len() {
            if let Some(command) = self.read_command()? {
                commands.push(command);
            }
        }
        Ok(commands)
    }

    fn read_command(&mut self) -> Result<Option<Vec<String>>> {
        let mut command = Vec::new();
        while let Some(c) = self.peek() {
            if is_command_separator(c) {
                break;
            }
            if let Some(arg) = self.read_argument()? {
                command.push(arg);
            }
        }
        // Skip the separator.
        self.cursor += 1;
        Ok(if command.is_empty() { None } else { Some(command) })
    }

    fn read_argument(&mut self) -> Result<Option<String>> {
        while self.peek().is_some_and(is_blank) {
            self.cursor += 1;
        }

        let mut argument = String::new();
        let mut quote: Option<char> = None;

        while let Some(c) = self.peek() {
            match c {
                '\\' => {
                    self.cursor += 1;
                    let Some(escaped) = self.peek() else {
                        return Err(ComposerError::parse(
                            "command",
                            Some(self.offset(self.cursor - 1)),
                            "command was terminated by `\\`",
                        ));
                    };
                    if escaped != '\n' {
                        argument.push(escaped);
                    }
                }
                c if quote.is_none() && (is_command_separator(c) || is_blank(c)) => break,
                '"' | '\'' => match quote {
                    None => quote = Some(c),
                    Some(q) if q == c => quote = None,
                    Some(_) => argument.push(c),
                },
                c => argument.push(c),
            }
            self.cursor += 1;
        }

        if quote.is_some() {
            return Err(ComposerError::parse(
                "command",
                Some(self.offset(self.cursor.saturating_sub(1))),
                "unterminated quote",
            ));
        }

        Ok(if argument.is_empty() { None } else { Some(argument) })
    }
}

/// Quote `arg` so that [`parse_commands`] reads it back as a single argument.
pub fn quote_argument(arg: &str) -> String {
    let mut quoted = String::with_capacity(arg.len() + 2);
    quoted.push('\'');
    for c in arg.chars() {
        if c == '\'' {
            quoted.push_str("'\\''");
        } else if c == '\\' {
            quoted.push_str("\\\\");
        } else {
            quoted.push(c);
        }
    }
    quoted.push('\'');
    quoted
}
