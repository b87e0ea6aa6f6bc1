//! Reader for the SMT-LIB fragment emitted by Kconfig/Kbuild fact extractors.
//!
//! Scripts are parsed with [`smt2parser`] into its concrete syntax. Only `assert` commands
//! contribute; their terms are conjoined. Terms may use `and`, `or`, `not`, `let` and symbols.
//! Any other construct is an error.

use std::collections::HashMap;

use smt2parser::concrete::{Command, Identifier, QualIdentifier, Symbol, SyntaxBuilder, Term};
use smt2parser::{CommandStream, Position};

use crate::error::{ComposerError, Result};
use crate::formula::Formula;

/// Byte offset of a parser position. Lines and columns count from 1.
fn offset_of(text: &str, position: &Position) -> usize {
    let line_start: usize = text
        .split_inclusive('\n')
        .take(position.line.saturating_sub(1))
        .map(str::len)
        .sum();
    (line_start + position.column.saturating_sub(1)).min(text.len())
}

fn syntax_error(context: &str, text: &str, error: smt2parser::Error) -> ComposerError {
    match error {
        smt2parser::Error::SyntaxError(position, message) | smt2parser::Error::ParsingError(position, message) => {
            ComposerError::parse(context, Some(offset_of(text, &position)), message)
        }
    }
}

/// The name of an unindexed, unsorted identifier.
fn simple_name(qual: &QualIdentifier) -> Option<&str> {
    match qual {
        QualIdentifier::Simple {
            identifier: Identifier::Simple { symbol: Symbol(name) },
        } => Some(name.as_str()),
        _ => None,
    }
}

/// Lexically scoped symbol bindings introduced by `let`.
#[derive(Default)]
struct Bindings {
    scopes: HashMap<String, Vec<Formula>>,
}

impl Bindings {
    fn lookup(&self, name: &str) -> Option<&Formula> {
        self.scopes.get(name).and_then(|stack| stack.last())
    }

    fn push(&mut self, name: String, value: Formula) {
        self.scopes.entry(name).or_default().push(value);
    }

    fn pop(&mut self, name: &str) {
        if let Some(stack) = self.scopes.get_mut(name) {
            stack.pop();
            if stack.is_empty() {
                self.scopes.remove(name);
            }
        }
    }
}

struct Converter<'a> {
    context: &'a str,
    bindings: Bindings,
}

impl Converter<'_> {
    fn error(&self, message: impl Into<String>) -> ComposerError {
        ComposerError::parse(self.context, None, message)
    }

    fn term(&mut self, term: &Term) -> Result<Formula> {
        match term {
            Term::QualIdentifier(qual) => {
                let name = simple_name(qual).ok_or_else(|| self.error("unsupported identifier"))?;
                Ok(match name {
                    "true" => Formula::True,
                    "false" => Formula::False,
                    _ => match self.bindings.lookup(name) {
                        Some(bound) => bound.clone(),
                        None => Formula::literal(name),
                    },
                })
            }
            Term::Application {
                qual_identifier,
                arguments,
            } => {
                let head = simple_name(qual_identifier).ok_or_else(|| self.error("unsupported function"))?;
                match head {
                    "and" => Ok(Formula::And(self.terms(arguments)?)),
                    "or" => Ok(Formula::Or(self.terms(arguments)?)),
                    "not" => match arguments.as_slice() {
                        [argument] => Ok(Formula::not(self.term(argument)?)),
                        _ => Err(self.error("`not` takes exactly one argument")),
                    },
                    other => Err(self.error(format!("unsupported function `{}`", other))),
                }
            }
            Term::Let { var_bindings, term } => self.let_term(var_bindings, term),
            _ => Err(self.error("unsupported term")),
        }
    }

    fn terms(&mut self, terms: &[Term]) -> Result<Vec<Formula>> {
        terms.iter().map(|t| self.term(t)).collect()
    }

    fn let_term(&mut self, var_bindings: &[(Symbol, Term)], body: &Term) -> Result<Formula> {
        // Bindings are parallel: all values are read in the enclosing scope.
        let mut values = Vec::with_capacity(var_bindings.len());
        for (Symbol(name), value) in var_bindings {
            values.push((name.clone(), self.term(value)?));
        }

        let names: Vec<String> = values.iter().map(|(n, _)| n.clone()).collect();
        for (name, value) in values {
            self.bindings.push(name, value);
        }
        let result = self.term(body);
        for name in &names {
            self.bindings.pop(name);
        }
        result
    }
}

/// Parse an SMT-LIB script and return the conjunction of its assertions.
///
/// `context` names the input (usually the file the facts belong to) in error messages.
/// Syntax errors carry the byte offset where parsing failed.
pub fn parse_smtlib(context: &str, text: &str) -> Result<Formula> {
    let stream = CommandStream::new(text.as_bytes(), SyntaxBuilder, Some(context.to_string()));
    let mut converter = Converter {
        context,
        bindings: Bindings::default(),
    };

    let mut assertions = Vec::new();
    for command in stream {
        let command = command.map_err(|e| syntax_error(context, text, e))?;
        // Declarations and options carry no constraint.
        if let Command::Assert { term } = command {
            assertions.push(converter.term(&term)?);
        }
    }

    Ok(match assertions.len() {
        1 => assertions.remove(0),
        _ => Formula::And(assertions),
    })
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn lit(name: &str) -> Formula {
        Formula::literal(name)
    }

    #[test]
    fn test_assert_or() {
        let f = parse_smtlib("test", "(assert (or A B))").unwrap();
        assert!(f.equivalent(&Formula::or(lit("A"), lit("B"))));
    }

    #[test]
    fn test_let_shadowing() {
        let f = parse_smtlib("test", "(assert (let ((x A)) (or (let ((x B)) x) x)))").unwrap();
        assert!(f.equivalent(&Formula::or(lit("B"), lit("A"))));
    }

    #[test]
    fn test_let_is_parallel() {
        let f = parse_smtlib("test", "(assert (let ((x A)) (let ((x B) (y x)) (and x (not y)))))").unwrap();
        assert!(f.equivalent(&Formula::and(lit("B"), Formula::not(lit("A")))));
    }

    #[test]
    fn test_multiple_assertions_conjoined() {
        let script = "(declare-const CONFIG_A Bool)\n(assert CONFIG_A)\n; comment\n(assert (not |CONFIG_B|))";
        let f = parse_smtlib("test", script).unwrap();
        assert!(f.equivalent(&Formula::and(lit("CONFIG_A"), Formula::not(lit("CONFIG_B")))));
    }

    #[test]
    fn test_no_assertions_is_true() {
        let f = parse_smtlib("test", "(set-logic QF_UF)").unwrap();
        assert!(f.equivalent(&Formula::True));
    }

    #[test]
    fn test_unsupported_function() {
        let err = parse_smtlib("foo.c", "(assert (xor A B))").unwrap_err();
        match err {
            ComposerError::Parse { context, message, .. } => {
                assert_eq!(context, "foo.c");
                assert!(message.contains("xor"), "{}", message);
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_term() {
        assert!(parse_smtlib("foo.c", "(assert (forall ((x Bool)) x))").is_err());
        assert!(parse_smtlib("foo.c", "(assert ((_ extract 1 0) A))").is_err());
    }

    #[test]
    fn test_unbalanced() {
        let text = "(assert (or A B)";
        let err = parse_smtlib("foo.c", text).unwrap_err();
        match err {
            ComposerError::Parse { context, offset, .. } => {
                assert_eq!(context, "foo.c");
                assert!(offset.is_some_and(|o| o <= text.len()));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_not_arity() {
        assert!(parse_smtlib("foo.c", "(assert (not A B))").is_err());
    }
}
