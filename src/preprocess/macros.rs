//! Macro definitions that depend on the condition under which they were made.

use std::collections::HashMap;

use crate::condition::ConditionSpace;
use crate::preprocess::lexer::Token;
use crate::reference::Ref;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Macro {
    /// `None` for object-like macros.
    pub params: Option<Vec<String>>,
    pub variadic: bool,
    pub body: Vec<Token>,
}

impl Macro {
    pub fn object(body: Vec<Token>) -> Self {
        Self {
            params: None,
            variadic: false,
            body,
        }
    }

    pub fn is_function_like(&self) -> bool {
        self.params.is_some()
    }

    /// Parse the tokens after `#define`. The first token is the macro name.
    ///
    /// A parameter list only exists when `(` directly follows the name, which the lexer
    /// cannot tell us, so `#define F (x)` is read as function-like here. Such macros only
    /// matter when used in `#if`, where a wrong guess yields an opaque condition.
    pub fn parse(tokens: &[Token]) -> Option<(String, Macro)> {
        let (name, rest) = tokens.split_first()?;
        if rest.first().map(|t| t.is("(")) != Some(true) {
            return Some((name.text.clone(), Macro::object(rest.to_vec())));
        }

        let mut params = Vec::new();
        let mut variadic = false;
        let mut i = 1;
        loop {
            let token = rest.get(i)?;
            match token.text.as_str() {
                ")" => break,
                "," => {}
                "..." => {
                    variadic = true;
                    params.push("__VA_ARGS__".to_string());
                }
                _ => params.push(token.text.clone()),
            }
            i += 1;
        }
        Some((
            name.text.clone(),
            Macro {
                params: Some(params),
                variadic,
                body: rest[i + 1..].to_vec(),
            },
        ))
    }
}

#[derive(Debug, Clone)]
struct Entry {
    condition: Ref,
    /// `None` records an `#undef`.
    definition: Option<Macro>,
}

/// For every macro name, the disjoint conditions under which each definition is in effect.
#[derive(Debug, Default)]
pub struct MacroTable {
    entries: HashMap<String, Vec<Entry>>,
}

impl MacroTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, space: &ConditionSpace, name: &str, definition: Macro, condition: Ref) {
        self.record(space, name, Some(definition), condition);
    }

    pub fn undefine(&mut self, space: &ConditionSpace, name: &str, condition: Ref) {
        self.record(space, name, None, condition);
    }

    fn record(&mut self, space: &ConditionSpace, name: &str, definition: Option<Macro>, condition: Ref) {
        let bdd = space.bdd();
        let entries = self.entries.entry(name.to_string()).or_default();
        for entry in entries.iter_mut() {
            entry.condition = bdd.apply_and(entry.condition, -condition);
        }
        entries.retain(|e| !bdd.is_zero(e.condition));
        entries.push(Entry { condition, definition });
    }

    /// Whether any directive has mentioned `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Condition under which `name` is defined.
    ///
    /// Where no directive decided it, the free variable `(defined name)` stands in.
    pub fn defined(&self, space: &mut ConditionSpace, name: &str) -> Ref {
        let (defined, decided) = match self.entries.get(name) {
            None => (space.zero(), space.zero()),
            Some(entries) => {
                let bdd = space.bdd();
                let defined = bdd.apply_or_many(
                    entries
                        .iter()
                        .filter(|e| e.definition.is_some())
                        .map(|e| e.condition),
                );
                let decided = bdd.apply_or_many(entries.iter().map(|e| e.condition));
                (defined, decided)
            }
        };
        if space.bdd().is_one(decided) {
            return defined;
        }
        let free = space.defined(name);
        let bdd = space.bdd();
        bdd.apply_or(defined, bdd.apply_and(-decided, free))
    }

    /// The definitions of `name` with their conditions, and the condition under which no
    /// directive decided it.
    pub fn definitions(&self, space: &ConditionSpace, name: &str) -> (Vec<(Ref, &Macro)>, Ref) {
        match self.entries.get(name) {
            None => (Vec::new(), space.one()),
            Some(entries) => {
                let bdd = space.bdd();
                let decided = bdd.apply_or_many(entries.iter().map(|e| e.condition));
                let definitions = entries
                    .iter()
                    .filter_map(|e| e.definition.as_ref().map(|d| (e.condition, d)))
                    .collect();
                (definitions, -decided)
            }
        }
    }

    /// The definition of `name` if it holds under every condition.
    pub fn unconditional(&self, space: &ConditionSpace, name: &str) -> Option<&Macro> {
        match self.entries.get(name)?.as_slice() {
            [Entry {
                condition,
                definition: Some(definition),
            }] if space.bdd().is_one(*condition) => Some(definition),
            _ => None,
        }
    }

    /// All conditions held by the table.
    pub fn roots(&self) -> Vec<Ref> {
        self.entries.values().flatten().map(|e| e.condition).collect()
    }
}
