//! Symbolic evaluation of `#if` expressions.
//!
//! Integer arithmetic is carried out when all operands are known. Boolean connectives over
//! symbolic operands become BDD operations. Everything else (comparing a symbolic value,
//! arithmetic on one, `__has_include`, ...) becomes an opaque atom spelled like the source.

use log::debug;

use crate::condition::ConditionSpace;
use crate::preprocess::lexer::{spell, Token, TokenKind};
use crate::preprocess::macros::{Macro, MacroTable};
use crate::reference::Ref;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Value {
    Int(i64),
    Cond(Ref),
}

const BINARY_LEVELS: [&[&str]; 8] = [
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", ">", "<=", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

const OPAQUE_BUILTINS: [&str; 7] = [
    "__has_include",
    "__has_include_next",
    "__has_attribute",
    "__has_builtin",
    "__has_feature",
    "__has_extension",
    "__has_cpp_attribute",
];

struct Cursor<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Cursor<'t> {
    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos)
    }

    fn peek_is(&self, text: &str) -> bool {
        self.peek().is_some_and(|t| t.is(text))
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos)?;
        self.pos += 1;
        Some(token)
    }

    fn expect(&mut self, text: &str) -> Option<()> {
        self.next().filter(|t| t.is(text)).map(|_| ())
    }

    fn spelling(&self, start: usize) -> String {
        spell(&self.tokens[start..self.pos])
    }

    /// Read a parenthesized argument list starting at `(`, split at top-level commas.
    fn arguments(&mut self) -> Option<Vec<Vec<Token>>> {
        self.expect("(")?;
        let mut args = vec![Vec::new()];
        let mut depth = 0;
        loop {
            let token = self.next()?;
            match token.text.as_str() {
                ")" if depth == 0 => break,
                "," if depth == 0 => {
                    args.push(Vec::new());
                    continue;
                }
                "(" => depth += 1,
                ")" => depth -= 1,
                _ => {}
            }
            if let Some(last) = args.last_mut() {
                last.push(token.clone());
            }
        }
        if args.len() == 1 && args[0].is_empty() {
            args.clear();
        }
        Some(args)
    }
}

/// Evaluates conditions against a macro table.
pub struct Evaluator<'a> {
    space: &'a mut ConditionSpace,
    macros: &'a MacroTable,
    is_free: &'a dyn Fn(&str) -> bool,
    expanding: Vec<String>,
}

impl<'a> Evaluator<'a> {
    /// `is_free` names macros whose definitions are ignored; they always stay free variables.
    pub fn new(space: &'a mut ConditionSpace, macros: &'a MacroTable, is_free: &'a dyn Fn(&str) -> bool) -> Self {
        Self {
            space,
            macros,
            is_free,
            expanding: Vec::new(),
        }
    }

    /// Condition under which `tokens` evaluate to non-zero.
    ///
    /// An expression that cannot be parsed becomes a single opaque atom.
    pub fn condition(&mut self, tokens: &[Token]) -> Ref {
        match self.evaluate(tokens) {
            Some(value) => self.truth(value),
            None => {
                let text = spell(tokens);
                debug!("Treating `{}` as opaque", text);
                self.space.opaque(&text)
            }
        }
    }

    fn evaluate(&mut self, tokens: &[Token]) -> Option<Value> {
        let mut cursor = Cursor { tokens, pos: 0 };
        let value = self.conditional(&mut cursor)?;
        if cursor.pos != tokens.len() {
            return None;
        }
        Some(value)
    }

    fn truth(&self, value: Value) -> Ref {
        match value {
            Value::Int(0) => self.space.zero(),
            Value::Int(_) => self.space.one(),
            Value::Cond(r) => r,
        }
    }

    fn opaque(&mut self, text: &str) -> Value {
        Value::Cond(self.space.opaque(text))
    }

    fn conditional(&mut self, cursor: &mut Cursor) -> Option<Value> {
        let cond = self.logical(cursor, "||")?;
        if !cursor.peek_is("?") {
            return Some(cond);
        }
        cursor.next();
        let then = self.conditional(cursor)?;
        cursor.expect(":")?;
        let otherwise = self.conditional(cursor)?;
        Some(match cond {
            Value::Int(0) => otherwise,
            Value::Int(_) => then,
            Value::Cond(c) => {
                let (t, e) = (self.truth(then), self.truth(otherwise));
                Value::Cond(self.space.bdd().apply_ite(c, t, e))
            }
        })
    }

    fn logical_operand(&mut self, cursor: &mut Cursor, op: &str) -> Option<Value> {
        if op == "||" {
            self.logical(cursor, "&&")
        } else {
            self.binary(cursor, 0)
        }
    }

    /// `op` is `||` or `&&`.
    fn logical(&mut self, cursor: &mut Cursor, op: &str) -> Option<Value> {
        let mut lhs = self.logical_operand(cursor, op)?;
        while cursor.peek_is(op) {
            cursor.next();
            let rhs = self.logical_operand(cursor, op)?;
            lhs = match (lhs, rhs) {
                (Value::Int(a), Value::Int(b)) if op == "||" => Value::Int((a != 0 || b != 0) as i64),
                (Value::Int(a), Value::Int(b)) => Value::Int((a != 0 && b != 0) as i64),
                _ => {
                    let (a, b) = (self.truth(lhs), self.truth(rhs));
                    let bdd = self.space.bdd();
                    Value::Cond(if op == "||" { bdd.apply_or(a, b) } else { bdd.apply_and(a, b) })
                }
            };
        }
        Some(lhs)
    }

    fn binary(&mut self, cursor: &mut Cursor, level: usize) -> Option<Value> {
        if level == BINARY_LEVELS.len() {
            return self.unary(cursor);
        }
        let start = cursor.pos;
        let mut lhs = self.binary(cursor, level + 1)?;
        while let Some(op) = cursor.peek().filter(|t| BINARY_LEVELS[level].contains(&t.text.as_str())) {
            cursor.next();
            let rhs = self.binary(cursor, level + 1)?;
            lhs = match (lhs, rhs) {
                (Value::Int(a), Value::Int(b)) => match arithmetic(&op.text, a, b) {
                    Some(v) => Value::Int(v),
                    None => self.opaque(&cursor.spelling(start)),
                },
                _ => self.opaque(&cursor.spelling(start)),
            };
        }
        Some(lhs)
    }

    fn unary(&mut self, cursor: &mut Cursor) -> Option<Value> {
        let start = cursor.pos;
        let token = cursor.peek()?;
        match token.text.as_str() {
            "!" | "-" | "+" | "~" => {
                cursor.next();
                let operand = self.unary(cursor)?;
                Some(match (token.text.as_str(), operand) {
                    ("!", Value::Int(v)) => Value::Int((v == 0) as i64),
                    ("!", Value::Cond(r)) => Value::Cond(-r),
                    ("-", Value::Int(v)) => Value::Int(v.wrapping_neg()),
                    ("+", Value::Int(v)) => Value::Int(v),
                    ("~", Value::Int(v)) => Value::Int(!v),
                    _ => self.opaque(&cursor.spelling(start)),
                })
            }
            _ => self.primary(cursor),
        }
    }

    fn primary(&mut self, cursor: &mut Cursor) -> Option<Value> {
        let start = cursor.pos;
        let token = cursor.next()?;
        match token.kind {
            TokenKind::Number => parse_int(&token.text).map(Value::Int),
            TokenKind::Char => parse_char(&token.text).map(Value::Int),
            TokenKind::Punct if token.is("(") => {
                let value = self.conditional(cursor)?;
                cursor.expect(")")?;
                Some(value)
            }
            TokenKind::Identifier if token.is("defined") => {
                let parenthesized = cursor.peek_is("(");
                if parenthesized {
                    cursor.next();
                }
                let name = cursor.next().filter(|t| t.kind == TokenKind::Identifier)?;
                if parenthesized {
                    cursor.expect(")")?;
                }
                Some(Value::Cond(self.macros.defined(self.space, &name.text)))
            }
            TokenKind::Identifier if OPAQUE_BUILTINS.contains(&token.text.as_str()) => {
                cursor.arguments()?;
                Some(self.opaque(&cursor.spelling(start)))
            }
            TokenKind::Identifier => self.identifier(cursor, &token.text, start),
            _ => None,
        }
    }

    /// Value of a macro occurrence.
    ///
    /// A name nothing decided about evaluates to `defined(name)`, not to 0. That is only
    /// right for macros that are either undefined or non-zero, which holds for the feature
    /// macros of Kconfig projects.
    fn identifier(&mut self, cursor: &mut Cursor, name: &str, start: usize) -> Option<Value> {
        if (self.is_free)(name) || self.expanding.iter().any(|n| n == name) {
            return Some(Value::Cond(self.space.defined(name)));
        }

        let macros = self.macros;
        let (definitions, undecided) = macros.definitions(self.space, name);

        if definitions.iter().any(|(_, m)| m.is_function_like()) {
            if !cursor.peek_is("(") {
                return Some(self.opaque(name));
            }
            let args = cursor.arguments()?;
            let expanded = match definitions.as_slice() {
                [(c, m)] if self.space.bdd().is_one(*c) => substitute(m, &args),
                _ => None,
            };
            return Some(match expanded {
                Some(tokens) => self.expand(name, &tokens),
                None => self.opaque(&cursor.spelling(start)),
            });
        }

        if let [(c, m)] = definitions.as_slice() {
            if self.space.bdd().is_one(*c) {
                return Some(self.object_value(name, m));
            }
        }

        let mut result = self.space.zero();
        for (c, m) in &definitions {
            let value = self.object_value(name, m);
            let t = self.truth(value);
            let bdd = self.space.bdd();
            result = bdd.apply_or(result, bdd.apply_and(*c, t));
        }
        if !self.space.bdd().is_zero(undecided) {
            let free = self.space.defined(name);
            let bdd = self.space.bdd();
            result = bdd.apply_or(result, bdd.apply_and(undecided, free));
        }
        Some(Value::Cond(result))
    }

    fn object_value(&mut self, name: &str, m: &Macro) -> Value {
        if m.body.is_empty() {
            // Defined as nothing: counts as defined.
            return Value::Int(1);
        }
        self.expand(name, &m.body)
    }

    fn expand(&mut self, name: &str, tokens: &[Token]) -> Value {
        self.expanding.push(name.to_string());
        let value = self.evaluate(tokens);
        self.expanding.pop();
        match value {
            Some(value) => value,
            None => self.opaque(&spell(tokens)),
        }
    }
}

/// Body of a function-like macro with its parameters replaced. `#` and `##` are not
/// supported.
fn substitute(m: &Macro, args: &[Vec<Token>]) -> Option<Vec<Token>> {
    let params = m.params.as_ref()?;
    if m.body.iter().any(|t| t.is("#") || t.is("##")) {
        return None;
    }
    let fixed = if m.variadic { params.len() - 1 } else { params.len() };
    if args.len() < fixed || (!m.variadic && args.len() > fixed) {
        return None;
    }

    let mut result = Vec::new();
    for token in &m.body {
        match params.iter().position(|p| token.kind == TokenKind::Identifier && token.text == *p) {
            Some(i) if m.variadic && i == fixed => {
                for (k, arg) in args[fixed..].iter().enumerate() {
                    if k > 0 {
                        result.push(Token {
                            text: ",".to_string(),
                            kind: TokenKind::Punct,
                            ..token.clone()
                        });
                    }
                    result.extend(arg.iter().cloned());
                }
            }
            Some(i) => {
                result.push(Token {
                    text: "(".to_string(),
                    kind: TokenKind::Punct,
                    ..token.clone()
                });
                result.extend(args[i].iter().cloned());
                result.push(Token {
                    text: ")".to_string(),
                    kind: TokenKind::Punct,
                    ..token.clone()
                });
            }
            None => result.push(token.clone()),
        }
    }
    Some(result)
}

fn arithmetic(op: &str, a: i64, b: i64) -> Option<i64> {
    Some(match op {
        "|" => a | b,
        "^" => a ^ b,
        "&" => a & b,
        "==" => (a == b) as i64,
        "!=" => (a != b) as i64,
        "<" => (a < b) as i64,
        ">" => (a > b) as i64,
        "<=" => (a <= b) as i64,
        ">=" => (a >= b) as i64,
        "<<" => a.wrapping_shl(b as u32),
        ">>" => a.wrapping_shr(b as u32),
        "+" => a.wrapping_add(b),
        "-" => a.wrapping_sub(b),
        "*" => a.wrapping_mul(b),
        "/" => a.checked_div(b)?,
        "%" => a.checked_rem(b)?,
        _ => return None,
    })
}

fn parse_int(text: &str) -> Option<i64> {
    let text: String = text.chars().filter(|&c| c != '\'').collect();
    let digits = text.trim_end_matches(&['u', 'U', 'l', 'L'][..]);
    let (radix, digits) = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        (16, hex)
    } else if let Some(bin) = digits.strip_prefix("0b").or_else(|| digits.strip_prefix("0B")) {
        (2, bin)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };
    u64::from_str_radix(digits, radix).ok().map(|v| v as i64)
}

fn parse_char(text: &str) -> Option<i64> {
    let inner = text.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut chars = inner.chars();
    let value = match (chars.next()?, chars.next(), chars.next()) {
        ('\\', Some(e), None) => match e {
            'n' => '\n' as i64,
            't' => '\t' as i64,
            'r' => '\r' as i64,
            '0' => 0,
            '\\' => '\\' as i64,
            '\'' => '\'' as i64,
            '"' => '"' as i64,
            _ => return None,
        },
        (c, None, None) if c.is_ascii() => c as i64,
        _ => return None,
    };
    Some(value)
}
