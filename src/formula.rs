//! Propositional formulas over named feature literals.

use std::collections::{BTreeSet, HashMap};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::bdd::Bdd;
use crate::reference::Ref;

#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum Formula {
    True,
    False,
    Literal(String),
    Not(Box<Formula>),
    And(Vec<Formula>),
    Or(Vec<Formula>),
}

impl Formula {
    pub fn literal(name: impl Into<String>) -> Self {
        Formula::Literal(name.into())
    }

    pub fn constant(value: bool) -> Self {
        if value {
            Formula::True
        } else {
            Formula::False
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(value: Self) -> Self {
        match value {
            Formula::Not(inner) => *inner,
            _ => Formula::Not(Box::new(value)),
        }
    }

    pub fn and(lhs: Self, rhs: Self) -> Self {
        Formula::And(vec![lhs, rhs])
    }

    pub fn or(lhs: Self, rhs: Self) -> Self {
        Formula::Or(vec![lhs, rhs])
    }

    /// Names of all literals, sorted.
    pub fn variables(&self) -> BTreeSet<String> {
        let mut result = BTreeSet::new();
        self.collect_variables(&mut result);
        result
    }

    fn collect_variables(&self, acc: &mut BTreeSet<String>) {
        match self {
            Formula::True | Formula::False => {}
            Formula::Literal(name) => {
                acc.insert(name.clone());
            }
            Formula::Not(inner) => inner.collect_variables(acc),
            Formula::And(args) | Formula::Or(args) => {
                for arg in args {
                    arg.collect_variables(acc);
                }
            }
        }
    }

    /// Evaluate under `assignment`. Literals without a value count as false.
    pub fn eval(&self, assignment: &HashMap<String, bool>) -> bool {
        match self {
            Formula::True => true,
            Formula::False => false,
            Formula::Literal(name) => assignment.get(name).copied().unwrap_or(false),
            Formula::Not(inner) => !inner.eval(assignment),
            Formula::And(args) => args.iter().all(|a| a.eval(assignment)),
            Formula::Or(args) => args.iter().any(|a| a.eval(assignment)),
        }
    }

    /// Whether both formulas agree on every assignment of their combined literals.
    ///
    /// Both sides are built in a fresh [`Bdd`] and their canonical roots compared.
    pub fn equivalent(&self, other: &Formula) -> bool {
        let bdd = Bdd::default();
        let mut variables = HashMap::new();
        let lhs = self.to_bdd(&bdd, &mut variables);
        let rhs = other.to_bdd(&bdd, &mut variables);
        lhs == rhs
    }

    /// Build the formula in `bdd`. Literals get variables from `variables`, new ones are
    /// numbered in order of first occurrence.
    pub fn to_bdd(&self, bdd: &Bdd, variables: &mut HashMap<String, u32>) -> Ref {
        match self {
            Formula::True => bdd.one,
            Formula::False => bdd.zero,
            Formula::Literal(name) => {
                let next = variables.len() as u32 + 1;
                let v = *variables.entry(name.clone()).or_insert(next);
                bdd.mk_var(v)
            }
            Formula::Not(inner) => -inner.to_bdd(bdd, variables),
            Formula::And(args) => args.iter().fold(bdd.one, |acc, arg| {
                let f = arg.to_bdd(bdd, variables);
                bdd.apply_and(acc, f)
            }),
            Formula::Or(args) => args.iter().fold(bdd.zero, |acc, arg| {
                let f = arg.to_bdd(bdd, variables);
                bdd.apply_or(acc, f)
            }),
        }
    }

    /// Replace every literal by the result of `f`.
    pub fn map_literals(&self, f: &mut impl FnMut(&str) -> Formula) -> Formula {
        match self {
            Formula::True => Formula::True,
            Formula::False => Formula::False,
            Formula::Literal(name) => f(name),
            Formula::Not(inner) => Formula::Not(Box::new(inner.map_literals(f))),
            Formula::And(args) => Formula::And(args.iter().map(|a| a.map_literals(f)).collect()),
            Formula::Or(args) => Formula::Or(args.iter().map(|a| a.map_literals(f)).collect()),
        }
    }

    /// Rename literals, keeping the structure.
    pub fn rename(&self, mut f: impl FnMut(&str) -> String) -> Formula {
        self.map_literals(&mut |name| Formula::Literal(f(name)))
    }

    /// Fold constants and flatten nested connectives of the same kind.
    pub fn simplify(&self) -> Formula {
        match self {
            Formula::True | Formula::False | Formula::Literal(_) => self.clone(),
            Formula::Not(inner) => match inner.simplify() {
                Formula::True => Formula::False,
                Formula::False => Formula::True,
                other => Formula::not(other),
            },
            Formula::And(args) => Self::simplify_nary(args, true),
            Formula::Or(args) => Self::simplify_nary(args, false),
        }
    }

    fn simplify_nary(args: &[Formula], is_and: bool) -> Formula {
        // For `and`, true is neutral and false absorbing; the other way round for `or`.
        let neutral = Formula::constant(is_and);
        let absorbing = Formula::constant(!is_and);
        let mut result = Vec::new();
        for arg in args {
            let arg = arg.simplify();
            if arg == absorbing {
                return absorbing;
            }
            if arg == neutral {
                continue;
            }
            match arg {
                Formula::And(inner) if is_and => result.extend(inner),
                Formula::Or(inner) if !is_and => result.extend(inner),
                other => result.push(other),
            }
        }
        match result.len() {
            0 => neutral,
            1 => result.remove(0),
            _ if is_and => Formula::And(result),
            _ => Formula::Or(result),
        }
    }
}

impl Display for Formula {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let join = |f: &mut Formatter<'_>, args: &[Formula], op: &str, empty: &str| {
            if args.is_empty() {
                return write!(f, "{}", empty);
            }
            write!(f, "(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, " {} ", op)?;
                }
                write!(f, "{}", arg)?;
            }
            write!(f, ")")
        };
        match self {
            Formula::True => write!(f, "true"),
            Formula::False => write!(f, "false"),
            Formula::Literal(name) => write!(f, "{}", name),
            Formula::Not(inner) => write!(f, "-{}", inner),
            Formula::And(args) => join(f, args, "&", "true"),
            Formula::Or(args) => join(f, args, "|", "false"),
        }
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn lit(name: &str) -> Formula {
        Formula::literal(name)
    }

    #[test]
    fn test_display() {
        let f = Formula::and(lit("A"), Formula::not(Formula::or(lit("B"), Formula::True)));
        assert_eq!(f.to_string(), "(A & -(B | true))");
        assert_eq!(Formula::And(vec![]).to_string(), "true");
    }

    #[test]
    fn test_double_negation() {
        assert_eq!(Formula::not(Formula::not(lit("A"))), lit("A"));
    }

    #[test]
    fn test_variables() {
        let f = Formula::or(lit("B"), Formula::and(lit("A"), Formula::not(lit("B"))));
        assert_eq!(f.variables().into_iter().collect::<Vec<_>>(), vec!["A", "B"]);
    }

    #[test]
    fn test_equivalent() {
        let a = lit("A");
        let b = lit("B");
        let lhs = Formula::not(Formula::and(a.clone(), b.clone()));
        let rhs = Formula::or(Formula::not(a.clone()), Formula::not(b.clone()));
        assert!(lhs.equivalent(&rhs));
        assert!(!lhs.equivalent(&Formula::or(a.clone(), b)));
        assert!(Formula::or(a.clone(), Formula::not(a)).equivalent(&Formula::True));
    }

    #[test]
    fn test_equivalent_many_literals() {
        let names: Vec<String> = (0..40).map(|i| format!("F{}", i)).collect();
        let disjunction = Formula::Or(names.iter().map(|n| lit(n)).collect());
        let reversed = Formula::Or(names.iter().rev().map(|n| lit(n)).collect());
        assert!(disjunction.equivalent(&reversed));

        // De Morgan over all of them.
        let negated = Formula::not(Formula::And(names.iter().map(|n| Formula::not(lit(n))).collect()));
        assert!(disjunction.equivalent(&negated));

        let conjunction = Formula::And(names.iter().map(|n| lit(n)).collect());
        assert!(!disjunction.equivalent(&conjunction));
    }

    #[test]
    fn test_to_bdd_shares_variables() {
        let bdd = Bdd::default();
        let mut variables = HashMap::new();
        let f = Formula::and(lit("A"), Formula::not(lit("B"))).to_bdd(&bdd, &mut variables);
        let g = lit("B").to_bdd(&bdd, &mut variables);
        assert_eq!(variables.len(), 2);
        assert_eq!(variables["B"], 2);
        assert!(bdd.is_zero(bdd.apply_and(f, g)));
    }

    #[test]
    fn test_simplify() {
        let f = Formula::And(vec![
            Formula::True,
            Formula::And(vec![lit("A"), lit("B")]),
            Formula::not(Formula::False),
        ]);
        assert_eq!(f.simplify(), Formula::And(vec![lit("A"), lit("B")]));
        assert_eq!(Formula::Or(vec![lit("A"), Formula::True]).simplify(), Formula::True);
        assert_eq!(Formula::And(vec![Formula::not(lit("X"))]).simplify(), Formula::not(lit("X")));
        assert_eq!(Formula::Or(vec![]).simplify(), Formula::False);
    }

    #[test]
    fn test_rename() {
        let f = Formula::and(lit("CONFIG_A"), Formula::not(lit("CONFIG_B")));
        let renamed = f.rename(|name| name.trim_start_matches("CONFIG_").to_string());
        assert_eq!(renamed, Formula::and(lit("A"), Formula::not(lit("B"))));
    }

    #[test]
    fn test_serde() {
        let f = Formula::or(lit("A"), Formula::not(lit("B")));
        let json = serde_json::to_string(&f).unwrap();
        println!("{}", json);
        let back: Formula = serde_json::from_str(&json).unwrap();
        assert_eq!(back, f);
    }
}
