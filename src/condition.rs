//! The decision-diagram universe in which preprocessor conditions are tracked.
//!
//! Every BDD variable stands for an [`Atom`]. There is one [`ConditionSpace`] per process,
//! reachable through [`shared`]; line-level extraction holds its lock for the whole file.

use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError};

use log::debug;

use crate::bdd::Bdd;
use crate::formula::Formula;
use crate::reference::Ref;

/// What a BDD variable means.
#[derive(Debug, Clone, Eq, PartialEq, Hash)]
pub enum Atom {
    /// "Macro `name` is defined".
    Defined(String),
    /// Any other sub-condition, e.g. an integer comparison, kept as its source text.
    Opaque(String),
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Atom::Defined(name) => write!(f, "(defined {})", name),
            Atom::Opaque(text) => write!(f, "{}", text),
        }
    }
}

pub struct ConditionSpace {
    bdd: Bdd,
    atoms: Vec<Atom>,
    variables: HashMap<Atom, u32>,
}

pub type SharedConditionSpace = Arc<Mutex<ConditionSpace>>;

/// The process-wide condition space.
pub fn shared() -> SharedConditionSpace {
    static SPACE: OnceLock<SharedConditionSpace> = OnceLock::new();
    SPACE.get_or_init(|| Arc::new(Mutex::new(ConditionSpace::new()))).clone()
}

/// Lock `space`. A panic in another extraction leaves no partial state worth refusing, so
/// poisoning is ignored.
pub fn lock(space: &SharedConditionSpace) -> MutexGuard<'_, ConditionSpace> {
    space.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Default for ConditionSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl ConditionSpace {
    pub fn new() -> Self {
        Self {
            bdd: Bdd::default(),
            atoms: Vec::new(),
            variables: HashMap::new(),
        }
    }

    pub fn bdd(&self) -> &Bdd {
        &self.bdd
    }

    pub fn one(&self) -> Ref {
        self.bdd.one
    }

    pub fn zero(&self) -> Ref {
        self.bdd.zero
    }

    pub fn num_atoms(&self) -> usize {
        self.atoms.len()
    }

    /// BDD variable of `atom`, allocated on first use.
    pub fn variable(&mut self, atom: Atom) -> u32 {
        if let Some(&v) = self.variables.get(&atom) {
            return v;
        }
        self.atoms.push(atom.clone());
        let v = self.atoms.len() as u32;
        debug!("New condition variable x{} = {}", v, atom);
        self.variables.insert(atom, v);
        v
    }

    pub fn atom(&mut self, atom: Atom) -> Ref {
        let v = self.variable(atom);
        self.bdd.mk_var(v)
    }

    pub fn defined(&mut self, name: &str) -> Ref {
        self.atom(Atom::Defined(name.to_string()))
    }

    pub fn opaque(&mut self, text: &str) -> Ref {
        self.atom(Atom::Opaque(text.to_string()))
    }

    pub fn atom_of(&self, variable: u32) -> Option<&Atom> {
        self.atoms.get((variable as usize).checked_sub(1)?)
    }

    /// Convert `f` into a formula by Shannon expansion on its top variables.
    ///
    /// `rename` maps macro names to literal names. Fails if any reachable variable is not a
    /// [`Atom::Defined`] atom.
    pub fn to_formula(&self, f: Ref, rename: impl Fn(&str) -> String) -> Option<Formula> {
        let mut memo = HashMap::new();
        self.expand(f, &rename, &mut memo).map(|formula| formula.simplify())
    }

    fn expand(
        &self,
        f: Ref,
        rename: &impl Fn(&str) -> String,
        memo: &mut HashMap<Ref, Option<Formula>>,
    ) -> Option<Formula> {
        if self.bdd.is_one(f) {
            return Some(Formula::True);
        }
        if self.bdd.is_zero(f) {
            return Some(Formula::False);
        }
        if let Some(known) = memo.get(&f) {
            return known.clone();
        }

        let result = match self.atom_of(self.bdd.variable(f)) {
            Some(Atom::Defined(name)) => {
                let literal = Formula::literal(rename(name));
                self.expand(self.bdd.high_node(f), rename, memo).and_then(|high| {
                    let low = self.expand(self.bdd.low_node(f), rename, memo)?;
                    Some(Formula::or(
                        Formula::and(literal.clone(), high),
                        Formula::and(Formula::not(literal), low),
                    ))
                })
            }
            other => {
                debug!("Cannot express condition variable {:?} as a literal", other);
                None
            }
        };
        memo.insert(f, result.clone());
        result
    }

    /// Free all diagram nodes not reachable from `roots`. Atoms stay allocated.
    pub fn collect_garbage(&self, roots: &[Ref]) {
        self.bdd.collect_garbage(roots);
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
    fn test_atoms_are_interned() {
        let mut space = ConditionSpace::new();
        let a = space.defined("A");
        let b = space.defined("B");
        assert_ne!(a, b);
        assert_eq!(space.defined("A"), a);
        assert_eq!(space.num_atoms(), 2);
        assert_eq!(space.atom_of(1), Some(&Atom::Defined("A".to_string())));
        assert_eq!(space.atom_of(0), None);
    }

    #[test]
    fn test_to_formula() {
        let mut space = ConditionSpace::new();
        let a = space.defined("CONFIG_A");
        let b = space.defined("CONFIG_B");
        let f = space.bdd().apply_or(a, -b);
        let formula = space
            .to_formula(f, |name| name.trim_start_matches("CONFIG_").to_string())
            .unwrap();
        assert!(formula.equivalent(&Formula::or(lit("A"), Formula::not(lit("B")))));
    }

    #[test]
    fn test_to_formula_constants() {
        let space = ConditionSpace::new();
        assert_eq!(space.to_formula(space.one(), str::to_string), Some(Formula::True));
        assert_eq!(space.to_formula(space.zero(), str::to_string), Some(Formula::False));
    }

    #[test]
    fn test_to_formula_fails_on_opaque() {
        let mut space = ConditionSpace::new();
        let a = space.defined("A");
        let cmp = space.opaque("X > 2");
        let f = space.bdd().apply_and(a, cmp);
        assert_eq!(space.to_formula(f, str::to_string), None);
        // Unreachable opaque variables do not matter.
        let g = space.bdd().apply_or(a, space.bdd().apply_and(cmp, -cmp));
        assert!(space.to_formula(g, str::to_string).unwrap().equivalent(&lit("A")));
    }

    #[test]
    fn test_shared_is_one_space() {
        let s1 = shared();
        let s2 = shared();
        assert!(Arc::ptr_eq(&s1, &s2));
    }

    #[test]
    fn test_collect_garbage_keeps_roots() {
        let mut space = ConditionSpace::new();
        let a = space.defined("A");
        let b = space.defined("B");
        let keep = space.bdd().apply_and(a, b);
        let _drop = space.bdd().apply_or(a, b);
        space.collect_garbage(&[keep]);
        assert!(space.to_formula(keep, str::to_string).unwrap().equivalent(&Formula::and(lit("A"), lit("B"))));
    }
}
