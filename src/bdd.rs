//! Reduced ordered binary decision diagrams with complement edges.
//!
//! All diagrams live in one [`Bdd`] manager. Nodes are hash-consed, so two handles denote the
//! same boolean function iff they are equal. Variables are 1-based; index 1 of the node table
//! is the terminal, referenced positively as `one` and negatively as `zero`.

use std::cell::RefCell;
use std::cmp::min;
use std::collections::{HashSet, VecDeque};
use std::fmt::Debug;

use log::debug;

use crate::cache::Cache;
use crate::reference::Ref;
use crate::table::Table;
use crate::utils::{pairing3, MyHash};

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct Node {
    variable: u32,
    low: Ref,
    high: Ref,
}

impl Default for Node {
    fn default() -> Self {
        Self {
            variable: 0,
            low: Ref::new(0),
            high: Ref::new(0),
        }
    }
}

impl MyHash for Node {
    fn hash(&self) -> u64 {
        pairing3(self.variable as u64, self.low.unsigned() as u64, self.high.unsigned() as u64)
    }
}

/// Key of the computed table: a normalized ITE triple.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct IteKey(Ref, Ref, Ref);

impl MyHash for IteKey {
    fn hash(&self) -> u64 {
        pairing3(self.0.unsigned() as u64, self.1.unsigned() as u64, self.2.unsigned() as u64)
    }
}

pub struct Bdd {
    storage: RefCell<Table<Node>>,
    cache: RefCell<Cache<IteKey, Ref>>,
    pub zero: Ref,
    pub one: Ref,
}

impl Bdd {
    pub fn new(storage_bits: usize) -> Self {
        assert!(storage_bits <= 31, "Storage bits should be in the range 0..=31");

        let mut storage = Table::new(storage_bits);
        let one = storage.add(Node::default());
        assert_eq!(one, 1, "terminal must be node 1");
        let one = Ref::positive(one as u32);

        Self {
            storage: RefCell::new(storage),
            cache: RefCell::new(Cache::new(min(storage_bits, 16))),
            zero: -one,
            one,
        }
    }
}

impl Default for Bdd {
    fn default() -> Self {
        Bdd::new(16)
    }
}

impl Debug for Bdd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let storage = self.storage.borrow();
        f.debug_struct("Bdd")
            .field("capacity", &storage.capacity())
            .field("size", &storage.size())
            .field("real_size", &storage.real_size())
            .finish()
    }
}

impl Bdd {
    fn node(&self, index: usize) -> Node {
        *self.storage.borrow().value(index)
    }

    /// Top variable of `node`; 0 for the terminals.
    pub fn variable(&self, node: Ref) -> u32 {
        self.node(node.index()).variable
    }

    /// Else-branch of `node`, with the complement pushed down.
    pub fn low_node(&self, node: Ref) -> Ref {
        let low = self.node(node.index()).low;
        if node.is_negated() {
            -low
        } else {
            low
        }
    }

    /// Then-branch of `node`, with the complement pushed down.
    pub fn high_node(&self, node: Ref) -> Ref {
        let high = self.node(node.index()).high;
        if node.is_negated() {
            -high
        } else {
            high
        }
    }

    pub fn is_zero(&self, node: Ref) -> bool {
        node == self.zero
    }
    pub fn is_one(&self, node: Ref) -> bool {
        node == self.one
    }
    pub fn is_terminal(&self, node: Ref) -> bool {
        node.index() == self.one.index()
    }

    pub fn mk_node(&self, v: u32, low: Ref, high: Ref) -> Ref {
        assert_ne!(v, 0, "Variable index should not be zero");

        // Canonical form keeps the then-edge regular.
        if high.is_negated() {
            return -self.mk_node(v, -low, -high);
        }
        if low == high {
            return low;
        }

        let i = self.storage.borrow_mut().put(Node { variable: v, low, high });
        Ref::positive(i as u32)
    }

    pub fn mk_var(&self, v: u32) -> Ref {
        self.mk_node(v, self.zero, self.one)
    }

    /// Conjunction of literals given as signed variable indices.
    pub fn cube(&self, literals: impl IntoIterator<Item = i32>) -> Ref {
        let mut literals: Vec<i32> = literals.into_iter().collect();
        literals.sort_by_key(|&v| std::cmp::Reverse(v.abs()));
        let mut current = self.one;
        for lit in literals {
            assert_ne!(lit, 0, "Variable index should not be zero");
            current = if lit < 0 {
                self.mk_node(lit.unsigned_abs(), current, self.zero)
            } else {
                self.mk_node(lit as u32, self.zero, current)
            };
        }
        current
    }

    /// Cofactors of `node` with respect to `v`, where `v` is at or above its top variable.
    pub fn top_cofactors(&self, node: Ref, v: u32) -> (Ref, Ref) {
        if self.is_terminal(node) || v < self.variable(node) {
            return (node, node);
        }
        debug_assert_eq!(v, self.variable(node));
        (self.low_node(node), self.high_node(node))
    }

    /// `ITE(f, g, h) = (f ∧ g) ∨ (¬f ∧ h)`
    pub fn apply_ite(&self, f: Ref, g: Ref, h: Ref) -> Ref {
        // Terminal cases.
        if self.is_one(f) {
            return g;
        }
        if self.is_zero(f) {
            return h;
        }
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // Standard triples: an argument equal to `f` (or its complement) is a constant there.
        let g = if g == f {
            self.one
        } else if g == -f {
            self.zero
        } else {
            g
        };
        let h = if h == f {
            self.zero
        } else if h == -f {
            self.one
        } else {
            h
        };
        if g == h {
            return g;
        }
        if self.is_one(g) && self.is_zero(h) {
            return f;
        }
        if self.is_zero(g) && self.is_one(h) {
            return -f;
        }

        // Regular `f` and `g`, complementing the result if needed.
        let (f, g, h) = if f.is_negated() { (-f, h, g) } else { (f, g, h) };
        let (g, h, negate) = if g.is_negated() { (-g, -h, true) } else { (g, h, false) };
        let finish = |res: Ref| if negate { -res } else { res };

        let key = IteKey(f, g, h);
        if let Some(&res) = self.cache.borrow().get(&key) {
            return finish(res);
        }

        let m = [f, g, h]
            .iter()
            .filter(|r| !self.is_terminal(**r))
            .map(|&r| self.variable(r))
            .min()
            .unwrap_or(0);
        debug_assert_ne!(m, 0);

        let (f0, f1) = self.top_cofactors(f, m);
        let (g0, g1) = self.top_cofactors(g, m);
        let (h0, h1) = self.top_cofactors(h, m);

        let e = self.apply_ite(f0, g0, h0);
        let t = self.apply_ite(f1, g1, h1);
        let res = self.mk_node(m, e, t);
        debug!("apply_ite(f = {}, g = {}, h = {}) -> {}", f, g, h, res);

        self.cache.borrow_mut().insert(key, res);
        finish(res)
    }

    pub fn apply_not(&self, f: Ref) -> Ref {
        -f
    }

    pub fn apply_and(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, v, self.zero)
    }

    pub fn apply_or(&self, u: Ref, v: Ref) -> Ref {
        self.apply_ite(u, self.one, v)
    }

    pub fn apply_and_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        nodes.into_iter().fold(self.one, |acc, node| self.apply_and(acc, node))
    }

    pub fn apply_or_many(&self, nodes: impl IntoIterator<Item = Ref>) -> Ref {
        nodes.into_iter().fold(self.zero, |acc, node| self.apply_or(acc, node))
    }

    /// `f` implies `g`.
    pub fn is_implies(&self, f: Ref, g: Ref) -> bool {
        self.is_zero(self.apply_and(f, -g))
    }

    /// Evaluate `f` under an assignment of its variables.
    pub fn eval(&self, f: Ref, assignment: impl Fn(u32) -> bool) -> bool {
        let mut node = f;
        while !self.is_terminal(node) {
            node = if assignment(self.variable(node)) {
                self.high_node(node)
            } else {
                self.low_node(node)
            };
        }
        self.is_one(node)
    }

    /// Indices of all nodes reachable from `nodes`, the terminal included.
    pub fn descendants(&self, nodes: impl IntoIterator<Item = Ref>) -> HashSet<usize> {
        let mut visited = HashSet::new();
        visited.insert(self.one.index());
        let mut queue = VecDeque::from_iter(nodes);

        while let Some(node) = queue.pop_front() {
            let i = node.index();
            if visited.insert(i) {
                let n = self.node(i);
                queue.push_back(n.low);
                queue.push_back(n.high);
            }
        }

        visited
    }

    /// Number of nodes of `f`, the terminal included.
    pub fn size(&self, f: Ref) -> usize {
        self.descendants([f]).len()
    }

    /// Number of live nodes in the manager, the terminal included.
    pub fn num_nodes(&self) -> usize {
        self.storage.borrow().real_size()
    }

    /// Free every node not reachable from `roots` and clear the computed table.
    ///
    /// Handles to freed nodes become dangling; callers must pass everything they still hold.
    pub fn collect_garbage(&self, roots: &[Ref]) {
        self.cache.borrow_mut().clear();
        let alive = self.descendants(roots.iter().copied());
        let before = self.num_nodes();

        let mut storage = self.storage.borrow_mut();
        for b in 0..storage.num_buckets() {
            // Rebuild the chain keeping only live nodes.
            let mut index = storage.bucket(b);
            let mut kept: Vec<usize> = Vec::new();
            while index != 0 {
                let next = storage.next(index);
                if alive.contains(&index) {
                    kept.push(index);
                } else {
                    storage.drop(index);
                }
                index = next;
            }
            storage.set_bucket(b, kept.first().copied().unwrap_or(0));
            for pair in kept.windows(2) {
                storage.set_next(pair[0], pair[1]);
            }
            if let Some(&last) = kept.last() {
                storage.set_next(last, 0);
            }
        }
        debug!("Garbage collection: {} -> {} nodes", before, storage.real_size());
    }

    pub fn to_bracket_string(&self, node: Ref) -> String {
        if self.is_zero(node) {
            return "(0)".to_string();
        }
        if self.is_one(node) {
            return "(1)".to_string();
        }
        format!(
            "{}:(x{}, {}, {})",
            node,
            self.variable(node),
            self.to_bracket_string(self.high_node(node)),
            self.to_bracket_string(self.low_node(node))
        )
    }
}
