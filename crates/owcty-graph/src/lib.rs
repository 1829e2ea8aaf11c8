//! owcty-graph - the transition-graph contract consumed by the fair-cycle checker
//!
//! The checker never looks inside a state. It only needs:
//! - The initial state
//! - A deterministic successor generator
//! - An acceptance predicate (Büchi acceptance of the product automaton)
//! - A stable hash, used to partition states between workers
//!
//! State generators (program interpreters, automaton networks, ...) implement
//! [`Graph`]. [`ExplicitGraph`] is a table-driven implementation for small
//! automata, tests and benchmarks.
//!
//! # Example
//!
//! ```
//! use owcty_graph::{ExplicitGraph, Graph};
//!
//! let graph = ExplicitGraph::parse(
//!     "INIT s0\n\
//!      ACCEPT a\n\
//!      s0 -> a\n\
//!      a -> a\n",
//! )
//! .unwrap();
//!
//! let init = graph.initial();
//! let mut succs = Vec::new();
//! graph.successors(&init, |s, _| succs.push(s));
//! assert_eq!(succs.len(), 1);
//! assert!(graph.is_accepting(&succs[0]));
//! ```

mod explicit;

pub use explicit::{ExplicitGraph, ExplicitGraphBuilder, GraphError, StateId};

use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

/// A lazily expanded, finitely branching transition graph.
///
/// Implementations must be deterministic: `successors` has to yield the
/// same states in the same order every time it is called for equal nodes.
/// Counterexample trails are successor indices and rely on that order.
pub trait Graph: Sync {
    /// State handle. Identity is by content, not by allocation.
    type Node: Clone + Eq + Hash + Send + fmt::Debug;

    /// Edge label yielded alongside each successor.
    type Label;

    /// The initial state.
    fn initial(&self) -> Self::Node;

    /// Yield every successor of `node` in generator order.
    fn successors<F>(&self, node: &Self::Node, yield_: F)
    where
        F: FnMut(Self::Node, Self::Label);

    /// Whether `node` is accepting.
    fn is_accepting(&self, node: &Self::Node) -> bool;

    /// Stable hash of `node`. Equal nodes must hash equally on every worker.
    fn hash(&self, node: &Self::Node) -> u64 {
        fingerprint(node)
    }

    /// One-line human-readable description of `node`.
    fn show(&self, node: &Self::Node) -> String {
        format!("{:?}", node)
    }

    /// Partial-order reduction hook.
    ///
    /// Yields a subset of `successors` sufficient to preserve the property
    /// being checked. The default performs no reduction. A checker that
    /// enables reduction uses this generator for every phase, so it must be
    /// as deterministic as `successors`.
    fn por_successors<F>(&self, node: &Self::Node, yield_: F)
    where
        F: FnMut(Self::Node, Self::Label),
    {
        self.successors(node, yield_)
    }
}

/// FxHash fingerprint of any hashable value.
///
/// Deterministic across threads and runs, which is what ownership
/// partitioning needs.
#[inline]
pub fn fingerprint<T: Hash + ?Sized>(value: &T) -> u64 {
    let mut hasher = FxHasher::default();
    value.hash(&mut hasher);
    hasher.finish()
}
