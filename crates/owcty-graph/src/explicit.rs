//! Explicit (table-driven) transition graphs
//!
//! An [`ExplicitGraph`] stores every state and edge up front. It is meant for
//! small automata, regression tests and benchmarks rather than for large
//! models, which are generated lazily by their own [`Graph`] implementations.
//!
//! # Text format
//!
//! ```text
//! # comment
//! STATES s0 s1 a     \* optional, fixes numbering
//! INIT s0
//! ACCEPT a
//! s0 -> s1 a         \* one edge per target, in this order
//! a -> a
//! ```
//!
//! States are numbered in order of first mention. The hash of state `i` is
//! `i`, so with `p` workers state `i` is owned by worker `i mod p`.

use crate::Graph;
use rustc_hash::FxHashMap;
use std::fmt;
use thiserror::Error;

/// Index of a state in an [`ExplicitGraph`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateId(pub u32);

impl fmt::Debug for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for StateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Errors building or parsing an explicit graph
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// Malformed line in the text format
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    /// No initial state was declared
    #[error("no initial state declared")]
    MissingInitial,

    /// More than one initial state was declared
    #[error("initial state declared twice ('{first}' and '{second}')")]
    DuplicateInitial { first: String, second: String },

    /// A state name that was never declared
    #[error("unknown state '{0}'")]
    UnknownState(String),

    /// More states than a `StateId` can address
    #[error("too many states (limit {0})")]
    TooManyStates(u32),
}

/// A fully materialised transition graph.
#[derive(Debug, Clone)]
pub struct ExplicitGraph {
    names: Vec<String>,
    index: FxHashMap<String, StateId>,
    edges: Vec<Vec<StateId>>,
    accepting: Vec<bool>,
    initial: StateId,
}

impl ExplicitGraph {
    /// Start building a graph programmatically.
    pub fn builder() -> ExplicitGraphBuilder {
        ExplicitGraphBuilder::default()
    }

    /// Parse the line-oriented text format described in the module docs.
    pub fn parse(input: &str) -> Result<Self, GraphError> {
        let mut builder = ExplicitGraphBuilder::default();

        for (line_num, raw_line) in input.lines().enumerate() {
            let line_num = line_num + 1;
            let line = strip_comment(raw_line).trim();
            if line.is_empty() {
                continue;
            }

            let mut words = line.split_whitespace();
            let Some(head) = words.next() else {
                continue;
            };

            match head {
                "STATES" => {
                    for name in words {
                        builder.state(name);
                    }
                }
                "INIT" => {
                    let name = words.next().ok_or_else(|| GraphError::Syntax {
                        line: line_num,
                        message: "INIT requires a state name".to_string(),
                    })?;
                    if words.next().is_some() {
                        return Err(GraphError::Syntax {
                            line: line_num,
                            message: "INIT takes exactly one state".to_string(),
                        });
                    }
                    builder.initial(name);
                }
                "ACCEPT" => {
                    let mut any = false;
                    for name in words {
                        builder.accepting(name);
                        any = true;
                    }
                    if !any {
                        return Err(GraphError::Syntax {
                            line: line_num,
                            message: "ACCEPT requires at least one state name".to_string(),
                        });
                    }
                }
                from => match words.next() {
                    Some("->") => {
                        let mut any = false;
                        for to in words {
                            builder.edge(from, to);
                            any = true;
                        }
                        if !any {
                            return Err(GraphError::Syntax {
                                line: line_num,
                                message: format!("edge from '{}' has no target", from),
                            });
                        }
                    }
                    _ => {
                        return Err(GraphError::Syntax {
                            line: line_num,
                            message: format!("unknown directive '{}'", from),
                        })
                    }
                },
            }
        }

        builder.build()
    }

    /// Number of states.
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the graph has no states.
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Look up a state by name.
    pub fn id(&self, name: &str) -> Option<StateId> {
        self.index.get(name).copied()
    }

    /// Name of a state.
    pub fn name(&self, id: StateId) -> &str {
        &self.names[id.0 as usize]
    }

    /// Successor list of a state, in generator order.
    pub fn edges(&self, id: StateId) -> &[StateId] {
        &self.edges[id.0 as usize]
    }

    /// All states, in numbering order.
    pub fn states(&self) -> impl Iterator<Item = StateId> + '_ {
        (0..self.names.len() as u32).map(StateId)
    }
}

impl Graph for ExplicitGraph {
    type Node = StateId;
    type Label = u32;

    fn initial(&self) -> StateId {
        self.initial
    }

    fn successors<F>(&self, node: &StateId, mut yield_: F)
    where
        F: FnMut(StateId, u32),
    {
        for (i, &succ) in self.edges(*node).iter().enumerate() {
            yield_(succ, i as u32 + 1);
        }
    }

    fn is_accepting(&self, node: &StateId) -> bool {
        self.accepting[node.0 as usize]
    }

    fn hash(&self, node: &StateId) -> u64 {
        u64::from(node.0)
    }

    fn show(&self, node: &StateId) -> String {
        self.name(*node).to_string()
    }
}

/// Incremental construction of an [`ExplicitGraph`].
#[derive(Debug, Default)]
pub struct ExplicitGraphBuilder {
    index: FxHashMap<String, StateId>,
    names: Vec<String>,
    edges: Vec<Vec<StateId>>,
    accepting: Vec<bool>,
    initial: Option<StateId>,
    duplicate_initial: Option<(String, String)>,
}

impl ExplicitGraphBuilder {
    /// Declare a state (idempotent) and return its id.
    pub fn state(&mut self, name: &str) -> StateId {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = StateId(self.names.len() as u32);
        self.index.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.edges.push(Vec::new());
        self.accepting.push(false);
        id
    }

    /// Add an edge. Parallel edges are kept, each gets its own label.
    pub fn edge(&mut self, from: &str, to: &str) -> &mut Self {
        let from = self.state(from);
        let to = self.state(to);
        self.edges[from.0 as usize].push(to);
        self
    }

    /// Mark a state accepting.
    pub fn accepting(&mut self, name: &str) -> &mut Self {
        let id = self.state(name);
        self.accepting[id.0 as usize] = true;
        self
    }

    /// Set the initial state.
    pub fn initial(&mut self, name: &str) -> &mut Self {
        let id = self.state(name);
        match self.initial {
            Some(prev) if prev != id && self.duplicate_initial.is_none() => {
                self.duplicate_initial =
                    Some((self.names[prev.0 as usize].clone(), name.to_string()));
            }
            Some(_) => {}
            None => self.initial = Some(id),
        }
        self
    }

    /// Finish the graph.
    pub fn build(&mut self) -> Result<ExplicitGraph, GraphError> {
        if let Some((first, second)) = self.duplicate_initial.take() {
            return Err(GraphError::DuplicateInitial { first, second });
        }
        if self.names.len() > u32::MAX as usize {
            return Err(GraphError::TooManyStates(u32::MAX));
        }
        let initial = self.initial.ok_or(GraphError::MissingInitial)?;
        Ok(ExplicitGraph {
            names: std::mem::take(&mut self.names),
            index: std::mem::take(&mut self.index),
            edges: std::mem::take(&mut self.edges),
            accepting: std::mem::take(&mut self.accepting),
            initial,
        })
    }
}

/// Strip `#` and `\*` line comments.
fn strip_comment(line: &str) -> &str {
    let cut = [line.find('#'), line.find("\\*")]
        .into_iter()
        .flatten()
        .min();
    match cut {
        Some(pos) => &line[..pos],
        None => line,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_basic() {
        let g = ExplicitGraph::parse(
            "# self loop\n\
             INIT init\n\
             ACCEPT a\n\
             init -> a\n\
             a -> a   \\* loop\n",
        )
        .unwrap();

        assert_eq!(g.len(), 2);
        let init = g.initial();
        assert_eq!(g.show(&init), "init");
        let a = g.id("a").unwrap();
        assert_eq!(g.edges(init), &[a]);
        assert_eq!(g.edges(a), &[a]);
        assert!(g.is_accepting(&a));
        assert!(!g.is_accepting(&init));
    }

    #[test]
    fn test_states_directive_fixes_numbering() {
        let g = ExplicitGraph::parse("STATES x y z\nINIT z\nz -> x\n").unwrap();
        assert_eq!(g.id("x"), Some(StateId(0)));
        assert_eq!(g.id("y"), Some(StateId(1)));
        assert_eq!(g.id("z"), Some(StateId(2)));
        assert_eq!(g.hash(&StateId(2)), 2);
    }

    #[test]
    fn test_labels_are_one_based_positions() {
        let g = ExplicitGraph::parse("INIT s\ns -> a b a\n").unwrap();
        let mut seen = Vec::new();
        g.successors(&g.initial(), |s, l| seen.push((g.name(s).to_string(), l)));
        assert_eq!(
            seen,
            vec![
                ("a".to_string(), 1),
                ("b".to_string(), 2),
                ("a".to_string(), 3)
            ]
        );
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            ExplicitGraph::parse("s -> t\n").unwrap_err(),
            GraphError::MissingInitial
        );
        assert!(matches!(
            ExplicitGraph::parse("INIT\n").unwrap_err(),
            GraphError::Syntax { line: 1, .. }
        ));
        assert!(matches!(
            ExplicitGraph::parse("INIT s\n\nFOO bar\n").unwrap_err(),
            GraphError::Syntax { line: 3, .. }
        ));
        assert!(matches!(
            ExplicitGraph::parse("INIT s\ns ->\n").unwrap_err(),
            GraphError::Syntax { line: 2, .. }
        ));
        assert_eq!(
            ExplicitGraph::parse("INIT a\nINIT b\n").unwrap_err(),
            GraphError::DuplicateInitial {
                first: "a".to_string(),
                second: "b".to_string()
            }
        );
    }

    #[test]
    fn test_builder() {
        let g = ExplicitGraph::builder()
            .initial("s0")
            .edge("s0", "s1")
            .edge("s1", "s0")
            .accepting("s1")
            .build()
            .unwrap();
        assert_eq!(g.len(), 2);
        assert!(g.is_accepting(&g.id("s1").unwrap()));
        assert_eq!(g.states().count(), 2);
    }

    #[test]
    fn test_id_and_name_agree() {
        let g = ExplicitGraph::parse("INIT b
b -> a c
c -> b
").unwrap();
        for id in g.states() {
            assert_eq!(g.id(g.name(id)), Some(id));
        }
        assert_eq!(g.id("b"), Some(g.initial()));
        assert_eq!(g.id("missing"), None);
    }

    proptest! {
        #[test]
        fn prop_chain_roundtrip(n in 1usize..40) {
            let mut text = String::from("INIT s0\n");
            for i in 0..n {
                text.push_str(&format!("s{} -> s{}\n", i, i + 1));
            }
            let g = ExplicitGraph::parse(&text).unwrap();
            prop_assert_eq!(g.len(), n + 1);
            for i in 0..n {
                let id = g.id(&format!("s{}", i)).unwrap();
                prop_assert_eq!(g.edges(id).len(), 1);
            }
        }
    }
}
