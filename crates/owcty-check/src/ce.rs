//! Counterexample reconstruction
//!
//! A counterexample is a lasso: a path from the initial state to an
//! accepting state `c` on a cycle, and the cycle from `c` back to `c`.
//!
//! Both halves are read off parent pointers. The prefix follows the
//! first-seen parents recorded by the initial exploration. For the cycle, a
//! fresh traversal from `c` overwrites the parents of everything it reaches
//! until an edge leads back into `c`, so that the parent chain from `c`
//! walks the cycle backwards. Each hop of a chase runs once around the
//! worker ring, because only the owner of a state can read its parent.
//!
//! When the fixpoint leaves accepting states in the candidate set without
//! naming a concrete cycle state, a cycle search first picks accepting
//! states of the set one at a time and looks for a path back to each one
//! inside the set.

use crate::error::CheckError;
use crate::owcty::Driver;
use crate::pool::{Task, Worker};
use crate::shared::Shared;
use crate::store::StateRef;
use crate::visitor::{Context, ExpansionAction, TransitionAction, Visitor};
use owcty_graph::Graph;
use rustc_hash::FxHashSet;
use std::io::{self, Write};
use tracing::{debug, info};

/// Lasso-shaped witness of an accepting cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Counterexample<N> {
    /// States from the initial state up to, not including, the cycle state
    pub prefix: Vec<N>,
    /// The cycle, starting and ending with the accepting cycle state
    pub cycle: Vec<N>,
    /// 1-based successor index of every step of `prefix` followed by `cycle`
    pub trail: Vec<usize>,
}

impl<N> Counterexample<N> {
    /// All states of the lasso in order.
    pub fn states(&self) -> impl Iterator<Item = &N> + '_ {
        self.prefix.iter().chain(self.cycle.iter())
    }

    /// The trail as comma-separated successor indices.
    pub fn trail_string(&self) -> String {
        self.trail
            .iter()
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Write the trail, one successor index per line.
    pub fn write_trail<W: Write>(&self, mut out: W) -> io::Result<()> {
        for index in &self.trail {
            writeln!(out, "{}", index)?;
        }
        Ok(())
    }

    /// Write the human-readable trace, one state per line.
    pub fn write_text<G, W>(&self, graph: &G, mut out: W) -> io::Result<()>
    where
        G: Graph<Node = N>,
        W: Write,
    {
        writeln!(out, "===== Trace from initial =====")?;
        for state in &self.prefix {
            writeln!(out, "{}", graph.show(state))?;
        }
        writeln!(out, "===== The cycle =====")?;
        for state in &self.cycle {
            writeln!(out, "{}", graph.show(state))?;
        }
        Ok(())
    }
}

/// Reconstruct the counterexample of a finished run that found no proof.
pub(crate) fn build<G: Graph>(
    driver: &mut Driver<'_, G>,
) -> Result<Counterexample<G::Node>, CheckError> {
    if !driver.shared.cycle_found {
        if driver.shared.size == 0 {
            return Err(CheckError::NoCounterexample);
        }
        find_cycle(driver)?;
    }

    let mut prefix = linear(driver)?;
    prefix.pop();
    let cycle = lasso(driver)?;

    let states: Vec<&G::Node> = prefix.iter().chain(cycle.iter()).collect();
    let trail = states
        .windows(2)
        .map(|step| successor_num(driver.graph, step[0], step[1]))
        .collect::<Result<Vec<_>, _>>()?;

    info!(
        prefix = prefix.len(),
        cycle = cycle.len() - 1,
        "counterexample built"
    );
    Ok(Counterexample {
        prefix,
        cycle,
        trail,
    })
}

/// Search the remaining candidate set for a concrete accepting cycle.
fn find_cycle<G: Graph>(driver: &mut Driver<'_, G>) -> Result<(), CheckError> {
    let remaining = driver.shared.size;
    info!(remaining, "searching the candidate set for an accepting cycle");

    loop {
        driver.shared.ce.seed = None;
        driver.ring(Task::PickSeed)?;
        let Some(seed) = driver.shared.ce.seed else {
            return Err(CheckError::MissingCycle { remaining });
        };
        debug!(%seed, "trying cycle seed");

        driver.superstep(Task::FindCycle)?;
        if driver.shared.cycle_found {
            info!(cycle_node = ?driver.shared.cycle_node, "accepting cycle found");
            return Ok(());
        }
    }
}

/// Path from the initial state to the cycle state.
fn linear<G: Graph>(driver: &mut Driver<'_, G>) -> Result<Vec<G::Node>, CheckError> {
    let cycle_node = driver.shared.cycle_node.ok_or(CheckError::NoCounterexample)?;
    let initial = driver
        .shared
        .ce
        .initial
        .ok_or(CheckError::BrokenParentChain { state: cycle_node })?;
    let mut trace = parent_trace(driver, cycle_node, initial, false)?;
    trace.reverse();
    Ok(trace)
}

/// The cycle through the cycle state, closed on both ends.
fn lasso<G: Graph>(driver: &mut Driver<'_, G>) -> Result<Vec<G::Node>, CheckError> {
    let cycle_node = driver.shared.cycle_node.ok_or(CheckError::NoCounterexample)?;
    driver.shared.iteration += 1;
    driver.superstep(Task::TraceCycle)?;
    let mut trace = parent_trace(driver, cycle_node, cycle_node, true)?;
    trace.reverse();
    Ok(trace)
}

/// Collect states along the parent chain from `start` until `stop`.
///
/// A closed chase records `stop` twice, at both ends.
fn parent_trace<G: Graph>(
    driver: &mut Driver<'_, G>,
    start: StateRef,
    stop: StateRef,
    closed: bool,
) -> Result<Vec<G::Node>, CheckError> {
    let limit = driver.explored_edges + 2;
    let mut trace = Vec::new();
    let mut current = start;
    driver.shared.ce.current = Some(start);

    loop {
        driver.shared.ce.current_updated = false;
        driver.shared.ce.current_state = None;
        driver.ring(Task::ParentTrace)?;

        let ce = &mut driver.shared.ce;
        let state = match (ce.current_updated, ce.current_state.take()) {
            (true, Some(state)) => state,
            _ => return Err(CheckError::BrokenParentChain { state: current }),
        };
        trace.push(state);

        if current == stop && (!closed || trace.len() > 1) {
            return Ok(trace);
        }
        if trace.len() > limit {
            return Err(CheckError::BrokenParentChain { state: current });
        }
        current = ce
            .current
            .ok_or(CheckError::BrokenParentChain { state: current })?;
    }
}

/// 1-based position of `to` among the full successor list of `from`.
///
/// Reduced successors are a subset of the full list, so the trail replays
/// against `successors` whether or not reduction was on.
fn successor_num<G: Graph>(graph: &G, from: &G::Node, to: &G::Node) -> Result<usize, CheckError> {
    let mut index = 0;
    let mut found = None;
    graph.successors(from, |succ, _| {
        index += 1;
        if found.is_none() && succ == *to {
            found = Some(index);
        }
    });
    found.ok_or_else(|| CheckError::TrailMismatch {
        from: graph.show(from),
        to: graph.show(to),
    })
}

impl<G: Graph> Worker<'_, G> {
    /// Ring task: publish the next untried accepting state of S, unless an
    /// earlier worker in the ring already did.
    pub(crate) fn pick_seed(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        if shared.ce.seed.is_some() {
            return Ok(());
        }
        while self.seed_cursor < self.table.len() {
            let r = StateRef::new(self.id as u32, self.seed_cursor as u32);
            self.seed_cursor += 1;
            if self.table.extension(r).is_seed() {
                shared.ce.seed = Some(r);
                break;
            }
        }
        Ok(())
    }

    pub(crate) fn find_cycle(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let Some(seed) = shared.ce.seed else {
            return self.traverse(&mut FindCycle::default(), shared);
        };
        if seed.worker() == self.id {
            self.queue.push_back((None, self.table.state(seed).clone()));
        }

        self.visited.clear();
        let mut visitor = FindCycle {
            seed: Some(seed),
            visited: std::mem::take(&mut self.visited),
        };
        let outcome = self.traverse(&mut visitor, shared);
        self.visited = visitor.visited;
        outcome
    }

    pub(crate) fn trace_cycle(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let target = shared.cycle_node;
        if let Some(target) = target {
            if target.worker() == self.id {
                self.queue.push_back((None, self.table.state(target).clone()));
            }
        }
        self.traverse(&mut TraceCycle { target }, shared)
    }

    /// Ring task: if this worker owns the chase cursor, record its state and
    /// move the cursor to its parent.
    pub(crate) fn parent_trace(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let ce = &mut shared.ce;
        if ce.current_updated {
            return Ok(());
        }
        let Some(current) = ce.current else {
            return Ok(());
        };
        if current.worker() != self.id {
            return Ok(());
        }

        ce.current_state = Some(self.table.state(current).clone());
        ce.current = self.table.extension(current).parent();
        ce.current_updated = true;
        Ok(())
    }
}

/// Search for a path inside S from the seed back to itself.
#[derive(Default)]
struct FindCycle {
    seed: Option<StateRef>,
    visited: FxHashSet<StateRef>,
}

impl<G: Graph> Visitor<G> for FindCycle {
    fn transition(
        &mut self,
        cx: &mut Context<'_, G>,
        from: Option<StateRef>,
        to: StateRef,
        fresh: bool,
    ) -> Result<TransitionAction, CheckError> {
        if from.is_none() {
            self.visited.insert(to);
            return Ok(TransitionAction::Expand);
        }
        if Some(to) == self.seed {
            cx.shared.cycle_found = true;
            cx.shared.cycle_node = Some(to);
            return Ok(TransitionAction::Terminate);
        }
        if fresh || !cx.table.extension(to).in_s() || !self.visited.insert(to) {
            return Ok(TransitionAction::Forget);
        }
        Ok(TransitionAction::Expand)
    }

    fn expansion(
        &mut self,
        _cx: &mut Context<'_, G>,
        _state: StateRef,
    ) -> Result<ExpansionAction, CheckError> {
        Ok(ExpansionAction::Expand)
    }
}

/// Re-parent everything reachable from the cycle state until the cycle closes.
struct TraceCycle {
    target: Option<StateRef>,
}

impl<G: Graph> Visitor<G> for TraceCycle {
    fn transition(
        &mut self,
        cx: &mut Context<'_, G>,
        from: Option<StateRef>,
        to: StateRef,
        fresh: bool,
    ) -> Result<TransitionAction, CheckError> {
        let iteration = cx.shared.iteration;
        let Some(from) = from else {
            cx.table.extension_mut(to).set_iteration(iteration);
            return Ok(TransitionAction::Expand);
        };

        let ext = cx.table.extension_mut(to);
        if Some(to) == self.target {
            ext.replace_parent(from);
            return Ok(TransitionAction::Terminate);
        }
        if !fresh && ext.visited_in(iteration) {
            return Ok(TransitionAction::Forget);
        }
        ext.set_iteration(iteration);
        ext.replace_parent(from);
        Ok(TransitionAction::Expand)
    }

    fn expansion(
        &mut self,
        _cx: &mut Context<'_, G>,
        _state: StateRef,
    ) -> Result<ExpansionAction, CheckError> {
        Ok(ExpansionAction::Expand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use owcty_graph::{ExplicitGraph, StateId};

    fn lasso_of(graph: &ExplicitGraph, prefix: &[&str], cycle: &[&str]) -> Counterexample<StateId> {
        let ids = |names: &[&str]| names.iter().map(|n| graph.id(n).unwrap()).collect::<Vec<_>>();
        Counterexample {
            prefix: ids(prefix),
            cycle: ids(cycle),
            trail: vec![2, 1, 1],
        }
    }

    #[test]
    fn test_write_text_and_trail() {
        let graph = ExplicitGraph::parse("INIT i\nACCEPT a\ni -> x a\na -> b\nb -> a\n").unwrap();
        let ce = lasso_of(&graph, &["i"], &["a", "b", "a"]);

        let mut text = Vec::new();
        ce.write_text(&graph, &mut text).unwrap();
        assert_eq!(
            String::from_utf8(text).unwrap(),
            "===== Trace from initial =====\ni\n===== The cycle =====\na\nb\na\n"
        );

        let mut trail = Vec::new();
        ce.write_trail(&mut trail).unwrap();
        assert_eq!(String::from_utf8(trail).unwrap(), "2\n1\n1\n");
        assert_eq!(ce.trail_string(), "2,1,1");
        assert_eq!(ce.states().count(), 4);
    }

    #[test]
    fn test_successor_num_is_one_based_first_match() {
        let graph = ExplicitGraph::parse("INIT s\ns -> a b a\n").unwrap();
        let s = graph.id("s").unwrap();
        let a = graph.id("a").unwrap();
        let b = graph.id("b").unwrap();
        assert_eq!(successor_num(&graph, &s, &a).unwrap(), 1);
        assert_eq!(successor_num(&graph, &s, &b).unwrap(), 2);
        let err = successor_num(&graph, &a, &s).unwrap_err();
        assert!(matches!(
            err,
            CheckError::TrailMismatch { ref from, ref to } if from == "a" && to == "s"
        ));
    }

    #[test]
    fn test_empty_trail_string() {
        let ce: Counterexample<u8> = Counterexample {
            prefix: Vec::new(),
            cycle: vec![1],
            trail: Vec::new(),
        };
        assert_eq!(ce.trail_string(), "");
    }
}
