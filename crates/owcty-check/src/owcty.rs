//! One-Way-Catch-Them-Young fair-cycle detection
//!
//! OWCTY keeps a candidate set S of states that may still lie on an
//! accepting cycle and shrinks it to a fixpoint:
//!
//! 1. **Initialise** explores the reachable graph once. S starts as the
//!    accepting states.
//! 2. **Reset** shrinks S to its accepting states and clears predecessor
//!    counts. **Reachability** then re-marks S as everything reachable from
//!    them, counting for each state its predecessors in S.
//! 3. **Elimination** removes, Kahn style, every state of S that has no
//!    predecessor in S, and everything that becomes predecessor-free as a
//!    result.
//!
//! Within Reachability states only enter S, within Elimination they only
//! leave it.
//!
//! Steps 2 and 3 repeat until the number of accepting states in S stops
//! changing. The property holds exactly when it drops to zero.
//!
//! Initialise also catches cycles early: a self-loop on an accepting state
//! and, with a single worker, the MAP heuristic (propagating the largest
//! accepting-ancestor id, a state that receives its own id closes a cycle).

use crate::ce::Counterexample;
use crate::config::CheckConfig;
use crate::error::CheckError;
use crate::pool::{Task, Worker, WorkerPool};
use crate::result::{CeType, CheckResult, Report, Stats, Ternary};
use crate::shared::Shared;
use crate::store::{StateRef, Table};
use crate::visitor::{Context, ExpansionAction, TransitionAction, Visitor};
use owcty_graph::Graph;
use std::time::Instant;
use tracing::{debug, info};

/// Fair-cycle checker over a graph
///
/// ```
/// use owcty_check::{CheckConfig, Owcty};
/// use owcty_graph::ExplicitGraph;
///
/// let graph = ExplicitGraph::parse("INIT a\nACCEPT b\na -> b\nb -> a\n").unwrap();
/// let report = Owcty::new(&graph, CheckConfig::default().with_workers(2))
///     .check()
///     .unwrap();
/// assert!(!report.holds());
/// assert_eq!(report.counterexample.unwrap().trail_string(), "1,1,1");
/// ```
pub struct Owcty<'g, G: Graph> {
    graph: &'g G,
    config: CheckConfig,
}

impl<'g, G: Graph> Owcty<'g, G> {
    pub fn new(graph: &'g G, config: CheckConfig) -> Self {
        Self { graph, config }
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    /// Decide whether an accepting cycle is reachable, building a
    /// counterexample if one is and the configuration asks for it.
    pub fn check(&self) -> Result<Report<G::Node>, CheckError> {
        self.check_partitions().map(|(report, _)| report)
    }

    /// Like [`Owcty::check`], also returning each worker's final partition.
    pub fn check_partitions(&self) -> Result<(Report<G::Node>, Vec<Table<G::Node>>), CheckError> {
        let peers = self.config.workers.max(1);
        let graph = self.graph;
        let config = &self.config;
        info!(workers = peers, por = config.por, "starting OWCTY");

        std::thread::scope(|scope| {
            let (pool, handles) = WorkerPool::spawn(scope, graph, peers, config.por);
            let outcome = Driver::new(graph, config, &pool).run();
            pool.shutdown();

            let mut tables = Vec::with_capacity(peers);
            let mut lost = None;
            for (id, handle) in handles.into_iter().enumerate() {
                match handle.join() {
                    Ok(table) => tables.push(table),
                    Err(_) => {
                        lost.get_or_insert(id);
                    }
                }
            }

            let mut report = outcome?;
            if let Some(id) = lost {
                return Err(CheckError::WorkerLost(id));
            }
            report.result.stats.per_worker = tables.iter().map(Table::len).collect();
            Ok((report, tables))
        })
    }
}

/// Master side of one run
pub(crate) struct Driver<'a, G: Graph> {
    pub(crate) graph: &'a G,
    pub(crate) config: &'a CheckConfig,
    pub(crate) pool: &'a WorkerPool<G::Node>,
    pub(crate) shared: Shared<G::Node>,
    pub(crate) stats: Stats,
    /// Edges generated over all supersteps, bounds parent-chain length
    pub(crate) explored_edges: usize,
}

impl<'a, G: Graph> Driver<'a, G> {
    fn new(graph: &'a G, config: &'a CheckConfig, pool: &'a WorkerPool<G::Node>) -> Self {
        Self {
            graph,
            config,
            pool,
            shared: Shared::default(),
            stats: Stats::default(),
            explored_edges: 0,
        }
    }

    /// Run `task` on all workers and fold the results into `self.shared`.
    pub(crate) fn superstep(&mut self, task: Task) -> Result<(), CheckError> {
        let parts = self.pool.run(task, &self.shared)?;
        self.shared.reduce(parts);
        self.explored_edges += self.shared.transitions;
        Ok(())
    }

    /// Pass `self.shared` around the worker ring.
    pub(crate) fn ring(&mut self, task: Task) -> Result<(), CheckError> {
        let shared = std::mem::take(&mut self.shared);
        self.shared = self.pool.ring(task, shared)?;
        Ok(())
    }

    fn run(mut self) -> Result<Report<G::Node>, CheckError> {
        let start = Instant::now();

        self.initialise()?;
        while !self.shared.cycle_found && self.shared.size != 0 {
            self.shared.iteration += 1;
            self.shared.oldsize = self.shared.size;
            self.reset()?;
            self.reachability()?;
            self.elimination()?;
            self.stats.iterations += 1;
            if self.shared.oldsize == self.shared.size {
                break;
            }
        }

        let valid = !self.shared.cycle_found && self.shared.size == 0;
        info!(
            valid,
            iterations = self.stats.iterations,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "OWCTY done"
        );

        let mut result = CheckResult {
            ltl_property_holds: Ternary::from(valid),
            fully_explored: Ternary::from(!self.shared.cycle_found),
            ce_type: CeType::None,
            stats: std::mem::take(&mut self.stats),
        };
        let counterexample = if !valid && self.config.counterexample {
            result.ce_type = CeType::Cycle;
            Some(self.counterexample()?)
        } else {
            None
        };
        Ok(Report {
            result,
            counterexample,
        })
    }

    fn initialise(&mut self) -> Result<(), CheckError> {
        self.superstep(Task::Initialise)?;
        self.stats.states = self.shared.states;
        self.stats.transitions = self.shared.transitions;
        self.stats.accepting = self.shared.size;
        info!(
            states = self.shared.states,
            transitions = self.shared.transitions,
            "initialise: |S| = {}",
            self.shared.size
        );
        if self.shared.cycle_found {
            info!(cycle_node = ?self.shared.cycle_node, "accepting cycle found during exploration");
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), CheckError> {
        self.superstep(Task::Reset)?;
        debug_assert_eq!(self.shared.size, self.shared.oldsize);
        Ok(())
    }

    fn reachability(&mut self) -> Result<(), CheckError> {
        self.superstep(Task::Reachability)?;
        info!(
            iteration = self.shared.iteration,
            seeds = self.shared.size,
            "reachability: |S| = {}",
            self.shared.states
        );
        Ok(())
    }

    fn elimination(&mut self) -> Result<(), CheckError> {
        let accepting = self.shared.size;
        self.superstep(Task::Elimination)?;
        let eliminated = self.shared.size;
        if eliminated > accepting {
            return Err(CheckError::EliminationOverflow {
                eliminated,
                accepting,
            });
        }
        self.shared.size = accepting - eliminated;
        info!(
            iteration = self.shared.iteration,
            eliminated = self.shared.states,
            "elimination: |S| = {}",
            self.shared.size
        );
        Ok(())
    }

    pub(crate) fn counterexample(&mut self) -> Result<Counterexample<G::Node>, CheckError> {
        crate::ce::build(self)
    }
}

impl<G: Graph> Worker<'_, G> {
    pub(crate) fn initialise(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let initial = self.graph.initial();
        if self.table.owns(self.graph.hash(&initial)) {
            self.queue.push_back((None, initial));
        }
        let mut visitor = Initialise {
            map: self.peers == 1,
        };
        self.traverse(&mut visitor, shared)
    }

    /// Drop every non-accepting state from S and stamp the remaining
    /// seeds with the coming iteration.
    pub(crate) fn reset_candidates(
        &mut self,
        shared: &mut Shared<G::Node>,
    ) -> Result<(), CheckError> {
        let iteration = shared.iteration;
        let mut seeds = 0;
        for (_, ext) in self.table.extensions_mut() {
            ext.reset_pred_count();
            if ext.is_seed() {
                ext.set_iteration(iteration);
                seeds += 1;
            } else {
                ext.set_in_s(false);
                ext.set_iteration(iteration.wrapping_sub(1));
            }
        }
        shared.size = seeds;
        self.barrier(shared)
    }

    pub(crate) fn reachability(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let seeds: Vec<G::Node> = self
            .table
            .iter()
            .filter(|(_, _, ext)| ext.is_seed())
            .map(|(_, node, _)| node.clone())
            .collect();
        shared.size = seeds.len();
        debug!(worker = self.id, seeds = seeds.len(), "reachability seeds");
        self.queue.extend(seeds.into_iter().map(|node| (None, node)));
        self.traverse(&mut Reachability, shared)
    }

    pub(crate) fn elimination(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let seeds: Vec<G::Node> = self
            .table
            .iter()
            .filter(|(_, _, ext)| ext.in_s() && ext.pred_count() == 0)
            .map(|(_, node, _)| node.clone())
            .collect();
        debug!(worker = self.id, seeds = seeds.len(), "elimination seeds");
        self.queue.extend(seeds.into_iter().map(|node| (None, node)));
        self.traverse(&mut Elimination, shared)
    }
}

fn record_cycle<N>(shared: &mut Shared<N>, state: StateRef) {
    shared.cycle_found = true;
    shared.cycle_node = Some(state);
}

/// Id a state contributes to the MAP heuristic.
fn map_id(state: StateRef) -> u32 {
    state.slot() as u32 + 1
}

/// Propagate the largest accepting-ancestor id along `from -> to`.
/// Returns whether the edge closes an accepting cycle through `to`.
fn propagate_map<N>(table: &mut Table<N>, from: StateRef, to: StateRef) -> bool
where
    N: Eq + std::hash::Hash,
{
    let source = table.extension(from);
    let carried = if source.in_f() {
        source.map().max(map_id(from))
    } else {
        source.map()
    };
    if carried == 0 {
        return false;
    }

    let target = table.extension_mut(to);
    if target.in_f() && carried == map_id(to) {
        return true;
    }
    if carried > target.map() {
        target.set_map(carried);
    }
    false
}

struct Initialise {
    map: bool,
}

impl<G: Graph> Visitor<G> for Initialise {
    fn transition(
        &mut self,
        cx: &mut Context<'_, G>,
        from: Option<StateRef>,
        to: StateRef,
        fresh: bool,
    ) -> Result<TransitionAction, CheckError> {
        let Some(from) = from else {
            cx.shared.ce.initial = Some(to);
            return Ok(TransitionAction::Follow);
        };

        if fresh {
            cx.table.extension_mut(to).set_parent_once(from);
        }
        if from == to && cx.table.extension(to).in_f() {
            record_cycle(cx.shared, to);
            return Ok(TransitionAction::Terminate);
        }
        if self.map && propagate_map(cx.table, from, to) {
            record_cycle(cx.shared, to);
            return Ok(TransitionAction::Terminate);
        }
        Ok(TransitionAction::Follow)
    }

    fn expansion(
        &mut self,
        cx: &mut Context<'_, G>,
        state: StateRef,
    ) -> Result<ExpansionAction, CheckError> {
        let accepting = cx.graph.is_accepting(cx.table.state(state));
        let ext = cx.table.extension_mut(state);
        ext.set_in_f(accepting);
        ext.set_in_s(accepting);
        if accepting {
            cx.shared.size += 1;
        }
        Ok(ExpansionAction::Expand)
    }
}

struct Reachability;

impl<G: Graph> Visitor<G> for Reachability {
    fn transition(
        &mut self,
        cx: &mut Context<'_, G>,
        from: Option<StateRef>,
        to: StateRef,
        fresh: bool,
    ) -> Result<TransitionAction, CheckError> {
        if from.is_none() {
            return Ok(TransitionAction::Expand);
        }
        let iteration = cx.shared.iteration;
        let ext = cx.table.extension_mut(to);
        ext.increment_pred_count(to)?;
        ext.set_in_s(true);
        if !fresh && ext.visited_in(iteration) {
            return Ok(TransitionAction::Forget);
        }
        ext.set_iteration(iteration);
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

struct Elimination;

impl<G: Graph> Visitor<G> for Elimination {
    fn transition(
        &mut self,
        cx: &mut Context<'_, G>,
        from: Option<StateRef>,
        to: StateRef,
        _fresh: bool,
    ) -> Result<TransitionAction, CheckError> {
        if from.is_none() {
            return Ok(TransitionAction::Expand);
        }
        match cx.table.extension_mut(to).decrement_pred_count(to)? {
            0 => Ok(TransitionAction::Expand),
            _ => Ok(TransitionAction::Forget),
        }
    }

    fn expansion(
        &mut self,
        cx: &mut Context<'_, G>,
        state: StateRef,
    ) -> Result<ExpansionAction, CheckError> {
        let ext = cx.table.extension_mut(state);
        ext.set_in_s(false);
        if ext.in_f() {
            cx.shared.size += 1;
        }
        Ok(ExpansionAction::Expand)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extension::Extension;
    use owcty_graph::ExplicitGraph;

    fn run(text: &str, workers: usize) -> Report<owcty_graph::StateId> {
        let graph = ExplicitGraph::parse(text).unwrap();
        let config = CheckConfig::default()
            .with_workers(workers)
            .with_counterexample(false);
        Owcty::new(&graph, config).check().unwrap()
    }

    #[test]
    fn test_map_detects_cycle_through_accepting_ancestor() {
        let mut table: Table<u32> = Table::new(0, 1);
        let (a, _) = table.store(0, 0).unwrap();
        let (b, _) = table.store(1, 1).unwrap();
        table.extension_mut(a).set_in_f(true);

        assert!(!propagate_map(&mut table, a, b));
        assert_eq!(table.extension(b).map(), map_id(a));
        assert!(propagate_map(&mut table, b, a));
    }

    #[test]
    fn test_map_ignores_non_accepting_cycles() {
        let mut table: Table<u32> = Table::new(0, 1);
        let (a, _) = table.store(0, 0).unwrap();
        let (b, _) = table.store(1, 1).unwrap();
        assert!(!propagate_map(&mut table, a, b));
        assert!(!propagate_map(&mut table, b, a));
        assert_eq!(*table.extension(a), Extension::default());
    }

    #[test]
    fn test_reachability_adds_and_elimination_removes() {
        let graph = ExplicitGraph::parse("INIT a\nACCEPT b\na -> b\n").unwrap();
        let mut table = Table::new(0, 1);
        let (a, _) = table.store(owcty_graph::StateId(0), 0).unwrap();
        let (b, _) = table.store(owcty_graph::StateId(1), 1).unwrap();
        table.extension_mut(b).set_in_f(true);
        let mut shared = Shared::default();
        shared.iteration = 1;
        let mut cx = Context {
            graph: &graph,
            table: &mut table,
            shared: &mut shared,
        };

        let first = Reachability.transition(&mut cx, Some(a), b, false).unwrap();
        let second = Reachability.transition(&mut cx, Some(a), b, false).unwrap();
        assert_eq!(first, TransitionAction::Expand);
        assert_eq!(second, TransitionAction::Forget);
        assert!(cx.table.extension(b).in_s());
        assert_eq!(cx.table.extension(b).pred_count(), 2);

        let first = Elimination.transition(&mut cx, Some(a), b, false).unwrap();
        assert_eq!(first, TransitionAction::Forget);
        assert!(cx.table.extension(b).in_s());
        let second = Elimination.transition(&mut cx, Some(a), b, false).unwrap();
        assert_eq!(second, TransitionAction::Expand);
        Elimination.expansion(&mut cx, b).unwrap();
        assert!(!cx.table.extension(b).in_s());
        assert_eq!(cx.shared.size, 1);

        let err = Elimination.transition(&mut cx, Some(a), b, false).unwrap_err();
        assert!(matches!(err, CheckError::PredCountUnderflow { .. }));
    }

    fn in_s(table: &Table<owcty_graph::StateId>) -> Vec<bool> {
        table.iter().map(|(_, _, ext)| ext.in_s()).collect()
    }

    fn phase(
        worker: &mut Worker<'_, ExplicitGraph>,
        shared: &mut Shared<owcty_graph::StateId>,
        task: Task,
    ) {
        let mut part = shared.for_superstep();
        worker.superstep(task, &mut part).unwrap();
        shared.reduce([part]);
    }

    #[test]
    fn test_candidate_set_only_grows_in_reachability_and_shrinks_in_elimination() {
        // the non-accepting loop c1/c2 keeps b alive for one extra round
        let graph = ExplicitGraph::parse(
            "INIT i
ACCEPT a b
i -> a
a -> c1
c1 -> c2
c2 -> c1 b
b -> d
",
        )
        .unwrap();
        let mut worker = Worker::solo(&graph);
        let mut shared = Shared::default();
        phase(&mut worker, &mut shared, Task::Initialise);
        assert!(!shared.cycle_found);
        assert_eq!(shared.size, 2);

        let mut rounds = 0;
        let mut entered = 0;
        let mut left = 0;
        while shared.size != 0 {
            rounds += 1;
            shared.iteration += 1;
            let accepting = shared.size;

            let before = in_s(&worker.table);
            phase(&mut worker, &mut shared, Task::Reset);
            let reset = in_s(&worker.table);
            assert!(before.iter().zip(&reset).all(|(b, a)| *b || !*a));

            phase(&mut worker, &mut shared, Task::Reachability);
            let reached = in_s(&worker.table);
            assert_eq!(reached.len(), reset.len());
            for (b, a) in reset.iter().zip(&reached) {
                assert!(!*b || *a, "reachability removed a state from S");
                entered += usize::from(!*b && *a);
            }

            phase(&mut worker, &mut shared, Task::Elimination);
            let eliminated = in_s(&worker.table);
            for (b, a) in reached.iter().zip(&eliminated) {
                assert!(*b || !*a, "elimination added a state to S");
                left += usize::from(*b && !*a);
            }
            shared.size = accepting - shared.size;
        }

        assert_eq!(rounds, 2);
        // round 1: c1 c2 d enter, a leaves; round 2: d re-enters, b and d leave
        assert_eq!(entered, 4);
        assert_eq!(left, 3);
    }

    #[test]
    fn test_acyclic_graph_holds_without_iterations_beyond_first() {
        let report = run("INIT a\nACCEPT a b\na -> b\nb -> c\n", 1);
        assert!(report.holds());
        assert_eq!(report.result.fully_explored, Ternary::Yes);
        assert_eq!(report.result.stats.states, 3);
        assert_eq!(report.result.stats.transitions, 2);
        assert_eq!(report.result.stats.accepting, 2);
        assert_eq!(report.result.stats.iterations, 1);
    }

    #[test]
    fn test_no_accepting_states_skips_fixpoint() {
        let report = run("INIT a\na -> b\nb -> a\n", 2);
        assert!(report.holds());
        assert_eq!(report.result.stats.iterations, 0);
        assert_eq!(report.result.stats.per_worker.iter().sum::<usize>(), 2);
    }

    #[test]
    fn test_cycle_behind_accepting_state_is_not_accepting() {
        // accepting a leads into the non-accepting loop b <-> c
        let report = run("INIT a\nACCEPT a\na -> b\nb -> c\nc -> b\n", 3);
        assert!(report.holds());
        assert_eq!(report.result.ce_type, CeType::None);
    }

    #[test]
    fn test_fixpoint_finds_cycle_with_several_workers() {
        let report = run("INIT a\nACCEPT b\na -> b\nb -> c\nc -> b\n", 3);
        assert!(!report.holds());
        assert_eq!(report.result.fully_explored, Ternary::Yes);
        assert!(report.counterexample.is_none());
    }
}
