//! Visitor traversal protocol
//!
//! A traversal drains a worker-local queue of `(from, to)` edges. Each edge
//! is offered to the phase's [`Visitor`], whose answer decides what happens:
//!
//! | [`TransitionAction`] | effect |
//! |---|---|
//! | `Expand` | expand `to` even if it was stored before |
//! | `Follow` | expand `to` only on its first visit |
//! | `Forget` | drop the edge |
//! | `Terminate` | stop this worker's traversal |
//!
//! Expanding a state asks [`Visitor::expansion`] first, then generates its
//! successors. Successors owned by this worker go to the local queue, the
//! rest are posted to their owner. A traversal is one superstep: it returns
//! when no worker has queued work and no message is in flight.
//!
//! Terminating only stops the local worker. Everything else it would have
//! done in this superstep, including mail that arrives later, is dropped.

use crate::error::CheckError;
use crate::pool::{Envelope, Worker};
use crate::shared::Shared;
use crate::store::{owner, StateRef, Table};
use owcty_graph::Graph;
use std::sync::mpsc::{RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// How long an idle worker waits for mail before re-checking quiescence.
const IDLE_WAIT: Duration = Duration::from_micros(200);

/// Per-edge verdict of a visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionAction {
    Expand,
    Follow,
    Forget,
    Terminate,
}

/// Per-state verdict of a visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpansionAction {
    Expand,
    Terminate,
}

/// What a visitor callback may touch: the graph, this worker's partition,
/// and this worker's copy of the shared state.
pub struct Context<'a, G: Graph> {
    pub graph: &'a G,
    pub table: &'a mut Table<G::Node>,
    pub shared: &'a mut Shared<G::Node>,
}

/// Phase-specific edge and state callbacks
pub trait Visitor<G: Graph> {
    /// Called for every edge processed by the owner of `to`.
    ///
    /// `from` is `None` for seeds queued by the phase itself. `fresh` tells
    /// whether `to` was inserted into the table by this very edge.
    fn transition(
        &mut self,
        cx: &mut Context<'_, G>,
        from: Option<StateRef>,
        to: StateRef,
        fresh: bool,
    ) -> Result<TransitionAction, CheckError>;

    /// Called before the successors of `state` are generated.
    fn expansion(
        &mut self,
        cx: &mut Context<'_, G>,
        state: StateRef,
    ) -> Result<ExpansionAction, CheckError>;
}

/// Yield the successors of `node`, through the reduction hook when `por` is set.
pub(crate) fn for_each_successor<G, F>(graph: &G, por: bool, node: &G::Node, yield_: F)
where
    G: Graph,
    F: FnMut(G::Node, G::Label),
{
    if por {
        graph.por_successors(node, yield_);
    } else {
        graph.successors(node, yield_);
    }
}

enum Flow {
    Continue,
    Halt,
}

impl<G: Graph> Worker<'_, G> {
    /// Run one superstep: drain the local queue and the inbox until global
    /// quiescence.
    ///
    /// Every worker must call this exactly once per parallel superstep,
    /// even when it has nothing to do, because termination detection counts
    /// it as active until it gets here.
    pub(crate) fn traverse<V: Visitor<G>>(
        &mut self,
        visitor: &mut V,
        shared: &mut Shared<G::Node>,
    ) -> Result<(), CheckError> {
        self.in_superstep = false;
        let termination = Arc::clone(self.mailbox.termination());
        let mut active = true;
        let mut halted = false;
        let mut fault = None;

        loop {
            if !halted && termination.aborted() {
                halted = true;
                self.queue.clear();
            }

            if !halted {
                if let Some((from, to)) = self.queue.pop_front() {
                    match self.step(visitor, shared, from, to) {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Halt) => {
                            trace!(worker = self.id, "local traversal terminated");
                            halted = true;
                            self.queue.clear();
                        }
                        Err(e) => {
                            termination.abort();
                            fault = Some(e);
                            halted = true;
                            self.queue.clear();
                        }
                    }
                    continue;
                }
            }

            match self.mailbox.try_recv() {
                Ok(envelope) => {
                    self.accept(envelope, halted, &mut active);
                    continue;
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }

            if active {
                termination.settle();
                active = false;
            }
            if termination.quiescent() {
                break;
            }

            match self.mailbox.recv_timeout(IDLE_WAIT) {
                Ok(envelope) => self.accept(envelope, halted, &mut active),
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {}
            }
        }

        match fault {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Wait out a superstep in which this worker only does local work.
    pub(crate) fn barrier(&mut self, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        self.traverse(&mut Idle, shared)
    }

    /// Take part in the current superstep without doing any work.
    pub(crate) fn abandon_superstep(&mut self) {
        if self.in_superstep {
            self.mailbox.termination().abort();
            let _ = self.traverse(&mut Idle, &mut Shared::default());
        }
    }

    fn accept(&mut self, envelope: Envelope<G::Node>, halted: bool, active: &mut bool) {
        let termination = self.mailbox.termination();
        if !*active {
            termination.resume();
            *active = true;
        }
        if !halted {
            self.queue.push_back((Some(envelope.from), envelope.to));
        }
        termination.settle();
    }

    fn step<V: Visitor<G>>(
        &mut self,
        visitor: &mut V,
        shared: &mut Shared<G::Node>,
        from: Option<StateRef>,
        node: G::Node,
    ) -> Result<Flow, CheckError> {
        let graph = self.graph;
        let hash = graph.hash(&node);
        let (to, fresh) = self.table.store(node, hash)?;

        let mut cx = Context {
            graph,
            table: &mut self.table,
            shared: &mut *shared,
        };
        match visitor.transition(&mut cx, from, to, fresh)? {
            TransitionAction::Terminate => return Ok(Flow::Halt),
            TransitionAction::Forget => return Ok(Flow::Continue),
            TransitionAction::Follow if !fresh => return Ok(Flow::Continue),
            TransitionAction::Follow | TransitionAction::Expand => {}
        }
        if visitor.expansion(&mut cx, to)? == ExpansionAction::Terminate {
            return Ok(Flow::Halt);
        }

        shared.states += 1;
        self.expand(to, shared)?;
        Ok(Flow::Continue)
    }

    /// Generate the successors of a stored state and route each edge to
    /// the owner of its target.
    fn expand(&mut self, state: StateRef, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        let graph = self.graph;
        let (id, peers, por) = (self.id, self.peers, self.por);
        let table = &self.table;
        let queue = &mut self.queue;
        let mailbox = &self.mailbox;

        let mut edges = 0;
        let mut routed: Result<(), CheckError> = Ok(());
        for_each_successor(graph, por, table.state(state), |succ, _| {
            edges += 1;
            if routed.is_err() {
                return;
            }
            let target = owner(graph.hash(&succ), peers);
            if target == id {
                queue.push_back((Some(state), succ));
            } else {
                trace!(worker = id, owner = target, "forwarding edge");
                routed = mailbox.post(
                    target,
                    Envelope {
                        from: state,
                        to: succ,
                    },
                );
            }
        });

        shared.transitions += edges;
        routed
    }
}

/// Visitor of a worker that dropped out of a superstep.
struct Idle;

impl<G: Graph> Visitor<G> for Idle {
    fn transition(
        &mut self,
        _cx: &mut Context<'_, G>,
        _from: Option<StateRef>,
        _to: StateRef,
        _fresh: bool,
    ) -> Result<TransitionAction, CheckError> {
        Ok(TransitionAction::Forget)
    }

    fn expansion(
        &mut self,
        _cx: &mut Context<'_, G>,
        _state: StateRef,
    ) -> Result<ExpansionAction, CheckError> {
        Ok(ExpansionAction::Terminate)
    }
}
