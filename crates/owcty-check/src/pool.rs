//! Worker threads and superstep execution
//!
//! Each worker owns one [`Table`] partition and lives on its own scoped
//! thread. The master drives workers with [`Command`]s:
//!
//! - [`WorkerPool::run`] starts a task on every worker at once. Workers
//!   exchange edges through their inboxes until the whole pool is quiescent,
//!   then each replies with its copy of [`Shared`] for the master to reduce.
//! - [`WorkerPool::ring`] hands one [`Shared`] value to worker 0, then 1,
//!   and so on. Ring tasks touch only the local partition and send no mail.
//!
//! Quiescence is tracked by one counter: active workers plus messages in
//! flight. A message is counted before it is sent and uncounted after the
//! receiver has queued it, and a worker that picks up mail while idle counts
//! itself active first, so the counter can only reach zero when no work is
//! left anywhere.

use crate::error::CheckError;
use crate::shared::Shared;
use crate::store::{StateRef, Table};
use owcty_graph::Graph;
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, Scope, ScopedJoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

/// How often the master checks for dead workers while waiting for replies.
const REPLY_POLL: Duration = Duration::from_millis(50);

/// Work a worker performs on command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Task {
    Initialise,
    Reset,
    Reachability,
    Elimination,
    PickSeed,
    FindCycle,
    TraceCycle,
    ParentTrace,
}

pub(crate) enum Command<N> {
    Parallel(Task, Shared<N>),
    Ring(Task, Shared<N>),
    Shutdown,
}

pub(crate) struct Reply<N> {
    worker: usize,
    shared: Shared<N>,
    outcome: Result<(), CheckError>,
}

/// An edge whose target is owned by another worker
pub(crate) struct Envelope<N> {
    pub(crate) from: StateRef,
    pub(crate) to: N,
}

/// Superstep termination detection shared by all workers
pub(crate) struct Termination {
    pending: AtomicUsize,
    abort: AtomicBool,
    lost: Mutex<Option<usize>>,
}

impl Termination {
    fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            abort: AtomicBool::new(false),
            lost: Mutex::new(None),
        }
    }

    /// Arm for a superstep in which all `workers` start active.
    fn reset(&self, workers: usize) {
        self.abort.store(false, Ordering::SeqCst);
        self.pending.store(workers, Ordering::SeqCst);
    }

    /// A message is about to be sent.
    fn dispatch(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// An idle worker picked up mail.
    pub(crate) fn resume(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// A message was queued by its receiver, or a worker went idle.
    pub(crate) fn settle(&self) {
        self.pending.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn quiescent(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0 || self.lost.lock().is_some()
    }

    /// Ask every worker to drop the rest of this superstep.
    pub(crate) fn abort(&self) {
        self.abort.store(true, Ordering::SeqCst);
    }

    pub(crate) fn aborted(&self) -> bool {
        self.abort.load(Ordering::Relaxed)
    }

    fn mark_lost(&self, worker: usize) {
        self.lost.lock().get_or_insert(worker);
        self.abort();
    }

    fn lost(&self) -> Option<usize> {
        *self.lost.lock()
    }
}

/// A worker's inbox plus the inboxes of every peer
pub(crate) struct Mailbox<N> {
    inbox: Receiver<Envelope<N>>,
    outboxes: Vec<Sender<Envelope<N>>>,
    termination: Arc<Termination>,
}

impl<N> Mailbox<N> {
    pub(crate) fn termination(&self) -> &Arc<Termination> {
        &self.termination
    }

    /// Send an edge to the worker owning its target.
    pub(crate) fn post(&self, worker: usize, envelope: Envelope<N>) -> Result<(), CheckError> {
        self.termination.dispatch();
        self.outboxes[worker].send(envelope).map_err(|_| {
            self.termination.settle();
            CheckError::WorkerLost(worker)
        })
    }

    pub(crate) fn try_recv(&self) -> Result<Envelope<N>, TryRecvError> {
        self.inbox.try_recv()
    }

    pub(crate) fn recv_timeout(&self, timeout: Duration) -> Result<Envelope<N>, RecvTimeoutError> {
        self.inbox.recv_timeout(timeout)
    }
}

/// One partition of the search and the thread-local state to work on it
pub(crate) struct Worker<'g, G: Graph> {
    pub(crate) id: usize,
    pub(crate) peers: usize,
    pub(crate) graph: &'g G,
    pub(crate) por: bool,
    pub(crate) table: Table<G::Node>,
    pub(crate) queue: VecDeque<(Option<StateRef>, G::Node)>,
    pub(crate) mailbox: Mailbox<G::Node>,
    /// Set while a parallel superstep still expects this worker to traverse
    pub(crate) in_superstep: bool,
    /// Next slot the cycle search considers as a seed
    pub(crate) seed_cursor: usize,
    /// States entered by the current cycle-search attempt
    pub(crate) visited: FxHashSet<StateRef>,
}

impl<'g, G: Graph> Worker<'g, G> {
    /// Serve commands until shutdown, then hand back the partition.
    fn serve(
        mut self,
        commands: Receiver<Command<G::Node>>,
        replies: Sender<Reply<G::Node>>,
    ) -> Table<G::Node> {
        let _guard = LossGuard {
            worker: self.id,
            termination: Arc::clone(self.mailbox.termination()),
        };

        while let Ok(command) = commands.recv() {
            let (task, mut shared, parallel) = match command {
                Command::Parallel(task, shared) => (task, shared, true),
                Command::Ring(task, shared) => (task, shared, false),
                Command::Shutdown => break,
            };

            self.in_superstep = parallel;
            let outcome = self.execute(task, &mut shared);
            if parallel {
                self.abandon_superstep();
            }
            if let Err(e) = &outcome {
                warn!(worker = self.id, ?task, error = %e, "task failed");
            }
            debug!(
                worker = self.id,
                ?task,
                stored = self.table.len(),
                expanded = shared.states,
                edges = shared.transitions,
                "task done"
            );

            let reply = Reply {
                worker: self.id,
                shared,
                outcome,
            };
            if replies.send(reply).is_err() {
                break;
            }
        }

        self.table
    }

    fn execute(&mut self, task: Task, shared: &mut Shared<G::Node>) -> Result<(), CheckError> {
        match task {
            Task::Initialise => self.initialise(shared),
            Task::Reset => self.reset_candidates(shared),
            Task::Reachability => self.reachability(shared),
            Task::Elimination => self.elimination(shared),
            Task::PickSeed => self.pick_seed(shared),
            Task::FindCycle => self.find_cycle(shared),
            Task::TraceCycle => self.trace_cycle(shared),
            Task::ParentTrace => self.parent_trace(shared),
        }
    }
}

#[cfg(test)]
impl<'g, G: Graph> Worker<'g, G> {
    /// A worker with no peers, driven directly from the calling thread.
    pub(crate) fn solo(graph: &'g G) -> Self {
        let (outbox, inbox) = mpsc::channel();
        Self {
            id: 0,
            peers: 1,
            graph,
            por: false,
            table: Table::new(0, 1),
            queue: VecDeque::new(),
            mailbox: Mailbox {
                inbox,
                outboxes: vec![outbox],
                termination: Arc::new(Termination::new()),
            },
            in_superstep: false,
            seed_cursor: 0,
            visited: FxHashSet::default(),
        }
    }

    /// Run `task` as a one-worker parallel superstep.
    pub(crate) fn superstep(
        &mut self,
        task: Task,
        shared: &mut Shared<G::Node>,
    ) -> Result<(), CheckError> {
        self.mailbox.termination.reset(1);
        self.in_superstep = true;
        let outcome = self.execute(task, shared);
        self.abandon_superstep();
        outcome
    }
}

/// Reports a worker whose thread unwinds, so its peers and the master stop
/// waiting for it.
struct LossGuard {
    worker: usize,
    termination: Arc<Termination>,
}

impl Drop for LossGuard {
    fn drop(&mut self) {
        if thread::panicking() {
            self.termination.mark_lost(self.worker);
        }
    }
}

/// Master-side handle on the worker threads
pub(crate) struct WorkerPool<N> {
    commands: Vec<Sender<Command<N>>>,
    replies: Receiver<Reply<N>>,
    termination: Arc<Termination>,
}

impl<N: Clone + Send + Eq + Hash> WorkerPool<N> {
    /// Start `peers` workers on `scope`.
    ///
    /// The join handles yield each worker's partition after
    /// [`WorkerPool::shutdown`].
    pub(crate) fn spawn<'scope, 'env, G>(
        scope: &'scope Scope<'scope, 'env>,
        graph: &'env G,
        peers: usize,
        por: bool,
    ) -> (Self, Vec<ScopedJoinHandle<'scope, Table<N>>>)
    where
        G: Graph<Node = N>,
        N: 'env,
    {
        let termination = Arc::new(Termination::new());
        let (reply_tx, replies) = mpsc::channel();
        let (outboxes, inboxes): (Vec<_>, Vec<_>) = (0..peers).map(|_| mpsc::channel()).unzip();

        let mut commands = Vec::with_capacity(peers);
        let mut handles = Vec::with_capacity(peers);
        for (id, inbox) in inboxes.into_iter().enumerate() {
            let (command_tx, command_rx) = mpsc::channel();
            commands.push(command_tx);

            let worker = Worker {
                id,
                peers,
                graph,
                por,
                table: Table::new(id, peers),
                queue: VecDeque::new(),
                mailbox: Mailbox {
                    inbox,
                    outboxes: outboxes.clone(),
                    termination: Arc::clone(&termination),
                },
                in_superstep: false,
                seed_cursor: 0,
                visited: FxHashSet::default(),
            };
            let replies = reply_tx.clone();
            handles.push(scope.spawn(move || worker.serve(command_rx, replies)));
        }

        let pool = Self {
            commands,
            replies,
            termination,
        };
        (pool, handles)
    }

    pub(crate) fn peers(&self) -> usize {
        self.commands.len()
    }

    /// Run `task` on all workers at once and collect their results, indexed
    /// by worker.
    pub(crate) fn run(&self, task: Task, shared: &Shared<N>) -> Result<Vec<Shared<N>>, CheckError> {
        let peers = self.peers();
        self.termination.reset(peers);
        for (id, commands) in self.commands.iter().enumerate() {
            commands
                .send(Command::Parallel(task, shared.for_superstep()))
                .map_err(|_| CheckError::WorkerLost(id))?;
        }

        let mut parts: Vec<Option<Shared<N>>> = (0..peers).map(|_| None).collect();
        let mut fault = None;
        for _ in 0..peers {
            let reply = self.reply()?;
            if let Err(e) = reply.outcome {
                fault.get_or_insert(e);
            }
            parts[reply.worker] = Some(reply.shared);
        }
        if let Some(e) = fault {
            return Err(e);
        }
        Ok(parts.into_iter().flatten().collect())
    }

    /// Pass `shared` through workers 0, 1, ... running `task` on each.
    pub(crate) fn ring(&self, task: Task, mut shared: Shared<N>) -> Result<Shared<N>, CheckError> {
        for (id, commands) in self.commands.iter().enumerate() {
            commands
                .send(Command::Ring(task, shared))
                .map_err(|_| CheckError::WorkerLost(id))?;
            let reply = self.reply()?;
            reply.outcome?;
            shared = reply.shared;
        }
        Ok(shared)
    }

    /// Stop every worker. Their threads return their partitions.
    pub(crate) fn shutdown(&self) {
        for commands in &self.commands {
            let _ = commands.send(Command::Shutdown);
        }
    }

    fn reply(&self) -> Result<Reply<N>, CheckError> {
        loop {
            match self.replies.recv_timeout(REPLY_POLL) {
                Ok(reply) => return Ok(reply),
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(worker) = self.termination.lost() {
                        return Err(CheckError::WorkerLost(worker));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(CheckError::WorkerLost(self.termination.lost().unwrap_or(0)))
                }
            }
        }
    }
}
