//! Per-worker replicated algorithm state
//!
//! The master hands every worker a copy of [`Shared`] at the start of a
//! superstep and folds the copies back together afterwards with
//! [`Shared::reduce`]. In ring mode the same value travels from worker to
//! worker instead and needs no reduction.

use crate::store::StateRef;

/// Scratch state of counterexample reconstruction
#[derive(Debug, Clone)]
pub struct CeShared<N> {
    /// Where the trace currently being chased starts
    pub initial: Option<StateRef>,
    /// Cursor of the parent-pointer chase
    pub current: Option<StateRef>,
    /// Whether some worker moved `current` during this ring pass
    pub current_updated: bool,
    /// Value of the state the cursor was on before the last hop
    pub current_state: Option<N>,
    /// Candidate cycle start picked by the cycle search
    pub seed: Option<StateRef>,
}

impl<N> Default for CeShared<N> {
    fn default() -> Self {
        Self {
            initial: None,
            current: None,
            current_updated: false,
            current_state: None,
            seed: None,
        }
    }
}

/// State replicated to every worker and reduced after each superstep
#[derive(Debug, Clone)]
pub struct Shared<N> {
    /// Phase-specific count (accepting states, seeds or eliminated states)
    pub size: usize,
    /// Candidate-set size before the current fixpoint round
    pub oldsize: usize,
    /// An accepting state known to lie on a cycle
    pub cycle_node: Option<StateRef>,
    pub cycle_found: bool,
    /// Superstep stamp, see [`crate::extension::Extension::iteration`]
    pub iteration: u32,
    /// States expanded during this superstep
    pub states: usize,
    /// Edges generated during this superstep
    pub transitions: usize,
    pub ce: CeShared<N>,
}

impl<N> Default for Shared<N> {
    fn default() -> Self {
        Self {
            size: 0,
            oldsize: 0,
            cycle_node: None,
            cycle_found: false,
            iteration: 0,
            states: 0,
            transitions: 0,
            ce: CeShared::default(),
        }
    }
}

impl<N: Clone> Shared<N> {
    /// Copy handed to a worker at the start of a superstep, with the
    /// per-superstep counters cleared.
    pub fn for_superstep(&self) -> Self {
        let mut copy = self.clone();
        copy.size = 0;
        copy.states = 0;
        copy.transitions = 0;
        copy
    }

    /// Fold the workers' copies of a finished superstep into `self`.
    ///
    /// Counters are summed, `cycle_found` is or-ed and the first reported
    /// cycle node and initial state win. `self.size` is replaced by the
    /// summed size.
    pub fn reduce(&mut self, parts: impl IntoIterator<Item = Shared<N>>) {
        let mut size = 0;
        let mut states = 0;
        let mut transitions = 0;
        for part in parts {
            size += part.size;
            states += part.states;
            transitions += part.transitions;
            if part.cycle_found {
                self.cycle_found = true;
                if self.cycle_node.is_none() {
                    self.cycle_node = part.cycle_node;
                }
            }
            if self.ce.initial.is_none() {
                self.ce.initial = part.ce.initial;
            }
        }
        self.size = size;
        self.states = states;
        self.transitions = transitions;
    }
}
