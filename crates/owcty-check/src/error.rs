//! Error types for the fair-cycle checker
//!
//! Every variant except [`CheckError::Io`] and [`CheckError::Config`] is a
//! fatal invariant violation: it means the checker or the graph
//! collaborator is broken, and the run is abandoned without a verdict.

use crate::config::ConfigError;
use crate::store::StateRef;
use thiserror::Error;

/// Result type for checker operations
pub type CheckResultOf<T> = Result<T, CheckError>;

/// Errors that abort a check
#[derive(Debug, Error)]
pub enum CheckError {
    /// A worker tried to store a state another worker owns
    #[error("worker {worker} cannot store a state owned by worker {owner}")]
    NotOwner { worker: usize, owner: usize },

    /// A state has more in-S predecessors than the 15-bit counter holds
    #[error("state {state} has more than {max} predecessors in the candidate set")]
    PredCountOverflow { state: StateRef, max: u32 },

    /// Elimination removed an edge that reachability never counted
    #[error("predecessor count of state {state} dropped below zero")]
    PredCountUnderflow { state: StateRef },

    /// Elimination removed more accepting states than the candidate set held
    #[error("elimination removed {eliminated} accepting states out of {accepting}")]
    EliminationOverflow { eliminated: usize, accepting: usize },

    /// A counterexample was requested for a run without a violation
    #[error("no accepting cycle was found, there is no counterexample")]
    NoCounterexample,

    /// The fixpoint left a non-empty candidate set but no cycle through it exists
    #[error("candidate set of {remaining} accepting states contains no accepting cycle")]
    MissingCycle { remaining: usize },

    /// A parent pointer chase could not reach its target
    #[error("parent chain broken at state {state}")]
    BrokenParentChain { state: StateRef },

    /// The graph does not reproduce an edge of the trace
    #[error("state '{to}' is not a successor of '{from}' when replaying the trace")]
    TrailMismatch { from: String, to: String },

    /// A worker thread disappeared
    #[error("worker {0} stopped responding")]
    WorkerLost(usize),

    /// Invalid configuration
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Writing a counterexample stream failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CheckError {
    /// Whether this error is a fatal invariant violation rather than an
    /// environmental failure.
    pub fn is_invariant_violation(&self) -> bool {
        !matches!(
            self,
            CheckError::Io(_) | CheckError::Config(_) | CheckError::WorkerLost(_)
        )
    }
}
