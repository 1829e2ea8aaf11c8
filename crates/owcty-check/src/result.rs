//! Verdict and statistics of a check

use crate::ce::Counterexample;
use serde::Serialize;
use std::fmt;

/// Three-valued answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Ternary {
    Yes,
    No,
    Unknown,
}

impl From<bool> for Ternary {
    fn from(value: bool) -> Self {
        if value {
            Ternary::Yes
        } else {
            Ternary::No
        }
    }
}

impl fmt::Display for Ternary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ternary::Yes => write!(f, "Yes"),
            Ternary::No => write!(f, "No"),
            Ternary::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kind of counterexample attached to a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CeType {
    None,
    Cycle,
}

/// Exploration statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Stats {
    /// Reachable states expanded by the initial exploration
    pub states: usize,
    /// Edges generated by the initial exploration
    pub transitions: usize,
    /// Accepting states found by the initial exploration
    pub accepting: usize,
    /// Completed reachability/elimination rounds
    pub iterations: usize,
    /// States stored by each worker at the end of the run
    pub per_worker: Vec<usize>,
}

/// Outcome record of a check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResult {
    /// `Yes` when no accepting cycle is reachable
    pub ltl_property_holds: Ternary,
    /// `No` when the exploration stopped early on a cycle
    pub fully_explored: Ternary,
    pub ce_type: CeType,
    pub stats: Stats,
}

impl Default for CheckResult {
    fn default() -> Self {
        Self {
            ltl_property_holds: Ternary::Unknown,
            fully_explored: Ternary::Unknown,
            ce_type: CeType::None,
            stats: Stats::default(),
        }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Property holds: {}", self.ltl_property_holds)?;
        writeln!(f, "Fully explored: {}", self.fully_explored)?;
        writeln!(
            f,
            "{} states, {} transitions, {} accepting",
            self.stats.states, self.stats.transitions, self.stats.accepting
        )?;
        write!(f, "{} fixpoint iterations", self.stats.iterations)
    }
}

/// Result record together with the counterexample, if one was built
#[derive(Debug, Clone)]
pub struct Report<N> {
    pub result: CheckResult,
    pub counterexample: Option<Counterexample<N>>,
}

impl<N> Report<N> {
    /// Whether no accepting cycle is reachable.
    pub fn holds(&self) -> bool {
        self.result.ltl_property_holds == Ternary::Yes
    }
}
