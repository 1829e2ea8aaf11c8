//! owcty-check - Distributed on-the-fly fair-cycle detection
//!
//! Decides whether a transition graph has a reachable accepting cycle (a
//! Büchi-accepting run of an automata-product), the core question of LTL
//! model checking. The algorithm is OWCTY (One-Way-Catch-Them-Young): a
//! fixpoint of alternating reachability and elimination passes over a
//! candidate set, run by a pool of workers that each own one hash partition
//! of the state space.
//!
//! # Phases
//!
//! 1. **Initialise**: explore the reachable graph, mark accepting states
//! 2. **Reachability**: restrict the candidate set to what accepting
//!    candidates reach, counting predecessors
//! 3. **Elimination**: peel off candidates without candidate predecessors
//! 4. Repeat 2-3 until the candidate set is stable
//! 5. **Counterexample**: rebuild a lasso from parent pointers
//!
//! # Example
//!
//! ```
//! use owcty_check::{CheckConfig, Owcty, Ternary};
//! use owcty_graph::ExplicitGraph;
//!
//! let graph = ExplicitGraph::parse(
//!     "INIT s\n\
//!      ACCEPT a\n\
//!      s -> a\n\
//!      a -> a\n",
//! )
//! .unwrap();
//!
//! let report = Owcty::new(&graph, CheckConfig::default()).check().unwrap();
//! assert_eq!(report.result.ltl_property_holds, Ternary::No);
//!
//! let ce = report.counterexample.unwrap();
//! let mut text = Vec::new();
//! ce.write_text(&graph, &mut text).unwrap();
//! assert_eq!(ce.trail_string(), "1,1");
//! ```

pub mod ce;
pub mod config;
pub mod error;
pub mod extension;
pub mod owcty;
mod pool;
pub mod result;
pub mod shared;
pub mod store;
pub mod visitor;

pub use ce::Counterexample;
pub use config::{CheckConfig, ConfigError};
pub use error::{CheckError, CheckResultOf};
pub use extension::Extension;
pub use owcty::Owcty;
pub use result::{CeType, CheckResult, Report, Stats, Ternary};
pub use store::{owner, StateRef, Table};

use owcty_graph::Graph;
use std::path::Path;

/// Check `graph` with `config`. Shorthand for [`Owcty::check`].
pub fn check<G: Graph>(graph: &G, config: CheckConfig) -> CheckResultOf<Report<G::Node>> {
    Owcty::new(graph, config).check()
}

/// Check `graph` with the settings of the configuration file at `path`.
///
/// A missing or malformed file is reported as [`CheckError::Config`].
pub fn check_with_config_file<G: Graph>(
    graph: &G,
    path: impl AsRef<Path>,
) -> CheckResultOf<Report<G::Node>> {
    let config = CheckConfig::from_file(path)?;
    check(graph, config)
}
