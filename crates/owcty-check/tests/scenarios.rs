//! End-to-end scenarios for the fair-cycle checker
//!
//! Small hand-written graphs with known answers, run through the full
//! worker pool with one and several workers.

use owcty_check::{
    owner, CeType, CheckConfig, CheckError, ConfigError, Counterexample, Owcty, Report, Ternary,
};
use owcty_graph::{ExplicitGraph, Graph, StateId};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Helpers
// ============================================================================

fn parse(text: &str) -> ExplicitGraph {
    ExplicitGraph::parse(text).unwrap()
}

/// Route checker logs to the test output, filtered by `RUST_LOG`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn config(workers: usize) -> CheckConfig {
    init_tracing();
    CheckConfig::default().with_workers(workers)
}

fn check(graph: &ExplicitGraph, workers: usize) -> Report<StateId> {
    Owcty::new(graph, config(workers)).check().unwrap()
}

fn names(graph: &ExplicitGraph, states: &[StateId]) -> Vec<String> {
    states.iter().map(|s| graph.name(*s).to_string()).collect()
}

/// Replay the trail from the initial state and compare with the listed states.
fn assert_replays(graph: &ExplicitGraph, ce: &Counterexample<StateId>) {
    let states: Vec<StateId> = ce.states().copied().collect();
    assert_eq!(states[0], graph.initial());
    assert_eq!(ce.trail.len(), states.len() - 1);

    let mut current = graph.initial();
    for (step, &index) in ce.trail.iter().enumerate() {
        let mut succs = Vec::new();
        graph.successors(&current, |s, _| succs.push(s));
        current = succs[index - 1];
        assert_eq!(current, states[step + 1], "trail step {} diverges", step);
    }

    assert_eq!(ce.cycle.first(), ce.cycle.last());
    assert!(ce.cycle.len() >= 2);
    assert!(graph.is_accepting(&ce.cycle[0]));
}

// ============================================================================
// Scenario 1: accepting self-loop
// ============================================================================

#[test]
fn test_self_loop_is_a_one_state_cycle() {
    let graph = parse("INIT init\nACCEPT a\ninit -> a\na -> a\n");

    for workers in 1..=3 {
        let report = check(&graph, workers);
        assert_eq!(report.result.ltl_property_holds, Ternary::No);
        assert_eq!(report.result.fully_explored, Ternary::No);
        assert_eq!(report.result.ce_type, CeType::Cycle);

        let ce = report.counterexample.unwrap();
        assert_eq!(names(&graph, &ce.prefix), ["init"]);
        assert_eq!(names(&graph, &ce.cycle), ["a", "a"]);
        assert_eq!(ce.trail_string(), "1,1");
        assert_replays(&graph, &ce);
    }
}

#[test]
fn test_self_loop_on_initial_state() {
    let graph = parse("INIT a\nACCEPT a\na -> a\n");
    let report = check(&graph, 2);
    let ce = report.counterexample.unwrap();
    assert!(ce.prefix.is_empty());
    assert_eq!(names(&graph, &ce.cycle), ["a", "a"]);
    assert_eq!(ce.trail_string(), "1");
}

#[test]
fn test_counterexample_text_output() {
    let graph = parse("INIT init\nACCEPT a\ninit -> a\na -> a\n");
    let ce = check(&graph, 1).counterexample.unwrap();
    let mut out = Vec::new();
    ce.write_text(&graph, &mut out).unwrap();
    assert_eq!(
        String::from_utf8(out).unwrap(),
        "===== Trace from initial =====\ninit\n===== The cycle =====\na\na\n"
    );
}

// ============================================================================
// Scenario 2: linear chain
// ============================================================================

#[test]
fn test_chain_without_cycle_holds() {
    let graph = parse("INIT s0\nACCEPT s2 s4\ns0 -> s1\ns1 -> s2\ns2 -> s3\ns3 -> s4\n");

    for workers in 1..=4 {
        let report = check(&graph, workers);
        assert_eq!(report.result.ltl_property_holds, Ternary::Yes);
        assert_eq!(report.result.fully_explored, Ternary::Yes);
        assert_eq!(report.result.ce_type, CeType::None);
        assert!(report.counterexample.is_none());
        assert_eq!(report.result.stats.states, 5);
        assert_eq!(report.result.stats.transitions, 4);
        assert_eq!(report.result.stats.accepting, 2);
        assert_eq!(report.result.stats.per_worker.len(), workers);
        assert_eq!(report.result.stats.per_worker.iter().sum::<usize>(), 5);
    }
}

#[test]
fn test_non_accepting_cycle_holds() {
    let graph = parse("INIT s0\nACCEPT s1\ns0 -> s1\ns1 -> s2\ns2 -> s3\ns3 -> s2\n");
    for workers in 1..=3 {
        assert!(check(&graph, workers).holds());
    }
}

#[test]
fn test_counterexample_on_valid_run_is_refused() {
    // the counterexample is only built when a violation is reported
    let graph = parse("INIT s0\ns0 -> s1\n");
    let report = Owcty::new(&graph, config(2).with_counterexample(true))
        .check()
        .unwrap();
    assert!(report.holds());
    assert!(report.counterexample.is_none());
}

// ============================================================================
// Scenario 3: cycle split between two workers
// ============================================================================

#[test]
fn test_cycle_across_partitions() {
    let graph = parse("INIT i\nACCEPT a\ni -> a\na -> b\nb -> a\n");
    let a = graph.id("a").unwrap();
    let b = graph.id("b").unwrap();
    assert_ne!(owner(graph.hash(&a), 2), owner(graph.hash(&b), 2));

    let report = check(&graph, 2);
    assert_eq!(report.result.ltl_property_holds, Ternary::No);
    assert_eq!(report.result.fully_explored, Ternary::Yes);

    let ce = report.counterexample.unwrap();
    assert_eq!(names(&graph, &ce.prefix), ["i"]);
    assert_eq!(names(&graph, &ce.cycle), ["a", "b", "a"]);
    assert_eq!(ce.trail_string(), "1,1,1");
    assert_replays(&graph, &ce);
}

#[test]
fn test_cycle_across_many_partitions() {
    let graph = parse(
        "INIT s0\n\
         ACCEPT s3\n\
         s0 -> s1 s5\n\
         s1 -> s2\n\
         s2 -> s3\n\
         s3 -> s4\n\
         s4 -> s1\n\
         s5 -> s5\n",
    );
    for workers in 1..=5 {
        let report = check(&graph, workers);
        assert!(!report.holds());
        let ce = report.counterexample.unwrap();
        assert_eq!(names(&graph, &ce.cycle[..1]), ["s3"]);
        assert_eq!(ce.cycle.len(), 5);
        assert_replays(&graph, &ce);
    }
}

// ============================================================================
// Scenario 4: diamond into a node of in-degree 3
// ============================================================================

const DIAMOND: &str = "INIT s\n\
                       ACCEPT s p1 p2 p3 d\n\
                       s -> p1 p2 p3\n\
                       p1 -> d\n\
                       p2 -> d\n\
                       p3 -> d\n";

#[test]
fn test_diamond_eliminates_join_once() {
    let graph = parse(DIAMOND);
    let d = graph.id("d").unwrap();

    for workers in 1..=4 {
        let (report, tables) = Owcty::new(&graph, config(workers))
            .check_partitions()
            .unwrap();
        assert!(report.holds());
        assert_eq!(report.result.stats.accepting, 5);
        assert_eq!(report.result.stats.iterations, 1);

        let table = &tables[owner(graph.hash(&d), workers)];
        let r = table.fetch(&d, graph.hash(&d)).unwrap().unwrap();
        assert_eq!(table.extension(r).pred_count(), 0);
        assert!(!table.extension(r).in_s());
    }
}

#[test]
fn test_diamond_with_accepting_self_loop() {
    let graph = parse(&format!("{}d -> d\n", DIAMOND));
    let report = check(&graph, 1);
    assert!(!report.holds());
    let ce = report.counterexample.unwrap();
    assert_eq!(names(&graph, &ce.prefix), ["s", "p1"]);
    assert_eq!(names(&graph, &ce.cycle), ["d", "d"]);
    assert_eq!(ce.trail_string(), "1,1,1");

    for workers in 2..=4 {
        let ce = check(&graph, workers).counterexample.unwrap();
        assert_replays(&graph, &ce);
    }
}

// ============================================================================
// Invariants and failures
// ============================================================================

#[test]
fn test_every_state_lives_with_its_owner() {
    let graph = parse(
        "INIT s0\n\
         ACCEPT s2 s5\n\
         s0 -> s1 s2 s3\n\
         s1 -> s4\n\
         s2 -> s5 s0\n\
         s3 -> s6\n\
         s4 -> s1\n\
         s5 -> s6\n\
         s6 -> s6\n",
    );
    for workers in 1..=4 {
        let (_, tables) = Owcty::new(&graph, config(workers))
            .check_partitions()
            .unwrap();
        assert_eq!(tables.len(), workers);
        for (id, table) in tables.iter().enumerate() {
            assert_eq!(table.worker(), id);
            for (r, node, _) in table.iter() {
                assert_eq!(r.worker(), id);
                assert_eq!(owner(graph.hash(node), workers), id);
            }
        }
    }
}

#[test]
fn test_pred_count_overflow_aborts_the_run() {
    let mut builder = ExplicitGraph::builder();
    builder.initial("s").accepting("s");
    for _ in 0..=owcty_check::extension::MAX_PRED_COUNT {
        builder.edge("s", "d");
    }
    let graph = builder.build().unwrap();

    for workers in [1, 2] {
        let err = Owcty::new(&graph, config(workers)).check().unwrap_err();
        assert!(matches!(err, CheckError::PredCountOverflow { max: 32767, .. }));
        assert!(err.is_invariant_violation());
    }
}

/// Graph whose successor generator panics on one state.
struct Faulty(ExplicitGraph);

impl Graph for Faulty {
    type Node = StateId;
    type Label = u32;

    fn initial(&self) -> StateId {
        self.0.initial()
    }

    fn successors<F: FnMut(StateId, u32)>(&self, node: &StateId, yield_: F) {
        assert_ne!(self.0.name(*node), "bad", "generator failure");
        self.0.successors(node, yield_)
    }

    fn is_accepting(&self, node: &StateId) -> bool {
        self.0.is_accepting(node)
    }
}

#[test]
fn test_panicking_generator_reports_lost_worker() {
    let graph = Faulty(parse("INIT s\ns -> a b\na -> bad\nb -> s\n"));
    for workers in [1, 3] {
        let err = Owcty::new(&graph, config(workers)).check().unwrap_err();
        assert!(matches!(err, CheckError::WorkerLost(_)));
        assert!(!err.is_invariant_violation());
    }
}

/// Graph whose reduced generator keeps a single successor, the first or
/// the last one.
struct Reduced {
    graph: ExplicitGraph,
    keep_last: bool,
}

impl Reduced {
    fn new(text: &str, keep_last: bool) -> Self {
        Self {
            graph: parse(text),
            keep_last,
        }
    }
}

impl Graph for Reduced {
    type Node = StateId;
    type Label = u32;

    fn initial(&self) -> StateId {
        self.graph.initial()
    }

    fn successors<F: FnMut(StateId, u32)>(&self, node: &StateId, yield_: F) {
        self.graph.successors(node, yield_)
    }

    fn is_accepting(&self, node: &StateId) -> bool {
        self.graph.is_accepting(node)
    }

    fn hash(&self, node: &StateId) -> u64 {
        self.graph.hash(node)
    }

    fn por_successors<F: FnMut(StateId, u32)>(&self, node: &StateId, mut yield_: F) {
        let edges = self.graph.edges(*node);
        let kept = if self.keep_last {
            edges.last()
        } else {
            edges.first()
        };
        if let Some(&succ) = kept {
            yield_(succ, 1);
        }
    }
}

const FORK: &str = "INIT s\nACCEPT a\ns -> b a\na -> a\nb -> b\n";

#[test]
fn test_por_explores_the_reduced_graph() {
    let graph = Reduced::new(FORK, false);
    for workers in [1, 2] {
        let full = Owcty::new(&graph, config(workers)).check().unwrap();
        assert!(!full.holds());
        assert_eq!(full.counterexample.unwrap().trail_string(), "2,1");

        let reduced = Owcty::new(&graph, config(workers).with_por(true))
            .check()
            .unwrap();
        assert!(reduced.holds());
        assert_eq!(reduced.result.stats.states, 2);
    }
}

#[test]
fn test_reduced_trail_indexes_full_successors() {
    let graph = Reduced::new(FORK, true);
    for workers in [1, 2, 3] {
        let report = Owcty::new(&graph, config(workers).with_por(true))
            .check()
            .unwrap();
        assert!(!report.holds());
        assert_eq!(report.result.stats.states, 2);

        let ce = report.counterexample.unwrap();
        assert_eq!(names(&graph.graph, &ce.prefix), ["s"]);
        assert_eq!(names(&graph.graph, &ce.cycle), ["a", "a"]);
        // `a` is the second full successor of `s`, the only reduced one
        assert_eq!(ce.trail_string(), "2,1");
        assert_replays(&graph.graph, &ce);
    }
}

#[test]
fn test_config_file_drives_the_run() {
    init_tracing();
    let graph = parse("INIT i\nACCEPT a b\ni -> a\na -> b\nb -> a\n");
    let path = std::env::temp_dir().join(format!("owcty-scenario-{}.cfg", std::process::id()));
    let text = "\\* two workers, no trace\nWORKERS 2\nCOUNTEREXAMPLE FALSE\n";
    std::fs::write(&path, text).unwrap();

    let report = owcty_check::check_with_config_file(&graph, &path).unwrap();
    let _ = std::fs::remove_file(&path);
    assert!(!report.holds());
    assert!(report.counterexample.is_none());
    assert_eq!(report.result.stats.per_worker.len(), 2);
}

#[test]
fn test_unreadable_config_file_is_a_config_error() {
    let graph = parse("INIT i\ni -> i\n");
    let path = std::env::temp_dir().join("owcty-scenario-missing/none.cfg");
    let err = owcty_check::check_with_config_file(&graph, &path).unwrap_err();
    assert!(matches!(err, CheckError::Config(ConfigError::Read(_))));
    assert!(!err.is_invariant_violation());
}

#[test]
fn test_result_serializes() {
    let graph = parse("INIT init\nACCEPT a\ninit -> a\na -> a\n");
    let report = check(&graph, 1);
    let json = serde_json::to_value(&report.result).unwrap();
    assert_eq!(json["ltl_property_holds"], "No");
    assert_eq!(json["ce_type"], "Cycle");
    assert_eq!(json["stats"]["per_worker"][0], 2);
}
