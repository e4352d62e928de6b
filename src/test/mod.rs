//! Shared test support: graph builders and a reference interpreter.


use crate::{
    compiler::IntraproceduralOptimization,
    ir::FlowGraph,
    test::interpreter::{execute, Value},
};

/// Runs `transform` on `graph` and checks that the result validates and behaves like the
/// input on every argument list in `inputs`. Returns the transformed graph.
pub fn assert_preserves_semantics(
    transform: &impl IntraproceduralOptimization,
    graph: &FlowGraph,
    inputs: &[Vec<Value>],
) -> FlowGraph {
    let optimized = transform.run(graph);
    if let Err(error) = optimized.validate() {
        panic!("{} produced an invalid graph: {error}\n{optimized}", transform.name());
    }
    for arguments in inputs {
        let before = execute(graph, arguments.clone()).expect("input graph runs");
        let after = execute(&optimized, arguments.clone()).expect("optimized graph runs");
        assert_eq!(
            before,
            after,
            "{} changed behavior for {arguments:?}\nbefore:\n{graph}\nafter:\n{optimized}",
            transform.name()
        );
    }
    optimized
}

/// Asserts that `transform` leaves `graph` untouched.
pub fn assert_unchanged(transform: &impl IntraproceduralOptimization, graph: &FlowGraph) {
    let again = transform.run(graph);
    assert!(
        again.same_instance(graph),
        "{} rewrote a graph it should leave alone:\n{graph}\n{again}",
        transform.name()
    );
}
