// dot.rs — Graphviz DOT output for dependence graphs
//
// Transforms a built Program into DOT format suitable for rendering with
// `dot`, `neato`, or other Graphviz layout engines.
//
// Preconditions: `program` is a fully constructed (flushed) Program.
// Postconditions: returns a valid DOT string representing the graph.
// Failure modes: none (pure string formatting).
// Side effects: none.

use std::fmt::Write;

use crate::graph::{EdgeLabel, Program};
use crate::symbols::SourceManager;

/// Emit the dependence graph as a Graphviz DOT string. Output order is
/// deterministic: nodes by id, then edges by source id.
pub fn emit_dot(program: &Program, src_manager: &SourceManager) -> String {
    let mut buf = String::new();
    writeln!(buf, "digraph dddg {{").unwrap();
    writeln!(buf, "    rankdir=TB;").unwrap();
    writeln!(buf, "    node [fontname=\"Helvetica\", fontsize=10, shape=box];").unwrap();
    writeln!(buf, "    edge [fontname=\"Helvetica\", fontsize=9];").unwrap();
    writeln!(buf).unwrap();

    for node in program.nodes() {
        let function = node
            .static_function
            .map(|f| src_manager.function_name(f))
            .unwrap_or("?");
        writeln!(
            buf,
            "    n{} [label=\"{}: {}\\n{}\"];",
            node.node_id, node.node_id, node.microop, function
        )
        .unwrap();
    }

    writeln!(buf).unwrap();
    for source in 0..program.num_nodes() as u32 {
        for (sink, label) in program.edges_from(source) {
            match label {
                EdgeLabel::Parameter(slot) => {
                    writeln!(buf, "    n{source} -> n{sink} [label=\"{slot}\"];").unwrap();
                }
                EdgeLabel::Memory => {
                    writeln!(
                        buf,
                        "    n{source} -> n{sink} [style=dashed, color=red, label=\"mem\"];"
                    )
                    .unwrap();
                }
                EdgeLabel::Control => {
                    writeln!(
                        buf,
                        "    n{source} -> n{sink} [style=dotted, color=gray50, label=\"ctl\"];"
                    )
                    .unwrap();
                }
            }
        }
    }

    writeln!(buf, "}}").unwrap();
    buf
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::EdgeLabel;
    use crate::opcode::Microop;

    #[test]
    fn dot_contains_nodes_and_styled_edges() {
        let mut sm = SourceManager::new();
        let top = sm.insert_function("top");
        let mut p = Program::new();
        p.insert_node(0, Microop::Store).static_function = Some(top);
        p.insert_node(1, Microop::Load).static_function = Some(top);
        p.add_edge(0, 1, EdgeLabel::Memory);
        p.add_edge(0, 1, EdgeLabel::Parameter(1));

        let dot = emit_dot(&p, &sm);
        assert!(dot.starts_with("digraph dddg {"));
        assert!(dot.contains("n0 [label=\"0: Store\\ntop\"];"));
        assert!(dot.contains("n0 -> n1 [style=dashed, color=red, label=\"mem\"];"));
        assert!(dot.contains("n0 -> n1 [label=\"1\"];"));
        assert!(dot.trim_end().ends_with('}'));
    }

    #[test]
    fn dot_is_deterministic() {
        let mut sm = SourceManager::new();
        sm.insert_function("top");
        let mut p = Program::new();
        p.insert_node(0, Microop::Add);
        p.insert_node(1, Microop::Add);
        p.insert_node(2, Microop::Ret);
        p.add_edge(1, 2, EdgeLabel::Control);
        p.add_edge(0, 2, EdgeLabel::Control);
        assert_eq!(emit_dot(&p, &sm), emit_dot(&p, &sm));
    }
}
