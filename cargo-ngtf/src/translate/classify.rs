//! Split the ordered source nodes into parameters, returns and ops.

use crate::error::{Error, Result};
use crate::ir::source::{NodeIndex, SourceGraph};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classified {
    pub params: Vec<NodeIndex>,
    pub returns: Vec<NodeIndex>,
    pub ops: Vec<NodeIndex>,
}

/// Classify `ordered` (a topological order of `graph`), keeping relative order.
/// Source/sink sentinels are skipped; any control-flow op rejects the graph.
pub fn classify_nodes(graph: &SourceGraph, ordered: &[NodeIndex]) -> Result<Classified> {
    let mut classified = Classified::default();

    for &index in ordered {
        let node = graph.node(index);
        if node.is_source_or_sink() {
            continue;
        }
        if node.is_control_flow() {
            return Err(Error::ControlFlowUnsupported {
                name: node.name.clone(),
                op: node.op.clone(),
            });
        }

        if node.is_arg() {
            classified.params.push(index);
        } else if node.is_retval() {
            classified.returns.push(index);
        } else {
            classified.ops.push(index);
        }
    }

    Ok(classified)
}
