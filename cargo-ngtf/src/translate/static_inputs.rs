//! Which arguments must have their values known at translation time.
//!
//! Purely structural: an argument is static when any data edge leaving its
//! `_Arg` node lands on an input slot its consumer declares static.

use crate::error::{Error, Result};
use crate::ir::source::{EdgeKind, NodeIndex, SourceGraph};

use super::registry;

/// Read and range-check the `index` attribute of an `_Arg` or `_Retval` node.
pub(crate) fn node_index(graph: &SourceGraph, node: NodeIndex) -> Result<usize> {
    let node = graph.node(node);
    let index = node.attr_i64("index")?;
    usize::try_from(index)
        .map_err(|_| Error::invalid(format!("\"{}\" has negative index {index}", node.name)))
}

/// One flag per argument index, sized `max(index) + 1`. Every index must be
/// below `params.len()`.
pub fn analyze_static_inputs(graph: &SourceGraph, params: &[NodeIndex]) -> Result<Vec<bool>> {
    let indices = params
        .iter()
        .map(|&p| {
            let index = node_index(graph, p)?;
            if index >= params.len() {
                return Err(Error::invalid(format!(
                    "\"{}\" has index {index} but the graph has {} argument(s)",
                    graph.node(p).name,
                    params.len()
                )));
            }
            Ok(index)
        })
        .collect::<Result<Vec<_>>>()?;

    let len = indices.iter().max().map_or(0, |&m| m + 1);
    let mut input_is_static = vec![false; len];

    for (&param, &index) in params.iter().zip(&indices) {
        for edge in graph.data_out_edges(param) {
            let consumer = graph.node(edge.dst);
            if consumer.is_source_or_sink() {
                continue;
            }
            let EdgeKind::Data { dst_input, .. } = edge.kind else {
                continue;
            };

            log::trace!(
                "for arg {index} checking edge into \"{}\" input {dst_input}",
                consumer.name
            );
            if registry::input_is_static(consumer, dst_input) {
                log::trace!("marking arg {index} static (\"{}\" input {dst_input})", consumer.name);
                input_is_static[index] = true;
                break;
            }
        }
        log::debug!("arg {index} is static: {}", input_is_static[index]);
    }

    Ok(input_is_static)
}
