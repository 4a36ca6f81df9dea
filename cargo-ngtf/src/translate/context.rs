//! Per-call translation state and the input resolver.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::ir::graph::{ElementType, NodeId};
use crate::ir::ng::{NgGraph, NgOp};
use crate::ir::source::{EdgeKind, Node, SourceGraph};
use crate::ir::tensor::TensorValue;

/// Source node name -> translated outputs, one slot per declared output.
///
/// Lives for a single translation call only.
#[derive(Debug, Default)]
pub struct OutputMap {
    map: HashMap<String, Vec<Option<NodeId>>>,
}

impl OutputMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&mut self, name: &str, outputs: Vec<Option<NodeId>>) {
        self.map.insert(name.to_string(), outputs);
    }

    pub fn get(&self, name: &str) -> Option<&[Option<NodeId>]> {
        self.map.get(name).map(Vec::as_slice)
    }
}

/// Find the target node feeding input `slot` of `node`.
///
/// A producer may emit several outputs (e.g. Split), so the edge's source
/// output index picks the right one.
pub fn resolve_input(
    graph: &SourceGraph,
    outputs: &OutputMap,
    node: &Node,
    slot: usize,
) -> Result<NodeId> {
    let not_found = |reason: String| Error::InputNotFound {
        node: node.name.clone(),
        index: slot,
        reason,
    };

    let edge = graph
        .input_edge(node.index, slot)
        .ok_or_else(|| not_found(format!("node has {} data input(s)", node.num_inputs())))?;
    let EdgeKind::Data { src_output, .. } = edge.kind else {
        return Err(not_found("edge carries no data".into()));
    };

    let producer = graph.node(edge.src);
    let produced = outputs.get(&producer.name).ok_or_else(|| {
        not_found(format!("producer \"{}\" has not been translated", producer.name))
    })?;
    produced
        .get(src_output)
        .copied()
        .flatten()
        .ok_or_else(|| {
            not_found(format!(
                "producer \"{}\" has no output {src_output}",
                producer.name
            ))
        })
}

/// What a translator gets to work with for one source node.
pub struct OpCtx<'a> {
    pub node: &'a Node,
    pub graph: &'a SourceGraph,
    /// Values of static arguments, indexed by argument position.
    pub static_inputs: &'a [Option<&'a TensorValue>],
    pub target: &'a mut NgGraph,
}

impl<'a> OpCtx<'a> {
    /// A translator-specific failure for this node.
    pub fn error(&self, message: impl Into<String>) -> Error {
        Error::Translation {
            node: self.node.name.clone(),
            op: self.node.op.clone(),
            message: message.into(),
        }
    }

    pub fn add(&mut self, op: NgOp, inputs: &[NodeId]) -> Result<NodeId> {
        self.target.add(op, inputs)
    }

    pub fn constant(&mut self, value: TensorValue) -> NodeId {
        self.target.add_constant(value)
    }

    pub fn shape(&self, id: NodeId) -> &[usize] {
        &self.target.node(id).shape
    }

    pub fn element_type(&self, id: NodeId) -> ElementType {
        self.target.node(id).element_type
    }

    /// Record `id` as output `slot` of this node.
    pub fn set_output(
        &self,
        outputs: &mut [Option<NodeId>],
        slot: usize,
        id: NodeId,
    ) -> Result<()> {
        let declared = outputs.len();
        let out = outputs
            .get_mut(slot)
            .ok_or_else(|| {
                self.error(format!("output {slot} requested, node declares {declared}"))
            })?;
        *out = Some(id);
        Ok(())
    }

    pub fn validate_input_count(&self, count: usize) -> Result<()> {
        let got = self.node.num_inputs();
        if got != count {
            return Err(Error::invalid(format!(
                "\"{}\" requires {count} input(s), got {got} instead",
                self.node.name
            )));
        }
        Ok(())
    }

    pub fn validate_input_count_min(&self, count: usize) -> Result<()> {
        let got = self.node.num_inputs();
        if got < count {
            return Err(Error::invalid(format!(
                "\"{}\" requires at least {count} input(s), got {got} instead",
                self.node.name
            )));
        }
        Ok(())
    }

    /// The translation-time value feeding input `slot`: either a static
    /// argument or a `Const` node's `value`.
    pub fn static_input(&self, slot: usize) -> Result<&'a TensorValue> {
        let graph = self.graph;
        let edge = graph
            .input_edge(self.node.index, slot)
            .ok_or_else(|| self.error(format!("no input {slot}")))?;
        let producer = graph.node(edge.src);

        if producer.is_arg() {
            let index = producer.attr_i64("index")?;
            return usize::try_from(index)
                .ok()
                .and_then(|i| self.static_inputs.get(i).copied().flatten())
                .ok_or_else(|| {
                    self.error(format!(
                        "input {slot} needs the value of argument {index}, which was not supplied"
                    ))
                });
        }
        if producer.op == "Const" {
            return producer.attr_tensor("value");
        }
        Err(self.error(format!(
            "input {slot} must be a constant, got \"{}\" ({})",
            producer.name, producer.op
        )))
    }

    pub fn static_input_i64(&self, slot: usize) -> Result<Vec<i64>> {
        self.static_input(slot)?
            .to_i64_vec()
            .ok_or_else(|| self.error(format!("input {slot} must hold integers")))
    }

    /// Map a possibly negative axis into `0..rank`.
    pub fn normalize_axis(&self, axis: i64, rank: usize) -> Result<usize> {
        let r = rank as i64;
        let a = if axis < 0 { axis + r } else { axis };
        if !(0..r).contains(&a) {
            return Err(self.error(format!("axis {axis} out of range for rank {rank}")));
        }
        Ok(a as usize)
    }
}
