//! Source graph -> target function translation.
//!
//! [`Compiler::prepare`] orders and classifies the source graph and works out
//! which arguments are static, once. [`Compiler::translate`] then lowers the
//! graph for a concrete set of argument shapes; it may be called any number
//! of times and from several threads, since all per-call state lives in a
//! [`Translation`] that is dropped when the call returns.

pub mod broadcast;
pub mod classify;
pub mod context;
pub mod ops;
pub mod padding;
pub mod registry;
pub mod static_inputs;

use crate::error::{Error, Result};
use crate::ir::graph::NodeId;
use crate::ir::ng::{Function, NgGraph};
use crate::ir::source::{to_target_shape, DataType, NodeIndex, SourceGraph};
use crate::ir::tensor::TensorValue;

use classify::{classify_nodes, Classified};
use context::{resolve_input, OpCtx, OutputMap};
use static_inputs::{analyze_static_inputs, node_index};

/// One argument of a translation call.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorArg {
    pub dtype: DataType,
    pub shape: Vec<i64>,
    /// Needed only for arguments the graph uses as static inputs.
    pub value: Option<TensorValue>,
}

impl TensorArg {
    pub fn new(dtype: DataType, shape: Vec<i64>) -> Self {
        Self {
            dtype,
            shape,
            value: None,
        }
    }

    pub fn with_value(mut self, value: TensorValue) -> Self {
        self.value = Some(value);
        self
    }
}

/// A source graph prepared for translation.
#[derive(Debug, Clone)]
pub struct Compiler {
    graph: SourceGraph,
    classified: Classified,
    input_is_static: Vec<bool>,
}

impl Compiler {
    pub fn prepare(graph: SourceGraph) -> Result<Self> {
        // Ops are visited in topological order.
        let ordered = graph.reverse_post_order()?;
        let classified = classify_nodes(&graph, &ordered)?;
        let input_is_static = analyze_static_inputs(&graph, &classified.params)?;

        log::debug!(
            "prepared graph: {} param(s), {} op(s), {} result(s)",
            classified.params.len(),
            classified.ops.len(),
            classified.returns.len()
        );

        Ok(Self {
            graph,
            classified,
            input_is_static,
        })
    }

    pub fn graph(&self) -> &SourceGraph {
        &self.graph
    }

    pub fn num_params(&self) -> usize {
        self.classified.params.len()
    }

    /// Whether argument `index` must be supplied with a value.
    pub fn input_is_static(&self, index: usize) -> bool {
        self.input_is_static.get(index).copied().unwrap_or(false)
    }

    pub fn translate(&self, inputs: &[TensorArg]) -> Result<Function> {
        let static_inputs = inputs
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                if self.input_is_static(i) {
                    arg.value.as_ref()
                } else {
                    None
                }
            })
            .collect();

        let mut translation = Translation {
            graph: &self.graph,
            static_inputs,
            target: NgGraph::new(),
            outputs: OutputMap::new(),
        };

        let parameters = translation.input_params(inputs, &self.classified.params)?;
        translation.translate_ops(&self.classified.ops)?;
        let results = translation.output_nodes(&self.classified.returns)?;

        Ok(Function {
            graph: translation.target,
            parameters,
            results,
        })
    }
}

/// State of a single translation call.
struct Translation<'a> {
    graph: &'a SourceGraph,
    static_inputs: Vec<Option<&'a TensorValue>>,
    target: NgGraph,
    outputs: OutputMap,
}

impl<'a> Translation<'a> {
    /// Create one target parameter per `_Arg`, ordered by argument index.
    fn input_params(&mut self, inputs: &[TensorArg], params: &[NodeIndex]) -> Result<Vec<NodeId>> {
        let graph = self.graph;
        let mut list: Vec<Option<NodeId>> = vec![None; params.len()];

        for &param in params {
            let node = graph.node(param);
            let dtype = node.attr_type("T")?;
            let index = node_index(graph, param)?;
            let slot = place(&mut list, index, &node.name)?;

            let arg = inputs.get(index).ok_or_else(|| {
                Error::invalid(format!(
                    "no input supplied for argument {index} (\"{}\"), got {} input(s)",
                    node.name,
                    inputs.len()
                ))
            })?;
            if arg.dtype != dtype {
                log::warn!(
                    "argument {index} supplied as {}, graph declares {}",
                    arg.dtype,
                    dtype
                );
            }

            let element_type = dtype.to_element_type()?;
            let shape = to_target_shape(&arg.shape)?;
            log::debug!("parameter {index} (\"{}\"): {element_type}{shape:?}", node.name);

            let id = self.target.add_parameter(index, element_type, shape);
            self.outputs.save(&node.name, vec![Some(id)]);
            *slot = Some(id);
        }

        // n distinct indices below n: every slot is filled
        Ok(list.into_iter().flatten().collect())
    }

    /// Translate every op node, in topological order.
    fn translate_ops(&mut self, ops: &[NodeIndex]) -> Result<()> {
        let graph = self.graph;

        for &index in ops {
            let node = graph.node(index);
            log::debug!("Constructing op {} which is {}", node.name, node.op);

            let Some(translator) = registry::lookup(&node.op) else {
                log::debug!("Unsupported Op: {} ({})", node.name, node.op);
                return Err(Error::UnsupportedOperation {
                    name: node.name.clone(),
                    op: node.op.clone(),
                });
            };

            let args = translator
                .inputs
                .resolve(node)
                .into_iter()
                .map(|slot| resolve_input(graph, &self.outputs, node, slot))
                .collect::<Result<Vec<_>>>()?;

            let mut outputs = vec![None; node.num_outputs];
            let mut ctx = OpCtx {
                node,
                graph,
                static_inputs: &self.static_inputs,
                target: &mut self.target,
            };
            (translator.translate)(&mut ctx, &args, &mut outputs)?;

            self.outputs.save(&node.name, outputs);
        }
        Ok(())
    }

    /// Resolve the producer of every `_Retval`, ordered by return index.
    fn output_nodes(&self, returns: &[NodeIndex]) -> Result<Vec<NodeId>> {
        let graph = self.graph;
        let mut list: Vec<Option<NodeId>> = vec![None; returns.len()];

        for &ret in returns {
            let node = graph.node(ret);
            // Make sure that this _Retval only has one input node.
            if node.num_inputs() != 1 {
                return Err(Error::invalid(format!(
                    "_Retval \"{}\" has {} inputs, should have 1",
                    node.name,
                    node.num_inputs()
                )));
            }
            let index = node_index(graph, ret)?;
            let slot = place(&mut list, index, &node.name)?;
            let result = resolve_input(graph, &self.outputs, node, 0)?;
            log::debug!("result {index} (\"{}\") is %{result}", node.name);
            *slot = Some(result);
        }

        Ok(list.into_iter().flatten().collect())
    }
}

/// Claim position `index` of `list` for node `name`.
fn place<'l>(
    list: &'l mut [Option<NodeId>],
    index: usize,
    name: &str,
) -> Result<&'l mut Option<NodeId>> {
    let len = list.len();
    let slot = list.get_mut(index).ok_or_else(|| {
        Error::invalid(format!(
            "\"{name}\" has index {index}, expected one below {len}"
        ))
    })?;
    if slot.is_some() {
        return Err(Error::invalid(format!(
            "\"{name}\" reuses index {index}"
        )));
    }
    Ok(slot)
}
