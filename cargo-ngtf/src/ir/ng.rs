//! Target computation graph IR.
//!
//! Each op infers its element type and shape when it is inserted, so a
//! translator that wires operands inconsistently fails at the node it builds
//! rather than somewhere downstream. Window ops use channels-first layout:
//! data `[N, C, spatial..]`, filters `[O, I, spatial..]`.

use std::fmt;

use crate::error::{Error, Result};
use crate::ir::graph::{join, num_elements, ElementType, Graph, NodeId, Shape};
use crate::ir::tensor::TensorValue;

pub type NgGraph = Graph<NgOp>;

#[derive(Debug, Clone, PartialEq)]
pub struct ConvParams {
    pub strides: Vec<usize>,
    pub dilations: Vec<usize>,
    pub padding_below: Vec<usize>,
    pub padding_above: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PoolParams {
    pub window: Vec<usize>,
    pub strides: Vec<usize>,
    pub padding_below: Vec<usize>,
    pub padding_above: Vec<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum NgOp {
    /// Function argument at `index`
    Parameter { index: usize },
    Constant { value: TensorValue },

    Add,
    Subtract,
    Multiply,
    Divide,
    Maximum,
    Minimum,

    Negative,
    Floor,
    Relu,
    Sigmoid,
    Tanh,
    Exp,
    Sqrt,

    Convert { to: ElementType },

    /// Contracts the last axis of the first operand with the first axis of the second
    Dot,
    /// Replicates the input along `axes` of the output `shape`
    Broadcast { shape: Shape, axes: Vec<usize> },
    /// Transposes by `input_order`, then reinterprets as `output_shape`
    Reshape {
        input_order: Vec<usize>,
        output_shape: Shape,
    },
    Slice {
        lower: Vec<usize>,
        upper: Vec<usize>,
        strides: Vec<usize>,
    },
    Concat { axis: usize },
    Sum { axes: Vec<usize> },
    Softmax { axes: Vec<usize> },

    Convolution(ConvParams),
    MaxPool(PoolParams),
    AvgPool {
        params: PoolParams,
        include_padding: bool,
    },
}

impl NgOp {
    pub fn name(&self) -> &'static str {
        match self {
            NgOp::Parameter { .. } => "Parameter",
            NgOp::Constant { .. } => "Constant",
            NgOp::Add => "Add",
            NgOp::Subtract => "Subtract",
            NgOp::Multiply => "Multiply",
            NgOp::Divide => "Divide",
            NgOp::Maximum => "Maximum",
            NgOp::Minimum => "Minimum",
            NgOp::Negative => "Negative",
            NgOp::Floor => "Floor",
            NgOp::Relu => "Relu",
            NgOp::Sigmoid => "Sigmoid",
            NgOp::Tanh => "Tanh",
            NgOp::Exp => "Exp",
            NgOp::Sqrt => "Sqrt",
            NgOp::Convert { .. } => "Convert",
            NgOp::Dot => "Dot",
            NgOp::Broadcast { .. } => "Broadcast",
            NgOp::Reshape { .. } => "Reshape",
            NgOp::Slice { .. } => "Slice",
            NgOp::Concat { .. } => "Concat",
            NgOp::Sum { .. } => "Sum",
            NgOp::Softmax { .. } => "Softmax",
            NgOp::Convolution(_) => "Convolution",
            NgOp::MaxPool(_) => "MaxPool",
            NgOp::AvgPool { .. } => "AvgPool",
        }
    }
}

impl Graph<NgOp> {
    pub fn add_parameter(
        &mut self,
        index: usize,
        element_type: ElementType,
        shape: Shape,
    ) -> NodeId {
        self.push_node(NgOp::Parameter { index }, vec![], element_type, shape)
    }

    pub fn add_constant(&mut self, value: TensorValue) -> NodeId {
        let element_type = value.element_type();
        let shape = value.shape.clone();
        self.push_node(NgOp::Constant { value }, vec![], element_type, shape)
    }

    /// Insert `op` applied to `inputs`, inferring its output type and shape.
    pub fn add(&mut self, op: NgOp, inputs: &[NodeId]) -> Result<NodeId> {
        if let Some(&bad) = inputs.iter().find(|&&id| id >= self.len()) {
            return Err(Error::shape(format!("{}: no node %{bad}", op.name())));
        }
        let (element_type, shape) = self.infer(&op, inputs)?;
        Ok(self.push_node(op, inputs.to_vec(), element_type, shape))
    }

    fn infer(&self, op: &NgOp, inputs: &[NodeId]) -> Result<(ElementType, Shape)> {
        let name = op.name();
        let arity = |n: usize| -> Result<()> {
            if inputs.len() != n {
                return Err(Error::shape(format!(
                    "{name} takes {n} input(s), got {}",
                    inputs.len()
                )));
            }
            Ok(())
        };

        match op {
            NgOp::Parameter { .. } | NgOp::Constant { .. } => Err(Error::shape(format!(
                "{name} nodes are created with add_parameter/add_constant"
            ))),

            NgOp::Add
            | NgOp::Subtract
            | NgOp::Multiply
            | NgOp::Divide
            | NgOp::Maximum
            | NgOp::Minimum => {
                arity(2)?;
                let (a, b) = (self.node(inputs[0]), self.node(inputs[1]));
                if a.shape != b.shape || a.element_type != b.element_type {
                    return Err(Error::shape(format!(
                        "{name} operands differ: {}[{}] vs {}[{}]",
                        a.element_type,
                        join(&a.shape),
                        b.element_type,
                        join(&b.shape)
                    )));
                }
                Ok((a.element_type, a.shape.clone()))
            }

            NgOp::Negative
            | NgOp::Floor
            | NgOp::Relu
            | NgOp::Sigmoid
            | NgOp::Tanh
            | NgOp::Exp
            | NgOp::Sqrt => {
                arity(1)?;
                let a = self.node(inputs[0]);
                Ok((a.element_type, a.shape.clone()))
            }

            NgOp::Convert { to } => {
                arity(1)?;
                Ok((*to, self.node(inputs[0]).shape.clone()))
            }

            NgOp::Dot => {
                arity(2)?;
                let (a, b) = (self.node(inputs[0]), self.node(inputs[1]));
                if a.element_type != b.element_type {
                    return Err(Error::shape(format!(
                        "Dot element types differ: {} vs {}",
                        a.element_type, b.element_type
                    )));
                }
                let (Some(&k_lhs), Some(&k_rhs)) = (a.shape.last(), b.shape.first()) else {
                    return Err(Error::shape("Dot operands must have rank >= 1"));
                };
                if k_lhs != k_rhs {
                    return Err(Error::shape(format!(
                        "Dot reduction axes differ: [{}] . [{}]",
                        join(&a.shape),
                        join(&b.shape)
                    )));
                }
                let mut shape = a.shape[..a.shape.len() - 1].to_vec();
                shape.extend_from_slice(&b.shape[1..]);
                Ok((a.element_type, shape))
            }

            NgOp::Broadcast { shape, axes } => {
                arity(1)?;
                let a = self.node(inputs[0]);
                check_axes(name, axes, shape.len())?;
                let kept: Shape = shape
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, &d)| d)
                    .collect();
                if kept != a.shape {
                    return Err(Error::shape(format!(
                        "cannot broadcast [{}] to [{}] along axes {{{}}}",
                        join(&a.shape),
                        join(shape),
                        join(axes)
                    )));
                }
                Ok((a.element_type, shape.clone()))
            }

            NgOp::Reshape {
                input_order,
                output_shape,
            } => {
                arity(1)?;
                let a = self.node(inputs[0]);
                let mut seen = vec![false; a.shape.len()];
                let is_permutation = input_order.len() == a.shape.len()
                    && input_order
                        .iter()
                        .all(|&i| i < seen.len() && !std::mem::replace(&mut seen[i], true));
                if !is_permutation {
                    return Err(Error::shape(format!(
                        "Reshape input order ({}) is not a permutation of rank {}",
                        join(input_order),
                        a.shape.len()
                    )));
                }
                if num_elements(&a.shape) != num_elements(output_shape) {
                    return Err(Error::shape(format!(
                        "cannot reshape [{}] to [{}]",
                        join(&a.shape),
                        join(output_shape)
                    )));
                }
                Ok((a.element_type, output_shape.clone()))
            }

            NgOp::Slice {
                lower,
                upper,
                strides,
            } => {
                arity(1)?;
                let a = self.node(inputs[0]);
                let rank = a.shape.len();
                if lower.len() != rank || upper.len() != rank || strides.len() != rank {
                    return Err(Error::shape(format!("Slice bounds must have rank {rank}")));
                }
                let mut shape = Vec::with_capacity(rank);
                for d in 0..rank {
                    if lower[d] > upper[d] || upper[d] > a.shape[d] || strides[d] == 0 {
                        return Err(Error::shape(format!(
                            "Slice [{}..{}:{}] out of range for axis {d} of [{}]",
                            lower[d],
                            upper[d],
                            strides[d],
                            join(&a.shape)
                        )));
                    }
                    shape.push((upper[d] - lower[d] + strides[d] - 1) / strides[d]);
                }
                Ok((a.element_type, shape))
            }

            NgOp::Concat { axis } => {
                let Some(&first) = inputs.first() else {
                    return Err(Error::shape("Concat needs at least one input"));
                };
                let head = self.node(first);
                if *axis >= head.shape.len() {
                    return Err(Error::shape(format!(
                        "Concat axis {axis} out of range for rank {}",
                        head.shape.len()
                    )));
                }
                let mut shape = head.shape.clone();
                shape[*axis] = 0;
                for &id in inputs {
                    let n = self.node(id);
                    let compatible = n.element_type == head.element_type
                        && n.shape.len() == head.shape.len()
                        && n
                            .shape
                            .iter()
                            .zip(&head.shape)
                            .enumerate()
                            .all(|(d, (x, y))| d == *axis || x == y);
                    if !compatible {
                        return Err(Error::shape(format!(
                            "Concat operand {}[{}] does not match {}[{}] off axis {axis}",
                            n.element_type,
                            join(&n.shape),
                            head.element_type,
                            join(&head.shape)
                        )));
                    }
                    shape[*axis] += n.shape[*axis];
                }
                Ok((head.element_type, shape))
            }

            NgOp::Sum { axes } => {
                arity(1)?;
                let a = self.node(inputs[0]);
                check_axes(name, axes, a.shape.len())?;
                let shape = a
                    .shape
                    .iter()
                    .enumerate()
                    .filter(|(i, _)| !axes.contains(i))
                    .map(|(_, &d)| d)
                    .collect();
                Ok((a.element_type, shape))
            }

            NgOp::Softmax { axes } => {
                arity(1)?;
                let a = self.node(inputs[0]);
                check_axes(name, axes, a.shape.len())?;
                Ok((a.element_type, a.shape.clone()))
            }

            NgOp::Convolution(params) => {
                arity(2)?;
                let (data, filters) = (self.node(inputs[0]), self.node(inputs[1]));
                let spatial = spatial_rank(name, &data.shape)?;
                if filters.shape.len() != data.shape.len() || filters.shape[1] != data.shape[1] {
                    return Err(Error::shape(format!(
                        "Convolution filters [{}] do not fit data [{}]",
                        join(&filters.shape),
                        join(&data.shape)
                    )));
                }
                if data.element_type != filters.element_type {
                    return Err(Error::shape("Convolution element types differ"));
                }
                check_window_params(
                    name,
                    spatial,
                    &[
                        &params.strides,
                        &params.dilations,
                        &params.padding_below,
                        &params.padding_above,
                    ],
                )?;
                let mut shape = vec![data.shape[0], filters.shape[0]];
                for d in 0..spatial {
                    let kernel = (filters.shape[2 + d].max(1) - 1) * params.dilations[d] + 1;
                    shape.push(window_output(
                        name,
                        data.shape[2 + d],
                        kernel,
                        params.strides[d],
                        params.padding_below[d],
                        params.padding_above[d],
                    )?);
                }
                Ok((data.element_type, shape))
            }

            NgOp::MaxPool(params) | NgOp::AvgPool { params, .. } => {
                arity(1)?;
                let data = self.node(inputs[0]);
                let spatial = spatial_rank(name, &data.shape)?;
                check_window_params(
                    name,
                    spatial,
                    &[
                        &params.window,
                        &params.strides,
                        &params.padding_below,
                        &params.padding_above,
                    ],
                )?;
                let mut shape = vec![data.shape[0], data.shape[1]];
                for d in 0..spatial {
                    shape.push(window_output(
                        name,
                        data.shape[2 + d],
                        params.window[d],
                        params.strides[d],
                        params.padding_below[d],
                        params.padding_above[d],
                    )?);
                }
                Ok((data.element_type, shape))
            }
        }
    }
}

fn check_axes(name: &str, axes: &[usize], rank: usize) -> Result<()> {
    for (i, &axis) in axes.iter().enumerate() {
        if axis >= rank || axes[..i].contains(&axis) {
            return Err(Error::shape(format!(
                "{name} axes {{{}}} invalid for rank {rank}",
                join(axes)
            )));
        }
    }
    Ok(())
}

fn spatial_rank(name: &str, shape: &[usize]) -> Result<usize> {
    if shape.len() < 3 {
        return Err(Error::shape(format!(
            "{name} expects [N, C, spatial..], got [{}]",
            join(shape)
        )));
    }
    Ok(shape.len() - 2)
}

fn check_window_params(name: &str, spatial: usize, params: &[&Vec<usize>]) -> Result<()> {
    if params.iter().any(|p| p.len() != spatial) {
        return Err(Error::shape(format!(
            "{name} window parameters must have {spatial} entries"
        )));
    }
    Ok(())
}

fn window_output(
    name: &str,
    size: usize,
    window: usize,
    stride: usize,
    below: usize,
    above: usize,
) -> Result<usize> {
    let padded = size + below + above;
    if stride == 0 || window == 0 || padded < window {
        return Err(Error::shape(format!(
            "{name} window {window} (stride {stride}) does not fit padded size {padded}"
        )));
    }
    Ok((padded - window) / stride + 1)
}

/// A closed function: ordered parameters and results over a node arena.
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub graph: NgGraph,
    pub parameters: Vec<NodeId>,
    pub results: Vec<NodeId>,
}

impl fmt::Display for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ids = |ids: &[NodeId]| {
            ids.iter()
                .map(|id| format!("%{id}"))
                .collect::<Vec<_>>()
                .join(", ")
        };
        writeln!(
            f,
            "function({}) -> ({})",
            ids(&self.parameters),
            ids(&self.results)
        )?;
        for node in &self.graph.nodes {
            let detail = match &node.op {
                NgOp::Parameter { index } => format!("[{index}]"),
                NgOp::Constant { value } => format!("[{} elements]", num_elements(&value.shape)),
                _ => format!("({})", ids(&node.inputs)),
            };
            writeln!(
                f,
                "  %{} = {}{} : {}[{}]",
                node.id,
                node.op.name(),
                detail,
                node.element_type,
                join(&node.shape)
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn graph_with_param(shape: Shape) -> (NgGraph, NodeId) {
        let mut g = NgGraph::new();
        let p = g.add_parameter(0, ElementType::F32, shape);
        (g, p)
    }

    #[test]
    fn binary_requires_equal_shapes() {
        let (mut g, a) = graph_with_param(vec![2, 3]);
        let b = g.add_parameter(1, ElementType::F32, vec![3, 2]);
        let err = g.add(NgOp::Add, &[a, b]).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
        let sum = g.add(NgOp::Add, &[a, a]).unwrap();
        assert_eq!(g.node(sum).shape, vec![2, 3]);
    }

    #[test]
    fn dot_contracts_inner_axis() {
        let (mut g, x) = graph_with_param(vec![1, 784]);
        let w = g.add_parameter(1, ElementType::F32, vec![784, 10]);
        let y = g.add(NgOp::Dot, &[x, w]).unwrap();
        assert_eq!(g.node(y).shape, vec![1, 10]);
        assert!(g.add(NgOp::Dot, &[w, w]).is_err());
    }

    #[test]
    fn broadcast_checks_kept_axes() {
        let (mut g, b) = graph_with_param(vec![10]);
        let ok = NgOp::Broadcast {
            shape: vec![4, 10],
            axes: vec![0],
        };
        let y = g.add(ok, &[b]).unwrap();
        assert_eq!(g.node(y).shape, vec![4, 10]);
        let bad = NgOp::Broadcast {
            shape: vec![4, 10],
            axes: vec![1],
        };
        assert!(g.add(bad, &[b]).is_err());
    }

    #[test]
    fn reshape_with_transpose() {
        let (mut g, x) = graph_with_param(vec![1, 28, 28, 3]);
        let op = NgOp::Reshape {
            input_order: vec![0, 3, 1, 2],
            output_shape: vec![1, 3, 28, 28],
        };
        let y = g.add(op, &[x]).unwrap();
        assert_eq!(g.node(y).shape, vec![1, 3, 28, 28]);

        let bad_order = NgOp::Reshape {
            input_order: vec![0, 0, 1, 2],
            output_shape: vec![1, 3, 28, 28],
        };
        assert!(g.add(bad_order, &[x]).is_err());
    }

    #[test]
    fn slice_rounds_up_with_stride() {
        let (mut g, x) = graph_with_param(vec![10, 4]);
        let op = NgOp::Slice {
            lower: vec![1, 0],
            upper: vec![10, 4],
            strides: vec![2, 1],
        };
        let y = g.add(op, &[x]).unwrap();
        assert_eq!(g.node(y).shape, vec![5, 4]);
    }

    #[test]
    fn concat_sums_axis() {
        let (mut g, a) = graph_with_param(vec![2, 3]);
        let b = g.add_parameter(1, ElementType::F32, vec![2, 5]);
        let y = g.add(NgOp::Concat { axis: 1 }, &[a, b]).unwrap();
        assert_eq!(g.node(y).shape, vec![2, 8]);
        assert!(g.add(NgOp::Concat { axis: 0 }, &[a, b]).is_err());
    }

    #[test]
    fn convolution_output_shape() {
        // [1,1,28,28] * [8,1,5,5], pad 2 -> [1,8,28,28]
        let (mut g, x) = graph_with_param(vec![1, 1, 28, 28]);
        let f = g.add_parameter(1, ElementType::F32, vec![8, 1, 5, 5]);
        let op = NgOp::Convolution(ConvParams {
            strides: vec![1, 1],
            dilations: vec![1, 1],
            padding_below: vec![2, 2],
            padding_above: vec![2, 2],
        });
        let y = g.add(op, &[x, f]).unwrap();
        assert_eq!(g.node(y).shape, vec![1, 8, 28, 28]);
    }

    #[test]
    fn pool_output_shape() {
        let (mut g, x) = graph_with_param(vec![1, 8, 28, 28]);
        let op = NgOp::MaxPool(PoolParams {
            window: vec![2, 2],
            strides: vec![2, 2],
            padding_below: vec![0, 0],
            padding_above: vec![0, 0],
        });
        let y = g.add(op, &[x]).unwrap();
        assert_eq!(g.node(y).shape, vec![1, 8, 14, 14]);
    }

    #[test]
    fn sum_drops_axes() {
        let (mut g, x) = graph_with_param(vec![2, 3, 4]);
        let y = g.add(NgOp::Sum { axes: vec![0, 2] }, &[x]).unwrap();
        assert_eq!(g.node(y).shape, vec![3]);
        assert!(g.add(NgOp::Sum { axes: vec![1, 1] }, &[x]).is_err());
    }

    #[test]
    fn display_lists_nodes() {
        let (mut g, x) = graph_with_param(vec![2]);
        let y = g.add(NgOp::Relu, &[x]).unwrap();
        let f = Function {
            graph: g,
            parameters: vec![x],
            results: vec![y],
        };
        let text = f.to_string();
        assert!(text.starts_with("function(%0) -> (%1)"), "got: {text}");
        assert!(text.contains("%1 = Relu(%0) : f32[2]"), "got: {text}");
    }
}
