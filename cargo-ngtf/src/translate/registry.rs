//! Op type -> translator table.
//!
//! Each entry pairs a lowering function with the input slots the dispatcher
//! resolves for it and the slots whose values must be known at translation
//! time. The table is a plain `match`, so it is immutable and shared by every
//! compiler instance.

use crate::error::Result;
use crate::ir::graph::NodeId;
use crate::ir::source::Node;

use super::context::OpCtx;
use super::ops::{array, elementwise, nn};

/// Lowering rule: reads the resolved `inputs`, fills one slot of `outputs`
/// per declared output of the node.
pub type TranslateFn = fn(&mut OpCtx<'_>, &[NodeId], &mut [Option<NodeId>]) -> Result<()>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputSlots {
    /// Resolve exactly these input slots, in this order
    Fixed(&'static [usize]),
    /// Resolve every data input of the node
    Variadic,
}

impl InputSlots {
    pub fn resolve(&self, node: &Node) -> Vec<usize> {
        match self {
            InputSlots::Fixed(slots) => slots.to_vec(),
            InputSlots::Variadic => (0..node.num_inputs()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StaticSlots {
    None,
    Fixed(&'static [usize]),
    /// The node's last data input (e.g. the axis of ConcatV2)
    Last,
}

impl StaticSlots {
    pub fn contains(&self, node: &Node, slot: usize) -> bool {
        match self {
            StaticSlots::None => false,
            StaticSlots::Fixed(slots) => slots.contains(&slot),
            StaticSlots::Last => node.num_inputs() > 0 && slot == node.num_inputs() - 1,
        }
    }
}

#[derive(Clone, Copy)]
pub struct Translator {
    pub translate: TranslateFn,
    pub inputs: InputSlots,
    pub static_inputs: StaticSlots,
}

const fn entry(translate: TranslateFn, inputs: &'static [usize]) -> Translator {
    Translator {
        translate,
        inputs: InputSlots::Fixed(inputs),
        static_inputs: StaticSlots::None,
    }
}

const fn with_static(
    translate: TranslateFn,
    inputs: &'static [usize],
    static_inputs: &'static [usize],
) -> Translator {
    Translator {
        translate,
        inputs: InputSlots::Fixed(inputs),
        static_inputs: StaticSlots::Fixed(static_inputs),
    }
}

const UNARY: &[usize] = &[0];
const BINARY: &[usize] = &[0, 1];
const NONE: &[usize] = &[];

/// Look up the translator for an op type.
pub fn lookup(op: &str) -> Option<Translator> {
    let t = match op {
        "Add" | "AddV2" => entry(elementwise::translate_add, BINARY),
        "Sub" => entry(elementwise::translate_sub, BINARY),
        "Mul" => entry(elementwise::translate_mul, BINARY),
        "RealDiv" => entry(elementwise::translate_div, BINARY),
        "Maximum" => entry(elementwise::translate_maximum, BINARY),
        "Minimum" => entry(elementwise::translate_minimum, BINARY),
        "FloorDiv" => entry(elementwise::translate_floor_div, BINARY),
        "FloorMod" => entry(elementwise::translate_floor_mod, BINARY),
        "AddN" => Translator {
            translate: elementwise::translate_add_n,
            inputs: InputSlots::Variadic,
            static_inputs: StaticSlots::None,
        },

        "Neg" => entry(elementwise::translate_neg, UNARY),
        "Floor" => entry(elementwise::translate_floor, UNARY),
        "Relu" => entry(elementwise::translate_relu, UNARY),
        "Relu6" => entry(elementwise::translate_relu6, UNARY),
        "Sigmoid" => entry(elementwise::translate_sigmoid, UNARY),
        "Tanh" => entry(elementwise::translate_tanh, UNARY),
        "Exp" => entry(elementwise::translate_exp, UNARY),
        "Sqrt" => entry(elementwise::translate_sqrt, UNARY),
        "Square" => entry(elementwise::translate_square, UNARY),
        "Cast" => entry(elementwise::translate_cast, UNARY),

        "Identity" | "StopGradient" | "Snapshot" => entry(array::translate_identity, UNARY),
        "NoOp" => entry(array::translate_no_op, NONE),
        "Const" => entry(array::translate_const, NONE),
        "Reshape" => with_static(array::translate_reshape, UNARY, &[1]),
        "Transpose" => with_static(array::translate_transpose, UNARY, &[1]),
        "Squeeze" => entry(array::translate_squeeze, UNARY),
        "Sum" => with_static(array::translate_sum, UNARY, &[1]),
        "Mean" => with_static(array::translate_mean, UNARY, &[1]),
        "ConcatV2" => Translator {
            translate: array::translate_concat_v2,
            inputs: InputSlots::Variadic,
            static_inputs: StaticSlots::Last,
        },
        "Split" => with_static(array::translate_split, &[1], &[0]),

        "MatMul" => entry(nn::translate_mat_mul, BINARY),
        "BiasAdd" => entry(nn::translate_bias_add, BINARY),
        "Conv2D" => entry(nn::translate_conv2d, BINARY),
        "MaxPool" => entry(nn::translate_max_pool, UNARY),
        "AvgPool" => entry(nn::translate_avg_pool, UNARY),
        "Softmax" => entry(nn::translate_softmax, UNARY),

        _ => return None,
    };
    Some(t)
}

/// Whether input `slot` of `node` must be a translation-time constant.
/// Unknown op types never require static inputs.
pub fn input_is_static(node: &Node, slot: usize) -> bool {
    lookup(&node.op).is_some_and(|t| t.static_inputs.contains(node, slot))
}
