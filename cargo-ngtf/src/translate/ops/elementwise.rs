//! Elementwise arithmetic and activations.

use crate::error::Result;
use crate::ir::graph::NodeId;
use crate::ir::ng::NgOp;
use crate::ir::tensor::TensorValue;
use crate::translate::broadcast::{broadcast_to, numpy_broadcast};
use crate::translate::context::OpCtx;

fn binary(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
    op: NgOp,
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let (lhs, rhs) = numpy_broadcast(ctx, inputs[0], inputs[1])?;
    let y = ctx.add(op, &[lhs, rhs])?;
    ctx.set_output(outputs, 0, y)
}

fn unary(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
    op: NgOp,
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let y = ctx.add(op, &[inputs[0]])?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_add(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    binary(ctx, inputs, outputs, NgOp::Add)
}

pub fn translate_sub(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    binary(ctx, inputs, outputs, NgOp::Subtract)
}

pub fn translate_mul(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    binary(ctx, inputs, outputs, NgOp::Multiply)
}

pub fn translate_div(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    binary(ctx, inputs, outputs, NgOp::Divide)
}

pub fn translate_maximum(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    binary(ctx, inputs, outputs, NgOp::Maximum)
}

pub fn translate_minimum(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    binary(ctx, inputs, outputs, NgOp::Minimum)
}

/// `floor(a / b)`
pub fn translate_floor_div(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let (a, b) = numpy_broadcast(ctx, inputs[0], inputs[1])?;
    let quotient = ctx.add(NgOp::Divide, &[a, b])?;
    let y = ctx.add(NgOp::Floor, &[quotient])?;
    ctx.set_output(outputs, 0, y)
}

/// `a - floor(a / b) * b`
pub fn translate_floor_mod(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let (a, b) = numpy_broadcast(ctx, inputs[0], inputs[1])?;
    let quotient = ctx.add(NgOp::Divide, &[a, b])?;
    let floored = ctx.add(NgOp::Floor, &[quotient])?;
    let scaled = ctx.add(NgOp::Multiply, &[floored, b])?;
    let y = ctx.add(NgOp::Subtract, &[a, scaled])?;
    ctx.set_output(outputs, 0, y)
}

/// Left fold of `Add` over every input. Operands must already agree in shape.
pub fn translate_add_n(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count_min(1)?;
    let mut acc = inputs[0];
    for &x in &inputs[1..] {
        acc = ctx.add(NgOp::Add, &[acc, x])?;
    }
    ctx.set_output(outputs, 0, acc)
}

pub fn translate_neg(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Negative)
}

pub fn translate_floor(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Floor)
}

pub fn translate_relu(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Relu)
}

/// `min(relu(x), 6)`
pub fn translate_relu6(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let x = inputs[0];
    let relu = ctx.add(NgOp::Relu, &[x])?;
    let six = ctx.constant(TensorValue::filled(ctx.element_type(x), vec![], 6.0));
    let shape = ctx.shape(x).to_vec();
    let six = broadcast_to(ctx, six, &shape)?;
    let y = ctx.add(NgOp::Minimum, &[relu, six])?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_sigmoid(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Sigmoid)
}

pub fn translate_tanh(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Tanh)
}

pub fn translate_exp(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Exp)
}

pub fn translate_sqrt(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    unary(ctx, inputs, outputs, NgOp::Sqrt)
}

pub fn translate_square(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let y = ctx.add(NgOp::Multiply, &[inputs[0], inputs[0]])?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_cast(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let to = ctx.node.attr_type("DstT")?.to_element_type()?;
    let y = ctx.add(NgOp::Convert { to }, &[inputs[0]])?;
    ctx.set_output(outputs, 0, y)
}
