//! Per-op lowering rules, grouped by kind.

pub mod array;
pub mod elementwise;
pub mod nn;

use crate::error::Result;
use crate::ir::graph::{NodeId, Shape};
use crate::ir::ng::NgOp;

use super::context::OpCtx;

/// Permute the axes of `x` by `order`.
pub(crate) fn transpose(ctx: &mut OpCtx<'_>, x: NodeId, order: &[usize]) -> Result<NodeId> {
    let shape = ctx.shape(x);
    let output_shape = order
        .iter()
        .map(|&axis| shape.get(axis).copied())
        .collect::<Option<Shape>>()
        .ok_or_else(|| {
            ctx.error(format!(
                "permutation {order:?} out of range for rank {}",
                shape.len()
            ))
        })?;
    ctx.add(
        NgOp::Reshape {
            input_order: order.to_vec(),
            output_shape,
        },
        &[x],
    )
}

/// Reinterpret `x` as `shape` without moving elements.
pub(crate) fn reshape(ctx: &mut OpCtx<'_>, x: NodeId, shape: Shape) -> Result<NodeId> {
    let rank = ctx.shape(x).len();
    ctx.add(
        NgOp::Reshape {
            input_order: (0..rank).collect(),
            output_shape: shape,
        },
        &[x],
    )
}
