//! Numpy-style implicit broadcasting for binary elementwise ops.
//!
//! Shapes are aligned on their trailing dimensions; a dimension of 1 (or a
//! missing leading dimension) stretches to match the other operand.

use crate::error::Result;
use crate::ir::graph::{join, NodeId, Shape};
use crate::ir::ng::NgOp;

use super::context::OpCtx;

/// The common shape of `a` and `b`, if they are compatible.
pub fn broadcast_shapes(a: &[usize], b: &[usize]) -> Option<Shape> {
    let rank = a.len().max(b.len());
    let dim = |s: &[usize], i: usize| {
        // i counts from the right
        if i < s.len() {
            s[s.len() - 1 - i]
        } else {
            1
        }
    };

    let mut shape = vec![0; rank];
    for i in 0..rank {
        let (da, db) = (dim(a, i), dim(b, i));
        shape[rank - 1 - i] = if da == db || db == 1 {
            da
        } else if da == 1 {
            db
        } else {
            return None;
        };
    }
    Some(shape)
}

/// Broadcast `node` up to `target`. Returns `node` unchanged if it already
/// has that shape.
pub fn broadcast_to(ctx: &mut OpCtx<'_>, node: NodeId, target: &[usize]) -> Result<NodeId> {
    let shape = ctx.shape(node).to_vec();
    if shape == target {
        return Ok(node);
    }
    if shape.len() > target.len() {
        return Err(ctx.error(format!(
            "cannot broadcast [{}] to lower rank [{}]",
            join(&shape),
            join(target)
        )));
    }

    let offset = target.len() - shape.len();
    let mut axes: Vec<usize> = (0..offset).collect();
    let mut kept = Vec::with_capacity(shape.len());
    for (i, &d) in shape.iter().enumerate() {
        let t = target[offset + i];
        if d == t {
            kept.push(d);
        } else if d == 1 {
            axes.push(offset + i);
        } else {
            return Err(ctx.error(format!(
                "cannot broadcast [{}] to [{}]",
                join(&shape),
                join(target)
            )));
        }
    }

    let mut x = node;
    if kept.len() != shape.len() {
        // drop the stretched unit dims first
        x = ctx.add(
            NgOp::Reshape {
                input_order: (0..shape.len()).collect(),
                output_shape: kept,
            },
            &[x],
        )?;
    }
    ctx.add(
        NgOp::Broadcast {
            shape: target.to_vec(),
            axes,
        },
        &[x],
    )
}

/// Bring both operands of a binary op to their common shape.
pub fn numpy_broadcast(ctx: &mut OpCtx<'_>, lhs: NodeId, rhs: NodeId) -> Result<(NodeId, NodeId)> {
    let (a, b) = (ctx.shape(lhs).to_vec(), ctx.shape(rhs).to_vec());
    let target = broadcast_shapes(&a, &b).ok_or_else(|| {
        ctx.error(format!(
            "incompatible shapes [{}] and [{}]",
            join(&a),
            join(&b)
        ))
    })?;
    if a != target || b != target {
        log::trace!("broadcasting [{}] and [{}] to [{}]", join(&a), join(&b), join(&target));
    }
    Ok((broadcast_to(ctx, lhs, &target)?, broadcast_to(ctx, rhs, &target)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::graph::ElementType;
    use crate::ir::ng::NgGraph;
    use crate::ir::source::{NodeDef, SourceGraph};

    #[test]
    fn shapes_align_right() {
        assert_eq!(broadcast_shapes(&[2, 3], &[3]), Some(vec![2, 3]));
        assert_eq!(broadcast_shapes(&[4, 1, 5], &[3, 1]), Some(vec![4, 3, 5]));
        assert_eq!(broadcast_shapes(&[], &[7]), Some(vec![7]));
        assert_eq!(broadcast_shapes(&[2, 3], &[2]), None);
    }

    #[test]
    fn stretches_unit_dims() {
        let mut g = SourceGraph::new();
        let n = g.add_node(NodeDef::new("add", "Add")).unwrap();
        let mut target = NgGraph::new();
        let a = target.add_parameter(0, ElementType::F32, vec![4, 1, 5]);
        let b = target.add_parameter(1, ElementType::F32, vec![3, 1]);
        let mut ctx = OpCtx {
            node: g.node(n),
            graph: &g,
            static_inputs: &[],
            target: &mut target,
        };

        let (x, y) = numpy_broadcast(&mut ctx, a, b).unwrap();
        assert_eq!(ctx.shape(x), &[4, 3, 5]);
        assert_eq!(ctx.shape(y), &[4, 3, 5]);
        let z = ctx.add(NgOp::Add, &[x, y]).unwrap();
        assert_eq!(ctx.shape(z), &[4, 3, 5]);

        // [4,1,5] -> Reshape [4,5] -> Broadcast axes {1}
        assert_eq!(
            target.node(x).op,
            NgOp::Broadcast {
                shape: vec![4, 3, 5],
                axes: vec![1]
            }
        );
    }

    #[test]
    fn same_shapes_untouched() {
        let mut g = SourceGraph::new();
        let n = g.add_node(NodeDef::new("mul", "Mul")).unwrap();
        let mut target = NgGraph::new();
        let a = target.add_parameter(0, ElementType::F32, vec![2, 2]);
        let b = target.add_parameter(1, ElementType::F32, vec![2, 2]);
        let mut ctx = OpCtx {
            node: g.node(n),
            graph: &g,
            static_inputs: &[],
            target: &mut target,
        };
        assert_eq!(numpy_broadcast(&mut ctx, a, b).unwrap(), (a, b));
        assert_eq!(target.len(), 2);
    }
}
