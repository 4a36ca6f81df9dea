//! Shape manipulation, reductions, constants and pass-through ops.

use crate::error::Result;
use crate::ir::graph::{join, num_elements, NodeId, Shape};
use crate::ir::ng::NgOp;
use crate::ir::source::AttrValue;
use crate::ir::tensor::TensorValue;
use crate::translate::context::OpCtx;

use super::{reshape, transpose};

pub fn translate_identity(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(1)?;
    ctx.set_output(outputs, 0, inputs[0])
}

/// Emits nothing; only ordering (control) edges hang off a NoOp.
pub fn translate_no_op(
    _ctx: &mut OpCtx<'_>,
    _inputs: &[NodeId],
    _outputs: &mut [Option<NodeId>],
) -> Result<()> {
    Ok(())
}

pub fn translate_const(
    ctx: &mut OpCtx<'_>,
    _inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    let value = ctx.node.attr_tensor("value")?.clone();
    if let Some(AttrValue::Type(dtype)) = ctx.node.attr("dtype") {
        let declared = dtype.to_element_type()?;
        if declared != value.element_type() {
            return Err(ctx.error(format!(
                "dtype {dtype} does not match value of type {}",
                value.element_type()
            )));
        }
    }
    let y = ctx.constant(value);
    ctx.set_output(outputs, 0, y)
}

/// Resolve a reshape target, inferring at most one `-1` dimension.
fn infer_shape(ctx: &OpCtx<'_>, dims: &[i64], element_count: usize) -> Result<Shape> {
    let mut inferred = None;
    let mut known: usize = 1;
    let mut shape = Shape::with_capacity(dims.len());
    for (i, &d) in dims.iter().enumerate() {
        if d == -1 {
            if inferred.replace(i).is_some() {
                return Err(ctx.error(format!("shape {dims:?} has more than one -1")));
            }
            shape.push(1);
        } else {
            let bad = || ctx.error(format!("bad dimension {d} in {dims:?}"));
            let d = usize::try_from(d).map_err(|_| bad())?;
            known = known.checked_mul(d).ok_or_else(bad)?;
            shape.push(d);
        }
    }

    if let Some(i) = inferred {
        if known == 0 || element_count % known != 0 {
            return Err(ctx.error(format!(
                "cannot infer {dims:?} from {element_count} elements"
            )));
        }
        shape[i] = element_count / known;
    }
    if num_elements(&shape) != element_count {
        return Err(ctx.error(format!(
            "cannot reshape {element_count} elements into [{}]",
            join(&shape)
        )));
    }
    Ok(shape)
}

pub fn translate_reshape(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let dims = ctx.static_input_i64(1)?;
    let x = inputs[0];
    let shape = infer_shape(ctx, &dims, num_elements(ctx.shape(x)))?;
    log::trace!("reshape [{}] -> [{}]", join(ctx.shape(x)), join(&shape));
    let y = reshape(ctx, x, shape)?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_transpose(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let perm = ctx.static_input_i64(1)?;
    let x = inputs[0];
    let rank = ctx.shape(x).len();
    if perm.len() != rank {
        return Err(ctx.error(format!("permutation {perm:?} does not match rank {rank}")));
    }
    let order = perm
        .iter()
        .map(|&p| ctx.normalize_axis(p, rank))
        .collect::<Result<Vec<_>>>()?;
    let y = transpose(ctx, x, &order)?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_squeeze(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let x = inputs[0];
    let shape = ctx.shape(x).to_vec();
    let rank = shape.len();

    let requested = match ctx.node.attr("squeeze_dims") {
        Some(_) => ctx.node.attr_ints("squeeze_dims")?.to_vec(),
        None => Vec::new(),
    };
    let mut drop = vec![false; rank];
    if requested.is_empty() {
        for (d, &n) in shape.iter().enumerate() {
            drop[d] = n == 1;
        }
    } else {
        for &axis in &requested {
            let d = ctx.normalize_axis(axis, rank)?;
            if shape[d] != 1 {
                return Err(ctx.error(format!(
                    "cannot squeeze dimension {d} of [{}]",
                    join(&shape)
                )));
            }
            drop[d] = true;
        }
    }

    let squeezed = shape
        .iter()
        .zip(&drop)
        .filter_map(|(&n, &dropped)| (!dropped).then_some(n))
        .collect();
    let y = reshape(ctx, x, squeezed)?;
    ctx.set_output(outputs, 0, y)
}

/// Normalized, sorted, deduplicated reduction axes from input 1.
fn reduction_axes(ctx: &OpCtx<'_>, rank: usize) -> Result<Vec<usize>> {
    let mut axes = ctx
        .static_input_i64(1)?
        .into_iter()
        .map(|a| ctx.normalize_axis(a, rank))
        .collect::<Result<Vec<_>>>()?;
    axes.sort_unstable();
    axes.dedup();
    Ok(axes)
}

fn reduce(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
    mean: bool,
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let x = inputs[0];
    let shape = ctx.shape(x).to_vec();
    let axes = reduction_axes(ctx, shape.len())?;
    let keep_dims = ctx.node.attr_bool_or("keep_dims", false)?;

    let mut y = ctx.add(NgOp::Sum { axes: axes.clone() }, &[x])?;
    if mean {
        let count: usize = axes.iter().map(|&a| shape[a]).product();
        let reduced = ctx.shape(y).to_vec();
        let divisor = ctx.constant(TensorValue::filled(ctx.element_type(y), reduced, count as f64));
        y = ctx.add(NgOp::Divide, &[y, divisor])?;
    }
    if keep_dims {
        let kept = shape
            .iter()
            .enumerate()
            .map(|(d, &n)| if axes.contains(&d) { 1 } else { n })
            .collect();
        y = reshape(ctx, y, kept)?;
    }
    ctx.set_output(outputs, 0, y)
}

pub fn translate_sum(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    reduce(ctx, inputs, outputs, false)
}

pub fn translate_mean(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    reduce(ctx, inputs, outputs, true)
}

/// Values in slots `0..n-1`, axis in the last slot.
pub fn translate_concat_v2(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count_min(2)?;
    let (values, _) = inputs.split_at(inputs.len() - 1);
    let axis_slot = inputs.len() - 1;
    let axis = match ctx.static_input_i64(axis_slot)?.as_slice() {
        [axis] => *axis,
        other => return Err(ctx.error(format!("axis must be a scalar, got {other:?}"))),
    };
    let rank = ctx.shape(values[0]).len();
    let axis = ctx.normalize_axis(axis, rank)?;
    let y = ctx.add(NgOp::Concat { axis }, values)?;
    ctx.set_output(outputs, 0, y)
}

/// Splits input 1 into `num_split` equal slices along the axis held by input 0.
pub fn translate_split(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let num_split = ctx.node.attr_i64("num_split")?;
    let pieces = usize::try_from(num_split)
        .ok()
        .filter(|&n| n > 0 && n == outputs.len())
        .ok_or_else(|| {
            ctx.error(format!(
                "num_split {num_split} does not match {} declared outputs",
                outputs.len()
            ))
        })?;

    let x = inputs[0];
    let shape = ctx.shape(x).to_vec();
    let axis = match ctx.static_input_i64(0)?.as_slice() {
        [axis] => ctx.normalize_axis(*axis, shape.len())?,
        other => return Err(ctx.error(format!("axis must be a scalar, got {other:?}"))),
    };
    if shape[axis] % pieces != 0 {
        return Err(ctx.error(format!(
            "dimension {axis} of [{}] is not divisible by {pieces}",
            join(&shape)
        )));
    }

    let size = shape[axis] / pieces;
    for i in 0..pieces {
        let mut lower = vec![0; shape.len()];
        let mut upper = shape.clone();
        lower[axis] = i * size;
        upper[axis] = (i + 1) * size;
        let slice = ctx.add(
            NgOp::Slice {
                lower,
                upper,
                strides: vec![1; shape.len()],
            },
            &[x],
        )?;
        ctx.set_output(outputs, i, slice)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ir::graph::ElementType;
    use crate::ir::source::{DataType, NodeDef};
    use crate::ir::tensor::TensorData;
    use crate::translate::ops::test_util::{ints, param, run};

    #[test]
    fn reshape_infers_minus_one() {
        let out = run(
            NodeDef::new("r", "Reshape"),
            vec![param(&[2, 3, 4]), ints(&[-1, 4])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[6, 4]);
    }

    #[test]
    fn reshape_rejects_two_unknowns() {
        let err = run(
            NodeDef::new("r", "Reshape"),
            vec![param(&[2, 3, 4]), ints(&[-1, -1])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("more than one -1"), "got: {err}");
    }

    #[test]
    fn reshape_keeps_zero_dims() {
        let out = run(
            NodeDef::new("r", "Reshape"),
            vec![param(&[0, 4]), ints(&[0, 4])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[0, 4]);

        let out = run(
            NodeDef::new("r", "Reshape"),
            vec![param(&[0, 4]), ints(&[2, 0, 2])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[2, 0, 2]);
    }

    #[test]
    fn reshape_rejects_overflowing_dims() {
        let err = run(
            NodeDef::new("r", "Reshape"),
            vec![param(&[4]), ints(&[i64::MAX, i64::MAX, -1])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("bad dimension"), "got: {err}");
    }

    #[test]
    fn reshape_needs_constant_shape() {
        let err = run(
            NodeDef::new("r", "Reshape"),
            vec![param(&[2, 3]), param(&[2])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("must be a constant"), "got: {err}");
    }

    #[test]
    fn transpose_permutes() {
        let out = run(
            NodeDef::new("t", "Transpose"),
            vec![param(&[1, 28, 28, 3]), ints(&[0, 3, 1, 2])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[1, 3, 28, 28]);
        match &out.output(0).op {
            NgOp::Reshape { input_order, .. } => assert_eq!(input_order, &vec![0, 3, 1, 2]),
            other => panic!("expected Reshape, got {other:?}"),
        }
    }

    #[test]
    fn squeeze_all_unit_dims() {
        let out = run(NodeDef::new("s", "Squeeze"), vec![param(&[1, 3, 1, 2])]).unwrap();
        assert_eq!(out.shape(0), &[3, 2]);
    }

    #[test]
    fn squeeze_selected_dims() {
        let out = run(
            NodeDef::new("s", "Squeeze").attr("squeeze_dims", vec![-2i64]),
            vec![param(&[1, 3, 1, 2])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[1, 3, 2]);

        let err = run(
            NodeDef::new("s", "Squeeze").attr("squeeze_dims", vec![1i64]),
            vec![param(&[1, 3, 1, 2])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("cannot squeeze"), "got: {err}");
    }

    #[test]
    fn sum_with_negative_axis() {
        let out = run(NodeDef::new("s", "Sum"), vec![param(&[2, 3, 4]), ints(&[-1])]).unwrap();
        assert_eq!(out.shape(0), &[2, 3]);
    }

    #[test]
    fn mean_keep_dims() {
        let out = run(
            NodeDef::new("m", "Mean").attr("keep_dims", true),
            vec![param(&[2, 3, 4]), ints(&[1, 2])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[2, 1, 1]);

        // Reshape(Divide(Sum, 12))
        let div = out.target.node(out.output(0).inputs[0]);
        assert_eq!(div.op, NgOp::Divide);
        match &out.target.node(div.inputs[1]).op {
            NgOp::Constant { value } => assert_eq!(value.data, TensorData::F32(vec![12.0, 12.0])),
            other => panic!("expected Constant, got {other:?}"),
        }
    }

    #[test]
    fn concat_on_last_input_axis() {
        let out = run(
            NodeDef::new("c", "ConcatV2"),
            vec![param(&[2, 3]), param(&[2, 5]), ints(&[-1])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[2, 8]);
    }

    #[test]
    fn concat_needs_two_inputs() {
        let err = run(NodeDef::new("c", "ConcatV2"), vec![param(&[2, 3])]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)), "got: {err}");
    }

    #[test]
    fn split_fills_every_output() {
        let out = run(
            NodeDef::new("s", "Split").attr("num_split", 3i64).outputs(3),
            vec![ints(&[1]), param(&[2, 6])],
        )
        .unwrap();
        for slot in 0..3 {
            assert_eq!(out.shape(slot), &[2, 2]);
        }
        match &out.output(2).op {
            NgOp::Slice { lower, upper, .. } => {
                assert_eq!(lower, &vec![0, 4]);
                assert_eq!(upper, &vec![2, 6]);
            }
            other => panic!("expected Slice, got {other:?}"),
        }
    }

    #[test]
    fn split_uneven_rejected() {
        let err = run(
            NodeDef::new("s", "Split").attr("num_split", 4i64).outputs(4),
            vec![ints(&[1]), param(&[2, 6])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("not divisible"), "got: {err}");
    }

    #[test]
    fn const_emits_value() {
        let value = TensorValue::new(vec![2], TensorData::F32(vec![1.0, 2.0])).unwrap();
        let out = run(
            NodeDef::new("k", "Const")
                .attr("dtype", DataType::Float)
                .attr("value", value.clone()),
            vec![],
        )
        .unwrap();
        assert_eq!(out.output(0).op, NgOp::Constant { value });
        assert_eq!(out.output(0).element_type, ElementType::F32);
    }

    #[test]
    fn const_dtype_mismatch() {
        let err = run(
            NodeDef::new("k", "Const")
                .attr("dtype", DataType::Int32)
                .attr("value", TensorValue::vector_i64(vec![1])),
            vec![],
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match"), "got: {err}");
    }

    #[test]
    fn identity_forwards_input() {
        let out = run(NodeDef::new("i", "Identity"), vec![param(&[3])]).unwrap();
        assert_eq!(out.outputs[0], Some(0));
        assert_eq!(out.target.len(), 1);
    }

    #[test]
    fn no_op_emits_nothing() {
        let out = run(NodeDef::new("n", "NoOp").outputs(0), vec![]).unwrap();
        assert!(out.outputs.is_empty());
        assert!(out.target.is_empty());
    }
}
