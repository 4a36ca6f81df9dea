//! Dense, convolution, pooling and softmax.
//!
//! Source window ops default to channels-last (`NHWC`) with `HWIO` filters;
//! the target expects channels-first, so data is transposed on the way in and
//! back on the way out.

use crate::error::Result;
use crate::ir::graph::{join, NodeId};
use crate::ir::ng::{ConvParams, NgOp, PoolParams};
use crate::translate::context::OpCtx;
use crate::translate::padding::{make_padding, make_padding_dilated, PaddingType};

use super::transpose;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataFormat {
    Nhwc,
    Nchw,
}

impl DataFormat {
    fn from_node(ctx: &OpCtx<'_>) -> Result<Self> {
        match ctx.node.attr_str_or("data_format", "NHWC")? {
            "NHWC" => Ok(DataFormat::Nhwc),
            "NCHW" => Ok(DataFormat::Nchw),
            other => Err(ctx.error(format!("unsupported data_format \"{other}\""))),
        }
    }

    /// Positions of H and W in a rank-4 shape or attribute list.
    fn spatial_axes(self) -> [usize; 2] {
        match self {
            DataFormat::Nhwc => [1, 2],
            DataFormat::Nchw => [2, 3],
        }
    }

    fn channel_axis(self, rank: usize) -> usize {
        match self {
            DataFormat::Nhwc => rank - 1,
            DataFormat::Nchw => 1,
        }
    }
}

/// The H and W entries of a 4-element attribute (`strides`, `ksize`, ..).
fn spatial_attr(ctx: &OpCtx<'_>, key: &str, format: DataFormat) -> Result<Vec<usize>> {
    let values = ctx.node.attr_ints(key)?;
    if values.len() != 4 {
        return Err(ctx.error(format!("{key} must have 4 entries, got {values:?}")));
    }
    format
        .spatial_axes()
        .iter()
        .map(|&axis| {
            usize::try_from(values[axis])
                .ok()
                .filter(|&v| v > 0)
                .ok_or_else(|| ctx.error(format!("{key} must be positive, got {values:?}")))
        })
        .collect()
}

fn padding_type(ctx: &OpCtx<'_>) -> Result<PaddingType> {
    let padding = ctx.node.attr_str("padding")?;
    PaddingType::parse(padding)
        .ok_or_else(|| ctx.error(format!("unsupported padding \"{padding}\"")))
}

fn require_rank(ctx: &OpCtx<'_>, what: &str, id: NodeId, rank: usize) -> Result<()> {
    let shape = ctx.shape(id);
    if shape.len() != rank {
        return Err(ctx.error(format!(
            "{what} must have rank {rank}, got [{}]",
            join(shape)
        )));
    }
    Ok(())
}

/// Bring rank-4 data into `[N, C, H, W]`.
fn to_channels_first(ctx: &mut OpCtx<'_>, x: NodeId, format: DataFormat) -> Result<NodeId> {
    match format {
        DataFormat::Nhwc => transpose(ctx, x, &[0, 3, 1, 2]),
        DataFormat::Nchw => Ok(x),
    }
}

fn from_channels_first(ctx: &mut OpCtx<'_>, x: NodeId, format: DataFormat) -> Result<NodeId> {
    match format {
        DataFormat::Nhwc => transpose(ctx, x, &[0, 2, 3, 1]),
        DataFormat::Nchw => Ok(x),
    }
}

pub fn translate_mat_mul(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let (mut a, mut b) = (inputs[0], inputs[1]);
    require_rank(ctx, "MatMul operand", a, 2)?;
    require_rank(ctx, "MatMul operand", b, 2)?;

    if ctx.node.attr_bool_or("transpose_a", false)? {
        a = transpose(ctx, a, &[1, 0])?;
    }
    if ctx.node.attr_bool_or("transpose_b", false)? {
        b = transpose(ctx, b, &[1, 0])?;
    }
    let y = ctx.add(NgOp::Dot, &[a, b])?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_bias_add(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let format = DataFormat::from_node(ctx)?;
    let (value, bias) = (inputs[0], inputs[1]);
    let shape = ctx.shape(value).to_vec();
    if shape.len() < 2 {
        return Err(ctx.error(format!("value must have rank >= 2, got [{}]", join(&shape))));
    }
    require_rank(ctx, "bias", bias, 1)?;

    let channel = format.channel_axis(shape.len());
    let channels = ctx.shape(bias)[0];
    if channels != shape[channel] {
        return Err(ctx.error(format!(
            "bias of {channels} elements does not match dimension {channel} of [{}]",
            join(&shape)
        )));
    }

    let axes = (0..shape.len()).filter(|&d| d != channel).collect();
    let bias = ctx.add(NgOp::Broadcast { shape, axes }, &[bias])?;
    let y = ctx.add(NgOp::Add, &[value, bias])?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_conv2d(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(2)?;
    let format = DataFormat::from_node(ctx)?;
    let (data, filters) = (inputs[0], inputs[1]);
    require_rank(ctx, "Conv2D input", data, 4)?;
    require_rank(ctx, "Conv2D filter", filters, 4)?;

    let strides = spatial_attr(ctx, "strides", format)?;
    let dilations = match ctx.node.attr("dilations") {
        Some(_) => spatial_attr(ctx, "dilations", format)?,
        None => vec![1, 1],
    };
    let padding_type = padding_type(ctx)?;

    let data = to_channels_first(ctx, data, format)?;
    // HWIO -> OIHW
    let filters = transpose(ctx, filters, &[3, 2, 0, 1])?;

    let image = ctx.shape(data)[2..].to_vec();
    let kernel = ctx.shape(filters)[2..].to_vec();
    let padding = make_padding_dilated(padding_type, &image, &kernel, &strides, &dilations)?;
    log::trace!(
        "conv image {image:?} kernel {kernel:?} strides {strides:?} dilations {dilations:?}"
    );

    let conv = ctx.add(
        NgOp::Convolution(ConvParams {
            strides,
            dilations,
            padding_below: padding.below,
            padding_above: padding.above,
        }),
        &[data, filters],
    )?;
    let y = from_channels_first(ctx, conv, format)?;
    ctx.set_output(outputs, 0, y)
}

fn pool(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
    avg: bool,
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let format = DataFormat::from_node(ctx)?;
    let x = inputs[0];
    require_rank(ctx, "pooling input", x, 4)?;

    let window = spatial_attr(ctx, "ksize", format)?;
    let strides = spatial_attr(ctx, "strides", format)?;
    let padding_type = padding_type(ctx)?;

    let x = to_channels_first(ctx, x, format)?;
    let image = ctx.shape(x)[2..].to_vec();
    let padding = make_padding(padding_type, &image, &window, &strides)?;

    let params = PoolParams {
        window,
        strides,
        padding_below: padding.below,
        padding_above: padding.above,
    };
    let op = if avg {
        NgOp::AvgPool {
            params,
            include_padding: false,
        }
    } else {
        NgOp::MaxPool(params)
    };
    let pooled = ctx.add(op, &[x])?;
    let y = from_channels_first(ctx, pooled, format)?;
    ctx.set_output(outputs, 0, y)
}

pub fn translate_max_pool(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    pool(ctx, inputs, outputs, false)
}

pub fn translate_avg_pool(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    pool(ctx, inputs, outputs, true)
}

/// Softmax over the last axis.
pub fn translate_softmax(
    ctx: &mut OpCtx<'_>,
    inputs: &[NodeId],
    outputs: &mut [Option<NodeId>],
) -> Result<()> {
    ctx.validate_input_count(1)?;
    let x = inputs[0];
    let rank = ctx.shape(x).len();
    if rank == 0 {
        return Err(ctx.error("logits must have rank >= 1"));
    }
    let y = ctx.add(NgOp::Softmax { axes: vec![rank - 1] }, &[x])?;
    ctx.set_output(outputs, 0, y)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::ir::source::NodeDef;
    use crate::translate::ops::test_util::{param, run};

    fn conv(padding: &str) -> NodeDef {
        NodeDef::new("conv", "Conv2D")
            .attr("strides", vec![1i64, 1, 1, 1])
            .attr("padding", padding)
    }

    #[test]
    fn conv2d_same_keeps_spatial_size() {
        let out = run(conv("SAME"), vec![param(&[1, 28, 28, 1]), param(&[5, 5, 1, 8])]).unwrap();
        assert_eq!(out.shape(0), &[1, 28, 28, 8]);

        // NHWC result <- Convolution in NCHW
        let conv = out.target.node(out.output(0).inputs[0]);
        match &conv.op {
            NgOp::Convolution(p) => {
                assert_eq!(p.padding_below, vec![2, 2]);
                assert_eq!(p.padding_above, vec![2, 2]);
            }
            other => panic!("expected Convolution, got {other:?}"),
        }
        assert_eq!(conv.shape, vec![1, 8, 28, 28]);
    }

    #[test]
    fn conv2d_valid_strided() {
        let def = NodeDef::new("conv", "Conv2D")
            .attr("strides", vec![1i64, 2, 2, 1])
            .attr("padding", "VALID");
        let out = run(def, vec![param(&[1, 10, 10, 3]), param(&[3, 3, 3, 4])]).unwrap();
        assert_eq!(out.shape(0), &[1, 4, 4, 4]);
    }

    #[test]
    fn conv2d_dilated_same() {
        let def = conv("SAME").attr("dilations", vec![1i64, 2, 2, 1]);
        let out = run(def, vec![param(&[1, 10, 10, 1]), param(&[3, 3, 1, 1])]).unwrap();
        assert_eq!(out.shape(0), &[1, 10, 10, 1]);
    }

    #[test]
    fn conv2d_nchw_skips_transposes() {
        let def = NodeDef::new("conv", "Conv2D")
            .attr("strides", vec![1i64, 1, 1, 1])
            .attr("padding", "VALID")
            .attr("data_format", "NCHW");
        let out = run(def, vec![param(&[1, 2, 6, 6]), param(&[3, 3, 2, 5])]).unwrap();
        assert_eq!(out.shape(0), &[1, 5, 4, 4]);
        assert!(matches!(out.output(0).op, NgOp::Convolution(_)));
    }

    #[test]
    fn conv2d_missing_padding() {
        let def = NodeDef::new("conv", "Conv2D").attr("strides", vec![1i64, 1, 1, 1]);
        let err = run(def, vec![param(&[1, 4, 4, 1]), param(&[2, 2, 1, 1])]).unwrap_err();
        assert!(matches!(err, Error::MissingAttribute { ref attr, .. } if attr == "padding"));
    }

    #[test]
    fn conv2d_unknown_padding() {
        let err = run(
            conv("EXPLICIT"),
            vec![param(&[1, 4, 4, 1]), param(&[2, 2, 1, 1])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("unsupported padding"), "got: {err}");
    }

    #[test]
    fn max_pool_halves() {
        let def = NodeDef::new("pool", "MaxPool")
            .attr("ksize", vec![1i64, 2, 2, 1])
            .attr("strides", vec![1i64, 2, 2, 1])
            .attr("padding", "VALID");
        let out = run(def, vec![param(&[1, 28, 28, 8])]).unwrap();
        assert_eq!(out.shape(0), &[1, 14, 14, 8]);
    }

    #[test]
    fn avg_pool_excludes_padding() {
        let def = NodeDef::new("pool", "AvgPool")
            .attr("ksize", vec![1i64, 3, 3, 1])
            .attr("strides", vec![1i64, 2, 2, 1])
            .attr("padding", "SAME");
        let out = run(def, vec![param(&[1, 5, 5, 2])]).unwrap();
        assert_eq!(out.shape(0), &[1, 3, 3, 2]);
        let pooled = out.target.node(out.output(0).inputs[0]);
        assert!(matches!(pooled.op, NgOp::AvgPool { include_padding: false, .. }));
    }

    #[test]
    fn mat_mul_with_transpose_b() {
        let def = NodeDef::new("mm", "MatMul").attr("transpose_b", true);
        let out = run(def, vec![param(&[1, 784]), param(&[10, 784])]).unwrap();
        assert_eq!(out.shape(0), &[1, 10]);
    }

    #[test]
    fn mat_mul_shape_mismatch() {
        let out = run(NodeDef::new("mm", "MatMul"), vec![param(&[1, 784]), param(&[10, 784])]);
        assert!(matches!(out, Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn bias_add_broadcasts_channels() {
        let out = run(
            NodeDef::new("b", "BiasAdd"),
            vec![param(&[1, 7, 7, 8]), param(&[8])],
        )
        .unwrap();
        assert_eq!(out.shape(0), &[1, 7, 7, 8]);

        let def = NodeDef::new("b", "BiasAdd").attr("data_format", "NCHW");
        let out = run(def, vec![param(&[1, 8, 7, 7]), param(&[8])]).unwrap();
        assert_eq!(out.shape(0), &[1, 8, 7, 7]);

        let err = run(
            NodeDef::new("b", "BiasAdd"),
            vec![param(&[1, 8, 7, 7]), param(&[8])],
        )
        .unwrap_err();
        assert!(err.to_string().contains("does not match"), "got: {err}");
    }

    #[test]
    fn softmax_last_axis() {
        let out = run(NodeDef::new("s", "Softmax"), vec![param(&[2, 10])]).unwrap();
        assert_eq!(out.output(0).op, NgOp::Softmax { axes: vec![1] });
    }
}
