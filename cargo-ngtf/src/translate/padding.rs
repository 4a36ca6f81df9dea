//! Spatial padding for window ops (convolution, pooling).

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaddingType {
    Same,
    Valid,
}

impl PaddingType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "SAME" => Some(PaddingType::Same),
            "VALID" => Some(PaddingType::Valid),
            _ => None,
        }
    }
}

/// Per-spatial-dimension padding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Padding {
    pub below: Vec<usize>,
    pub above: Vec<usize>,
}

/// Effective extent of a dilated kernel: `(k - 1) * d + 1`.
pub fn dilate_kernel(kernel: &[usize], dilations: &[usize]) -> Vec<usize> {
    kernel
        .iter()
        .zip(dilations)
        .map(|(&k, &d)| k.saturating_sub(1) * d + 1)
        .collect()
}

/// Compute padding for `image` under `kernel` and `strides`.
///
/// `VALID` never pads. `SAME` pads so the output has `ceil(in / stride)`
/// elements, putting the odd element (if any) above.
pub fn make_padding(
    padding: PaddingType,
    image: &[usize],
    kernel: &[usize],
    strides: &[usize],
) -> Result<Padding> {
    let rank = image.len();
    if kernel.len() != rank || strides.len() != rank {
        return Err(Error::invalid(format!(
            "padding needs {rank} kernel dims and strides, got {} and {}",
            kernel.len(),
            strides.len()
        )));
    }
    if strides.contains(&0) {
        return Err(Error::invalid(format!("strides must be positive, got {strides:?}")));
    }

    let mut below = vec![0; rank];
    let mut above = vec![0; rank];

    if padding == PaddingType::Same {
        for d in 0..rank {
            let (input, k, s) = (image[d] as i64, kernel[d] as i64, strides[d] as i64);
            // Output size for SAME: ceil(input / stride)
            let out = (input + s - 1) / s;
            let needed = (s * (out - 1) + k - input).max(0);
            below[d] = (needed / 2) as usize;
            above[d] = (needed - needed / 2) as usize;
        }
    }

    log::trace!("padding below: {below:?}, above: {above:?}");
    Ok(Padding { below, above })
}

/// [`make_padding`] with the kernel dilated first.
pub fn make_padding_dilated(
    padding: PaddingType,
    image: &[usize],
    kernel: &[usize],
    strides: &[usize],
    dilations: &[usize],
) -> Result<Padding> {
    if dilations.len() != kernel.len() {
        return Err(Error::invalid(format!(
            "expected {} dilations, got {}",
            kernel.len(),
            dilations.len()
        )));
    }
    make_padding(padding, image, &dilate_kernel(kernel, dilations), strides)
}
