//! Float tensor kernels for the builtin ops

use crate::error::{QuantError, Result};
use crate::tensor::Tensor;
use ndarray::{Array2, Array4, ArrayView2, Ix2, Ix4, IxDyn};

fn shape_error(op: &str, expected: &[usize], actual: &[usize]) -> QuantError {
    QuantError::ShapeMismatch {
        op: op.to_string(),
        expected: expected.to_vec(),
        actual: actual.to_vec(),
    }
}

/// `y = x · wᵀ + b` over the last dimension of `x`
pub fn linear(input: &Tensor, weight: &Tensor, bias: Option<&Tensor>) -> Result<Tensor> {
    const OP: &str = "aten::linear";
    let w: ArrayView2<f32> = weight
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|_| QuantError::execution(OP, format!("weight must be 2-D, got {:?}", weight.shape())))?;
    let (out_features, in_features) = w.dim();

    let shape = input.shape().to_vec();
    let Some((&last, batch_dims)) = shape.split_last() else {
        return Err(QuantError::execution(OP, "input must have at least one dimension"));
    };
    if last != in_features {
        return Err(shape_error(OP, &[in_features], &[last]));
    }

    let rows: usize = batch_dims.iter().product();
    let x = input
        .as_standard_layout()
        .into_owned()
        .into_shape_with_order((rows, in_features))
        .map_err(|e| QuantError::execution(OP, e.to_string()))?;

    let mut y: Array2<f32> = x.dot(&w.t());
    if let Some(b) = bias {
        if b.len() != out_features {
            return Err(shape_error(OP, &[out_features], b.shape()));
        }
        let b = b
            .view()
            .into_shape_with_order(out_features)
            .map_err(|e| QuantError::execution(OP, e.to_string()))?;
        y += &b;
    }

    let mut out_shape = batch_dims.to_vec();
    out_shape.push(out_features);
    y.into_shape_with_order(IxDyn(&out_shape))
        .map_err(|e| QuantError::execution(OP, e.to_string()))
}

/// Spatial hyperparameters of a 2-D convolution
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride: (usize, usize),
    pub padding: (usize, usize),
    pub dilation: (usize, usize),
    pub groups: usize,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride: (1, 1),
            padding: (0, 0),
            dilation: (1, 1),
            groups: 1,
        }
    }
}

/// Direct NCHW convolution
pub fn conv2d(
    input: &Tensor,
    weight: &Tensor,
    bias: Option<&Tensor>,
    params: Conv2dParams,
) -> Result<Tensor> {
    const OP: &str = "aten::conv2d";
    if params.groups != 1 {
        return Err(QuantError::execution(
            OP,
            format!("groups={} is not supported", params.groups),
        ));
    }
    if params.stride.0 == 0 || params.stride.1 == 0 {
        return Err(QuantError::execution(OP, "stride must be positive"));
    }
    let x = input
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| QuantError::execution(OP, format!("input must be NCHW, got {:?}", input.shape())))?;
    let w = weight
        .view()
        .into_dimensionality::<Ix4>()
        .map_err(|_| QuantError::execution(OP, format!("weight must be OIHW, got {:?}", weight.shape())))?;

    let (n, c, h, wd) = x.dim();
    let (o, wc, kh, kw) = w.dim();
    if wc != c {
        return Err(shape_error(OP, &[o, c, kh, kw], weight.shape()));
    }
    if let Some(b) = bias {
        if b.len() != o {
            return Err(shape_error(OP, &[o], b.shape()));
        }
    }

    let (sh, sw) = params.stride;
    let (ph, pw) = params.padding;
    let (dh, dw) = params.dilation;
    let span_h = dh * (kh.saturating_sub(1)) + 1;
    let span_w = dw * (kw.saturating_sub(1)) + 1;
    if h + 2 * ph < span_h || wd + 2 * pw < span_w {
        return Err(QuantError::execution(
            OP,
            format!("kernel {kh}x{kw} larger than padded input {h}x{wd}"),
        ));
    }
    let oh = (h + 2 * ph - span_h) / sh + 1;
    let ow = (wd + 2 * pw - span_w) / sw + 1;

    let bias: Vec<f32> = bias.map_or_else(|| vec![0.0; o], |b| b.iter().copied().collect());
    let mut out = Array4::<f32>::zeros((n, o, oh, ow));
    for b_idx in 0..n {
        for oc in 0..o {
            let bias_v = bias[oc];
            for y in 0..oh {
                for xo in 0..ow {
                    let mut acc = bias_v;
                    for ic in 0..c {
                        for ky in 0..kh {
                            let iy = (y * sh + ky * dh) as isize - ph as isize;
                            if iy < 0 || iy >= h as isize {
                                continue;
                            }
                            for kx in 0..kw {
                                let ix = (xo * sw + kx * dw) as isize - pw as isize;
                                if ix < 0 || ix >= wd as isize {
                                    continue;
                                }
                                acc += x[[b_idx, ic, iy as usize, ix as usize]]
                                    * w[[oc, ic, ky, kx]];
                            }
                        }
                    }
                    out[[b_idx, oc, y, xo]] = acc;
                }
            }
        }
    }
    Ok(out.into_dyn())
}

/// Elementwise `max(x, 0)`
pub fn relu(input: &Tensor) -> Tensor {
    input.mapv(|v| v.max(0.0))
}

/// Elementwise sum with broadcasting of `b` onto `a`
pub fn add(a: &Tensor, b: &Tensor) -> Result<Tensor> {
    if a.shape() == b.shape() {
        return Ok(a + b);
    }
    let rhs = b
        .broadcast(a.raw_dim())
        .ok_or_else(|| shape_error("aten::add", a.shape(), b.shape()))?;
    Ok(a + &rhs)
}

/// Mean absolute difference of two tensors of the same shape
pub fn mean_abs_diff(a: &Tensor, b: &Tensor) -> Option<f32> {
    if a.shape() != b.shape() || a.is_empty() {
        return None;
    }
    let total: f32 = a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum();
    Some(total / a.len() as f32)
}

/// Convert an `int[]` of length 1 or 2 into a pair
pub(crate) fn int_pair(op: &str, values: &[i64]) -> Result<(usize, usize)> {
    let to_usize = |v: i64| {
        usize::try_from(v).map_err(|_| QuantError::execution(op, format!("negative size {v}")))
    };
    match values {
        [v] => Ok((to_usize(*v)?, to_usize(*v)?)),
        [a, b] => Ok((to_usize(*a)?, to_usize(*b)?)),
        other => Err(QuantError::execution(
            op,
            format!("expected 1 or 2 values, got {}", other.len()),
        )),
    }
}
