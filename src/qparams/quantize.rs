//! Quantization and dequantization of tensors

use crate::error::{QuantError, Result};
use crate::tensor::{DType, QTensor, QTensorParams, Tensor};
use ndarray::{ArrayD, Axis, Zip};

fn quantize_value(val: f32, scale: f32, zero_point: i32, qmin: i32, qmax: i32) -> i32 {
    let q = (val / scale).round_ties_even() as i64 + i64::from(zero_point);
    q.clamp(i64::from(qmin), i64::from(qmax)) as i32
}

/// Quantize a tensor with one scale and zero point
///
/// # Arguments
/// * `tensor` - Float input
/// * `scale` - Step size, must be positive
/// * `zero_point` - Integer that represents 0.0
/// * `dtype` - Target integer type (full range)
pub fn quantize_per_tensor(tensor: &Tensor, scale: f32, zero_point: i32, dtype: DType) -> QTensor {
    let (qmin, qmax) = dtype.qrange(false);
    QTensor {
        int_repr: tensor.mapv(|v| quantize_value(v, scale, zero_point, qmin, qmax)),
        params: QTensorParams::PerTensor { scale, zero_point },
        dtype,
    }
}

/// Quantize a tensor with one scale and zero point per slice along `axis`
pub fn quantize_per_channel(
    tensor: &Tensor,
    scales: &[f32],
    zero_points: &[i32],
    axis: usize,
    dtype: DType,
) -> Result<QTensor> {
    let op = "aten::quantize_per_channel";
    if axis >= tensor.ndim() {
        return Err(QuantError::execution(
            op,
            format!("axis {axis} out of range for rank {}", tensor.ndim()),
        ));
    }
    let channels = tensor.len_of(Axis(axis));
    if scales.len() != channels || zero_points.len() != channels {
        return Err(QuantError::ShapeMismatch {
            op: op.to_string(),
            expected: vec![channels],
            actual: vec![scales.len(), zero_points.len()],
        });
    }

    let (qmin, qmax) = dtype.qrange(false);
    let mut int_repr = ArrayD::<i32>::zeros(tensor.raw_dim());
    for (c, (mut out, input)) in int_repr
        .axis_iter_mut(Axis(axis))
        .zip(tensor.axis_iter(Axis(axis)))
        .enumerate()
    {
        let (scale, zp) = (scales[c], zero_points[c]);
        Zip::from(&mut out)
            .and(&input)
            .for_each(|q, &v| *q = quantize_value(v, scale, zp, qmin, qmax));
    }

    Ok(QTensor {
        int_repr,
        params: QTensorParams::PerChannel {
            scales: scales.to_vec(),
            zero_points: zero_points.to_vec(),
            axis,
        },
        dtype,
    })
}

/// Map a quantized tensor back to float: `(q - zero_point) * scale`
pub fn dequantize(qtensor: &QTensor) -> Tensor {
    match &qtensor.params {
        QTensorParams::PerTensor { scale, zero_point } => qtensor
            .int_repr
            .mapv(|q| dequantize_value(q, *zero_point, *scale)),
        QTensorParams::PerChannel {
            scales,
            zero_points,
            axis,
        } => {
            let mut out = Tensor::zeros(qtensor.int_repr.raw_dim());
            for (c, (mut dst, src)) in out
                .axis_iter_mut(Axis(*axis))
                .zip(qtensor.int_repr.axis_iter(Axis(*axis)))
                .enumerate()
            {
                let (scale, zp) = (scales[c], zero_points[c]);
                Zip::from(&mut dst)
                    .and(&src)
                    .for_each(|d, &q| *d = dequantize_value(q, zp, scale));
            }
            out
        }
    }
}

/// Widened to i64 so qint32 codes far from the zero point do not overflow
fn dequantize_value(q: i32, zero_point: i32, scale: f32) -> f32 {
    (i64::from(q) - i64::from(zero_point)) as f32 * scale
}

/// Quantize then dequantize with per-tensor parameters
pub fn fake_quantize(tensor: &Tensor, scale: f32, zero_point: i32, dtype: DType) -> Tensor {
    dequantize(&quantize_per_tensor(tensor, scale, zero_point, dtype))
}
