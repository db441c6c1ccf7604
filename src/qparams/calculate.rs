//! Parameter calculation from observer statistics

use crate::config::QScheme;
use crate::error::{QuantError, Result};
use crate::observer::{Observer, ObserverPurpose};
use crate::tensor::{DType, Tensor};

/// Quantization parameters for one observed edge
#[derive(Clone, Debug, PartialEq)]
pub enum QParams {
    /// Fixed per-tensor parameters
    PerTensor {
        scale: f32,
        zero_point: i32,
        dtype: DType,
    },
    /// Fixed per-channel parameters
    PerChannel {
        scales: Vec<f32>,
        zero_points: Vec<i32>,
        axis: usize,
        dtype: DType,
    },
    /// Parameters chosen from the runtime tensor on every forward call
    Dynamic { dtype: DType, reduce_range: bool },
}

/// Affine (scale, zero_point) covering `[min_val, max_val]`.
///
/// The range is widened to include zero so that 0.0 is exactly
/// representable. A degenerate range yields `(1.0, 0)`.
pub fn affine_qparams(
    min_val: f32,
    max_val: f32,
    dtype: DType,
    symmetric: bool,
    reduce_range: bool,
) -> (f32, i32) {
    let (qmin, qmax) = dtype.qrange(reduce_range);
    let min_val = min_val.min(0.0);
    let max_val = max_val.max(0.0);

    if max_val == min_val {
        return (1.0, 0);
    }

    if symmetric {
        let max_abs = (-min_val).max(max_val);
        let scale = (max_abs / ((qmax as f32 - qmin as f32) / 2.0)).max(f32::EPSILON);
        let zero_point = if dtype.is_signed() { 0 } else { (qmin + qmax + 1) / 2 };
        (scale, zero_point)
    } else {
        let scale = ((max_val - min_val) / (qmax as f32 - qmin as f32)).max(f32::EPSILON);
        let zero_point = (qmin as f32 - (min_val / scale).round()) as i32;
        (scale, zero_point.clamp(qmin, qmax))
    }
}

/// Runtime parameter choice for a dynamically quantized activation.
///
/// quint8 asymmetric over the tensor's own min/max.
pub fn choose_qparams_per_tensor(tensor: &Tensor, reduce_range: bool) -> (f32, i32) {
    let (lo, hi) = tensor
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (1.0, 0);
    }
    affine_qparams(lo, hi, DType::QUInt8, false, reduce_range)
}

/// Compute the parameters an observer stands for.
///
/// Dynamic activations return the `Dynamic` marker without touching
/// statistics. Every other case needs at least one observed batch.
pub fn calculate_qparams(
    observer: &Observer,
    dynamic: bool,
    module: &str,
    name: &str,
) -> Result<QParams> {
    let spec = observer.spec();

    if dynamic && observer.purpose() == ObserverPurpose::Activation {
        if spec.scheme.is_per_channel() {
            return Err(QuantError::UnsupportedScheme {
                scheme: format!("{} for dynamic activations", spec.scheme.name()),
            });
        }
        if spec.dtype != DType::QUInt8 {
            return Err(QuantError::UnsupportedScheme {
                scheme: format!("{} for dynamic activations", spec.dtype),
            });
        }
        return Ok(QParams::Dynamic {
            dtype: DType::QUInt8,
            reduce_range: spec.reduce_range,
        });
    }

    if !observer.has_data() {
        return Err(QuantError::StatisticsNotReady {
            module: module.to_string(),
            observer: name.to_string(),
        });
    }

    let symmetric = spec.scheme.is_symmetric();
    match spec.scheme {
        QScheme::PerTensorAffine | QScheme::PerTensorSymmetric => {
            let (lo, hi) = observer
                .min_max()
                .ok_or_else(|| QuantError::StatisticsNotReady {
                    module: module.to_string(),
                    observer: name.to_string(),
                })?;
            let (scale, zero_point) =
                affine_qparams(lo, hi, spec.dtype, symmetric, spec.reduce_range);
            Ok(QParams::PerTensor {
                scale,
                zero_point,
                dtype: spec.dtype,
            })
        }
        QScheme::PerChannelAffine { axis } | QScheme::PerChannelSymmetric { axis } => {
            let (mins, maxs) =
                observer
                    .channel_min_max()
                    .ok_or_else(|| QuantError::StatisticsNotReady {
                        module: module.to_string(),
                        observer: name.to_string(),
                    })?;
            let (scales, zero_points) = mins
                .iter()
                .zip(maxs)
                .map(|(&lo, &hi)| affine_qparams(lo, hi, spec.dtype, symmetric, spec.reduce_range))
                .unzip();
            Ok(QParams::PerChannel {
                scales,
                zero_points,
                axis,
                dtype: spec.dtype,
            })
        }
    }
}
