//! Tensor types flowing through the interpreter
//!
//! Float tensors are plain `ndarray` arrays. Quantized tensors keep their
//! integer representation next to the affine parameters that produced it.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Float tensor
pub type Tensor = ArrayD<f32>;

/// Quantized integer dtype
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    /// Unsigned 8-bit, range [0, 255]
    #[default]
    QUInt8,
    /// Signed 8-bit, range [-128, 127]
    QInt8,
    /// Signed 32-bit (bias accumulators)
    QInt32,
}

impl DType {
    /// Integer range `(qmin, qmax)`, optionally reduced by one bit
    pub fn qrange(self, reduce_range: bool) -> (i32, i32) {
        match (self, reduce_range) {
            (DType::QUInt8, false) => (0, 255),
            (DType::QUInt8, true) => (0, 127),
            (DType::QInt8, false) => (-128, 127),
            (DType::QInt8, true) => (-64, 63),
            (DType::QInt32, _) => (i32::MIN, i32::MAX),
        }
    }

    /// Whether the integer range is signed
    pub fn is_signed(self) -> bool {
        !matches!(self, DType::QUInt8)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::QUInt8 => "quint8",
            DType::QInt8 => "qint8",
            DType::QInt32 => "qint32",
        };
        f.write_str(name)
    }
}

/// Affine parameters attached to a quantized tensor
#[derive(Clone, Debug, PartialEq)]
pub enum QTensorParams {
    /// One scale/zero-point for the whole tensor
    PerTensor { scale: f32, zero_point: i32 },
    /// One scale/zero-point per slice along `axis`
    PerChannel {
        scales: Vec<f32>,
        zero_points: Vec<i32>,
        axis: usize,
    },
}

/// Quantized tensor
#[derive(Clone, Debug)]
pub struct QTensor {
    /// Integer representation, already clamped to the dtype range
    pub int_repr: ArrayD<i32>,
    /// Affine parameters
    pub params: QTensorParams,
    /// Target dtype
    pub dtype: DType,
}

impl QTensor {
    /// Shape of the underlying integer data
    pub fn shape(&self) -> &[usize] {
        self.int_repr.shape()
    }
}
