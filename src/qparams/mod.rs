//! Quantization parameters
//!
//! Static parameters are derived once from observer statistics with the
//! affine min/max mapping onto the dtype's integer range. Dynamic
//! parameters are not precomputed: the rewrite emits a runtime
//! `aten::_choose_qparams_per_tensor` node instead.
//!
//! - `calculate`: observer statistics → `QParams`
//! - `quantize`: float ↔ quantized tensor conversion

mod calculate;
mod quantize;

#[cfg(test)]
mod tests;

pub use calculate::{affine_qparams, calculate_qparams, choose_qparams_per_tensor, QParams};
pub use quantize::{dequantize, fake_quantize, quantize_per_channel, quantize_per_tensor};
