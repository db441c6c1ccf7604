//! One-call dynamic quantization workflow
//!
//! `prepare_dynamic` → calibrate with [`crate::runtime::run_forward`] →
//! `convert_dynamic`, or `quantize_dynamic` for all three at once.

use crate::config::QConfigDict;
use crate::error::Result;
use crate::module::Model;
use crate::passes::{insert_observers, insert_observers_inplace, insert_quant_dequant};
use crate::runtime::forward;
use crate::tensor::Tensor;
use tracing::info;

/// Entry method used by the convenience functions
pub const ENTRY_METHOD: &str = "forward";

/// Attach dynamic-quantization observers to `forward`
pub fn prepare_dynamic(model: &Model, qconfig_dict: &QConfigDict) -> Result<Model> {
    insert_observers(model, ENTRY_METHOD, qconfig_dict, true)
}

/// Replace the observers of a calibrated model with quant/dequant
pub fn convert_dynamic(model: &Model) -> Result<Model> {
    insert_quant_dequant(model, ENTRY_METHOD, true)
}

/// Prepare, run every calibration input through `forward`, then convert
pub fn quantize_dynamic(
    model: &Model,
    qconfig_dict: &QConfigDict,
    calibration_inputs: &[Tensor],
) -> Result<Model> {
    let mut observed = model.clone();
    let report = insert_observers_inplace(&mut observed, ENTRY_METHOD, qconfig_dict, true)?;
    for input in calibration_inputs {
        forward(&mut observed, input)?;
    }
    info!(
        observers = report.observers_inserted(),
        batches = calibration_inputs.len(),
        "calibrated"
    );
    convert_dynamic(&observed)
}
