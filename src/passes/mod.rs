//! Graph rewrite passes
//!
//! Strict sequence over a model:
//! 1. `insert_observers`: attach observers at the outermost definition site
//!    of every activation feeding a quantizable op, and at weight reads
//! 2. `run_forward` (runtime): observers accumulate statistics
//! 3. `insert_quant_dequant`: replace observers with quantize/dequantize
//!
//! Every pass works on a snapshot and only hands back a model once the
//! whole rewrite has succeeded.

mod calls;
mod insert_observers;
mod insert_quant_dequant;


use crate::config::QConfigDict;
use crate::error::Result;
use crate::module::Model;
use std::fmt;

pub use calls::reachable_methods;

/// Attribute name prefix of inserted observers
pub const OBSERVER_PREFIX: &str = "_observer_";

/// Summary of one pass run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Activation observers attached
    pub activation_observers: usize,
    /// Weight observers attached
    pub weight_observers: usize,
    /// Observed edges replaced by quantize/dequantize
    pub rewritten_edges: usize,
    /// Rewritten edges whose parameters are chosen at runtime
    pub dynamic_edges: usize,
    /// Observer attributes deleted
    pub removed_observers: usize,
}

impl PassReport {
    /// Total observers attached
    pub fn observers_inserted(&self) -> usize {
        self.activation_observers + self.weight_observers
    }
}

impl fmt::Display for PassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} observers ({} activation, {} weight), {} edges rewritten ({} dynamic), {} observers removed",
            self.observers_inserted(),
            self.activation_observers,
            self.weight_observers,
            self.rewritten_edges,
            self.dynamic_edges,
            self.removed_observers
        )
    }
}

/// Insert observers into a copy of `model`, starting at root `method`
pub fn insert_observers(
    model: &Model,
    method: &str,
    qconfig_dict: &QConfigDict,
    is_dynamic: bool,
) -> Result<Model> {
    insert_observers_with_report(model, method, qconfig_dict, is_dynamic).map(|(m, _)| m)
}

/// [`insert_observers`] returning the pass summary as well
pub fn insert_observers_with_report(
    model: &Model,
    method: &str,
    qconfig_dict: &QConfigDict,
    is_dynamic: bool,
) -> Result<(Model, PassReport)> {
    let mut out = model.clone();
    let report = insert_observers::run(&mut out, method, qconfig_dict, is_dynamic)?;
    Ok((out, report))
}

/// Insert observers in place; `model` is untouched on error
pub fn insert_observers_inplace(
    model: &mut Model,
    method: &str,
    qconfig_dict: &QConfigDict,
    is_dynamic: bool,
) -> Result<PassReport> {
    let (out, report) = insert_observers_with_report(model, method, qconfig_dict, is_dynamic)?;
    *model = out;
    Ok(report)
}

/// Replace observers of a calibrated copy of `model` with quant/dequant
pub fn insert_quant_dequant(model: &Model, method: &str, is_dynamic: bool) -> Result<Model> {
    insert_quant_dequant_with_report(model, method, is_dynamic).map(|(m, _)| m)
}

/// [`insert_quant_dequant`] returning the pass summary as well
pub fn insert_quant_dequant_with_report(
    model: &Model,
    method: &str,
    is_dynamic: bool,
) -> Result<(Model, PassReport)> {
    let mut out = model.clone();
    let report = insert_quant_dequant::run(&mut out, method, is_dynamic)?;
    Ok((out, report))
}

/// Rewrite in place; `model` is untouched on error
pub fn insert_quant_dequant_inplace(
    model: &mut Model,
    method: &str,
    is_dynamic: bool,
) -> Result<PassReport> {
    let (out, report) = insert_quant_dequant_with_report(model, method, is_dynamic)?;
    *model = out;
    Ok(report)
}
