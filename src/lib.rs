//! Graph-level post-training dynamic quantization.
//!
//! Rewrites the per-method call graphs of a module hierarchy in three steps:
//! - Observer insertion at the outermost call site of every activation that
//!   feeds a quantizable op, and at weight reads
//! - Calibration: the interpreter feeds tensors through observers
//! - Quant/dequant insertion: runtime `_choose_qparams_per_tensor` for
//!   activations, stored scale/zero-point for weights
//!
//! # Example
//!
//! ```
//! use cuantizar::config::{QConfig, QConfigDict};
//! use cuantizar::module::ModelBuilder;
//! use cuantizar::quantize_script::quantize_dynamic;
//! use ndarray::ArrayD;
//!
//! let mut mb = ModelBuilder::new(42);
//! let fc = mb.linear(5, 5);
//! let root = mb.sequential("M", &[("fc", fc)]);
//! let model = mb.build(root).unwrap();
//!
//! let data = ArrayD::<f32>::ones(ndarray::IxDyn(&[2, 5]));
//! let dict = QConfigDict::global(QConfig::default());
//! let quantized = quantize_dynamic(&model, &dict, &[data]).unwrap();
//! assert_eq!(quantized.observer_count(), 0);
//! ```

pub mod config;
pub mod error;
pub mod ir;
pub mod module;
pub mod observer;
pub mod passes;
pub mod qparams;
pub mod quantize_script;
pub mod runtime;
pub mod tensor;

pub use config::{QConfig, QConfigDict};
pub use error::{QuantError, Result};
pub use module::{Model, ModelBuilder, Stage};
pub use passes::{
    insert_observers, insert_observers_inplace, insert_quant_dequant,
    insert_quant_dequant_inplace, PassReport,
};
pub use runtime::{forward, run_forward, Value};
