//! Reference interpreter for method graphs
//!
//! Runs float, observed and quantized models alike. Used for calibration
//! (observer calls update statistics) and to compare quantized outputs
//! against the float model.

mod interpreter;
pub mod ops;
mod value;


pub use interpreter::{forward, run_forward, Interpreter};
pub use value::Value;
