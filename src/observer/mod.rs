//! Observers: statistics collected during calibration forward passes
//!
//! Observer kinds:
//! - Min-Max: full range of observed values
//! - Moving Average: smoothed per-batch min/max
//! - Percentile: bounds robust to outliers
//! - Per-channel min/max for per-channel schemes

mod state;


pub use state::{Observer, ObserverPurpose};
