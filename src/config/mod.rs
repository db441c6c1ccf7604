//! Quantization configuration
//!
//! - `QConfig`: activation and weight observer specs
//! - `QConfigDict`: dotted module path → config, longest-prefix resolution
//! - YAML loading with named presets

mod qconfig;
mod resolver;
mod yaml;

#[cfg(test)]
mod tests;

pub use qconfig::{ObserverKind, ObserverSpec, QConfig, QScheme};
pub use resolver::{same_config, QConfigDict, QConfigRef};
pub use yaml::{QConfigEntry, QConfigFile};
