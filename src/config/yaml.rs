//! YAML qconfig files
//!
//! ```yaml
//! qconfig:
//!   "": default
//!   sub.fc:
//!     activation:
//!       observer: { kind: moving_average_min_max, averaging_constant: 0.05 }
//!       dtype: quint8
//!       reduce_range: true
//!     weight:
//!       scheme: { kind: per_channel_symmetric, axis: 0 }
//!       dtype: qint8
//! ```
//!
//! Paths naming the same preset share one config handle.

use super::qconfig::QConfig;
use super::resolver::{QConfigDict, QConfigRef};
use crate::error::{QuantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Top-level qconfig document
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QConfigFile {
    /// Module path → preset name or inline config
    #[serde(default)]
    pub qconfig: BTreeMap<String, QConfigEntry>,
}

/// A preset name or an inline config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QConfigEntry {
    Preset(String),
    Custom(QConfig),
}

impl QConfigFile {
    /// Resolve presets and build the mapping
    pub fn into_dict(self) -> Result<QConfigDict> {
        let mut presets: HashMap<String, QConfigRef> = HashMap::new();
        let mut dict = QConfigDict::new();
        for (path, entry) in self.qconfig {
            let qconfig = match entry {
                QConfigEntry::Custom(cfg) => Arc::new(cfg),
                QConfigEntry::Preset(name) => match presets.get(&name) {
                    Some(shared) => Arc::clone(shared),
                    None => {
                        let cfg = QConfig::preset(&name).ok_or_else(|| {
                            QuantError::ConfigParsing {
                                message: format!("unknown preset '{name}' for path '{path}'"),
                            }
                        })?;
                        let shared = Arc::new(cfg);
                        presets.insert(name, Arc::clone(&shared));
                        shared
                    }
                },
            };
            dict.insert(&path, qconfig);
        }
        Ok(dict)
    }
}

impl QConfigDict {
    /// Parse a qconfig YAML document
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let file: QConfigFile =
            serde_yaml::from_str(yaml).map_err(|e| QuantError::ConfigParsing {
                message: e.to_string(),
            })?;
        file.into_dict()
    }

    /// Load a qconfig YAML file
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| QuantError::io(format!("reading {}", path.display()), e))?;
        Self::from_yaml_str(&text)
    }
}
