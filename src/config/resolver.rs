//! Module path → qconfig resolution
//!
//! Longest-prefix match over whole dotted components: `"sub"` covers
//! `"sub.fc"` but `"su"` does not. `""` covers every module.

use super::qconfig::QConfig;
use crate::error::{QuantError, Result};
use crate::module::Model;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Shared handle to a qconfig; identity is pointer identity
pub type QConfigRef = Arc<QConfig>;

/// Check if two resolved configs denote the same quantization
///
/// Identical handles always match; separately built but equal configs also
/// match, so `{"a": default(), "b": default()}` is not a conflict.
pub fn same_config(a: Option<&QConfigRef>, b: Option<&QConfigRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b) || **a == **b,
        _ => false,
    }
}

/// Mapping from dotted module path to qconfig
#[derive(Clone, Debug, Default)]
pub struct QConfigDict {
    entries: BTreeMap<String, QConfigRef>,
}

impl QConfigDict {
    /// Create an empty mapping (nothing is quantized)
    pub fn new() -> Self {
        Self::default()
    }

    /// `{"": qconfig}`: quantize every module
    pub fn global(qconfig: impl Into<QConfigRef>) -> Self {
        Self::new().with("", qconfig)
    }

    /// Builder-style insert
    pub fn with(mut self, path: &str, qconfig: impl Into<QConfigRef>) -> Self {
        self.insert(path, qconfig);
        self
    }

    /// Bind `path` to `qconfig`, replacing any previous binding
    pub fn insert(&mut self, path: &str, qconfig: impl Into<QConfigRef>) {
        self.entries.insert(path.to_string(), qconfig.into());
    }

    /// Number of bound paths
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if no path is bound
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Bound paths in order
    pub fn paths(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.keys().map(String::as_str)
    }

    /// Config bound to the longest prefix of `path`, if any
    pub fn resolve(&self, path: &str) -> Option<&QConfigRef> {
        if path.is_empty() {
            return self.entries.get("");
        }
        let parts: Vec<&str> = path.split('.').collect();
        (0..=parts.len())
            .rev()
            .find_map(|k| self.entries.get(&parts[..k].join(".")))
    }

    /// Check every key against the model and reject ambiguous shared modules.
    ///
    /// Runs at pass invocation so configuration errors never surface midway
    /// through a rewrite.
    pub fn validate(&self, model: &Model) -> Result<()> {
        for path in self.entries.keys() {
            if !path.is_empty() && path.split('.').any(str::is_empty) {
                return Err(QuantError::ConfigResolution {
                    path: path.clone(),
                    reason: "malformed path (empty component)".to_string(),
                });
            }
            if model.resolve_path(path).is_none() {
                return Err(QuantError::ConfigResolution {
                    path: path.clone(),
                    reason: "no such module".to_string(),
                });
            }
        }

        let mut first_seen: HashMap<_, (String, Option<&QConfigRef>)> = HashMap::new();
        for (path, id) in model.module_paths() {
            let resolved = self.resolve(&path);
            match first_seen.get(&id) {
                Some((first, cfg)) if !same_config(*cfg, resolved) => {
                    return Err(QuantError::SharedModuleConflict {
                        first: first.clone(),
                        second: path,
                    });
                }
                Some(_) => {}
                None => {
                    first_seen.insert(id, (path, resolved));
                }
            }
        }
        Ok(())
    }
}
