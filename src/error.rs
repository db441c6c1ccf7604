//! Error types with actionable diagnostics.
//!
//! Every pass fails fast with one of these variants. None of them is
//! recovered internally: the caller fixes the configuration and re-runs the
//! whole prepare → calibrate → convert sequence.

use thiserror::Error;

/// Result type alias for quantization passes.
pub type Result<T> = std::result::Result<T, QuantError>;

/// Errors raised by the graph passes, the interpreter and config loading.
#[derive(Error, Debug)]
pub enum QuantError {
    /// A qconfig key does not name a module, or is malformed.
    #[error("Cannot resolve qconfig for module path '{path}': {reason}\n  → Keys must be dotted attribute paths of existing submodules (\"\" for the root)")]
    ConfigResolution { path: String, reason: String },

    /// A second observer would be attached to an already observed edge.
    #[error("Observer already attached to {target}\n  → insert_observers must run on a float model exactly once")]
    DoubleInstrumentation { target: String },

    /// Static qparams requested from an observer that never saw data.
    #[error("Observer '{observer}' on module '{module}' has no statistics\n  → Run forward at least once between insert_observers and insert_quant_dequant")]
    StatisticsNotReady { module: String, observer: String },

    /// A pass was invoked out of order.
    #[error("Pass '{pass}' cannot run on a {stage} model\n  → {hint}")]
    PassOrdering {
        pass: &'static str,
        stage: String,
        hint: &'static str,
    },

    /// No rewrite rule exists for the requested scheme.
    #[error("Unsupported quantization scheme: {scheme}\n  → Dynamic activations need a per-tensor scheme; static activation quantization is not provided")]
    UnsupportedScheme { scheme: String },

    /// One module instance is reachable through paths with different configs.
    #[error("Shared module instance reachable as '{first}' and '{second}' resolves to different qconfigs\n  → Bind both paths to the same qconfig or give each path its own instance")]
    SharedModuleConflict { first: String, second: String },

    /// A `prim::CallMethod` whose callee is not a statically known module.
    #[error("Cannot resolve callee of method call '{method}' in {location}")]
    UnresolvedCallee { method: String, location: String },

    /// Method lookup failed.
    #[error("Module '{module}' has no method '{method}'")]
    MethodNotFound { module: String, method: String },

    /// Attribute lookup failed.
    #[error("Module '{module}' has no attribute '{name}'")]
    AttributeNotFound { module: String, name: String },

    /// The interpreter hit a value of the wrong kind or a malformed node.
    #[error("Execution of {op} failed: {message}")]
    Execution { op: String, message: String },

    /// Tensor shapes do not line up for an operation.
    #[error("Shape mismatch in {op}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        op: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A qconfig file could not be parsed.
    #[error("Invalid qconfig: {message}\n  → Check YAML syntax and preset names (default, per_channel, moving_average)")]
    ConfigParsing { message: String },

    /// IO error with context.
    #[error("IO error: {context}\n  Cause: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl QuantError {
    /// Create an IO error with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an execution error for `op`.
    pub fn execution(op: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Execution {
            op: op.into(),
            message: message.into(),
        }
    }

    /// Check if the error stems from caller input rather than a broken graph.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigResolution { .. }
                | Self::DoubleInstrumentation { .. }
                | Self::StatisticsNotReady { .. }
                | Self::PassOrdering { .. }
                | Self::UnsupportedScheme { .. }
                | Self::SharedModuleConflict { .. }
                | Self::ConfigParsing { .. }
        )
    }

    /// Get the error code for structured output.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConfigResolution { .. } => "Q001",
            Self::DoubleInstrumentation { .. } => "Q002",
            Self::StatisticsNotReady { .. } => "Q003",
            Self::PassOrdering { .. } => "Q004",
            Self::UnsupportedScheme { .. } => "Q005",
            Self::SharedModuleConflict { .. } => "Q006",
            Self::UnresolvedCallee { .. } => "Q010",
            Self::MethodNotFound { .. } => "Q011",
            Self::AttributeNotFound { .. } => "Q012",
            Self::Execution { .. } => "Q020",
            Self::ShapeMismatch { .. } => "Q021",
            Self::ConfigParsing { .. } => "Q030",
            Self::Io { .. } => "Q050",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_are_unique() {
        let errors = vec![
            QuantError::ConfigResolution {
                path: "".into(),
                reason: "".into(),
            },
            QuantError::DoubleInstrumentation { target: "".into() },
            QuantError::StatisticsNotReady {
                module: "".into(),
                observer: "".into(),
            },
            QuantError::PassOrdering {
                pass: "p",
                stage: "".into(),
                hint: "",
            },
            QuantError::UnsupportedScheme { scheme: "".into() },
            QuantError::SharedModuleConflict {
                first: "".into(),
                second: "".into(),
            },
            QuantError::UnresolvedCallee {
                method: "".into(),
                location: "".into(),
            },
            QuantError::MethodNotFound {
                module: "".into(),
                method: "".into(),
            },
            QuantError::AttributeNotFound {
                module: "".into(),
                name: "".into(),
            },
            QuantError::execution("", ""),
            QuantError::ShapeMismatch {
                op: "".into(),
                expected: vec![],
                actual: vec![],
            },
            QuantError::ConfigParsing { message: "".into() },
        ];

        let codes: Vec<_> = errors.iter().map(QuantError::code).collect();
        let unique: std::collections::HashSet<_> = codes.iter().collect();
        assert_eq!(unique.len(), codes.len());
        assert!(codes.iter().all(|c| c.starts_with('Q')));
    }

    #[test]
    fn test_user_errors_are_classified() {
        assert!(QuantError::UnsupportedScheme {
            scheme: "per_channel_affine".into()
        }
        .is_user_error());
        assert!(!QuantError::execution("aten::linear", "bad input").is_user_error());
    }

    #[test]
    fn test_statistics_error_is_actionable() {
        let err = QuantError::StatisticsNotReady {
            module: "fc".into(),
            observer: "_observer_0".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("_observer_0"));
        assert!(msg.contains("Run forward"));
    }

    #[test]
    fn test_io_error_constructor() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = QuantError::io("reading qconfig.yaml", io_err);
        assert!(matches!(err, QuantError::Io { .. }));
        assert!(err.to_string().contains("qconfig.yaml"));
    }
}
