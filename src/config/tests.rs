//! Tests for qconfig resolution and loading

use super::*;
use crate::error::QuantError;
use crate::module::{Model, ModelBuilder};
use crate::tensor::DType;
use proptest::prelude::*;
use std::io::Write;
use std::sync::Arc;

fn nested_model() -> Model {
    let mut mb = ModelBuilder::new(0);
    let conv = mb.conv2d(3, 5, 3);
    let fc = mb.linear(5, 5);
    let sub = mb.sequential("Sub", &[("fc", fc)]);
    let root = mb.sequential("M", &[("conv", conv), ("sub", sub)]);
    mb.build(root).unwrap()
}

// ========================================================================
// Resolution
// ========================================================================

#[test]
fn test_global_config_matches_everything() {
    let dict = QConfigDict::global(QConfig::default());
    assert!(dict.resolve("").is_some());
    assert!(dict.resolve("conv").is_some());
    assert!(dict.resolve("sub.fc").is_some());
}

#[test]
fn test_child_config_only_covers_subtree() {
    let dict = QConfigDict::new().with("sub.fc", QConfig::default());
    assert!(dict.resolve("").is_none());
    assert!(dict.resolve("conv").is_none());
    assert!(dict.resolve("sub").is_none());
    assert!(dict.resolve("sub.fc").is_some());
    assert!(dict.resolve("sub.fc.inner").is_some());
}

#[test]
fn test_longest_prefix_wins() {
    let outer = Arc::new(QConfig::default());
    let inner = Arc::new(QConfig::per_channel());
    let dict = QConfigDict::new()
        .with("", Arc::clone(&outer))
        .with("sub", Arc::clone(&inner));

    assert!(Arc::ptr_eq(dict.resolve("conv").unwrap(), &outer));
    assert!(Arc::ptr_eq(dict.resolve("sub").unwrap(), &inner));
    assert!(Arc::ptr_eq(dict.resolve("sub.fc").unwrap(), &inner));
}

#[test]
fn test_prefix_respects_component_boundaries() {
    let dict = QConfigDict::new().with("su", QConfig::default());
    assert!(dict.resolve("sub").is_none());
    assert!(dict.resolve("su.b").is_some());
}

#[test]
fn test_same_config_identity_and_equality() {
    let a = Arc::new(QConfig::default());
    let b = Arc::new(QConfig::default());
    let c = Arc::new(QConfig::per_channel());
    assert!(same_config(Some(&a), Some(&a)));
    assert!(same_config(Some(&a), Some(&b)));
    assert!(!same_config(Some(&a), Some(&c)));
    assert!(!same_config(Some(&a), None));
    assert!(same_config(None, None));
}

// ========================================================================
// Validation
// ========================================================================

#[test]
fn test_validate_accepts_existing_paths() {
    let model = nested_model();
    let dict = QConfigDict::new()
        .with("", QConfig::default())
        .with("sub.fc", QConfig::default());
    assert!(dict.validate(&model).is_ok());
}

#[test]
fn test_validate_rejects_missing_path() {
    let model = nested_model();
    let dict = QConfigDict::new().with("sub.conv", QConfig::default());
    let err = dict.validate(&model).unwrap_err();
    assert!(matches!(err, QuantError::ConfigResolution { ref path, .. } if path == "sub.conv"));
}

#[test]
fn test_validate_rejects_malformed_path() {
    let model = nested_model();
    let dict = QConfigDict::new().with("sub..fc", QConfig::default());
    assert!(matches!(
        dict.validate(&model),
        Err(QuantError::ConfigResolution { .. })
    ));
}

#[test]
fn test_validate_rejects_conflicting_shared_instance() {
    let mut mb = ModelBuilder::new(0);
    let fc = mb.linear(4, 4);
    let root = mb.sequential("M", &[("a", fc), ("b", fc)]);
    let model = mb.build(root).unwrap();

    let dict = QConfigDict::new().with("a", QConfig::default());
    let err = dict.validate(&model).unwrap_err();
    assert!(matches!(err, QuantError::SharedModuleConflict { .. }));

    let agreeing = QConfigDict::new()
        .with("a", QConfig::default())
        .with("b", QConfig::default());
    assert!(agreeing.validate(&model).is_ok());
}

// ========================================================================
// Presets and YAML
// ========================================================================

#[test]
fn test_default_preset_matches_dynamic_defaults() {
    let cfg = QConfig::default();
    assert_eq!(cfg.activation.dtype, DType::QUInt8);
    assert!(cfg.activation.reduce_range);
    assert_eq!(cfg.weight.dtype, DType::QInt8);
    assert_eq!(cfg.weight.scheme, QScheme::PerTensorSymmetric);
    assert_eq!(cfg.activation.class_name(), "MinMaxObserver");
    assert_eq!(
        QConfig::per_channel().weight.class_name(),
        "PerChannelMinMaxObserver"
    );
    assert!(QConfig::preset("nope").is_none());
}

#[test]
fn test_yaml_presets_share_handles() {
    let yaml = r#"
qconfig:
  "": default
  sub: default
  sub.fc: per_channel
"#;
    let dict = QConfigDict::from_yaml_str(yaml).unwrap();
    assert_eq!(dict.len(), 3);
    assert!(Arc::ptr_eq(
        dict.resolve("").unwrap(),
        dict.resolve("sub").unwrap()
    ));
    assert_eq!(
        dict.resolve("sub.fc").unwrap().weight.scheme,
        QScheme::PerChannelSymmetric { axis: 0 }
    );
}

#[test]
fn test_yaml_inline_config() {
    let yaml = r#"
qconfig:
  fc:
    activation:
      observer: { kind: moving_average_min_max, averaging_constant: 0.05 }
      dtype: quint8
      reduce_range: true
    weight:
      scheme: { kind: per_channel_affine, axis: 1 }
      dtype: qint8
"#;
    let dict = QConfigDict::from_yaml_str(yaml).unwrap();
    let cfg = dict.resolve("fc").unwrap();
    assert_eq!(
        cfg.activation.kind,
        ObserverKind::MovingAverageMinMax {
            averaging_constant: 0.05
        }
    );
    assert_eq!(cfg.activation.scheme, QScheme::PerTensorAffine);
    assert_eq!(cfg.weight.scheme, QScheme::PerChannelAffine { axis: 1 });
    assert_eq!(cfg.weight.kind, ObserverKind::MinMax);
    assert!(!cfg.weight.reduce_range);
}

#[test]
fn test_yaml_unknown_preset_fails() {
    let err = QConfigDict::from_yaml_str("qconfig:\n  fc: fancy\n").unwrap_err();
    assert!(matches!(err, QuantError::ConfigParsing { ref message } if message.contains("fancy")));
}

#[test]
fn test_yaml_syntax_error() {
    let err = QConfigDict::from_yaml_str("qconfig: [unclosed").unwrap_err();
    assert_eq!(err.code(), "Q030");
}

#[test]
fn test_yaml_file_roundtrip() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "qconfig:\n  \"\": default").unwrap();
    let dict = QConfigDict::from_yaml_file(file.path()).unwrap();
    assert!(dict.resolve("anything").is_some());

    let missing = QConfigDict::from_yaml_file("/nonexistent/qconfig.yaml").unwrap_err();
    assert!(matches!(missing, QuantError::Io { .. }));
}

// ========================================================================
// PROPERTY TESTS
// ========================================================================

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-c]{1,2}", 0..4).prop_map(|parts| parts.join("."))
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    /// The resolved key is always a component prefix of the query and no
    /// longer bound prefix exists.
    #[test]
    fn prop_resolution_is_longest_component_prefix(
        keys in prop::collection::vec(path_strategy(), 0..5),
        query in path_strategy(),
    ) {
        let mut dict = QConfigDict::new();
        let handles: Vec<(String, QConfigRef)> = keys
            .iter()
            .map(|k| (k.clone(), Arc::new(QConfig::default())))
            .collect();
        for (k, h) in &handles {
            dict.insert(k, Arc::clone(h));
        }

        let is_prefix = |key: &str| {
            key.is_empty() || query == key || query.starts_with(&format!("{key}."))
        };
        let expected = dict
            .paths()
            .filter(|k| is_prefix(k))
            .max_by_key(|k| k.len())
            .map(str::to_string);

        match (dict.resolve(&query), expected) {
            (None, None) => {}
            (Some(got), Some(key)) => {
                let bound = handles.iter().rev().find(|(k, _)| *k == key).map(|(_, h)| h).unwrap();
                prop_assert!(Arc::ptr_eq(got, bound));
            }
            (got, expected) => prop_assert!(false, "resolved {:?}, expected key {:?}", got.is_some(), expected),
        }
    }
}
