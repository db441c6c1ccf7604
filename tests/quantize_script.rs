//! End-to-end tests for dynamic graph quantization

mod common;

use approx::assert_abs_diff_eq;
use common::{conv_model, conv_then_sub, rand_tensor, single_linear, two_linear, FileCheck};
use cuantizar::config::{QConfig, QConfigDict};
use cuantizar::error::QuantError;
use cuantizar::module::Stage;
use cuantizar::quantize_script::{convert_dynamic, prepare_dynamic, quantize_dynamic};
use cuantizar::runtime::ops::mean_abs_diff;
use cuantizar::{forward, insert_observers, insert_quant_dequant, run_forward, Value};

const OBSERVER_GETTER: &str = "Observer = prim::GetAttr[name=\"_observer_";
const QUANT_FUNC: &str = "aten::quantize_per_tensor";
const CHOOSE_QPARAMS: &str = "aten::_choose_qparams_per_tensor";

fn global() -> QConfigDict {
    QConfigDict::global(QConfig::default())
}

fn graph_text(model: &cuantizar::Model, path: &str, method: &str) -> String {
    model.method_graph(path, method).unwrap().to_string()
}

// ============================================================================
// Observer insertion
// ============================================================================

#[test]
fn test_prepare_dynamic() {
    let m = prepare_dynamic(&single_linear(0), &global()).unwrap();

    // input of fc, for dynamic quant
    assert_eq!(m.attrs_with_prefix("", "_observer_").unwrap().len(), 1);
    // weight
    assert_eq!(m.attrs_with_prefix("fc", "_observer_").unwrap().len(), 1);

    FileCheck::new()
        .check(OBSERVER_GETTER)
        .check("prim::GetAttr[name=\"fc\"]")
        .check("prim::CallMethod")
        .check_not(OBSERVER_GETTER)
        .run(&graph_text(&m, "", "forward"));
}

#[test]
fn test_prepare_dynamic_child_qconfig() {
    let dict = QConfigDict::new().with("sub.fc", QConfig::default());
    let m = prepare_dynamic(&conv_then_sub(1), &dict).unwrap();

    // input of sub, for dynamic quant
    assert_eq!(m.attrs_with_prefix("", "_observer_").unwrap().len(), 1);
    // not quantized
    assert_eq!(m.attrs_with_prefix("conv", "_observer_").unwrap().len(), 0);
    // observed at the outermost call site instead
    assert_eq!(m.attrs_with_prefix("sub", "_observer_").unwrap().len(), 0);
    // weight of linear
    assert_eq!(m.attrs_with_prefix("sub.fc", "_observer_").unwrap().len(), 1);

    FileCheck::new()
        .check("prim::GetAttr[name=\"sub")
        .check("prim::CallMethod")
        .check(OBSERVER_GETTER)
        .check("prim::CallMethod")
        .check_not(OBSERVER_GETTER)
        .run(&graph_text(&m, "", "forward"));
}

#[test]
fn test_prepare_leaves_float_model_untouched() {
    let model = single_linear(2);
    let before = graph_text(&model, "", "forward");
    let _ = prepare_dynamic(&model, &global()).unwrap();

    assert_eq!(graph_text(&model, "", "forward"), before);
    assert_eq!(model.observer_count(), 0);
    assert_eq!(model.stage(), Stage::Float);
}

#[test]
fn test_prepare_from_yaml_config() {
    let yaml = r#"
qconfig:
  sub.fc: default
"#;
    let dict = QConfigDict::from_yaml_str(yaml).unwrap();
    let m = prepare_dynamic(&conv_then_sub(3), &dict).unwrap();
    assert_eq!(m.attrs_with_prefix("", "_observer_").unwrap().len(), 1);
    assert_eq!(m.attrs_with_prefix("sub.fc", "_observer_").unwrap().len(), 1);
}

#[test]
fn test_prepare_from_yaml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("qconfig.yaml");
    std::fs::write(&path, "qconfig:\n  \"\": per_channel\n").unwrap();

    let dict = QConfigDict::from_yaml_file(&path).unwrap();
    let m = prepare_dynamic(&conv_model(4), &dict).unwrap();
    assert_eq!(m.observer_count(), 2);
}

#[test]
fn test_prepare_twice_fails() {
    let m = prepare_dynamic(&single_linear(5), &global()).unwrap();
    let err = prepare_dynamic(&m, &global()).unwrap_err();
    assert!(matches!(err, QuantError::DoubleInstrumentation { .. }));
    assert!(err.is_user_error());
}

// ============================================================================
// Quant/dequant insertion
// ============================================================================

#[test]
fn test_insert_quant_dequant_dynamic() {
    let mut m = insert_observers(&conv_model(6), "forward", &global(), true).unwrap();
    let data = rand_tensor(&[1, 3, 10, 10], 7);
    forward(&mut m, &data).unwrap();

    let mut m = insert_quant_dequant(&m, "forward", true).unwrap();
    assert_eq!(
        m.submodule_names("").unwrap().len(),
        1,
        "Expected to have single submodule of conv"
    );

    let out = forward(&mut m, &data).unwrap();
    assert_eq!(out.shape(), &[1, 5, 8, 8]);

    // quantizing activations
    FileCheck::new()
        .check(CHOOSE_QPARAMS)
        .check(QUANT_FUNC)
        .check("prim::CallMethod[name=\"forward\"]")
        .check_not(QUANT_FUNC)
        .check("return")
        .run(&graph_text(&m, "", "forward"));

    // quantizing weight
    FileCheck::new()
        .check_not(CHOOSE_QPARAMS)
        .check(QUANT_FUNC)
        .check("prim::CallMethod[name=\"_conv_forward\"]")
        .check_not(QUANT_FUNC)
        .check("return")
        .run(&graph_text(&m, "conv", "forward"));

    // no quantize in _conv_forward
    FileCheck::new()
        .check_not(QUANT_FUNC)
        .check("aten::conv2d")
        .check_not(QUANT_FUNC)
        .check("return")
        .run(&graph_text(&m, "conv", "_conv_forward"));
}

#[test]
fn test_insert_quant_dequant_linear_dynamic() {
    let mut m = insert_observers(&two_linear(8), "forward", &global(), true).unwrap();
    let data = rand_tensor(&[5, 5], 9);
    forward(&mut m, &data).unwrap();

    let mut m = insert_quant_dequant(&m, "forward", true).unwrap();
    assert_eq!(
        m.submodule_names("").unwrap().len(),
        2,
        "Expected to have two submodule of linear"
    );

    forward(&mut m, &data).unwrap();

    // quantizing activations
    FileCheck::new()
        .check(CHOOSE_QPARAMS)
        .check(QUANT_FUNC)
        .check("prim::CallMethod[name=\"forward\"]")
        .check(CHOOSE_QPARAMS)
        .check(QUANT_FUNC)
        .check("prim::CallMethod[name=\"forward\"]")
        .check_not(QUANT_FUNC)
        .check("return")
        .run(&graph_text(&m, "", "forward"));

    // quantizing weight
    FileCheck::new()
        .check_not(CHOOSE_QPARAMS)
        .check(QUANT_FUNC)
        .check("prim::CallFunction")
        .check_not(QUANT_FUNC)
        .check("return")
        .run(&graph_text(&m, "fc1", "forward"));
}

#[test]
fn test_convert_without_calibration_fails() {
    let m = prepare_dynamic(&two_linear(10), &global()).unwrap();
    let err = convert_dynamic(&m).unwrap_err();
    assert!(matches!(err, QuantError::StatisticsNotReady { .. }));
}

#[test]
fn test_convert_float_model_fails() {
    let err = convert_dynamic(&two_linear(11)).unwrap_err();
    assert!(matches!(err, QuantError::PassOrdering { .. }));
}

#[test]
fn test_calibration_accumulates_across_batches() {
    let mut m = prepare_dynamic(&single_linear(12), &global()).unwrap();
    for seed in 0..3 {
        run_forward(&mut m, "forward", vec![Value::Tensor(rand_tensor(&[2, 5], seed))]).unwrap();
    }
    assert!(m.observers().iter().all(|(_, _, obs)| obs.num_batches() == 3));
}

// ============================================================================
// Facade
// ============================================================================

#[test]
fn test_quantize_dynamic_matches_float_closely() {
    let model = two_linear(13);
    let data = rand_tensor(&[8, 5], 14);

    let mut float_model = model.clone();
    let expected = forward(&mut float_model, &data).unwrap();

    let mut quantized = quantize_dynamic(&model, &global(), &[data.clone()]).unwrap();
    assert_eq!(quantized.stage(), Stage::Quantized);
    assert_eq!(quantized.observer_count(), 0);

    let actual = forward(&mut quantized, &data).unwrap();
    for (a, e) in actual.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(*a, *e, epsilon = 0.1);
    }
    let drift = mean_abs_diff(&actual, &expected).unwrap();
    assert!(drift < 0.02, "mean drift {drift}");
}

#[test]
fn test_quantize_dynamic_per_channel_conv() {
    let model = conv_model(15);
    let data = rand_tensor(&[1, 3, 6, 6], 16);
    let dict = QConfigDict::global(QConfig::per_channel());

    let quantized = quantize_dynamic(&model, &dict, &[data]).unwrap();
    FileCheck::new()
        .check("aten::quantize_per_channel")
        .check("prim::CallMethod[name=\"_conv_forward\"]")
        .run(&graph_text(&quantized, "conv", "forward"));
}
