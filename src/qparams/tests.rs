//! Tests for qparams calculation and tensor quantization

use super::*;
use crate::config::{ObserverSpec, QScheme};
use crate::error::QuantError;
use crate::observer::{Observer, ObserverPurpose};
use crate::tensor::{DType, QTensor, QTensorParams};
use approx::assert_abs_diff_eq;
use ndarray::{arr1, arr2, ArrayD};
use proptest::prelude::*;

fn observed(spec: ObserverSpec, purpose: ObserverPurpose, data: ArrayD<f32>) -> Observer {
    let mut obs = Observer::new(spec, purpose);
    obs.observe(&data).unwrap();
    obs
}

// ========================================================================
// affine_qparams
// ========================================================================

#[test]
fn test_affine_quint8_full_range() {
    let (scale, zp) = affine_qparams(-1.0, 3.0, DType::QUInt8, false, false);
    assert_abs_diff_eq!(scale, 4.0 / 255.0, epsilon = 1e-7);
    assert_eq!(zp, 64);
}

#[test]
fn test_affine_reduce_range_halves_levels() {
    let (scale, zp) = affine_qparams(0.0, 127.0, DType::QUInt8, false, true);
    assert_abs_diff_eq!(scale, 1.0, epsilon = 1e-6);
    assert_eq!(zp, 0);
}

#[test]
fn test_range_is_widened_to_include_zero() {
    let (scale, zp) = affine_qparams(2.0, 4.0, DType::QUInt8, false, false);
    assert_abs_diff_eq!(scale, 4.0 / 255.0, epsilon = 1e-7);
    assert_eq!(zp, 0);
}

#[test]
fn test_symmetric_qint8() {
    let (scale, zp) = affine_qparams(-3.0, 1.5, DType::QInt8, true, false);
    assert_abs_diff_eq!(scale, 3.0 / 127.5, epsilon = 1e-7);
    assert_eq!(zp, 0);

    let (_, zp) = affine_qparams(-3.0, 1.5, DType::QUInt8, true, false);
    assert_eq!(zp, 128);
}

#[test]
fn test_degenerate_range() {
    assert_eq!(affine_qparams(0.0, 0.0, DType::QInt8, true, false), (1.0, 0));
}

#[test]
fn test_choose_qparams_uses_runtime_range() {
    let x = arr1(&[-0.5f32, 0.0, 1.5]).into_dyn();
    let (scale, zp) = choose_qparams_per_tensor(&x, true);
    assert_abs_diff_eq!(scale, 2.0 / 127.0, epsilon = 1e-7);
    assert_eq!(zp, 32);

    let empty = ArrayD::<f32>::zeros(ndarray::IxDyn(&[0]));
    assert_eq!(choose_qparams_per_tensor(&empty, false), (1.0, 0));
}

// ========================================================================
// calculate_qparams
// ========================================================================

#[test]
fn test_dynamic_activation_needs_no_statistics() {
    let obs = Observer::new(ObserverSpec::default_activation(), ObserverPurpose::Activation);
    let qp = calculate_qparams(&obs, true, "fc", "_observer_0").unwrap();
    assert_eq!(
        qp,
        QParams::Dynamic {
            dtype: DType::QUInt8,
            reduce_range: true
        }
    );
}

#[test]
fn test_static_weight_without_statistics_fails() {
    let obs = Observer::new(ObserverSpec::default_weight(), ObserverPurpose::Weight);
    let err = calculate_qparams(&obs, true, "fc", "_observer_1").unwrap_err();
    assert!(
        matches!(err, QuantError::StatisticsNotReady { ref module, ref observer }
            if module == "fc" && observer == "_observer_1")
    );
}

#[test]
fn test_weight_per_tensor() {
    let obs = observed(
        ObserverSpec::default_weight(),
        ObserverPurpose::Weight,
        arr2(&[[0.5, -1.27], [1.0, 0.0]]).into_dyn(),
    );
    match calculate_qparams(&obs, true, "fc", "_observer_1").unwrap() {
        QParams::PerTensor {
            scale,
            zero_point,
            dtype,
        } => {
            assert_abs_diff_eq!(scale, 1.27 / 127.5, epsilon = 1e-7);
            assert_eq!(zero_point, 0);
            assert_eq!(dtype, DType::QInt8);
        }
        other => panic!("expected per-tensor qparams, got {other:?}"),
    }
}

#[test]
fn test_weight_per_channel() {
    let spec = ObserverSpec {
        scheme: QScheme::PerChannelSymmetric { axis: 0 },
        ..ObserverSpec::default_weight()
    };
    let obs = observed(
        spec,
        ObserverPurpose::Weight,
        arr2(&[[1.0, -2.0], [0.5, 0.25]]).into_dyn(),
    );
    match calculate_qparams(&obs, true, "fc", "_observer_1").unwrap() {
        QParams::PerChannel {
            scales,
            zero_points,
            axis,
            ..
        } => {
            assert_eq!(axis, 0);
            assert_eq!(zero_points, vec![0, 0]);
            assert_abs_diff_eq!(scales[0], 2.0 / 127.5, epsilon = 1e-7);
            assert_abs_diff_eq!(scales[1], 0.5 / 127.5, epsilon = 1e-7);
        }
        other => panic!("expected per-channel qparams, got {other:?}"),
    }
}

#[test]
fn test_per_channel_dynamic_activation_is_unsupported() {
    let spec = ObserverSpec {
        scheme: QScheme::PerChannelAffine { axis: 1 },
        ..ObserverSpec::default_activation()
    };
    let obs = Observer::new(spec, ObserverPurpose::Activation);
    assert!(matches!(
        calculate_qparams(&obs, true, "fc", "_observer_0"),
        Err(QuantError::UnsupportedScheme { .. })
    ));
}

#[test]
fn test_non_quint8_dynamic_activation_is_unsupported() {
    let spec = ObserverSpec {
        dtype: DType::QInt8,
        ..ObserverSpec::default_activation()
    };
    let obs = Observer::new(spec, ObserverPurpose::Activation);
    assert!(matches!(
        calculate_qparams(&obs, true, "fc", "_observer_0"),
        Err(QuantError::UnsupportedScheme { .. })
    ));
}

// ========================================================================
// quantize / dequantize
// ========================================================================

#[test]
fn test_quantize_rounds_half_to_even_and_clamps() {
    let x = arr1(&[0.5f32, 1.5, 2.5, 1000.0, -1000.0]).into_dyn();
    let q = quantize_per_tensor(&x, 1.0, 0, DType::QInt8);
    assert_eq!(q.int_repr.as_slice().unwrap(), &[0, 2, 2, 127, -128]);
    assert_eq!(
        q.params,
        QTensorParams::PerTensor {
            scale: 1.0,
            zero_point: 0
        }
    );
}

#[test]
fn test_dequantize_per_tensor() {
    let x = arr1(&[0.0f32, 0.1, 0.2]).into_dyn();
    let q = quantize_per_tensor(&x, 0.1, 10, DType::QUInt8);
    assert_eq!(q.int_repr.as_slice().unwrap(), &[10, 11, 12]);
    let back = dequantize(&q);
    for (a, b) in x.iter().zip(back.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1e-6);
    }
}

#[test]
fn test_dequantize_qint32_extremes() {
    let q = QTensor {
        int_repr: arr1(&[i32::MAX, i32::MIN]).into_dyn(),
        params: QTensorParams::PerTensor {
            scale: 1.0,
            zero_point: -1,
        },
        dtype: DType::QInt32,
    };
    let back = dequantize(&q);
    assert_eq!(back.as_slice().unwrap(), &[2_147_483_648.0, -2_147_483_648.0]);

    let q = QTensor {
        int_repr: arr2(&[[i32::MAX], [i32::MIN]]).into_dyn(),
        params: QTensorParams::PerChannel {
            scales: vec![1.0, 1.0],
            zero_points: vec![i32::MIN, i32::MAX],
            axis: 0,
        },
        dtype: DType::QInt32,
    };
    let back = dequantize(&q);
    assert_eq!(back, arr2(&[[4_294_967_295.0f32], [-4_294_967_295.0]]).into_dyn());
}

#[test]
fn test_qint32_affine_wide_range_roundtrip() {
    let x = arr1(&[-1000.0f32, 0.0, 3000.0]).into_dyn();
    let (scale, zp) = affine_qparams(-1000.0, 3000.0, DType::QInt32, false, false);
    assert!(zp < 0);

    let back = dequantize(&quantize_per_tensor(&x, scale, zp, DType::QInt32));
    for (a, b) in x.iter().zip(back.iter()) {
        assert_abs_diff_eq!(a, b, epsilon = 1.0);
    }
}

#[test]
fn test_quantize_per_channel_rows() {
    let w = arr2(&[[1.0f32, -1.0], [10.0, -10.0]]).into_dyn();
    let q = quantize_per_channel(&w, &[0.5, 5.0], &[0, 0], 0, DType::QInt8).unwrap();
    assert_eq!(q.int_repr, arr2(&[[2, -2], [2, -2]]).into_dyn());
    let back = dequantize(&q);
    assert_eq!(back, w);
}

#[test]
fn test_quantize_per_channel_shape_mismatch() {
    let w = arr2(&[[1.0f32, 2.0]]).into_dyn();
    let err = quantize_per_channel(&w, &[1.0, 1.0], &[0, 0], 0, DType::QInt8).unwrap_err();
    assert!(matches!(err, QuantError::ShapeMismatch { .. }));
    let err = quantize_per_channel(&w, &[1.0], &[0], 3, DType::QInt8).unwrap_err();
    assert!(matches!(err, QuantError::Execution { .. }));
}

// ========================================================================
// PROPERTY TESTS
// ========================================================================

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(200))]

    /// Zero is always exactly representable
    #[test]
    fn prop_zero_is_exact(lo in -100.0f32..0.0, hi in 0.0f32..100.0, reduce in any::<bool>()) {
        let (scale, zp) = affine_qparams(lo, hi, DType::QUInt8, false, reduce);
        let z = fake_quantize(&arr1(&[0.0f32]).into_dyn(), scale, zp, DType::QUInt8);
        prop_assert_eq!(z.iter().copied().next(), Some(0.0));
    }

    /// Values inside the calibrated range come back within half a step
    #[test]
    fn prop_in_range_error_bounded(
        data in prop::collection::vec(-10.0f32..10.0, 1..64),
    ) {
        let x = arr1(&data).into_dyn();
        let lo = data.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = data.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let (scale, zp) = affine_qparams(lo, hi, DType::QUInt8, false, false);
        let y = fake_quantize(&x, scale, zp, DType::QUInt8);
        for (a, b) in x.iter().zip(y.iter()) {
            prop_assert!((a - b).abs() <= scale * 0.5 + 1e-4, "{} vs {} (scale {})", a, b, scale);
        }
    }
}
