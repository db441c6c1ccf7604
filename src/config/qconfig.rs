//! Quantization configuration types

use crate::tensor::DType;
use serde::{Deserialize, Serialize};

/// How a tensor maps onto the integer range
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum QScheme {
    /// One (scale, zero_point) spanning [min, max]
    #[default]
    PerTensorAffine,
    /// One scale spanning [-max_abs, max_abs], fixed zero point
    PerTensorSymmetric,
    /// Affine parameters per slice along `axis`
    PerChannelAffine { axis: usize },
    /// Symmetric parameters per slice along `axis`
    PerChannelSymmetric { axis: usize },
}

impl QScheme {
    /// Check if parameters are computed per channel
    pub fn is_per_channel(self) -> bool {
        matches!(
            self,
            QScheme::PerChannelAffine { .. } | QScheme::PerChannelSymmetric { .. }
        )
    }

    /// Check if the range is symmetric around zero
    pub fn is_symmetric(self) -> bool {
        matches!(
            self,
            QScheme::PerTensorSymmetric | QScheme::PerChannelSymmetric { .. }
        )
    }

    /// Channel axis for per-channel schemes
    pub fn axis(self) -> Option<usize> {
        match self {
            QScheme::PerChannelAffine { axis } | QScheme::PerChannelSymmetric { axis } => {
                Some(axis)
            }
            QScheme::PerTensorAffine | QScheme::PerTensorSymmetric => None,
        }
    }

    /// Canonical name
    pub fn name(self) -> &'static str {
        match self {
            QScheme::PerTensorAffine => "per_tensor_affine",
            QScheme::PerTensorSymmetric => "per_tensor_symmetric",
            QScheme::PerChannelAffine { .. } => "per_channel_affine",
            QScheme::PerChannelSymmetric { .. } => "per_channel_symmetric",
        }
    }
}

/// Statistic an observer accumulates (the observer "constructor")
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ObserverKind {
    /// Running min/max over all observed batches
    #[default]
    MinMax,
    /// Exponential moving average of per-batch min/max
    MovingAverageMinMax {
        /// Weight of the newest batch (0 = ignore new data, 1 = replace)
        averaging_constant: f32,
    },
    /// Percentile bounds over a bounded sample of observed values
    Percentile {
        /// Lower percentile (e.g. 0.01 for 0.01%)
        lower: f32,
        /// Upper percentile (e.g. 99.99 for 99.99%)
        upper: f32,
        /// Maximum retained samples
        max_samples: usize,
    },
}

/// Observer constructor plus target numeric format
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ObserverSpec {
    #[serde(default, rename = "observer")]
    pub kind: ObserverKind,
    #[serde(default)]
    pub scheme: QScheme,
    #[serde(default)]
    pub dtype: DType,
    #[serde(default)]
    pub reduce_range: bool,
}

impl ObserverSpec {
    /// Class name used for observer values in graph dumps
    pub fn class_name(&self) -> &'static str {
        if self.scheme.is_per_channel() {
            return "PerChannelMinMaxObserver";
        }
        match self.kind {
            ObserverKind::MinMax => "MinMaxObserver",
            ObserverKind::MovingAverageMinMax { .. } => "MovingAverageMinMaxObserver",
            ObserverKind::Percentile { .. } => "PercentileObserver",
        }
    }

    /// quint8 per-tensor affine min/max with reduced range
    pub fn default_activation() -> Self {
        Self {
            kind: ObserverKind::MinMax,
            scheme: QScheme::PerTensorAffine,
            dtype: DType::QUInt8,
            reduce_range: true,
        }
    }

    /// qint8 per-tensor symmetric min/max
    pub fn default_weight() -> Self {
        Self {
            kind: ObserverKind::MinMax,
            scheme: QScheme::PerTensorSymmetric,
            dtype: DType::QInt8,
            reduce_range: false,
        }
    }
}

/// Observer specs for activations and weights of a module
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QConfig {
    pub activation: ObserverSpec,
    pub weight: ObserverSpec,
}

impl Default for QConfig {
    fn default() -> Self {
        Self {
            activation: ObserverSpec::default_activation(),
            weight: ObserverSpec::default_weight(),
        }
    }
}

impl QConfig {
    /// Default activations, per-output-channel symmetric weights
    pub fn per_channel() -> Self {
        Self {
            weight: ObserverSpec {
                scheme: QScheme::PerChannelSymmetric { axis: 0 },
                ..ObserverSpec::default_weight()
            },
            ..Self::default()
        }
    }

    /// Moving-average activation observer
    pub fn moving_average(averaging_constant: f32) -> Self {
        Self {
            activation: ObserverSpec {
                kind: ObserverKind::MovingAverageMinMax { averaging_constant },
                ..ObserverSpec::default_activation()
            },
            ..Self::default()
        }
    }

    /// Look up a named preset
    pub fn preset(name: &str) -> Option<Self> {
        match name {
            "default" => Some(Self::default()),
            "per_channel" => Some(Self::per_channel()),
            "moving_average" => Some(Self::moving_average(0.01)),
            _ => None,
        }
    }
}
