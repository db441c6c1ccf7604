//! Observer state: running statistics for one observed edge

use crate::config::{ObserverKind, ObserverSpec};
use crate::error::{QuantError, Result};
use crate::tensor::Tensor;
use ndarray::Axis;

/// What the observed value is
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ObserverPurpose {
    /// Activation flowing into a quantizable op
    Activation,
    /// Weight read from a module attribute
    Weight,
}

/// Statistics collector attached to a module attribute.
///
/// Accumulation only ever adds to the state; nothing resets it between
/// forward calls.
#[derive(Clone, Debug)]
pub struct Observer {
    spec: ObserverSpec,
    purpose: ObserverPurpose,
    running_min: Option<f32>,
    running_max: Option<f32>,
    /// Per-channel bounds, populated for per-channel schemes
    channel_min: Vec<f32>,
    channel_max: Vec<f32>,
    /// Retained samples for percentile observers
    samples: Vec<f32>,
    num_values_seen: usize,
    num_batches: usize,
}

impl Observer {
    /// Create an observer with empty statistics
    pub fn new(spec: ObserverSpec, purpose: ObserverPurpose) -> Self {
        Self {
            spec,
            purpose,
            running_min: None,
            running_max: None,
            channel_min: Vec::new(),
            channel_max: Vec::new(),
            samples: Vec::new(),
            num_values_seen: 0,
            num_batches: 0,
        }
    }

    /// Observer spec (constructor, scheme, dtype)
    pub fn spec(&self) -> &ObserverSpec {
        &self.spec
    }

    /// Activation or weight
    pub fn purpose(&self) -> ObserverPurpose {
        self.purpose
    }

    /// Number of tensors observed
    pub fn num_batches(&self) -> usize {
        self.num_batches
    }

    /// Check if any data has been observed
    pub fn has_data(&self) -> bool {
        self.num_batches > 0
    }

    /// Observe one tensor.
    ///
    /// Fails when a per-channel scheme names an axis the tensor lacks;
    /// the statistics are left unchanged in that case.
    pub fn observe(&mut self, tensor: &Tensor) -> Result<()> {
        let axis = self.spec.scheme.axis();
        if let Some(axis) = axis {
            if axis >= tensor.ndim() {
                return Err(QuantError::execution(
                    "observer",
                    format!(
                        "{} axis {axis} out of range for a rank-{} tensor",
                        self.spec.scheme.name(),
                        tensor.ndim()
                    ),
                ));
            }
        }
        if tensor.is_empty() {
            return Ok(());
        }

        if let Some(axis) = axis {
            self.observe_per_channel(tensor, axis);
        }

        let batch_min = tensor.iter().copied().fold(f32::INFINITY, f32::min);
        let batch_max = tensor.iter().copied().fold(f32::NEG_INFINITY, f32::max);

        match self.spec.kind {
            ObserverKind::MinMax => self.update_min_max(batch_min, batch_max),
            ObserverKind::MovingAverageMinMax { averaging_constant } => {
                self.update_moving_average(batch_min, batch_max, averaging_constant);
            }
            ObserverKind::Percentile { max_samples, .. } => {
                self.update_samples(tensor, max_samples);
                self.update_min_max(batch_min, batch_max);
            }
        }

        self.num_batches += 1;
        Ok(())
    }

    /// Tensor-wide bounds after applying the observer's statistic
    pub fn min_max(&self) -> Option<(f32, f32)> {
        if let ObserverKind::Percentile { lower, upper, .. } = self.spec.kind {
            if !self.samples.is_empty() {
                return Some(self.percentile_bounds(lower, upper));
            }
        }
        Some((self.running_min?, self.running_max?))
    }

    /// Per-channel bounds, if this observer tracks channels
    pub fn channel_min_max(&self) -> Option<(&[f32], &[f32])> {
        if self.channel_min.is_empty() {
            None
        } else {
            Some((&self.channel_min, &self.channel_max))
        }
    }

    fn update_min_max(&mut self, batch_min: f32, batch_max: f32) {
        self.running_min = Some(self.running_min.map_or(batch_min, |m| m.min(batch_min)));
        self.running_max = Some(self.running_max.map_or(batch_max, |m| m.max(batch_max)));
    }

    fn update_moving_average(&mut self, batch_min: f32, batch_max: f32, c: f32) {
        self.running_min = Some(
            self.running_min
                .map_or(batch_min, |m| m + c * (batch_min - m)),
        );
        self.running_max = Some(
            self.running_max
                .map_or(batch_max, |m| m + c * (batch_max - m)),
        );
    }

    fn observe_per_channel(&mut self, tensor: &Tensor, axis: usize) {
        let bounds: Vec<(f32, f32)> = tensor
            .axis_iter(Axis(axis))
            .map(|slice| {
                slice.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                    (lo.min(v), hi.max(v))
                })
            })
            .collect();

        if self.channel_min.len() != bounds.len() {
            self.channel_min = bounds.iter().map(|b| b.0).collect();
            self.channel_max = bounds.iter().map(|b| b.1).collect();
            return;
        }
        for (i, (lo, hi)) in bounds.into_iter().enumerate() {
            self.channel_min[i] = self.channel_min[i].min(lo);
            self.channel_max[i] = self.channel_max[i].max(hi);
        }
    }

    /// Reservoir sampling capped at `max_samples`
    fn update_samples(&mut self, tensor: &Tensor, max_samples: usize) {
        for &val in tensor.iter() {
            if self.samples.len() < max_samples {
                self.samples.push(val);
            } else if max_samples > 0 {
                let j = lcg(self.num_values_seen) % (self.num_values_seen + 1);
                if j < max_samples {
                    self.samples[j] = val;
                }
            }
            self.num_values_seen += 1;
        }
    }

    fn percentile_bounds(&self, lower: f32, upper: f32) -> (f32, f32) {
        let mut sorted = self.samples.clone();
        sorted.sort_by(f32::total_cmp);

        let n = sorted.len();
        let lower_idx = (((lower / 100.0) * n as f32) as usize).min(n - 1);
        let upper_idx = ((upper / 100.0) * n as f32).min((n - 1) as f32) as usize;
        (sorted[lower_idx], sorted[upper_idx])
    }
}

/// Deterministic pseudo-random index for reservoir sampling
fn lcg(seed: usize) -> usize {
    let a: usize = 1103515245;
    let c: usize = 12345;
    let m: usize = 1 << 31;
    (a.wrapping_mul(seed).wrapping_add(c)) % m
}
