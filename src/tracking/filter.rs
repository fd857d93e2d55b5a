//! One-Euro low-pass filtering of poses.
//!
//! A pose is filtered as 12 independent scalars (translation and rotation
//! entries), so the filtered rotation is not guaranteed to stay orthonormal.

use glam::Mat4;

use crate::config::FilterConfig;
use crate::geometry::transform;

/// Number of filtered pose components.
pub const POSE_COMPONENTS: usize = 12;

#[derive(Debug, Clone, Copy, Default)]
struct LowPassFilter {
    raw: f64,
    smoothed: f64,
    initialized: bool,
}

impl LowPassFilter {
    fn filter(&mut self, value: f64, alpha: f64) -> f64 {
        self.smoothed = if self.initialized {
            alpha * value + (1.0 - alpha) * self.smoothed
        } else {
            self.initialized = true;
            value
        };
        self.raw = value;
        self.smoothed
    }
}

/// Speed-adaptive low-pass filter of a single scalar.
#[derive(Debug, Clone, Copy)]
pub struct OneEuroFilter {
    config: FilterConfig,
    frequency: f64,
    x: LowPassFilter,
    dx: LowPassFilter,
    last_time: Option<f64>,
}

impl OneEuroFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            frequency: config.frequency,
            x: LowPassFilter::default(),
            dx: LowPassFilter::default(),
            last_time: None,
        }
    }

    fn alpha(&self, cutoff: f64) -> f64 {
        let tau = 1.0 / (2.0 * std::f64::consts::PI * cutoff);
        1.0 / (1.0 + tau * self.frequency)
    }

    /// Filter `value` observed at `timestamp` seconds.
    ///
    /// Increasing timestamps update the frequency estimate; without them the
    /// configured frequency is used.
    pub fn filter(&mut self, value: f64, timestamp: Option<f64>) -> f64 {
        if let (Some(last), Some(now)) = (self.last_time, timestamp) {
            if now > last {
                self.frequency = 1.0 / (now - last);
            }
        }
        if timestamp.is_some() {
            self.last_time = timestamp;
        }

        let derivative = if self.x.initialized {
            (value - self.x.raw) * self.frequency
        } else {
            0.0
        };
        let derivative_alpha = self.alpha(self.config.derivative_cutoff);
        let smoothed_derivative = self.dx.filter(derivative, derivative_alpha);
        let cutoff = self.config.min_cutoff + self.config.beta * smoothed_derivative.abs();
        self.x.filter(value, self.alpha(cutoff))
    }
}

/// Bank of filters, one per pose component.
#[derive(Debug, Clone)]
pub struct PoseFilter {
    filters: [OneEuroFilter; POSE_COMPONENTS],
}

impl PoseFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            filters: [OneEuroFilter::new(config); POSE_COMPONENTS],
        }
    }

    pub fn filter(&mut self, pose: &Mat4, timestamp_ms: u64) -> Mat4 {
        let time = timestamp_ms as f64 / 1000.0;
        let raw = transform::to_components(pose);
        let mut out = [0.0f32; POSE_COMPONENTS];
        for ((o, r), f) in out.iter_mut().zip(raw.iter()).zip(self.filters.iter_mut()) {
            *o = f.filter(*r as f64, Some(time)) as f32;
        }
        transform::from_components(&out)
    }
}
