// src/filter.rs - per-landmark Kalman smoothing and motion-adaptive blending
use nalgebra::Vector3;

use crate::config::{BlenderConfig, FilterConfig};
use crate::landmarks::LandmarkSet;

/// Scalar constant-position-with-drift estimator for one landmark axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisFilter {
    pub estimate: f32,
    pub variance: f32,
    pub velocity: f32,
    updates: u32,
}

impl Default for AxisFilter {
    fn default() -> Self {
        Self {
            estimate: 0.0,
            variance: 1.0,
            velocity: 0.0,
            updates: 0,
        }
    }
}

impl AxisFilter {
    pub fn predict(&mut self, process_noise: f32, drift: bool) {
        if drift {
            self.estimate += self.velocity;
        }
        self.variance += process_noise;
    }

    pub fn update(&mut self, measurement: f32, measurement_noise: f32, velocity_alpha: f32) {
        let innovation = measurement - self.estimate;
        let gain = self.variance / (self.variance + measurement_noise);

        self.estimate += gain * innovation;
        self.variance *= 1.0 - gain;

        // The first innovation after a reset measures distance from the prior,
        // not motion.
        if self.updates > 0 {
            self.velocity = velocity_alpha * innovation + (1.0 - velocity_alpha) * self.velocity;
        }
        self.updates = self.updates.saturating_add(1);
    }
}

/// Independent [`AxisFilter`]s for every axis of every landmark.
///
/// Empty until the first update; [`TemporalFilter::reset`] returns it to that
/// state so a newly-appeared face starts from the prior.
#[derive(Debug, Clone)]
pub struct TemporalFilter {
    config: FilterConfig,
    states: Vec<[AxisFilter; 3]>,
}

impl TemporalFilter {
    pub fn new(config: FilterConfig) -> Self {
        Self {
            config,
            states: Vec::new(),
        }
    }

    pub fn update(&mut self, raw: &LandmarkSet) -> LandmarkSet {
        if self.states.len() != raw.len() {
            self.states = vec![[AxisFilter::default(); 3]; raw.len()];
        }

        let FilterConfig {
            process_noise,
            measurement_noise_xy,
            measurement_noise_z,
            velocity_alpha,
            drift_compensation,
        } = self.config;

        let points = raw
            .points()
            .iter()
            .zip(self.states.iter_mut())
            .map(|(measurement, axes)| {
                for (axis, state) in axes.iter_mut().enumerate() {
                    let noise = if axis == 2 {
                        measurement_noise_z
                    } else {
                        measurement_noise_xy
                    };
                    state.predict(process_noise, drift_compensation);
                    state.update(measurement[axis], noise, velocity_alpha);
                }
                Vector3::new(axes[0].estimate, axes[1].estimate, axes[2].estimate)
            })
            .collect();

        LandmarkSet::from_points(points)
    }

    pub fn reset(&mut self) {
        self.states.clear();
    }

    pub fn is_reset(&self) -> bool {
        self.states.is_empty()
    }

    pub fn axis(&self, landmark: usize, axis: usize) -> Option<&AxisFilter> {
        self.states.get(landmark).and_then(|axes| axes.get(axis))
    }
}

/// Chooses between stability and responsiveness from frame-to-frame motion.
#[derive(Debug, Clone)]
pub struct MotionBlender {
    config: BlenderConfig,
    last_input: Option<LandmarkSet>,
    last_output: Option<LandmarkSet>,
    last_motion: f32,
}

impl MotionBlender {
    pub fn new(config: BlenderConfig) -> Self {
        Self {
            config,
            last_input: None,
            last_output: None,
            last_motion: 0.0,
        }
    }

    /// Mean displacement from the previous call's snapshot, scaled into [0,1].
    pub fn detect_motion(&mut self, filtered: &LandmarkSet) -> f32 {
        let motion = self
            .last_input
            .as_ref()
            .and_then(|previous| previous.mean_displacement(filtered))
            .map(|d| (d / self.config.motion_threshold).clamp(0.0, 1.0))
            .unwrap_or(0.0);
        self.last_input = Some(filtered.clone());
        self.last_motion = motion;
        motion
    }

    pub fn weight_for(&self, motion: f32) -> f32 {
        let motion = motion.clamp(0.0, 1.0);
        let w = self.config.still_weight + (self.config.moving_weight - self.config.still_weight) * motion;
        w.clamp(0.0, 1.0)
    }

    pub fn blend(&self, previous: &LandmarkSet, next: &LandmarkSet, motion: f32) -> LandmarkSet {
        previous
            .lerp(next, self.weight_for(motion))
            .unwrap_or_else(|| next.clone())
    }

    /// Motion detection plus blending against the previous output. The first
    /// call after construction or reset returns `filtered` unchanged.
    pub fn apply(&mut self, filtered: &LandmarkSet) -> (LandmarkSet, f32) {
        let motion = self.detect_motion(filtered);
        let blended = match &self.last_output {
            Some(previous) => self.blend(previous, filtered, motion),
            None => filtered.clone(),
        };
        self.last_output = Some(blended.clone());
        (blended, motion)
    }

    pub fn last_motion(&self) -> f32 {
        self.last_motion
    }

    pub fn reset(&mut self) {
        self.last_input = None;
        self.last_output = None;
        self.last_motion = 0.0;
    }

    pub fn is_reset(&self) -> bool {
        self.last_input.is_none() && self.last_output.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(x: f32, y: f32, z: f32) -> LandmarkSet {
        LandmarkSet::from_raw(&[[x, y, z]])
    }

    #[test]
    fn first_update_lands_near_measurement() {
        let mut filter = TemporalFilter::new(FilterConfig::default());
        let out = filter.update(&single(0.4, 0.6, -0.05));
        let p = out.get(0).unwrap();
        assert!((p.x - 0.4).abs() < 1e-3);
        assert!((p.y - 0.6).abs() < 1e-3);
        assert_eq!(filter.axis(0, 0).unwrap().velocity, 0.0);
    }

    #[test]
    fn depth_axis_gains_less_than_image_axes() {
        let mut filter = TemporalFilter::new(FilterConfig::default());
        for _ in 0..50 {
            filter.update(&single(0.5, 0.5, 0.0));
        }
        let out = filter.update(&single(0.52, 0.5, 0.02));
        let p = out.get(0).unwrap();
        let x_step = p.x - 0.5;
        let z_step = p.z;
        assert!(x_step > z_step, "x moved {x_step}, z moved {z_step}");
    }

    #[test]
    fn reset_returns_to_empty_prior() {
        let mut filter = TemporalFilter::new(FilterConfig::default());
        filter.update(&single(0.1, 0.2, 0.3));
        assert!(!filter.is_reset());
        filter.reset();
        assert!(filter.is_reset());
        assert!(filter.axis(0, 0).is_none());
    }

    #[test]
    fn identical_inputs_give_identical_outputs() {
        let inputs: Vec<_> = (0..20).map(|i| single(0.3 + i as f32 * 0.004, 0.5, 0.0)).collect();
        let mut a = TemporalFilter::new(FilterConfig::default());
        let mut b = TemporalFilter::new(FilterConfig::default());
        for input in &inputs {
            assert_eq!(a.update(input), b.update(input));
        }
    }

    #[test]
    fn blender_bootstraps_with_input_unchanged() {
        let mut blender = MotionBlender::new(BlenderConfig::default());
        let input = single(0.25, 0.75, 0.0);
        let (out, motion) = blender.apply(&input);
        assert_eq!(out, input);
        assert_eq!(motion, 0.0);
    }

    #[test]
    fn motion_saturates_above_threshold() {
        let mut blender = MotionBlender::new(BlenderConfig::default());
        blender.detect_motion(&single(0.5, 0.5, 0.0));
        let small = blender.detect_motion(&single(0.5025, 0.5, 0.0));
        assert!((small - 0.25).abs() < 1e-3, "got {small}");
        let large = blender.detect_motion(&single(0.7, 0.5, 0.0));
        assert_eq!(large, 1.0);
    }

    #[test]
    fn blend_weight_favours_stability_when_still() {
        let blender = MotionBlender::new(BlenderConfig::default());
        assert!((blender.weight_for(0.0) - 0.3).abs() < 1e-6);
        assert!((blender.weight_for(1.0) - 0.7).abs() < 1e-6);
        assert!((blender.weight_for(5.0) - 0.7).abs() < 1e-6);

        let prev = single(0.0, 0.0, 0.0);
        let next = single(1.0, 0.0, 0.0);
        let still = blender.blend(&prev, &next, 0.0).get(0).unwrap().x;
        let moving = blender.blend(&prev, &next, 1.0).get(0).unwrap().x;
        assert!(still < moving);
    }
}
