//! Core types shared across the hazeswarm workspace.
//!
//! The kernel simulates a population of agents that each maintain a polar
//! attention field, infer a localized uncertainty field ("haze") from it,
//! and pick velocities by descending an expected-free-energy functional.
//! A coordinator steps the population and mixes each agent's haze with its
//! spatial neighbors at a configurable strength β.

use serde::{Deserialize, Serialize};

pub mod agent;
pub mod field;
pub mod swarm;

pub use agent::{ActionSelector, Agent, HazeEstimator};
pub use field::{Channel, PolarField, SpmBundle};
pub use swarm::{SwarmConfig, SwarmCoordinator, SwarmError};

/// Numerical constants of the simulation contract.
///
/// The action-selection and haze-estimation values are calibration
/// constants: changing any of them shifts the location and sharpness of
/// the β phase transition.
pub mod constants {
    /// Number of channels in an agent's saliency polar map.
    pub const N_CHANNELS: usize = 10;
    /// Angular bins per polar field.
    pub const N_THETA: usize = 12;
    /// Radial bins per polar field.
    pub const N_R: usize = 12;
    /// Angular bin width in radians.
    pub const DELTA_THETA: f64 = std::f64::consts::TAU / N_THETA as f64;

    /// Typical critical mixing strength observed in calibration sweeps.
    pub const BETA_C_TYPICAL: f64 = 0.098;

    /// Haze pre-activation weight on the prediction-error EMA.
    pub const HAZE_WEIGHT_ERROR: f64 = 0.4;
    /// Haze pre-activation weight on the uncertainty channel (R1).
    pub const HAZE_WEIGHT_UNCERTAINTY: f64 = 0.3;
    /// Haze pre-activation weight on inverted visibility (1 - F4).
    pub const HAZE_WEIGHT_OCCLUSION: f64 = 0.2;
    /// Haze pre-activation weight on observation instability (F5).
    pub const HAZE_WEIGHT_INSTABILITY: f64 = 0.1;

    /// Magnitude threshold below which a velocity counts as zero.
    pub const EPS: f64 = 1e-6;
    /// Sigmoid input clip, lower bound.
    pub const SIGMOID_CLIP_MIN: f64 = -10.0;
    /// Sigmoid input clip, upper bound.
    pub const SIGMOID_CLIP_MAX: f64 = 10.0;

    /// Minimum sustained speed of a moving agent.
    pub const V_MIN: f64 = 0.1;
    /// Maximum speed.
    pub const V_MAX: f64 = 2.0;
    /// Gradient-descent step for action selection (tuned, fixed).
    pub const LEARNING_RATE: f64 = 0.8;
    /// Fatigue accumulated per second of motion.
    pub const FATIGUE_RATE: f64 = 0.02;
    /// Fatigue recovered per second of rest. Half the accumulation rate.
    pub const RECOVERY_RATE: f64 = 0.01;
    /// Fatigue multiplier inside the pragmatic EFE term.
    pub const FATIGUE_COST_GAIN: f64 = 5.0;
    /// Central-difference step for the EFE velocity gradient.
    pub const GRADIENT_EPSILON: f64 = 1e-4;

    /// Side length of the toroidal world used for neighbor ranking.
    /// Initial positions are seeded inside [-WORLD_SIZE/2, WORLD_SIZE/2).
    pub const WORLD_SIZE: f64 = 20.0;
    /// Construction RNG seed. Part of the reproducibility contract.
    pub const SWARM_SEED: u64 = 42;
}

/// Scalar math helpers used throughout the kernel.
pub mod math {
    use super::constants::{SIGMOID_CLIP_MAX, SIGMOID_CLIP_MIN};

    /// Normalize an angle into [-π, π).
    #[must_use]
    pub fn wrap_angle(angle: f64) -> f64 {
        let mut wrapped = (angle + std::f64::consts::PI) % std::f64::consts::TAU;
        if wrapped < 0.0 {
            wrapped += std::f64::consts::TAU;
        }
        wrapped - std::f64::consts::PI
    }

    /// Wrap a grid index periodically. Correct for negative dividends,
    /// which the `%` operator alone is not.
    #[must_use]
    pub const fn wrap_index(index: isize, len: usize) -> usize {
        let len = len as isize;
        let rem = index % len;
        if rem < 0 {
            (rem + len) as usize
        } else {
            rem as usize
        }
    }

    /// Clamp a grid index to [0, len).
    #[must_use]
    pub const fn clamp_index(index: isize, len: usize) -> usize {
        if index < 0 {
            0
        } else if index >= len as isize {
            len - 1
        } else {
            index as usize
        }
    }

    /// Numerically safe logistic function. Inputs are clipped to ±10
    /// before exponentiation so extreme pre-activations cannot overflow.
    #[must_use]
    pub fn sigmoid(x: f64) -> f64 {
        let x = x.clamp(SIGMOID_CLIP_MIN, SIGMOID_CLIP_MAX);
        1.0 / (1.0 + (-x).exp())
    }
}

/// Axis-aligned 2D vector used for positions and velocities.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    /// The zero vector.
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    /// Construct a new vector.
    #[must_use]
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean magnitude.
    #[must_use]
    pub fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }

    /// Whether both components are finite.
    #[must_use]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl std::ops::Mul<f64> for Vec2 {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

/// Pose and physiology of a single agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AgentState {
    /// World position. Integration never wraps; only neighbor ranking
    /// applies the torus metric.
    pub position: Vec2,
    /// Current velocity.
    pub velocity: Vec2,
    /// Haze sensitivity, expected in [0.3, 1.5].
    pub kappa: f64,
    /// Fatigue level in [0, 1].
    pub fatigue: f64,
}

impl AgentState {
    /// Construct a fully specified state.
    #[must_use]
    pub const fn new(position: Vec2, velocity: Vec2, kappa: f64, fatigue: f64) -> Self {
        Self {
            position,
            velocity,
            kappa,
            fatigue,
        }
    }
}

impl Default for AgentState {
    fn default() -> Self {
        Self {
            position: Vec2::ZERO,
            velocity: Vec2::ZERO,
            kappa: 1.0,
            fatigue: 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn wrap_angle_maps_into_half_open_pi_range() {
        assert_relative_eq!(math::wrap_angle(0.0), 0.0);
        assert_relative_eq!(math::wrap_angle(std::f64::consts::TAU), 0.0);
        assert_relative_eq!(math::wrap_angle(std::f64::consts::PI), -std::f64::consts::PI);
        assert_relative_eq!(
            math::wrap_angle(-3.0 * std::f64::consts::PI / 2.0),
            std::f64::consts::FRAC_PI_2
        );
    }

    #[test]
    fn wrap_index_handles_negative_dividends() {
        assert_eq!(math::wrap_index(-1, 12), 11);
        assert_eq!(math::wrap_index(-13, 12), 11);
        assert_eq!(math::wrap_index(12, 12), 0);
        assert_eq!(math::wrap_index(5, 12), 5);
    }

    #[test]
    fn clamp_index_saturates_at_both_ends() {
        assert_eq!(math::clamp_index(-3, 12), 0);
        assert_eq!(math::clamp_index(12, 12), 11);
        assert_eq!(math::clamp_index(7, 12), 7);
    }

    #[test]
    fn sigmoid_is_bounded_and_centered() {
        assert_relative_eq!(math::sigmoid(0.0), 0.5);
        assert!(math::sigmoid(1e9) <= 1.0);
        assert!(math::sigmoid(-1e9) >= 0.0);
        assert!(math::sigmoid(f64::MAX).is_finite());
    }

    #[test]
    fn vec2_arithmetic_and_norm() {
        let v = Vec2::new(3.0, 4.0);
        assert_relative_eq!(v.norm(), 5.0);
        let sum = v + Vec2::new(-3.0, -4.0);
        assert_relative_eq!(sum.norm(), 0.0);
        let scaled = v * 0.5;
        assert_relative_eq!(scaled.x, 1.5);
        assert_relative_eq!(scaled.y, 2.0);
    }

    #[test]
    fn agent_state_defaults_to_unit_kappa() {
        let state = AgentState::default();
        assert_eq!(state.position, Vec2::ZERO);
        assert_eq!(state.velocity, Vec2::ZERO);
        assert_relative_eq!(state.kappa, 1.0);
        assert_relative_eq!(state.fatigue, 0.0);
    }
}
