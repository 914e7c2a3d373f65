//! Per-agent inference and action loop.
//!
//! Each tick an agent picks a velocity by descending the expected free
//! energy `G(v) = ⟨haze⟩·⟨|∇F2|⟩ + (1 + 5·fatigue)·|v|`, integrates its
//! pose, converts the resulting velocity surprise into a prediction error,
//! and re-infers its haze field from that error and the shared saliency
//! map. The loop closes through the haze estimate: surprise feeds haze,
//! haze feeds the epistemic drive of the next action.

use crate::constants::{
    EPS, FATIGUE_COST_GAIN, FATIGUE_RATE, GRADIENT_EPSILON, HAZE_WEIGHT_ERROR,
    HAZE_WEIGHT_INSTABILITY, HAZE_WEIGHT_OCCLUSION, HAZE_WEIGHT_UNCERTAINTY, LEARNING_RATE, N_R,
    N_THETA, RECOVERY_RATE, V_MAX, V_MIN,
};
use crate::field::{Channel, PolarField, SpmBundle};
use crate::math::{clamp_index, sigmoid, wrap_index};
use crate::{AgentState, Vec2};
use serde::{Deserialize, Serialize};

/// Infers the haze field from prediction error and the saliency map.
///
/// Combines an EMA of the scalar prediction error with the uncertainty,
/// visibility, and stability channels, squashes through a clipped sigmoid,
/// and smooths with a 3×3 Gaussian kernel. Single-owner state; the EMA is
/// only advanced through [`HazeEstimator::estimate`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HazeEstimator {
    tau: f64,
    ema_error: PolarField,
    initialized: bool,
}

impl Default for HazeEstimator {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl HazeEstimator {
    /// Create an estimator with EMA time constant `tau`.
    #[must_use]
    pub fn new(tau: f64) -> Self {
        Self {
            tau,
            ema_error: PolarField::zeros(),
            initialized: false,
        }
    }

    /// Produce a haze field from the bundle and a prediction error in [0, 1].
    ///
    /// The first call seeds the EMA with the raw error; later calls blend
    /// with weight `1/τ`. Output cells always lie in (0, 1).
    pub fn estimate(&mut self, spm: &SpmBundle, prediction_error: f64) -> PolarField {
        if self.initialized {
            let alpha = 1.0 / self.tau;
            let previous = self.ema_error.clone();
            self.ema_error = previous.map(|cell| alpha * prediction_error + (1.0 - alpha) * cell);
        } else {
            self.ema_error = PolarField::constant(prediction_error);
            self.initialized = true;
        }

        let r1 = spm.get(Channel::R1);
        let f4 = spm.get(Channel::F4);
        let f5 = spm.get(Channel::F5);
        let ema = &self.ema_error;

        let activated = PolarField::from_fn(|a, b| {
            let pre_activation = HAZE_WEIGHT_ERROR * ema.get(a, b)
                + HAZE_WEIGHT_UNCERTAINTY * r1.get(a, b)
                + HAZE_WEIGHT_OCCLUSION * (1.0 - f4.get(a, b))
                + HAZE_WEIGHT_INSTABILITY * f5.get(a, b);
            sigmoid(pre_activation)
        });

        Self::gaussian_blur(&activated)
    }

    /// Zero the EMA and forget initialization.
    pub fn reset(&mut self) {
        self.ema_error = PolarField::zeros();
        self.initialized = false;
    }

    /// 3×3 blur with weights 4 (center), 2 (edge-adjacent), 1 (diagonal).
    ///
    /// The θ axis wraps; the r axis clamps, so boundary taps re-sample the
    /// edge cell and the divisor stays the full 16-weight sum.
    fn gaussian_blur(input: &PolarField) -> PolarField {
        PolarField::from_fn(|a, b| {
            let mut sum = 0.0;
            let mut weight_sum = 0.0;
            for da in -1_isize..=1 {
                for db in -1_isize..=1 {
                    let na = wrap_index(a as isize + da, N_THETA);
                    let nb = clamp_index(b as isize + db, N_R);
                    let weight = if da == 0 && db == 0 {
                        4.0
                    } else if da == 0 || db == 0 {
                        2.0
                    } else {
                        1.0
                    };
                    sum += weight * input.get(na, nb);
                    weight_sum += weight;
                }
            }
            sum / weight_sum
        })
    }
}

/// Expected-free-energy action selection.
///
/// The epistemic term rewards motion policies evaluated under high haze
/// and strong saliency gradients; the pragmatic term charges speed,
/// scaled up fivefold at full fatigue. That 5× gain is a calibration
/// constant, not a free parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct ActionSelector;

impl ActionSelector {
    /// Expected free energy of moving at `velocity` under the given fields.
    #[must_use]
    pub fn compute_efe(velocity: Vec2, haze: &PolarField, spm: &SpmBundle, fatigue: f64) -> f64 {
        let epistemic = haze.mean() * spm.grad_magnitude(Channel::F2).mean();
        let pragmatic = (1.0 + FATIGUE_COST_GAIN * fatigue) * velocity.norm();
        epistemic + pragmatic
    }

    /// Central-difference velocity gradient of the EFE, step 1e-4 per axis.
    #[must_use]
    pub fn compute_efe_gradient(
        velocity: Vec2,
        haze: &PolarField,
        spm: &SpmBundle,
        fatigue: f64,
    ) -> Vec2 {
        let plus_x = Self::compute_efe(
            Vec2::new(velocity.x + GRADIENT_EPSILON, velocity.y),
            haze,
            spm,
            fatigue,
        );
        let minus_x = Self::compute_efe(
            Vec2::new(velocity.x - GRADIENT_EPSILON, velocity.y),
            haze,
            spm,
            fatigue,
        );
        let plus_y = Self::compute_efe(
            Vec2::new(velocity.x, velocity.y + GRADIENT_EPSILON),
            haze,
            spm,
            fatigue,
        );
        let minus_y = Self::compute_efe(
            Vec2::new(velocity.x, velocity.y - GRADIENT_EPSILON),
            haze,
            spm,
            fatigue,
        );
        Vec2::new(
            (plus_x - minus_x) / (2.0 * GRADIENT_EPSILON),
            (plus_y - minus_y) / (2.0 * GRADIENT_EPSILON),
        )
    }

    /// Project a proposed velocity onto the feasible set.
    ///
    /// Fatigue above 0.8 forces rest. A near-zero proposal restarts along
    /// the canonical heading at `V_MIN`. Otherwise the magnitude is clamped
    /// into [`V_MIN`, `V_MAX`] with the direction preserved.
    #[must_use]
    pub fn apply_constraints(velocity: Vec2, fatigue: f64) -> Vec2 {
        if fatigue > 0.8 {
            return Vec2::ZERO;
        }

        let magnitude = velocity.norm();
        if magnitude < EPS {
            return Vec2::new(V_MIN, 0.0);
        }

        let clamped = magnitude.clamp(V_MIN, V_MAX);
        velocity * (clamped / magnitude)
    }

    /// One gradient-descent step on the EFE followed by constraint
    /// projection. The resulting speed lies in {0} ∪ [`V_MIN`, `V_MAX`].
    #[must_use]
    pub fn select_action(
        current_velocity: Vec2,
        haze: &PolarField,
        spm: &SpmBundle,
        fatigue: f64,
    ) -> Vec2 {
        let gradient = Self::compute_efe_gradient(current_velocity, haze, spm, fatigue);
        let proposal = current_velocity - gradient * LEARNING_RATE;
        Self::apply_constraints(proposal, fatigue)
    }
}

/// A single swarm member: pose, haze field, and haze estimator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    state: AgentState,
    haze: PolarField,
    estimator: HazeEstimator,
}

impl Agent {
    /// Create an agent from an initial state; `kappa` overwrites the
    /// state's haze sensitivity.
    #[must_use]
    pub fn new(initial_state: AgentState, kappa: f64) -> Self {
        let mut state = initial_state;
        state.kappa = kappa;
        Self {
            state,
            haze: PolarField::zeros(),
            estimator: HazeEstimator::new(1.0),
        }
    }

    /// Advance the agent by `dt` seconds against the shared saliency map.
    ///
    /// Runs action selection, explicit-Euler pose integration (positions
    /// are never wrapped here), haze re-estimation from the velocity
    /// surprise, and the asymmetric fatigue dynamics: accumulation while
    /// moving runs at twice the recovery rate while resting.
    pub fn update(&mut self, spm: &SpmBundle, dt: f64) {
        let old_velocity = self.state.velocity;
        let new_velocity =
            ActionSelector::select_action(old_velocity, &self.haze, spm, self.state.fatigue);

        self.state.velocity = new_velocity;
        self.state.position = self.state.position + new_velocity * dt;

        let prediction_error = ((new_velocity - old_velocity).norm() / V_MAX).clamp(0.0, 1.0);
        self.haze = self.estimator.estimate(spm, prediction_error);

        let speed = new_velocity.norm();
        if speed > V_MIN {
            self.state.fatigue += FATIGUE_RATE * dt;
        } else {
            self.state.fatigue -= RECOVERY_RATE * dt;
        }
        self.state.fatigue = self.state.fatigue.clamp(0.0, 1.0);
    }

    /// Run the haze estimator directly and adopt its output.
    pub fn estimate_haze(&mut self, spm: &SpmBundle, prediction_error: f64) -> PolarField {
        self.haze = self.estimator.estimate(spm, prediction_error);
        self.haze.clone()
    }

    /// Current pose and physiology.
    #[must_use]
    pub fn state(&self) -> &AgentState {
        &self.state
    }

    /// Haze sensitivity.
    #[must_use]
    pub fn kappa(&self) -> f64 {
        self.state.kappa
    }

    /// Current haze field.
    #[must_use]
    pub fn haze(&self) -> &PolarField {
        &self.haze
    }

    /// Overwrite the position. Coordinator-level overrides must re-sync
    /// their position cache after calling this.
    pub fn set_position(&mut self, position: Vec2) {
        self.state.position = position;
    }

    /// Inject an externally mixed haze field.
    ///
    /// Stop-gradient: the estimator's EMA is left untouched, so mixing
    /// cannot contaminate the agent's own error statistics.
    pub fn set_effective_haze(&mut self, h_eff: PolarField) {
        self.haze = h_eff;
    }

    /// Zero the haze field and reset the estimator.
    pub fn reset_haze_estimator(&mut self) {
        self.estimator.reset();
        self.haze = PolarField::zeros();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};

    fn saliency_bundle(value: f64) -> SpmBundle {
        let mut bundle = SpmBundle::new();
        bundle.set(Channel::F2, PolarField::constant(value));
        bundle
    }

    #[test]
    fn estimator_output_stays_in_unit_range() {
        let mut estimator = HazeEstimator::new(1.0);
        let mut bundle = SpmBundle::new();
        bundle.set(Channel::R1, PolarField::constant(1.0));
        bundle.set(Channel::F4, PolarField::constant(0.0));
        bundle.set(Channel::F5, PolarField::constant(1.0));

        let haze = estimator.estimate(&bundle, 1.0);
        assert!(haze.values().all(|v| (0.0..=1.0).contains(&v)));
        assert!(haze.values().all(f64::is_finite));
    }

    #[test]
    fn estimator_is_deterministic_for_identical_inputs() {
        let bundle = saliency_bundle(0.5);
        let mut first = HazeEstimator::new(1.0);
        let mut second = HazeEstimator::new(1.0);
        assert_eq!(
            first.estimate(&bundle, 0.3),
            second.estimate(&bundle, 0.3)
        );
    }

    #[test]
    fn ema_blends_with_the_configured_time_constant() {
        let bundle = SpmBundle::new();
        let mut slow = HazeEstimator::new(2.0);
        let first = slow.estimate(&bundle, 1.0);
        // With τ=2 the second estimate sees ema = 0.5·0 + 0.5·1 = 0.5,
        // which must land strictly between the extremes.
        let second = slow.estimate(&bundle, 0.0);
        assert!(second.mean() < first.mean());

        let mut fresh = HazeEstimator::new(2.0);
        let zero_seeded = fresh.estimate(&bundle, 0.0);
        assert!(second.mean() > zero_seeded.mean());
    }

    #[test]
    fn reset_restores_first_call_semantics() {
        let bundle = saliency_bundle(0.4);
        let mut estimator = HazeEstimator::new(3.0);
        let baseline = estimator.estimate(&bundle, 0.7);

        estimator.estimate(&bundle, 0.1);
        estimator.reset();
        let after_reset = estimator.estimate(&bundle, 0.7);
        assert_relative_eq!(baseline.max_abs_diff(&after_reset), 0.0);
    }

    #[test]
    fn blur_spreads_a_spike_and_preserves_range() {
        // Feed a bundle whose activated field is (almost) a delta by using
        // extreme visibility contrast, then check smoothing qualitatively
        // through the estimator output.
        let mut bundle = SpmBundle::new();
        let mut visibility = PolarField::constant(1.0);
        visibility.set(5, 5, 0.0);
        bundle.set(Channel::F4, visibility);

        let mut estimator = HazeEstimator::new(1.0);
        let haze = estimator.estimate(&bundle, 0.0);

        // The occluded cell must read hazier than a far-away cell, but
        // less extreme than the unsmoothed sigmoid contrast.
        assert!(haze.get(5, 5) > haze.get(0, 0));
        let unsmoothed_peak = crate::math::sigmoid(HAZE_WEIGHT_OCCLUSION);
        assert!(haze.get(5, 5) < unsmoothed_peak);
        // Neighbors pick up part of the spike.
        assert!(haze.get(5, 6) > haze.get(0, 0));
    }

    #[test]
    fn sigmoid_saturation_keeps_estimates_finite() {
        let mut bundle = SpmBundle::new();
        for channel in Channel::ALL {
            bundle.set(channel, PolarField::constant(1.0));
        }
        let mut estimator = HazeEstimator::new(1.0);
        for _ in 0..50 {
            let haze = estimator.estimate(&bundle, 1.0);
            assert!(haze.values().all(f64::is_finite));
            assert!(haze.values().all(|v| (0.0..=1.0).contains(&v)));
        }
    }

    #[test]
    fn efe_grows_with_speed() {
        let haze = PolarField::constant(0.5);
        let spm = saliency_bundle(1.0);
        let low = ActionSelector::compute_efe(Vec2::new(0.5, 0.5), &haze, &spm, 0.0);
        let high = ActionSelector::compute_efe(Vec2::new(1.5, 1.5), &haze, &spm, 0.0);
        assert!(high > low);
    }

    #[test]
    fn efe_grows_with_fatigue() {
        let haze = PolarField::constant(0.5);
        let spm = saliency_bundle(1.0);
        let rested = ActionSelector::compute_efe(Vec2::new(1.0, 1.0), &haze, &spm, 0.0);
        let tired = ActionSelector::compute_efe(Vec2::new(1.0, 1.0), &haze, &spm, 0.8);
        assert!(tired > rested);
        assert_relative_eq!(
            tired - rested,
            FATIGUE_COST_GAIN * 0.8 * Vec2::new(1.0, 1.0).norm(),
            epsilon = 1e-12
        );
    }

    #[test]
    fn efe_grows_with_haze_over_a_sloped_map() {
        let mut spm = SpmBundle::new();
        spm.set(
            Channel::F2,
            PolarField::from_fn(|a, _| a as f64 / 11.0),
        );
        let v = Vec2::new(0.5, 0.5);
        let dim = ActionSelector::compute_efe(v, &PolarField::constant(0.1), &spm, 0.0);
        let hazy = ActionSelector::compute_efe(v, &PolarField::constant(0.9), &spm, 0.0);
        assert!(hazy > dim);
    }

    #[test]
    fn efe_gradient_is_finite_at_zero_velocity() {
        let haze = PolarField::constant(0.5);
        let spm = saliency_bundle(1.0);
        let grad = ActionSelector::compute_efe_gradient(Vec2::ZERO, &haze, &spm, 0.0);
        assert!(grad.is_finite());
    }

    #[test]
    fn efe_gradient_magnitude_is_symmetric_under_reflection() {
        let haze = PolarField::constant(0.5);
        let spm = saliency_bundle(1.0);
        let forward =
            ActionSelector::compute_efe_gradient(Vec2::new(1.0, 0.5), &haze, &spm, 0.0);
        let backward =
            ActionSelector::compute_efe_gradient(Vec2::new(-1.0, -0.5), &haze, &spm, 0.0);
        assert_abs_diff_eq!(forward.norm(), backward.norm(), epsilon = 1e-6);
    }

    #[test]
    fn constraints_force_rest_at_high_fatigue() {
        let constrained = ActionSelector::apply_constraints(Vec2::new(1.0, 1.0), 0.85);
        assert_eq!(constrained, Vec2::ZERO);
    }

    #[test]
    fn constraints_restart_near_zero_velocity() {
        let constrained = ActionSelector::apply_constraints(Vec2::new(1e-9, 0.0), 0.0);
        assert_eq!(constrained, Vec2::new(V_MIN, 0.0));
    }

    #[test]
    fn constraints_clamp_magnitude_and_keep_direction() {
        let fast = ActionSelector::apply_constraints(Vec2::new(3.0, 4.0), 0.0);
        assert_relative_eq!(fast.norm(), V_MAX, epsilon = 1e-12);
        assert_relative_eq!(fast.y / fast.x, 4.0 / 3.0, epsilon = 1e-12);

        let slow = ActionSelector::apply_constraints(Vec2::new(0.03, 0.04), 0.0);
        assert_relative_eq!(slow.norm(), V_MIN, epsilon = 1e-12);
        assert_relative_eq!(slow.y / slow.x, 4.0 / 3.0, epsilon = 1e-12);

        let in_range = ActionSelector::apply_constraints(Vec2::new(0.6, 0.8), 0.0);
        assert_relative_eq!(in_range.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn selected_actions_respect_the_speed_envelope() {
        let haze = PolarField::constant(0.5);
        let spm = saliency_bundle(1.0);
        let mut velocity = Vec2::new(0.7, -0.2);
        for _ in 0..32 {
            velocity = ActionSelector::select_action(velocity, &haze, &spm, 0.3);
            let speed = velocity.norm();
            assert!(speed >= V_MIN - 1e-9 && speed <= V_MAX + 1e-9);
        }
    }

    #[test]
    fn update_integrates_position_explicitly() {
        let mut agent = Agent::new(
            AgentState::new(Vec2::ZERO, Vec2::new(0.5, 0.0), 1.0, 0.0),
            1.0,
        );
        let spm = SpmBundle::new();
        agent.update(&spm, 0.1);

        let state = agent.state();
        assert_relative_eq!(
            state.position.x,
            state.velocity.x * 0.1,
            epsilon = 1e-12
        );
        assert_relative_eq!(
            state.position.y,
            state.velocity.y * 0.1,
            epsilon = 1e-12
        );
    }

    #[test]
    fn forced_rest_above_fatigue_threshold() {
        let mut agent = Agent::new(
            AgentState::new(Vec2::ZERO, Vec2::new(1.0, 1.0), 1.0, 0.85),
            1.0,
        );
        let spm = saliency_bundle(0.7);
        agent.update(&spm, 0.1);
        assert!(agent.state().velocity.norm() < V_MIN);
        assert_eq!(agent.state().velocity, Vec2::ZERO);
    }

    #[test]
    fn fatigue_accumulates_while_moving_and_recovers_at_rest() {
        let spm = SpmBundle::new();

        let mut mover = Agent::new(
            AgentState::new(Vec2::ZERO, Vec2::new(1.0, 0.0), 1.0, 0.5),
            1.0,
        );
        mover.update(&spm, 1.0);
        assert_relative_eq!(mover.state().fatigue, 0.5 + FATIGUE_RATE, epsilon = 1e-12);

        let mut rester = Agent::new(
            AgentState::new(Vec2::ZERO, Vec2::new(1.0, 0.0), 1.0, 0.9),
            1.0,
        );
        rester.update(&spm, 1.0);
        assert_relative_eq!(rester.state().fatigue, 0.9 - RECOVERY_RATE, epsilon = 1e-12);

        // Bounds hold at the extremes.
        let mut exhausted = Agent::new(
            AgentState::new(Vec2::ZERO, Vec2::ZERO, 1.0, 1.0),
            1.0,
        );
        exhausted.update(&spm, 100.0);
        assert!(exhausted.state().fatigue >= 0.0);
    }

    #[test]
    fn constructor_kappa_overrides_state_kappa() {
        let agent = Agent::new(
            AgentState::new(Vec2::ZERO, Vec2::ZERO, 0.3, 0.0),
            1.4,
        );
        assert_relative_eq!(agent.kappa(), 1.4);
    }

    #[test]
    fn effective_haze_injection_does_not_touch_the_estimator() {
        let spm = saliency_bundle(0.4);

        let mut plain = Agent::new(AgentState::default(), 1.0);
        plain.estimate_haze(&spm, 0.5);
        let continued = plain.estimate_haze(&spm, 0.2);

        let mut injected = Agent::new(AgentState::default(), 1.0);
        injected.estimate_haze(&spm, 0.5);
        injected.set_effective_haze(PolarField::constant(0.99));
        let after_injection = injected.estimate_haze(&spm, 0.2);

        assert_relative_eq!(continued.max_abs_diff(&after_injection), 0.0);
    }

    #[test]
    fn reset_haze_estimator_zeroes_the_field() {
        let spm = saliency_bundle(0.4);
        let mut agent = Agent::new(AgentState::default(), 1.0);
        agent.estimate_haze(&spm, 0.8);
        assert!(agent.haze().mean() > 0.0);

        agent.reset_haze_estimator();
        assert_relative_eq!(agent.haze().mean(), 0.0);
    }
}
