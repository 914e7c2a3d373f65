//! β-sweep driver and the observables snapshot for external consumers.

use crate::analyzer::{PhaseError, compute_chi, compute_phi, mean};
use hazeswarm_core::{PolarField, SpmBundle, SwarmCoordinator};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Parameters of one β-sweep experiment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SweepConfig {
    /// Population size per sweep point.
    pub n_agents: usize,
    /// Neighbor count for mixing.
    pub k: usize,
    /// Mixing strengths to visit, in order.
    pub betas: Vec<f64>,
    /// Equilibration steps before sampling starts.
    pub warmup_steps: usize,
    /// Steps during which φ is sampled.
    pub measure_steps: usize,
    /// Integration timestep in seconds.
    pub dt: f64,
    /// Seed for the reproducible non-uniform initial haze.
    pub haze_seed: u64,
    /// Range the per-agent initial haze levels are drawn from.
    pub haze_range: (f64, f64),
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self {
            n_agents: 50,
            k: 6,
            betas: (0..=30).map(|i| f64::from(i) * 0.01).collect(),
            warmup_steps: 100,
            measure_steps: 50,
            dt: 0.1,
            haze_seed: 123,
            haze_range: (0.2, 0.8),
        }
    }
}

impl SweepConfig {
    fn validate(&self) -> Result<(), PhaseError> {
        if self.n_agents == 0 {
            return Err(PhaseError::InvalidConfig("n_agents must be at least 1"));
        }
        if self.betas.is_empty() {
            return Err(PhaseError::InvalidConfig("betas must not be empty"));
        }
        if self.betas.iter().any(|beta| !(0.0..=1.0).contains(beta)) {
            return Err(PhaseError::InvalidConfig("betas must lie in [0, 1]"));
        }
        if self.measure_steps == 0 {
            return Err(PhaseError::InvalidConfig("measure_steps must be at least 1"));
        }
        if self.dt <= 0.0 {
            return Err(PhaseError::InvalidConfig("dt must be positive"));
        }
        let (low, high) = self.haze_range;
        if !(0.0..=1.0).contains(&low) || !(0.0..=1.0).contains(&high) || low >= high {
            return Err(PhaseError::InvalidConfig(
                "haze_range must be an ascending subrange of [0, 1]",
            ));
        }
        Ok(())
    }
}

/// One sweep point: mixing strength, time-averaged order parameter, and
/// susceptibility over the measurement window.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SweepSample {
    pub beta: f64,
    pub phi_mean: f64,
    pub chi: f64,
}

/// Run the sweep: for each β, a fresh swarm is equilibrated and measured
/// against the shared saliency bundle.
///
/// Every sweep point starts from the same construction seed and the same
/// seeded initial haze disparity, so runs are reproducible end to end.
/// The loop aborts on the first configuration error.
pub fn run_beta_sweep(
    config: &SweepConfig,
    spm: &SpmBundle,
) -> Result<Vec<SweepSample>, PhaseError> {
    config.validate()?;

    let mut samples = Vec::with_capacity(config.betas.len());
    for &beta in &config.betas {
        let mut swarm = SwarmCoordinator::new(config.n_agents, beta, config.k);
        seed_initial_haze(&mut swarm, config);

        for _ in 0..config.warmup_steps {
            swarm.update_all(spm, config.dt);
        }
        debug!(beta, steps = config.warmup_steps, "equilibration complete");

        let mut phi_samples = Vec::with_capacity(config.measure_steps);
        for _ in 0..config.measure_steps {
            swarm.update_all(spm, config.dt);
            phi_samples.push(compute_phi(&swarm.all_haze_fields()));
        }

        let sample = SweepSample {
            beta,
            phi_mean: mean(&phi_samples),
            chi: compute_chi(&phi_samples),
        };
        info!(
            beta = sample.beta,
            phi = sample.phi_mean,
            chi = sample.chi,
            "beta sweep point"
        );
        samples.push(sample);
    }
    Ok(samples)
}

/// Give each agent a constant haze field at a level drawn from the
/// configured range. The disparity across agents is what the mixing
/// dynamics subsequently erode or sustain.
fn seed_initial_haze(swarm: &mut SwarmCoordinator, config: &SweepConfig) {
    let mut rng = SmallRng::seed_from_u64(config.haze_seed);
    let (low, high) = config.haze_range;
    for i in 0..swarm.size() {
        let level = rng.random_range(low..high);
        swarm
            .agent_mut(i)
            .set_effective_haze(PolarField::constant(level));
    }
}

/// Six-scalar state snapshot consumed by the external streaming boundary.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SwarmObservables {
    /// Instantaneous order parameter.
    pub phi: f64,
    /// Susceptibility over the caller's φ window.
    pub chi: f64,
    /// Current mixing strength.
    pub beta: f64,
    /// Population mean haze.
    pub mean_haze: f64,
    /// Population mean speed.
    pub mean_speed: f64,
    /// Population mean fatigue.
    pub mean_fatigue: f64,
}

impl SwarmObservables {
    /// Capture the current observables; `phi_samples` is the caller's
    /// measurement window for χ (empty windows yield χ = 0).
    #[must_use]
    pub fn capture(swarm: &SwarmCoordinator, phi_samples: &[f64]) -> Self {
        Self {
            phi: compute_phi(&swarm.all_haze_fields()),
            chi: compute_chi(phi_samples),
            beta: swarm.get_beta(),
            mean_haze: swarm.mean_haze(),
            mean_speed: swarm.mean_speed(),
            mean_fatigue: swarm.mean_fatigue(),
        }
    }
}
