//! Swarm coordination: population stepping, neighbor lookup, and β-mixing.
//!
//! The coordinator owns the agent array together with a parallel position
//! cache that backs the spatial index. One call to
//! [`SwarmCoordinator::update_all`] is an atomic step: every agent advances
//! against the shared saliency map (in parallel, each touching only its
//! own state), positions are re-synced, and the haze fields are mixed with
//! strength β:
//!
//! `h_eff,i = (1 - β)·h_i + β·⟨h_j⟩ over the k nearest neighbors of i`
//!
//! Mixing is two-phase: every neighborhood mean is computed from pre-mix
//! snapshots before any field is overwritten.

use crate::agent::Agent;
use crate::constants::{SWARM_SEED, WORLD_SIZE};
use crate::field::{PolarField, SpmBundle};
use crate::{AgentState, Vec2};
use hazeswarm_index::{NeighborQuery, TorusKnnIndex};
use rand::{Rng, SeedableRng, rngs::SmallRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur when constructing a swarm.
#[derive(Debug, Error)]
pub enum SwarmError {
    /// Indicates an invalid configuration value.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Static configuration for a swarm.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SwarmConfig {
    /// Population size.
    pub n_agents: usize,
    /// Belief-mixing strength in [0, 1].
    pub beta: f64,
    /// Target neighbor count for mixing.
    pub k: usize,
    /// Side length of the toroidal world used for neighbor ranking.
    pub world_size: f64,
}

impl Default for SwarmConfig {
    fn default() -> Self {
        Self {
            n_agents: 50,
            beta: 0.1,
            k: 6,
            world_size: WORLD_SIZE,
        }
    }
}

impl SwarmConfig {
    /// Validate the configuration for fail-fast construction.
    pub fn validate(&self) -> Result<(), SwarmError> {
        if self.n_agents == 0 {
            return Err(SwarmError::InvalidConfig("n_agents must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.beta) {
            return Err(SwarmError::InvalidConfig("beta must lie in [0, 1]"));
        }
        if self.k == 0 {
            return Err(SwarmError::InvalidConfig("k must be at least 1"));
        }
        if self.world_size <= 0.0 {
            return Err(SwarmError::InvalidConfig("world_size must be positive"));
        }
        Ok(())
    }
}

/// Coordinates a fixed population of agents and applies β-mixing.
#[derive(Debug)]
pub struct SwarmCoordinator {
    config: SwarmConfig,
    agents: Vec<Agent>,
    positions: Vec<Vec2>,
    index: TorusKnnIndex,
    index_dirty: bool,
    steps: u64,
}

impl SwarmCoordinator {
    /// Construct a swarm of `n_agents` with mixing strength `beta` and
    /// neighbor count `k`, using the default world size.
    ///
    /// Initialization is deterministic: the RNG is seeded with the
    /// contractual seed 42, positions are uniform in [-10, 10]², and
    /// speeds are uniform in [0.3, 1.0] along uniform random headings.
    /// Identical arguments always yield bit-identical swarms.
    #[must_use]
    pub fn new(n_agents: usize, beta: f64, k: usize) -> Self {
        Self::build(SwarmConfig {
            n_agents,
            beta,
            k,
            ..SwarmConfig::default()
        })
    }

    /// Construct from a validated configuration.
    pub fn from_config(config: SwarmConfig) -> Result<Self, SwarmError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SwarmConfig) -> Self {
        let mut rng = SmallRng::seed_from_u64(SWARM_SEED);
        let half_world = config.world_size / 2.0;
        let mut agents = Vec::with_capacity(config.n_agents);
        let mut positions = Vec::with_capacity(config.n_agents);

        for _ in 0..config.n_agents {
            let position = Vec2::new(
                rng.random_range(-half_world..half_world),
                rng.random_range(-half_world..half_world),
            );
            // Random heading breaks the initial symmetry.
            let speed = rng.random_range(0.3..1.0);
            let heading = rng.random_range(0.0..std::f64::consts::TAU);
            let velocity = Vec2::new(speed * heading.cos(), speed * heading.sin());

            let state = AgentState {
                position,
                velocity,
                ..AgentState::default()
            };
            agents.push(Agent::new(state, 1.0));
            positions.push(position);
        }

        let index = TorusKnnIndex::new(config.world_size);
        Self {
            config,
            agents,
            positions,
            index,
            index_dirty: true,
            steps: 0,
        }
    }

    /// Replace the mixing strength. Callers keep β inside [0, 1].
    pub fn set_beta(&mut self, beta: f64) {
        self.config.beta = beta;
    }

    /// Current mixing strength.
    #[must_use]
    pub fn get_beta(&self) -> f64 {
        self.config.beta
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &SwarmConfig {
        &self.config
    }

    /// Number of agents.
    #[must_use]
    pub fn size(&self) -> usize {
        self.agents.len()
    }

    /// Steps executed since construction.
    #[must_use]
    pub const fn steps(&self) -> u64 {
        self.steps
    }

    /// Borrow an agent. Panics when `i` is out of range.
    #[must_use]
    pub fn agent(&self, i: usize) -> &Agent {
        &self.agents[i]
    }

    /// Mutably borrow an agent. Panics when `i` is out of range.
    /// Position changes must go through [`Self::update_position`] so the
    /// index cache stays coherent.
    #[must_use]
    pub fn agent_mut(&mut self, i: usize) -> &mut Agent {
        &mut self.agents[i]
    }

    /// Owned snapshot of every agent's haze field, in agent order.
    #[must_use]
    pub fn all_haze_fields(&self) -> Vec<PolarField> {
        self.agents.iter().map(|agent| agent.haze().clone()).collect()
    }

    /// Override an agent's position and mark the spatial index stale.
    pub fn update_position(&mut self, i: usize, new_position: Vec2) {
        if i < self.agents.len() {
            self.agents[i].set_position(new_position);
            self.positions[i] = new_position;
            self.index_dirty = true;
        }
    }

    /// Advance every agent by `dt` against the shared saliency map, then
    /// apply β-mixing.
    ///
    /// Per-agent updates run in parallel; each reads only its own state
    /// and the immutable bundle. The position re-sync and the mixing pass
    /// are barriers: no agent observes another's post-mixing haze until
    /// all updates have finished.
    pub fn update_all(&mut self, spm: &SpmBundle, dt: f64) {
        if self.agents.is_empty() {
            return;
        }

        self.agents
            .par_iter_mut()
            .for_each(|agent| agent.update(spm, dt));

        for (cached, agent) in self.positions.iter_mut().zip(&self.agents) {
            *cached = agent.state().position;
        }
        self.index_dirty = true;
        self.steps += 1;

        self.apply_mixing();
    }

    /// Up-to-`k` nearest neighbors of agent `i`, closest first under the
    /// torus metric. Rebuilds the spatial index when positions changed
    /// since the last query. Returns owned indices.
    pub fn neighbors(&mut self, i: usize) -> Vec<usize> {
        if i >= self.agents.len() {
            return Vec::new();
        }
        self.refresh_index();
        self.index.k_nearest(i, self.config.k)
    }

    /// Mix every agent's haze with its neighborhood mean at strength β.
    ///
    /// Two-phase: all neighborhood means are collected from pre-mixing
    /// snapshots, then the convex combinations are written back through
    /// the stop-gradient injection. Agents without neighbors keep their
    /// haze unchanged, and β = 0 is exactly the identity.
    pub fn apply_mixing(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        self.refresh_index();

        let k = self.config.k;
        let averages: Vec<Option<PolarField>> = (0..self.agents.len())
            .map(|i| {
                let neighbors = self.index.k_nearest(i, k);
                if neighbors.is_empty() {
                    return None;
                }
                let inv_count = 1.0 / neighbors.len() as f64;
                Some(PolarField::from_fn(|a, b| {
                    neighbors
                        .iter()
                        .map(|&j| self.agents[j].haze().get(a, b))
                        .sum::<f64>()
                        * inv_count
                }))
            })
            .collect();

        let beta = self.config.beta;
        for (agent, average) in self.agents.iter_mut().zip(averages) {
            if let Some(average) = average {
                let h_eff = agent.haze().blend(&average, beta);
                agent.set_effective_haze(h_eff);
            }
        }
    }

    /// Mean haze level across the population.
    #[must_use]
    pub fn mean_haze(&self) -> f64 {
        self.population_mean(|agent| agent.haze().mean())
    }

    /// Mean speed across the population.
    #[must_use]
    pub fn mean_speed(&self) -> f64 {
        self.population_mean(|agent| agent.state().velocity.norm())
    }

    /// Mean fatigue across the population.
    #[must_use]
    pub fn mean_fatigue(&self) -> f64 {
        self.population_mean(|agent| agent.state().fatigue)
    }

    fn population_mean(&self, f: impl Fn(&Agent) -> f64) -> f64 {
        if self.agents.is_empty() {
            return 0.0;
        }
        self.agents.iter().map(f).sum::<f64>() / self.agents.len() as f64
    }

    /// Rebuild the spatial index when stale. A rebuild failure (only
    /// possible with non-finite positions, a correctness bug upstream)
    /// leaves the dirty flag set.
    fn refresh_index(&mut self) {
        if !self.index_dirty {
            return;
        }
        let pairs: Vec<(f64, f64)> = self.positions.iter().map(|p| (p.x, p.y)).collect();
        if self.index.rebuild(&pairs).is_ok() {
            self.index_dirty = false;
        }
    }
}
