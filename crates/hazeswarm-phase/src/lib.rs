//! Phase-transition analysis for belief-mixing swarms.
//!
//! Sweeping the mixing strength β reveals a continuous transition in the
//! order parameter φ (the population spread of per-agent mean haze) with a
//! susceptibility peak χ near the critical point. This crate provides the
//! pure statistics over haze snapshots, the critical-point detector, the
//! CSV export boundary, and the sweep driver that runs a fresh swarm per β
//! through equilibration and measurement phases.

pub mod analyzer;
pub mod sweep;

pub use analyzer::{
    PhaseError, compute_chi, compute_phi, export_csv, find_beta_c, mean, stddev,
};
pub use sweep::{SwarmObservables, SweepConfig, SweepSample, run_beta_sweep};
