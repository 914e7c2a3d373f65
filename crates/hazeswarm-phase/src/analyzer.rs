//! Pure statistics over haze snapshots and φ time series.

use hazeswarm_core::PolarField;
use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Errors raised by the analysis functions.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhaseError {
    /// Parallel input sequences differ in length.
    #[error("parallel sequences must have the same length")]
    LengthMismatch,
    /// Too few samples for the requested estimate.
    #[error("need at least 3 data points for slope estimation")]
    TooFewSamples,
    /// A sweep configuration value cannot be used.
    #[error("invalid sweep configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Order parameter φ: mean absolute deviation of the per-agent mean haze
/// from the population mean. Zero for an empty population.
#[must_use]
pub fn compute_phi(haze_fields: &[PolarField]) -> f64 {
    if haze_fields.is_empty() {
        return 0.0;
    }
    let n = haze_fields.len() as f64;
    let agent_means: Vec<f64> = haze_fields.iter().map(PolarField::mean).collect();
    let population_mean = agent_means.iter().sum::<f64>() / n;
    agent_means
        .iter()
        .map(|m| (m - population_mean).abs())
        .sum::<f64>()
        / n
}

/// Susceptibility χ = M·(⟨φ²⟩ - ⟨φ⟩²) over M φ-samples.
///
/// The scaling factor is the sample count, not the agent count: χ measures
/// temporal fluctuation and grows with the measurement-series length by
/// construction, so comparisons must use a consistent M. Zero for M < 2.
#[must_use]
pub fn compute_chi(phi_samples: &[f64]) -> f64 {
    if phi_samples.len() < 2 {
        return 0.0;
    }
    let m = phi_samples.len() as f64;
    let mean_phi = phi_samples.iter().sum::<f64>() / m;
    let mean_phi_sq = phi_samples.iter().map(|phi| phi * phi).sum::<f64>() / m;
    m * (mean_phi_sq - mean_phi * mean_phi)
}

/// Critical point β_c: the β at which the central-difference slope dφ/dβ
/// is largest. Ties resolve to the smallest β. Slope intervals with a
/// vanishing β-denominator contribute slope 0.
pub fn find_beta_c(betas: &[f64], phis: &[f64]) -> Result<f64, PhaseError> {
    if betas.len() != phis.len() {
        return Err(PhaseError::LengthMismatch);
    }
    if betas.len() < 3 {
        return Err(PhaseError::TooFewSamples);
    }

    let mut best_index = 1;
    let mut best_slope = f64::NEG_INFINITY;
    for i in 1..betas.len() - 1 {
        let d_beta = betas[i + 1] - betas[i - 1];
        let slope = if d_beta > 1e-12 {
            (phis[i + 1] - phis[i - 1]) / d_beta
        } else {
            0.0
        };
        if slope > best_slope {
            best_slope = slope;
            best_index = i;
        }
    }
    Ok(betas[best_index])
}

/// Arithmetic mean; 0 for an empty slice.
#[must_use]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Unbiased standard deviation (divisor M - 1); 0 for fewer than 2 samples.
#[must_use]
pub fn stddev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>()
        / (values.len() - 1) as f64;
    variance.sqrt()
}

/// Write sweep results as `beta,phi,chi` CSV with six fractional digits
/// and LF line endings.
///
/// Length-mismatched inputs are an error with no file touched. Empty
/// input and I/O failures return `Ok(false)`; the caller owns the
/// diagnostic.
pub fn export_csv(
    path: impl AsRef<Path>,
    betas: &[f64],
    phis: &[f64],
    chis: &[f64],
) -> Result<bool, PhaseError> {
    if betas.len() != phis.len() || betas.len() != chis.len() {
        return Err(PhaseError::LengthMismatch);
    }
    if betas.is_empty() {
        return Ok(false);
    }

    let Ok(file) = File::create(path) else {
        return Ok(false);
    };
    let mut writer = csv::Writer::from_writer(file);
    if writer.write_record(["beta", "phi", "chi"]).is_err() {
        return Ok(false);
    }
    for i in 0..betas.len() {
        let record = [
            format!("{:.6}", betas[i]),
            format!("{:.6}", phis[i]),
            format!("{:.6}", chis[i]),
        ];
        if writer.write_record(&record).is_err() {
            return Ok(false);
        }
    }
    Ok(writer.flush().is_ok())
}
