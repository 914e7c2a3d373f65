//! Polar attention fields and the per-agent channel bundle.
//!
//! A [`PolarField`] is a dense 12×12 grid over `(a, b)` where `a` indexes
//! the angular (θ) axis and `b` the radial (r) axis. The θ axis is
//! periodic (bin 0 and bin 11 are adjacent); the r axis carries Neumann
//! zero-flux boundaries. The finite-difference operators below encode
//! those boundary rules exactly; widening or one-siding the edge stencils
//! would change the phase-transition calibration.

use crate::constants::{DELTA_THETA, N_CHANNELS, N_R, N_THETA};
use crate::math::{clamp_index, wrap_index};
use serde::{Deserialize, Serialize};

/// Dense 12×12 scalar field over (θ-bin, r-bin).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolarField {
    cells: [[f64; N_R]; N_THETA],
}

impl Default for PolarField {
    fn default() -> Self {
        Self::zeros()
    }
}

impl PolarField {
    /// Zero-filled field.
    #[must_use]
    pub const fn zeros() -> Self {
        Self {
            cells: [[0.0; N_R]; N_THETA],
        }
    }

    /// Field with every cell set to `value`.
    #[must_use]
    pub const fn constant(value: f64) -> Self {
        Self {
            cells: [[value; N_R]; N_THETA],
        }
    }

    /// Build a field cell-by-cell from `(a, b)` indices.
    #[must_use]
    pub fn from_fn(mut f: impl FnMut(usize, usize) -> f64) -> Self {
        let mut field = Self::zeros();
        for a in 0..N_THETA {
            for b in 0..N_R {
                field.cells[a][b] = f(a, b);
            }
        }
        field
    }

    /// Value at `(a, b)`. Panics when an index is out of range.
    #[inline]
    #[must_use]
    pub fn get(&self, a: usize, b: usize) -> f64 {
        self.cells[a][b]
    }

    /// Overwrite the value at `(a, b)`.
    #[inline]
    pub fn set(&mut self, a: usize, b: usize, value: f64) {
        self.cells[a][b] = value;
    }

    /// Iterate all 144 cell values in row-major (θ outer) order.
    pub fn values(&self) -> impl Iterator<Item = f64> + '_ {
        self.cells.iter().flat_map(|row| row.iter().copied())
    }

    /// Arithmetic mean over all cells.
    #[must_use]
    pub fn mean(&self) -> f64 {
        self.sum() / (N_THETA * N_R) as f64
    }

    /// Sum over all cells.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.values().sum()
    }

    /// Elementwise transform.
    #[must_use]
    pub fn map(&self, mut f: impl FnMut(f64) -> f64) -> Self {
        Self::from_fn(|a, b| f(self.cells[a][b]))
    }

    /// Convex combination `(1 - t)·self + t·other`. At `t = 0` this is the
    /// exact identity on `self`.
    #[must_use]
    pub fn blend(&self, other: &Self, t: f64) -> Self {
        Self::from_fn(|a, b| (1.0 - t) * self.cells[a][b] + t * other.cells[a][b])
    }

    /// Largest absolute per-cell difference to `other`.
    #[must_use]
    pub fn max_abs_diff(&self, other: &Self) -> f64 {
        self.values()
            .zip(other.values())
            .map(|(lhs, rhs)| (lhs - rhs).abs())
            .fold(0.0, f64::max)
    }

    /// Central-difference θ-gradient with periodic wrap.
    ///
    /// `grad[a][b] = (field[a+1][b] - field[a-1][b]) / (2·Δθ)` with the
    /// `a ± 1` indices wrapped modulo 12.
    #[must_use]
    pub fn grad_theta(&self) -> Self {
        Self::from_fn(|a, b| {
            let plus = self.cells[wrap_index(a as isize + 1, N_THETA)][b];
            let minus = self.cells[wrap_index(a as isize - 1, N_THETA)][b];
            (plus - minus) / (2.0 * DELTA_THETA)
        })
    }

    /// Central-difference r-gradient with Neumann boundaries.
    ///
    /// Edge rows (`b = 0` and `b = 11`) are exactly zero; interior rows use
    /// `(field[a][b+1] - field[a][b-1]) / 2`. Radial indices double as the
    /// spatial coordinate, so the divisor carries no Δr factor.
    #[must_use]
    pub fn grad_r(&self) -> Self {
        Self::from_fn(|a, b| {
            if b == 0 || b == N_R - 1 {
                0.0
            } else {
                (self.cells[a][b + 1] - self.cells[a][b - 1]) / 2.0
            }
        })
    }

    /// Elementwise gradient magnitude `sqrt(grad_θ² + grad_r²)`.
    #[must_use]
    pub fn grad_magnitude(&self) -> Self {
        let grad_theta = self.grad_theta();
        let grad_r = self.grad_r();
        Self::from_fn(|a, b| grad_theta.cells[a][b].hypot(grad_r.cells[a][b]))
    }
}

/// Closed set of channel tags in a saliency polar map.
///
/// The discriminants are the wire positions of each channel and must not
/// be reordered. Only `R1`, `F2`, `F4`, and `F5` are read by the kernel;
/// the remainder exist for boundary compatibility with external producers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Observed occupancy (supervision signal).
    T0 = 0,
    /// Occupancy delta at +1 step.
    R0 = 1,
    /// Uncertainty.
    R1 = 2,
    /// Current occupancy.
    F0 = 3,
    /// Motion pressure.
    F1 = 4,
    /// Saliency.
    F2 = 5,
    /// Time-to-contact proxy.
    F3 = 6,
    /// Visibility.
    F4 = 7,
    /// Observation stability.
    F5 = 8,
    /// Haze mirror.
    M0 = 9,
}

impl Channel {
    /// All channels in wire order.
    pub const ALL: [Self; N_CHANNELS] = [
        Self::T0,
        Self::R0,
        Self::R1,
        Self::F0,
        Self::F1,
        Self::F2,
        Self::F3,
        Self::F4,
        Self::F5,
        Self::M0,
    ];

    /// Stable position of this channel in the bundle.
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

/// An agent's full polar view: ten named channels, one [`PolarField`] each.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SpmBundle {
    channels: [PolarField; N_CHANNELS],
}

impl SpmBundle {
    /// Bundle with all channels zeroed.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Borrow a channel's field.
    #[must_use]
    pub fn get(&self, channel: Channel) -> &PolarField {
        &self.channels[channel.index()]
    }

    /// Replace a channel's field.
    pub fn set(&mut self, channel: Channel, field: PolarField) {
        self.channels[channel.index()] = field;
    }

    /// Zero every channel.
    pub fn zero_all(&mut self) {
        for channel in &mut self.channels {
            *channel = PolarField::zeros();
        }
    }

    /// θ-gradient of a channel.
    #[must_use]
    pub fn grad_theta(&self, channel: Channel) -> PolarField {
        self.get(channel).grad_theta()
    }

    /// r-gradient of a channel.
    #[must_use]
    pub fn grad_r(&self, channel: Channel) -> PolarField {
        self.get(channel).grad_r()
    }

    /// Gradient magnitude of a channel.
    #[must_use]
    pub fn grad_magnitude(&self, channel: Channel) -> PolarField {
        self.get(channel).grad_magnitude()
    }
}
