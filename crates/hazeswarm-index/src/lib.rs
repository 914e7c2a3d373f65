//! Toroidal-world metric helpers and spatial indexing for agent neighborhood
//! queries.
//!
//! The simulation world is a square torus of side `world_size`: positions
//! wrap on both axes, so the shortest path between two agents may cross a
//! boundary. The index keeps an R*-tree over the raw Cartesian coordinates
//! as a cheap pre-filter and re-ranks the candidate set under the torus
//! metric before answering a k-nearest-neighbor query.

use ordered_float::OrderedFloat;
use rstar::{AABB, PointDistance, RTree, RTreeObject};
use thiserror::Error;

/// Errors emitted by spatial index implementations.
#[derive(Debug, Error)]
pub enum IndexError {
    /// Indicates configuration values that cannot be used (e.g., non-positive world size).
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

/// Wrap a scalar coordinate into the half-open interval `[min, max)`.
#[must_use]
pub fn wrap_coordinate(x: f64, min: f64, max: f64) -> f64 {
    let size = max - min;
    let mut wrapped = (x - min) % size;
    if wrapped < 0.0 {
        wrapped += size;
    }
    wrapped + min
}

/// Wrap both components of a position into `[min, max)`.
#[must_use]
pub fn wrap_position(pos: (f64, f64), min: f64, max: f64) -> (f64, f64) {
    (
        wrap_coordinate(pos.0, min, max),
        wrap_coordinate(pos.1, min, max),
    )
}

/// Shortest distance between two points on a square torus of side `world_size`.
///
/// Each axis contributes the smaller of the direct separation and the
/// separation through the wrapped boundary; the result combines the two
/// axes Euclidean-style.
#[must_use]
pub fn torus_distance(a: (f64, f64), b: (f64, f64), world_size: f64) -> f64 {
    let mut dx = (a.0 - b.0).abs();
    let mut dy = (a.1 - b.1).abs();
    dx = dx.min(world_size - dx);
    dy = dy.min(world_size - dy);
    dx.hypot(dy)
}

/// Signed shortest displacement from `a` to `b` on the torus.
///
/// Picks, per axis, the representative of the displacement whose magnitude
/// does not exceed half the world size.
#[must_use]
pub fn torus_displacement(a: (f64, f64), b: (f64, f64), world_size: f64) -> (f64, f64) {
    let half = world_size / 2.0;
    let mut dx = b.0 - a.0;
    let mut dy = b.1 - a.1;
    if dx.abs() > half {
        dx += if dx > 0.0 { -world_size } else { world_size };
    }
    if dy.abs() > half {
        dy += if dy > 0.0 { -world_size } else { world_size };
    }
    (dx, dy)
}

/// Common behaviour exposed by neighborhood indices.
pub trait NeighborQuery {
    /// Rebuild internal structures from agent positions.
    fn rebuild(&mut self, positions: &[(f64, f64)]) -> Result<(), IndexError>;

    /// Indices of the up-to-`k` nearest agents to `agent_idx` under the
    /// torus metric, closest first. The queried agent itself is excluded.
    fn k_nearest(&self, agent_idx: usize, k: usize) -> Vec<usize>;
}

/// Tree entry carrying the agent slot alongside its coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
struct IndexedPoint {
    position: [f64; 2],
    index: usize,
}

impl RTreeObject for IndexedPoint {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point(self.position)
    }
}

impl PointDistance for IndexedPoint {
    fn distance_2(&self, point: &[f64; 2]) -> f64 {
        let dx = self.position[0] - point[0];
        let dy = self.position[1] - point[1];
        dx.mul_add(dx, dy * dy)
    }
}

/// R*-tree backed k-NN index with torus-metric re-ranking.
///
/// The tree orders candidates by plain Euclidean distance over the raw
/// coordinates, which can misrank pairs that are close only through the
/// wrapped boundary. Queries therefore over-fetch `2k + 1` candidates and
/// re-sort them under [`torus_distance`] before truncating to `k`.
#[derive(Debug, Clone)]
pub struct TorusKnnIndex {
    world_size: f64,
    tree: RTree<IndexedPoint>,
    positions: Vec<(f64, f64)>,
}

impl TorusKnnIndex {
    /// Create an empty index for a torus of side `world_size`.
    #[must_use]
    pub fn new(world_size: f64) -> Self {
        Self {
            world_size,
            tree: RTree::new(),
            positions: Vec::new(),
        }
    }

    /// World side length this index ranks distances with.
    #[must_use]
    pub const fn world_size(&self) -> f64 {
        self.world_size
    }

    /// Number of indexed positions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// Whether the index currently holds no positions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

impl Default for TorusKnnIndex {
    fn default() -> Self {
        Self::new(20.0)
    }
}

impl NeighborQuery for TorusKnnIndex {
    fn rebuild(&mut self, positions: &[(f64, f64)]) -> Result<(), IndexError> {
        if self.world_size <= 0.0 {
            return Err(IndexError::InvalidConfig("world_size must be positive"));
        }
        if positions.iter().any(|p| !p.0.is_finite() || !p.1.is_finite()) {
            return Err(IndexError::InvalidConfig("positions must be finite"));
        }
        self.positions.clear();
        self.positions.extend_from_slice(positions);
        let entries: Vec<IndexedPoint> = positions
            .iter()
            .enumerate()
            .map(|(index, &(x, y))| IndexedPoint {
                position: [x, y],
                index,
            })
            .collect();
        self.tree = RTree::bulk_load(entries);
        Ok(())
    }

    fn k_nearest(&self, agent_idx: usize, k: usize) -> Vec<usize> {
        if agent_idx >= self.positions.len() || k == 0 {
            return Vec::new();
        }
        let (x, y) = self.positions[agent_idx];
        let candidate_count = (2 * k + 1).min(self.positions.len());

        // Over-fetch by Euclidean rank, then settle ties on the torus.
        let mut candidates: Vec<(OrderedFloat<f64>, usize)> = self
            .tree
            .nearest_neighbor_iter(&[x, y])
            .take(candidate_count)
            .filter(|entry| entry.index != agent_idx)
            .map(|entry| {
                let dist = torus_distance(
                    (x, y),
                    (entry.position[0], entry.position[1]),
                    self.world_size,
                );
                (OrderedFloat(dist), entry.index)
            })
            .collect();
        candidates.sort_unstable();
        candidates.truncate(k);
        candidates.into_iter().map(|(_, index)| index).collect()
    }
}
