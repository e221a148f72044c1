//! Grid sizing: box extent and per-axis cell counts from scaled coordinates.

use crate::cell::Cell;
use crate::config::LocatorConfig;
use crate::error::{LocatorError, Result};
use nalgebra::Vector3;
use tracing::debug;

/// Padding added on both sides of a non-periodic extent, in scaled units.
const SCALED_PADDING: f64 = 1e-6;
/// Probe points a decomposed-axis gap must straddle.
const GAP_PROBES: [f64; 2] = [0.25, 0.75];
/// A gap narrower than this many cells is ignored.
const GAP_MIN_CELLS: f64 = 3.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AxisMode {
    /// Non-periodic; extent follows the particles.
    Free,
    /// Periodic and owned by a single domain; neighbors wrap through translations.
    Periodic,
    /// Periodic but split over several domains; ghost atoms supply the images.
    Decomposed,
}

impl AxisMode {
    pub fn wraps(self) -> bool {
        self == AxisMode::Periodic
    }
}

/// Empty interval `(start, start + size)` on a decomposed axis, in folded scaled units.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gap {
    pub start: f64,
    pub size: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GridAxis {
    pub mode: AxisMode,
    pub n_cells: usize,
    /// Cell count the whole axis would need, before the gap is removed.
    pub n_cells_true: usize,
    pub gap: Option<Gap>,
    /// Scaled-space origin of the used extent.
    pub minimum: f64,
    /// Scaled-space length of the used extent.
    pub size: f64,
}

impl GridAxis {
    /// Integer shift (in lattice vectors) that brings a scaled coordinate
    /// into the used extent of this axis.
    pub fn shift_of(&self, s: f64) -> f64 {
        match self.mode {
            AxisMode::Free => 0.0,
            AxisMode::Periodic => -s.floor(),
            // Without a gap the local domain and its ghosts span the whole
            // axis, and folding would stack images on top of each other.
            AxisMode::Decomposed => match self.gap {
                None => 0.0,
                Some(gap) => {
                    let base = -s.floor();
                    if Self::below_gap(gap, s + base) {
                        base + 1.0
                    } else {
                        base
                    }
                }
            },
        }
    }

    /// Coordinates at or below the gap start are unrolled past 1; a
    /// coordinate inside the gap goes to the nearer side.
    fn below_gap(gap: Gap, folded: f64) -> bool {
        let end = gap.start + gap.size;
        folded <= gap.start || (folded < end && folded - gap.start < end - folded)
    }

    /// Cell along this axis for a coordinate already shifted by [`Self::shift_of`].
    pub fn cell_of(&self, u: f64) -> usize {
        let c = ((u - self.minimum) / self.size * self.n_cells as f64).floor();
        if c <= 0.0 {
            0
        } else {
            (c as usize).min(self.n_cells - 1)
        }
    }

    fn same_layout(&self, other: &GridAxis) -> bool {
        self.mode == other.mode
            && self.n_cells == other.n_cells
            && self.n_cells_true == other.n_cells_true
            && self.gap == other.gap
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CellGrid {
    pub axes: [GridAxis; 3],
    /// Cumulative cell-count products: `linear = i0 + n0 * (i1 + n1 * i2)`.
    pub strides: [usize; 3],
    pub total_cells: usize,
    /// Stencil reach used for this layout.
    pub reach: usize,
    pub heights: Vector3<f64>,
}

impl CellGrid {
    /// Sizes the grid for the given raw (unwrapped) scaled coordinates.
    pub fn size(
        config: &LocatorConfig,
        scaled: &[Vector3<f64>],
        cell: &Cell,
        domains: [usize; 3],
    ) -> Result<Self> {
        let heights = cell.heights();
        let pbc = cell.pbc();
        for axis in 0..3 {
            if pbc[axis] && heights[axis] < config.cutoff {
                return Err(LocatorError::GeometryTooSmall {
                    axis,
                    height: heights[axis],
                    cutoff: config.cutoff,
                });
            }
        }

        let modes: [AxisMode; 3] = std::array::from_fn(|a| {
            if !pbc[a] {
                AxisMode::Free
            } else if domains[a] > 1 {
                AxisMode::Decomposed
            } else {
                AxisMode::Periodic
            }
        });

        let grid = Self::size_with_reach(config, config.stencil_reach, scaled, heights, modes);
        let too_coarse = grid
            .axes
            .iter()
            .any(|ax| ax.mode.wraps() && ax.n_cells < grid.reach);
        if too_coarse {
            debug!(
                reach = config.stencil_reach,
                "Periodic axis has fewer cells than the stencil reach; using reach 1"
            );
            return Ok(Self::size_with_reach(config, 1, scaled, heights, modes));
        }
        Ok(grid)
    }

    fn size_with_reach(
        config: &LocatorConfig,
        reach: usize,
        scaled: &[Vector3<f64>],
        heights: Vector3<f64>,
        modes: [AxisMode; 3],
    ) -> Self {
        let cell_size = config.min_box_size() / reach as f64;
        let axes: [GridAxis; 3] = std::array::from_fn(|a| {
            let height = heights[a];
            let count = |extent: f64| ((extent * height / cell_size).floor() as usize).max(1);
            let n_cells_true = count(1.0);
            match modes[a] {
                AxisMode::Periodic => GridAxis {
                    mode: AxisMode::Periodic,
                    n_cells: n_cells_true,
                    n_cells_true,
                    gap: None,
                    minimum: 0.0,
                    size: 1.0,
                },
                AxisMode::Free => {
                    let (minimum, size) = padded_extent(scaled.iter().map(|s| s[a]));
                    let n_cells = count(size);
                    GridAxis {
                        mode: AxisMode::Free,
                        n_cells,
                        n_cells_true: n_cells,
                        gap: None,
                        minimum,
                        size,
                    }
                }
                AxisMode::Decomposed => {
                    let folded: Vec<f64> = scaled.iter().map(|s| s[a] - s[a].floor()).collect();
                    let min_gap = GAP_MIN_CELLS * config.min_box_size() / height;
                    let gap = find_gap(&folded, min_gap);
                    let mut axis = GridAxis {
                        mode: AxisMode::Decomposed,
                        n_cells: 1,
                        n_cells_true,
                        gap,
                        minimum: 0.0,
                        size: 1.0,
                    };
                    let unrolled: Vec<f64> = scaled
                        .iter()
                        .map(|s| s[a] + axis.shift_of(s[a]))
                        .collect();
                    let (minimum, size) = padded_extent(unrolled.into_iter());
                    axis.minimum = minimum;
                    axis.size = size;
                    axis.n_cells = count(size);
                    axis
                }
            }
        });

        let strides = [1, axes[0].n_cells, axes[0].n_cells * axes[1].n_cells];
        let total_cells = strides[2] * axes[2].n_cells;
        Self {
            axes,
            strides,
            total_cells,
            reach,
            heights,
        }
    }

    pub fn n_cells(&self) -> [usize; 3] {
        [self.axes[0].n_cells, self.axes[1].n_cells, self.axes[2].n_cells]
    }

    /// True if the buckets and adjacency lists of `other` cannot be reused for `self`.
    pub fn layout_changed(&self, other: &CellGrid) -> bool {
        self.reach != other.reach
            || self
                .axes
                .iter()
                .zip(other.axes.iter())
                .any(|(a, b)| !a.same_layout(b))
    }

    pub fn linear_index(&self, idx: [usize; 3]) -> usize {
        idx[0] + self.strides[1] * idx[1] + self.strides[2] * idx[2]
    }

    pub fn unravel(&self, linear: usize) -> [usize; 3] {
        let n = self.n_cells();
        [linear % n[0], (linear / n[0]) % n[1], linear / (n[0] * n[1])]
    }

    /// Per-axis shifts (lattice units) bringing a raw scaled coordinate into the grid.
    pub fn shifts_of(&self, scaled: &Vector3<f64>) -> Vector3<f64> {
        Vector3::new(
            self.axes[0].shift_of(scaled.x),
            self.axes[1].shift_of(scaled.y),
            self.axes[2].shift_of(scaled.z),
        )
    }

    /// Linear cell of an already shifted scaled coordinate.
    pub fn cell_of(&self, u: &Vector3<f64>) -> usize {
        self.linear_index([
            self.axes[0].cell_of(u.x),
            self.axes[1].cell_of(u.y),
            self.axes[2].cell_of(u.z),
        ])
    }

    /// Physical edge lengths of one cell.
    pub fn cell_edges(&self) -> Vector3<f64> {
        Vector3::from_fn(|a, _| {
            let ax = &self.axes[a];
            ax.size * self.heights[a] / ax.n_cells as f64
        })
    }

    /// Largest displacement any particle may make before the lists must be rebuilt.
    ///
    /// Single-cell non-periodic axes are skipped: every particle is in that
    /// cell layer whatever it does along that axis.
    pub fn drift_bound(&self, config: &LocatorConfig) -> f64 {
        let edges = self.cell_edges();
        let reach = self.reach as f64;
        let smallest = (0..3)
            .filter(|&a| self.axes[a].mode.wraps() || self.axes[a].n_cells > 1)
            .map(|a| reach * edges[a])
            .fold(f64::INFINITY, f64::min);
        if smallest.is_finite() {
            (0.5 * (smallest - config.cutoff)).max(0.0)
        } else {
            config.cutoff * config.drift_factor
        }
    }
}

fn padded_extent(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    });
    if lo > hi {
        return (0.0, 1.0);
    }
    (lo - SCALED_PADDING, hi - lo + 2.0 * SCALED_PADDING)
}

/// Widest empty interval straddling one of the probe points, if it is at
/// least `min_gap` wide. Ties keep the first probe.
fn find_gap(folded: &[f64], min_gap: f64) -> Option<Gap> {
    let mut best: Option<Gap> = None;
    for probe in GAP_PROBES {
        let mut lo = 0.0f64;
        let mut hi = 1.0f64;
        for &s in folded {
            if s <= probe {
                lo = lo.max(s);
            } else {
                hi = hi.min(s);
            }
        }
        let candidate = Gap {
            start: lo,
            size: hi - lo,
        };
        if best.is_none_or(|b| candidate.size > b.size) {
            best = Some(candidate);
        }
    }
    best.filter(|g| g.size >= min_gap)
}
