//! Precomputed cell adjacency.
//!
//! Every cell is searched through a list of `(linear offset, translation)`
//! pairs. Cells away from the grid boundary share the interior list, cells
//! on exactly one face share that face's list, and the remaining edge and
//! corner cells get a list of their own.

use crate::grid::CellGrid;
use crate::translation::{AXIS_WEIGHTS, axis_digit};
use tracing::info_span;

/// Number of shared lists: interior plus one per face.
pub const NUM_CANONICAL: usize = 7;
pub const INTERIOR: usize = 0;

/// One neighboring cell as seen from a source cell.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeighborCell {
    /// Target cell minus source cell, in linear cell indices.
    pub offset: isize,
    /// Translation applied to the source position before comparing with the target cell.
    pub translation: u8,
}

pub type AdjacencyList = Vec<NeighborCell>;

/// Which list a cell uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdjacencyRef {
    /// Slot in the shared table (see [`face_slot`]).
    Canonical(usize),
    /// Index into the arena of per-cell lists.
    Owned(usize),
}

/// Shared-table slot of a face: 1 + 2 * axis + (1 for the high side).
pub fn face_slot(axis: usize, high: bool) -> usize {
    1 + 2 * axis + usize::from(high)
}

/// All offsets of the (2k+1)^3 stencil.
pub fn stencil(reach: usize) -> Vec<[isize; 3]> {
    let k = reach as isize;
    let mut out = Vec::with_capacity((2 * reach + 1).pow(3));
    for dz in -k..=k {
        for dy in -k..=k {
            for dx in -k..=k {
                out.push([dx, dy, dz]);
            }
        }
    }
    out
}

pub fn stencil_volume(reach: usize) -> usize {
    (2 * reach + 1).pow(3)
}

#[derive(Clone, Debug)]
pub struct Adjacency {
    canonical: [AdjacencyList; NUM_CANONICAL],
    owned: Vec<AdjacencyList>,
    per_cell: Vec<AdjacencyRef>,
}

impl Adjacency {
    pub fn build(grid: &CellGrid) -> Self {
        let _span = info_span!("Adjacency::build", cells = grid.total_cells).entered();
        let offsets = stencil(grid.reach);

        let mut canonical: [AdjacencyList; NUM_CANONICAL] = Default::default();
        canonical[INTERIOR] = offsets
            .iter()
            .map(|d| NeighborCell {
                offset: linear_offset(grid, d),
                translation: 0,
            })
            .collect();
        for axis in 0..3 {
            for high in [false, true] {
                canonical[face_slot(axis, high)] = face_list(grid, &offsets, axis, high);
            }
        }

        let mut owned = Vec::new();
        let per_cell: Vec<AdjacencyRef> = (0..grid.total_cells)
            .map(|linear| {
                let idx = grid.unravel(linear);
                match classify(grid, idx) {
                    Some(slot) => AdjacencyRef::Canonical(slot),
                    None => {
                        owned.push(cell_list(grid, &offsets, idx));
                        AdjacencyRef::Owned(owned.len() - 1)
                    }
                }
            })
            .collect();

        Self {
            canonical,
            owned,
            per_cell,
        }
    }

    pub fn list_for(&self, cell: usize) -> &[NeighborCell] {
        match self.per_cell[cell] {
            AdjacencyRef::Canonical(slot) => &self.canonical[slot],
            AdjacencyRef::Owned(i) => &self.owned[i],
        }
    }

    pub fn reference(&self, cell: usize) -> AdjacencyRef {
        self.per_cell[cell]
    }

    pub fn owned_lists(&self) -> usize {
        self.owned.len()
    }

    pub fn memory_usage(&self) -> usize {
        let entry = std::mem::size_of::<NeighborCell>();
        let lists: usize = self
            .canonical
            .iter()
            .chain(self.owned.iter())
            .map(|l| l.capacity() * entry)
            .sum();
        lists + self.per_cell.capacity() * std::mem::size_of::<AdjacencyRef>()
    }
}

fn linear_offset(grid: &CellGrid, d: &[isize; 3]) -> isize {
    (0..3).map(|a| d[a] * grid.strides[a] as isize).sum()
}

/// Shared list for the outermost layer of one face: offsets leaving the grid
/// through that face wrap on periodic axes and are dropped otherwise.
fn face_list(grid: &CellGrid, offsets: &[[isize; 3]], axis: usize, high: bool) -> AdjacencyList {
    let n = grid.axes[axis].n_cells as isize;
    let wraps = grid.axes[axis].mode.wraps();
    let start = if high { n - 1 } else { 0 };
    offsets
        .iter()
        .filter_map(|d| {
            let target = start + d[axis];
            let mut offset = linear_offset(grid, d);
            let mut translation = 0;
            if target < 0 || target >= n {
                if !wraps {
                    return None;
                }
                let t = if target < 0 { 1 } else { -1 };
                offset += t as isize * n * grid.strides[axis] as isize;
                translation = axis_digit(t) * AXIS_WEIGHTS[axis];
            }
            Some(NeighborCell {
                offset,
                translation: translation as u8,
            })
        })
        .collect()
}

/// Canonical slot of a cell, or `None` if it needs a list of its own.
///
/// A cell is near a face if the stencil reaches past it. Only cells near
/// exactly one face, and in that face's outermost layer, share its list.
fn classify(grid: &CellGrid, idx: [usize; 3]) -> Option<usize> {
    let k = grid.reach;
    let mut slot = INTERIOR;
    let mut faces = 0;
    for a in 0..3 {
        let n = grid.axes[a].n_cells;
        let i = idx[a];
        let low = i < k;
        let high = i + k >= n;
        if low {
            faces += 1;
            slot = face_slot(a, false);
            if i != 0 {
                return None;
            }
        }
        if high {
            faces += 1;
            slot = face_slot(a, true);
            if i != n - 1 {
                return None;
            }
        }
    }
    match faces {
        0 | 1 => Some(slot),
        _ => None,
    }
}

/// List for a single cell, wrapping each axis independently and composing
/// the translations.
pub(crate) fn cell_list(grid: &CellGrid, offsets: &[[isize; 3]], idx: [usize; 3]) -> AdjacencyList {
    let source = grid.linear_index(idx) as isize;
    offsets
        .iter()
        .filter_map(|d| {
            let mut target = [0usize; 3];
            let mut translation = 0;
            for a in 0..3 {
                let n = grid.axes[a].n_cells as isize;
                let mut t = idx[a] as isize + d[a];
                if t < 0 || t >= n {
                    if !grid.axes[a].mode.wraps() {
                        return None;
                    }
                    let shift = if t < 0 { 1 } else { -1 };
                    t += shift as isize * n;
                    translation += axis_digit(shift) * AXIS_WEIGHTS[a];
                }
                target[a] = t as usize;
            }
            Some(NeighborCell {
                offset: grid.linear_index(target) as isize - source,
                translation: translation as u8,
            })
        })
        .collect()
}
