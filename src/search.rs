//! Neighbor queries against a built [`NeighborCellLocator`].

use crate::atoms::ParticleAccessor;
use crate::cell::Cell;
use crate::error::{LocatorError, Result};
use crate::locator::NeighborCellLocator;
use crate::translation::{NUM_TRANSLATIONS, TranslationTable};
use nalgebra::Vector3;
use rayon::prelude::*;

const PARALLEL_TASKS_PER_THREAD: usize = 64;

/// Neighbor index packed together with the translation of its image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NeighborItem(u64);

impl NeighborItem {
    pub const TRANSLATION_BITS: u32 = 5;
    const TRANSLATION_MASK: u64 = (1 << Self::TRANSLATION_BITS) - 1;

    pub fn new(index: usize, translation: usize) -> Self {
        debug_assert!(translation < NUM_TRANSLATIONS);
        Self(((index as u64) << Self::TRANSLATION_BITS) | translation as u64)
    }

    pub fn index(self) -> usize {
        (self.0 >> Self::TRANSLATION_BITS) as usize
    }

    pub fn translation(self) -> usize {
        (self.0 & Self::TRANSLATION_MASK) as usize
    }

    pub fn packed(self) -> u64 {
        self.0
    }
}

/// Owned result of a single neighbor query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NeighborResult {
    pub indices: Vec<usize>,
    /// Neighbor image minus source, for each entry of `indices`.
    pub displacements: Vec<Vector3<f64>>,
    pub sq_distances: Vec<f64>,
}

impl NeighborResult {
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn push(&mut self, j: usize, d: Vector3<f64>, d2: f64) {
        self.indices.push(j);
        self.displacements.push(d);
        self.sq_distances.push(d2);
    }
}

/// Which neighbors of a source atom `i` are reported.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Inclusion {
    /// `j > i`: each pair once, from its lower index.
    Half,
    /// `j != i`.
    Full,
    /// `j < i`: the pairs a half list leaves out.
    Complementary,
}

impl Inclusion {
    #[inline]
    fn accepts(self, source: usize, j: usize) -> bool {
        match self {
            Inclusion::Half => j > source,
            Inclusion::Full => j != source,
            Inclusion::Complementary => j < source,
        }
    }
}

impl<A: ParticleAccessor + ?Sized> NeighborCellLocator<A> {
    fn ensure_valid(&self) -> Result<()> {
        if self.invalid || self.adjacency.is_none() {
            return Err(LocatorError::StaleStructure);
        }
        Ok(())
    }

    fn check_source(&self, atom: usize) -> Result<()> {
        self.ensure_valid()?;
        let count = self.number_of_atoms();
        if atom >= count {
            return Err(LocatorError::AtomOutOfRange { index: atom, count });
        }
        Ok(())
    }

    fn radius_sq(&self, r: Option<f64>) -> Result<f64> {
        match r {
            None => Ok(self.cutoff_sq),
            Some(r) if !r.is_finite() || r < 0.0 => {
                Err(LocatorError::InvalidQueryRadius { requested: r })
            }
            Some(r) if r > self.config.cutoff => Err(LocatorError::QueryRadiusTooLarge {
                requested: r,
                cutoff: self.config.cutoff,
            }),
            Some(r) => Ok(r * r),
        }
    }

    /// Walks the adjacency list of `cell` and calls `f(j, translation, d, d2)`
    /// for every atom closer than `rc2` to the translated `position`.
    fn visit<F>(&self, cell: usize, position: &Vector3<f64>, rc2: f64, mut f: F)
    where
        F: FnMut(usize, u8, Vector3<f64>, f64),
    {
        let Some(adjacency) = self.adjacency.as_ref() else {
            return;
        };
        for nc in adjacency.list_for(cell) {
            let target = (cell as isize + nc.offset) as usize;
            let bucket = &self.cells[target];
            if bucket.is_empty() {
                continue;
            }
            let source = position + self.translations[nc.translation as usize];
            for &j in bucket {
                let d = self.wrapped_positions[j] - source;
                let d2 = d.norm_squared();
                if d2 < rc2 {
                    f(j, nc.translation, d, d2);
                }
            }
        }
    }

    /// Writes accepted neighbors of `atom` into the given slices and
    /// decrements `remaining` by the number written.
    #[allow(clippy::too_many_arguments)]
    fn fill(
        &self,
        atom: usize,
        inclusion: Inclusion,
        indices: &mut [usize],
        displacements: &mut [Vector3<f64>],
        sq_distances: &mut [f64],
        remaining: &mut usize,
        r: Option<f64>,
    ) -> Result<usize> {
        self.check_source(atom)?;
        let rc2 = self.radius_sq(r)?;
        let capacity = (*remaining)
            .min(indices.len())
            .min(displacements.len())
            .min(sq_distances.len());

        let mut n = 0;
        let mut overrun = false;
        let position = self.wrapped_positions[atom];
        self.visit(self.cell_indices[atom], &position, rc2, |j, _, d, d2| {
            if !inclusion.accepts(atom, j) {
                return;
            }
            if n == capacity {
                overrun = true;
                return;
            }
            indices[n] = j;
            displacements[n] = d;
            sq_distances[n] = d2;
            n += 1;
        });
        if overrun {
            return Err(LocatorError::CapacityExceeded { capacity });
        }
        *remaining -= n;
        Ok(n)
    }

    /// Half neighbor list of `atom` (neighbors with a higher index) written
    /// into caller buffers. Returns the number of entries written.
    pub fn get_neighbors_into(
        &self,
        atom: usize,
        indices: &mut [usize],
        displacements: &mut [Vector3<f64>],
        sq_distances: &mut [f64],
        remaining: &mut usize,
        r: Option<f64>,
    ) -> Result<usize> {
        self.fill(
            atom,
            Inclusion::Half,
            indices,
            displacements,
            sq_distances,
            remaining,
            r,
        )
    }

    /// Full neighbor list of `atom` written into caller buffers.
    pub fn get_full_neighbors_into(
        &self,
        atom: usize,
        indices: &mut [usize],
        displacements: &mut [Vector3<f64>],
        sq_distances: &mut [f64],
        remaining: &mut usize,
        r: Option<f64>,
    ) -> Result<usize> {
        self.fill(
            atom,
            Inclusion::Full,
            indices,
            displacements,
            sq_distances,
            remaining,
            r,
        )
    }

    fn collect(&self, atom: usize, inclusion: Inclusion, r: Option<f64>) -> Result<NeighborResult> {
        self.check_source(atom)?;
        let rc2 = self.radius_sq(r)?;
        let mut out = NeighborResult::default();
        let position = self.wrapped_positions[atom];
        self.visit(self.cell_indices[atom], &position, rc2, |j, _, d, d2| {
            if inclusion.accepts(atom, j) {
                out.push(j, d, d2);
            }
        });
        Ok(out)
    }

    pub fn get_neighbors(&self, atom: usize, r: Option<f64>) -> Result<NeighborResult> {
        self.collect(atom, Inclusion::Half, r)
    }

    pub fn get_full_neighbors(&self, atom: usize, r: Option<f64>) -> Result<NeighborResult> {
        self.collect(atom, Inclusion::Full, r)
    }

    /// Every atom (real or ghost) within the radius of an arbitrary point.
    /// Displacements are relative to the point folded into the grid.
    pub fn get_full_neighbors_at_point(
        &self,
        position: &Vector3<f64>,
        r: Option<f64>,
    ) -> Result<NeighborResult> {
        self.ensure_valid()?;
        let rc2 = self.radius_sq(r)?;
        let (Some(grid), Some(cell)) = (self.grid.as_ref(), self.cell.as_ref()) else {
            return Err(LocatorError::StaleStructure);
        };
        let s = cell.to_fractional(position);
        let shift = grid.shifts_of(&s);
        let folded = position + cell.to_cartesian(&shift);
        let mut out = NeighborResult::default();
        self.visit(grid.cell_of(&(s + shift)), &folded, rc2, |j, _, d, d2| {
            out.push(j, d, d2);
        });
        Ok(out)
    }

    fn indices_only(
        &self,
        atom: usize,
        inclusion: Inclusion,
        r: Option<f64>,
    ) -> Result<Vec<usize>> {
        self.check_source(atom)?;
        let rc2 = self.radius_sq(r)?;
        let mut out = Vec::new();
        let position = self.wrapped_positions[atom];
        self.visit(self.cell_indices[atom], &position, rc2, |j, _, _, _| {
            if inclusion.accepts(atom, j) {
                out.push(j);
            }
        });
        Ok(out)
    }

    pub fn get_neighbor_indices(&self, atom: usize, r: Option<f64>) -> Result<Vec<usize>> {
        self.indices_only(atom, Inclusion::Half, r)
    }

    pub fn get_full_neighbor_indices(&self, atom: usize, r: Option<f64>) -> Result<Vec<usize>> {
        self.indices_only(atom, Inclusion::Full, r)
    }

    fn packed(&self, atom: usize, inclusion: Inclusion) -> Result<Vec<NeighborItem>> {
        self.check_source(atom)?;
        let mut out = Vec::new();
        let position = self.wrapped_positions[atom];
        self.visit(self.cell_indices[atom], &position, self.cutoff_sq, |j, t, _, _| {
            if inclusion.accepts(atom, j) {
                out.push(NeighborItem::new(j, t as usize));
            }
        });
        Ok(out)
    }

    /// Half neighbor list with the translation index of each image.
    pub fn get_neighbors_and_translations(&self, atom: usize) -> Result<Vec<NeighborItem>> {
        self.packed(atom, Inclusion::Half)
    }

    /// Neighbors with a lower index, with translations; together with
    /// [`get_neighbors_and_translations`](Self::get_neighbors_and_translations)
    /// this gives the full list.
    pub fn get_complementary_neighbors_and_translations(
        &self,
        atom: usize,
    ) -> Result<Vec<NeighborItem>> {
        self.packed(atom, Inclusion::Complementary)
    }

    /// Displacement from `atom` to the image described by `item`.
    pub fn image_displacement(&self, atom: usize, item: NeighborItem) -> Result<Vector3<f64>> {
        self.check_source(atom)?;
        let j = item.index();
        if j >= self.wrapped_positions.len() {
            return Err(LocatorError::AtomOutOfRange {
                index: j,
                count: self.wrapped_positions.len(),
            });
        }
        Ok(self.wrapped_positions[j]
            - (self.wrapped_positions[atom] + self.translations[item.translation()]))
    }

    fn lists(&self, inclusion: Inclusion) -> Result<Vec<Vec<usize>>> {
        self.ensure_valid()?;
        let n_atoms = self.number_of_atoms();
        let num_threads = rayon::current_num_threads();
        let min_len = (n_atoms / (num_threads * PARALLEL_TASKS_PER_THREAD)).max(1);
        (0..n_atoms)
            .into_par_iter()
            .with_min_len(min_len)
            .map(|i| self.indices_only(i, inclusion, None))
            .collect()
    }

    /// Full neighbor indices of every real atom, computed in parallel.
    pub fn full_neighbor_lists(&self) -> Result<Vec<Vec<usize>>> {
        self.lists(Inclusion::Full)
    }

    /// Half neighbor indices of every real atom, computed in parallel.
    pub fn half_neighbor_lists(&self) -> Result<Vec<Vec<usize>>> {
        self.lists(Inclusion::Half)
    }
}

/// Reference O(N^2) search over all 27 images. Returns, for each atom, the
/// sorted indices of every image of every other atom within `cutoff`.
///
/// Images are only taken along periodic axes, and at most one lattice vector
/// away, so `cutoff` must not exceed any periodic height.
pub fn brute_force_full_neighbors(
    cell: &Cell,
    positions: &[Vector3<f64>],
    cutoff: f64,
) -> Vec<Vec<usize>> {
    let cutoff_sq = cutoff * cutoff;
    let table = TranslationTable::new();
    let pbc = cell.pbc();
    let images: Vec<Vector3<f64>> = (0..NUM_TRANSLATIONS)
        .filter(|&k| (0..3).all(|a| pbc[a] || table.get(k)[a] == 0))
        .map(|k| cell.lattice_translation(table.get(k)))
        .collect();
    let wrapped: Vec<Vector3<f64>> = positions.iter().map(|p| cell.wrap(p)).collect();

    let n = wrapped.len();
    let mut neighbors = Vec::with_capacity(n);
    for i in 0..n {
        let mut list = Vec::new();
        for j in 0..n {
            if i == j {
                continue;
            }
            for t in &images {
                if (wrapped[j] + t - wrapped[i]).norm_squared() < cutoff_sq {
                    list.push(j);
                }
            }
        }
        list.sort_unstable();
        neighbors.push(list);
    }
    neighbors
}
