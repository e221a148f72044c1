//! The cell-based neighbor locator: bucket fill, drift checking and
//! incremental updates. Queries live in [`crate::search`].

use crate::adjacency::{Adjacency, stencil_volume};
use crate::atoms::{AccessGuard, Atoms, ParticleAccessor};
use crate::cell::Cell;
use crate::config::LocatorConfig;
use crate::error::{LocatorError, Result};
use crate::grid::CellGrid;
use crate::translation::{NUM_TRANSLATIONS, TranslationTable};
use nalgebra::Vector3;
use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info, info_span};

/// What the structure was last built against. A mismatch forces a rebuild.
#[derive(Clone, Debug, PartialEq)]
struct BuildKey {
    n_atoms: usize,
    n_ghosts: usize,
    pbc: Vector3<bool>,
    domains: [usize; 3],
    cell_counter: usize,
}

pub struct NeighborCellLocator<A: ParticleAccessor + ?Sized = Atoms> {
    pub(crate) atoms: Arc<A>,
    pub(crate) config: LocatorConfig,
    pub(crate) cutoff_sq: f64,
    pub(crate) table: TranslationTable,
    /// Cartesian translation vectors of the cell the structure was built for.
    pub(crate) translations: [Vector3<f64>; NUM_TRANSLATIONS],
    pub(crate) cell: Option<Cell>,
    pub(crate) grid: Option<CellGrid>,
    pub(crate) adjacency: Option<Adjacency>,
    /// Atom indices (real then ghost) per grid cell.
    pub(crate) cells: Vec<Vec<usize>>,
    /// Cell currently holding each atom.
    pub(crate) cell_indices: Vec<usize>,
    positions: Vec<Vector3<f64>>,
    scaled_positions: Vec<Vector3<f64>>,
    pub(crate) wrapped_positions: Vec<Vector3<f64>>,
    offset_positions: Vec<Vector3<f64>>,
    scaled_offset_positions: Vec<Vector3<f64>>,
    reference_positions: Vec<Vector3<f64>>,
    scratch: Vec<Vector3<f64>>,
    max_bucket: usize,
    drift: f64,
    pub(crate) invalid: bool,
    key: Option<BuildKey>,
    positions_counter: Option<usize>,
    rebuilds: usize,
}

impl<A: ParticleAccessor + ?Sized> NeighborCellLocator<A> {
    /// Creates a locator bound to `atoms`. Nothing is built until the first
    /// [`check_and_update`](Self::check_and_update).
    pub fn new(atoms: Arc<A>, config: LocatorConfig) -> Result<Self> {
        config.validate()?;
        let cutoff_sq = config.cutoff * config.cutoff;
        Ok(Self {
            atoms,
            config,
            cutoff_sq,
            table: TranslationTable::new(),
            translations: [Vector3::zeros(); NUM_TRANSLATIONS],
            cell: None,
            grid: None,
            adjacency: None,
            cells: Vec::new(),
            cell_indices: Vec::new(),
            positions: Vec::new(),
            scaled_positions: Vec::new(),
            wrapped_positions: Vec::new(),
            offset_positions: Vec::new(),
            scaled_offset_positions: Vec::new(),
            reference_positions: Vec::new(),
            scratch: Vec::new(),
            max_bucket: 0,
            drift: 0.0,
            invalid: true,
            key: None,
            positions_counter: None,
            rebuilds: 0,
        })
    }

    pub fn with_cutoff(atoms: Arc<A>, cutoff: f64, drift_factor: f64) -> Result<Self> {
        Self::new(atoms, LocatorConfig::new(cutoff).with_drift_factor(drift_factor))
    }

    pub fn atoms(&self) -> &Arc<A> {
        &self.atoms
    }

    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    pub fn cutoff_radius(&self) -> f64 {
        self.config.cutoff
    }

    pub fn is_invalid(&self) -> bool {
        self.invalid
    }

    /// Marks the structure stale; the next check rebuilds it.
    pub fn invalidate(&mut self) {
        self.invalid = true;
    }

    /// Upper bound on the length of any single neighbor list. Output
    /// buffers for the slice-based queries must be at least this long.
    pub fn max_neighbor_list_length(&self) -> usize {
        self.grid
            .as_ref()
            .map_or(0, |g| self.max_bucket * stencil_volume(g.reach))
    }

    /// Largest displacement from the reference positions that does not
    /// require a rebuild.
    pub fn drift_bound(&self) -> f64 {
        self.drift
    }

    /// Real atoms the structure was built for; only these can be query sources.
    pub fn number_of_atoms(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.n_atoms)
    }

    pub fn number_of_ghost_atoms(&self) -> usize {
        self.key.as_ref().map_or(0, |k| k.n_ghosts)
    }

    /// Number of full rebuilds performed so far.
    pub fn rebuild_count(&self) -> usize {
        self.rebuilds
    }

    pub fn grid(&self) -> Option<&CellGrid> {
        self.grid.as_ref()
    }

    pub fn adjacency(&self) -> Option<&Adjacency> {
        self.adjacency.as_ref()
    }

    /// Atom indices per grid cell.
    pub fn buckets(&self) -> &[Vec<usize>] {
        &self.cells
    }

    pub fn cell_indices(&self) -> &[usize] {
        &self.cell_indices
    }

    /// Positions folded into the grid, as used by the queries.
    pub fn wrapped_positions(&self) -> &[Vector3<f64>] {
        &self.wrapped_positions
    }

    pub fn scaled_positions(&self) -> &[Vector3<f64>] {
        &self.scaled_positions
    }

    /// Cartesian corrections with `wrapped = position + offset`.
    pub fn offset_positions(&self) -> &[Vector3<f64>] {
        &self.offset_positions
    }

    /// The same corrections in lattice units.
    pub fn scaled_offset_positions(&self) -> &[Vector3<f64>] {
        &self.scaled_offset_positions
    }

    pub fn reference_positions(&self) -> &[Vector3<f64>] {
        &self.reference_positions
    }

    pub fn translation_table(&self) -> &TranslationTable {
        &self.table
    }

    /// Cartesian translation vectors, indexed by translation index.
    pub fn translation_vectors(&self) -> &[Vector3<f64>; NUM_TRANSLATIONS] {
        &self.translations
    }

    /// Checks whether the structure must be rebuilt. Refreshes the wrapped
    /// positions from the current positions when it can be reused.
    pub fn check_neighbor_list(&mut self) -> Result<bool> {
        let atoms = Arc::clone(&self.atoms);
        let _guard = AccessGuard::new(&*atoms);
        Ok(self.check_locked(&*atoms))
    }

    /// Unconditionally rebuilds the structure.
    pub fn update_neighbor_list(&mut self) -> Result<()> {
        let atoms = Arc::clone(&self.atoms);
        let _guard = AccessGuard::new(&*atoms);
        self.rebuild(&*atoms)
    }

    /// Rebuilds if needed; returns true if a rebuild took place.
    pub fn check_and_update(&mut self) -> Result<bool> {
        let atoms = Arc::clone(&self.atoms);
        let _guard = AccessGuard::new(&*atoms);
        if self.check_locked(&*atoms) {
            self.rebuild(&*atoms)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn current_key(atoms: &A) -> BuildKey {
        BuildKey {
            n_atoms: atoms.number_of_atoms(),
            n_ghosts: atoms.number_of_ghost_atoms(),
            pbc: *atoms.cell().pbc(),
            domains: atoms.domains_per_axis(),
            cell_counter: atoms.cell_counter(),
        }
    }

    fn check_locked(&mut self, atoms: &A) -> bool {
        if self.invalid || self.grid.is_none() {
            self.invalid = true;
            return true;
        }
        if self.key.as_ref() != Some(&Self::current_key(atoms)) {
            debug!("Particle count, boundary conditions or cell changed");
            self.invalid = true;
            return true;
        }
        let counter = atoms.positions_counter();
        if self.positions_counter == Some(counter) {
            return false;
        }

        atoms.copy_positions(&mut self.positions);
        let n_atoms = self.number_of_atoms();
        let drift_sq = self.drift * self.drift;
        let mut exceeded = false;
        for (i, ((w, p), o)) in self
            .wrapped_positions
            .iter_mut()
            .zip(self.positions.iter())
            .zip(self.offset_positions.iter())
            .enumerate()
        {
            *w = p + o;
            if i < n_atoms && (p - self.reference_positions[i]).norm_squared() > drift_sq {
                exceeded = true;
            }
        }
        self.positions_counter = Some(counter);
        if exceeded {
            debug!(drift = self.drift, "Drift bound exceeded");
            self.invalid = true;
        }
        exceeded
    }

    fn rebuild(&mut self, atoms: &A) -> Result<()> {
        let key = Self::current_key(atoms);
        let _span = info_span!(
            "NeighborCellLocator::rebuild",
            n_atoms = key.n_atoms,
            n_ghosts = key.n_ghosts
        )
        .entered();
        self.invalid = true;

        let cell = atoms.cell();
        atoms.copy_positions(&mut self.positions);
        let total = self.positions.len();
        debug_assert_eq!(total, key.n_atoms + key.n_ghosts);

        self.scaled_positions.clear();
        self.scaled_positions
            .par_extend(self.positions.par_iter().map(|p| cell.to_fractional(p)));

        let grid = {
            let _s = info_span!("grid_sizing").entered();
            CellGrid::size(&self.config, &self.scaled_positions, &cell, key.domains)?
        };

        let layout_changed = self.grid.as_ref().is_none_or(|old| grid.layout_changed(old));
        if layout_changed {
            let _s = info_span!("adjacency").entered();
            self.adjacency = Some(Adjacency::build(&grid));
            self.cells.resize_with(grid.total_cells, Vec::new);
            if self.config.verbose > 0 {
                info!(cells = ?grid.n_cells(), reach = grid.reach, "Cell layout changed");
            } else {
                debug!(cells = ?grid.n_cells(), reach = grid.reach, "Cell layout changed");
            }
        }

        {
            let _s = info_span!("bucket_fill", cells = grid.total_cells).entered();
            for bucket in &mut self.cells {
                bucket.clear();
            }
            self.cell_indices.clear();
            self.wrapped_positions.clear();
            self.offset_positions.clear();
            self.scaled_offset_positions.clear();
            for (i, (p, s)) in self
                .positions
                .iter()
                .zip(self.scaled_positions.iter())
                .enumerate()
            {
                let shift = grid.shifts_of(s);
                let offset = cell.to_cartesian(&shift);
                let c = grid.cell_of(&(s + shift));
                self.cells[c].push(i);
                self.cell_indices.push(c);
                self.wrapped_positions.push(p + offset);
                self.offset_positions.push(offset);
                self.scaled_offset_positions.push(shift);
            }
            self.max_bucket = self.cells.iter().map(Vec::len).max().unwrap_or(0);
        }

        self.reference_positions.clear();
        self.reference_positions.extend_from_slice(&self.positions);
        self.translations = self.table.cartesian(&cell);
        self.drift = grid.drift_bound(&self.config);
        self.cell = Some(cell);
        self.grid = Some(grid);
        self.key = Some(key);
        self.positions_counter = Some(atoms.positions_counter());
        self.invalid = false;
        self.rebuilds += 1;

        if self.config.verbose > 0 {
            info!(
                max_bucket = self.max_bucket,
                drift = self.drift,
                "Neighbor lists rebuilt"
            );
        }
        Ok(())
    }

    /// Re-buckets only the given atoms, after they have been moved in the
    /// accessor. Their reference positions are reset.
    pub fn remake_lists_for_modified(&mut self, modified: &[usize]) -> Result<()> {
        if self.invalid {
            return Err(LocatorError::StaleStructure);
        }
        let (Some(grid), Some(cell)) = (self.grid.as_ref(), self.cell.as_ref()) else {
            return Err(LocatorError::StaleStructure);
        };
        let total = self.positions.len();
        if let Some(&index) = modified.iter().find(|&&i| i >= total) {
            return Err(LocatorError::AtomOutOfRange {
                index,
                count: total,
            });
        }

        let atoms = Arc::clone(&self.atoms);
        let _guard = AccessGuard::new(&*atoms);
        atoms.copy_positions_of(modified, &mut self.scratch);

        for (&i, p) in modified.iter().zip(self.scratch.iter()) {
            let s = cell.to_fractional(p);
            let shift = grid.shifts_of(&s);
            let offset = cell.to_cartesian(&shift);
            let new_cell = grid.cell_of(&(s + shift));

            let old_cell = self.cell_indices[i];
            if new_cell != old_cell {
                let bucket = &mut self.cells[old_cell];
                if let Some(pos) = bucket.iter().position(|&a| a == i) {
                    bucket.swap_remove(pos);
                }
                self.cells[new_cell].push(i);
                self.max_bucket = self.max_bucket.max(self.cells[new_cell].len());
                self.cell_indices[i] = new_cell;
            }

            self.positions[i] = *p;
            self.scaled_positions[i] = s;
            self.scaled_offset_positions[i] = shift;
            self.offset_positions[i] = offset;
            self.wrapped_positions[i] = p + offset;
            self.reference_positions[i] = *p;
        }
        // Other atoms may have moved too; make the next check scan them.
        self.positions_counter = None;
        Ok(())
    }

    /// Approximate heap memory held by the locator, in bytes.
    pub fn memory_usage(&self) -> usize {
        let vec3 = std::mem::size_of::<Vector3<f64>>();
        let positions = [
            &self.positions,
            &self.scaled_positions,
            &self.wrapped_positions,
            &self.offset_positions,
            &self.scaled_offset_positions,
            &self.reference_positions,
            &self.scratch,
        ]
        .iter()
        .map(|v| v.capacity() * vec3)
        .sum::<usize>();
        let buckets = self
            .cells
            .iter()
            .map(|b| b.capacity() * std::mem::size_of::<usize>())
            .sum::<usize>()
            + self.cells.capacity() * std::mem::size_of::<Vec<usize>>();
        let indices = self.cell_indices.capacity() * std::mem::size_of::<usize>();
        let adjacency = self.adjacency.as_ref().map_or(0, Adjacency::memory_usage);
        positions + buckets + indices + adjacency
    }
}
