//! Read interface the locator needs from the host particle container, and an
//! in-process implementation of it.

use crate::cell::Cell;
use crate::error::{LocatorError, Result};
use nalgebra::Vector3;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{PoisonError, RwLock};

/// Particle container as seen by a neighbor locator.
///
/// Positions are indexed with the real atoms first, followed by the ghost
/// atoms. Implementations are shared between locators through an `Arc`.
pub trait ParticleAccessor: Send + Sync {
    /// Called before each logical use of the accessor.
    fn begin(&self) {}

    /// Called after each logical use of the accessor.
    fn end(&self) {}

    fn number_of_atoms(&self) -> usize;

    fn number_of_ghost_atoms(&self) -> usize {
        0
    }

    /// Copies all positions (real then ghost) into `out`, replacing its contents.
    fn copy_positions(&self, out: &mut Vec<Vector3<f64>>);

    /// Copies the positions of the given atoms into `out`, in the order of `indices`.
    fn copy_positions_of(&self, indices: &[usize], out: &mut Vec<Vector3<f64>>);

    /// Fractional coordinates of all atoms, real then ghost.
    fn copy_scaled_positions(&self, out: &mut Vec<Vector3<f64>>) {
        self.copy_positions(out);
        let cell = self.cell();
        for p in out.iter_mut() {
            *p = cell.to_fractional(p);
        }
    }

    /// The simulation cell, including its boundary conditions.
    fn cell(&self) -> Cell;

    /// Number of spatial sub-domains along each axis.
    fn domains_per_axis(&self) -> [usize; 3] {
        [1, 1, 1]
    }

    /// Generation counter, incremented whenever the cell changes.
    fn cell_counter(&self) -> usize;

    /// Incremented whenever any position changes.
    fn positions_counter(&self) -> usize;
}

/// Brackets one logical use of an accessor; `end` runs on drop.
pub(crate) struct AccessGuard<'a, A: ParticleAccessor + ?Sized> {
    atoms: &'a A,
}

impl<'a, A: ParticleAccessor + ?Sized> AccessGuard<'a, A> {
    pub(crate) fn new(atoms: &'a A) -> Self {
        atoms.begin();
        Self { atoms }
    }
}

impl<A: ParticleAccessor + ?Sized> Drop for AccessGuard<'_, A> {
    fn drop(&mut self) {
        self.atoms.end();
    }
}

#[derive(Debug)]
struct AtomsState {
    positions: Vec<Vector3<f64>>,
    n_atoms: usize,
    cell: Cell,
    domains: [usize; 3],
}

/// Simple in-memory particle container.
#[derive(Debug)]
pub struct Atoms {
    state: RwLock<AtomsState>,
    cell_counter: AtomicUsize,
    positions_counter: AtomicUsize,
    access_depth: AtomicUsize,
}

impl Atoms {
    pub fn new(cell: Cell, positions: Vec<Vector3<f64>>) -> Self {
        let n_atoms = positions.len();
        Self {
            state: RwLock::new(AtomsState {
                positions,
                n_atoms,
                cell,
                domains: [1, 1, 1],
            }),
            cell_counter: AtomicUsize::new(1),
            positions_counter: AtomicUsize::new(1),
            access_depth: AtomicUsize::new(0),
        }
    }

    /// Container with `ghosts` appended after the real atoms.
    pub fn with_ghosts(
        cell: Cell,
        positions: Vec<Vector3<f64>>,
        ghosts: Vec<Vector3<f64>>,
    ) -> Self {
        let atoms = Self::new(cell, positions);
        atoms.set_ghost_positions(ghosts);
        atoms
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, AtomsState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, AtomsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn touch_positions(&self) {
        self.positions_counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Replaces the real atoms; ghost atoms are discarded.
    pub fn set_positions(&self, positions: Vec<Vector3<f64>>) {
        let mut state = self.write();
        state.n_atoms = positions.len();
        state.positions = positions;
        self.touch_positions();
    }

    /// Moves a single atom (real or ghost).
    pub fn set_position(&self, index: usize, position: Vector3<f64>) -> Result<()> {
        let mut state = self.write();
        let count = state.positions.len();
        let slot = state
            .positions
            .get_mut(index)
            .ok_or(LocatorError::AtomOutOfRange { index, count })?;
        *slot = position;
        self.touch_positions();
        Ok(())
    }

    /// Replaces the ghost atoms, keeping the real ones.
    pub fn set_ghost_positions(&self, ghosts: Vec<Vector3<f64>>) {
        let mut state = self.write();
        let n_atoms = state.n_atoms;
        state.positions.truncate(n_atoms);
        state.positions.extend(ghosts);
        self.touch_positions();
    }

    pub fn set_cell(&self, cell: Cell) {
        self.write().cell = cell;
        self.cell_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn set_domains_per_axis(&self, domains: [usize; 3]) {
        self.write().domains = domains;
        self.cell_counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn positions(&self) -> Vec<Vector3<f64>> {
        self.read().positions.clone()
    }

    /// True while a locator is between `begin` and `end`.
    pub fn in_use(&self) -> bool {
        self.access_depth.load(Ordering::Relaxed) > 0
    }
}

impl ParticleAccessor for Atoms {
    fn begin(&self) {
        self.access_depth.fetch_add(1, Ordering::Relaxed);
    }

    fn end(&self) {
        self.access_depth.fetch_sub(1, Ordering::Relaxed);
    }

    fn number_of_atoms(&self) -> usize {
        self.read().n_atoms
    }

    fn number_of_ghost_atoms(&self) -> usize {
        let state = self.read();
        state.positions.len() - state.n_atoms
    }

    fn copy_positions(&self, out: &mut Vec<Vector3<f64>>) {
        out.clear();
        out.extend_from_slice(&self.read().positions);
    }

    fn copy_positions_of(&self, indices: &[usize], out: &mut Vec<Vector3<f64>>) {
        let state = self.read();
        out.clear();
        out.extend(indices.iter().map(|&i| state.positions[i]));
    }

    fn cell(&self) -> Cell {
        self.read().cell.clone()
    }

    fn domains_per_axis(&self) -> [usize; 3] {
        self.read().domains
    }

    fn cell_counter(&self) -> usize {
        self.cell_counter.load(Ordering::Relaxed)
    }

    fn positions_counter(&self) -> usize {
        self.positions_counter.load(Ordering::Relaxed)
    }
}
