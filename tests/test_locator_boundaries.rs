use nalgebra::Vector3;
use neighborlocator_rs::{
    Atoms, Cell, LocatorConfig, LocatorError, NeighborCellLocator, brute_force_full_neighbors,
};
use std::collections::BTreeSet;
use std::sync::Arc;

fn cell(lengths: [f64; 3], pbc: [bool; 3]) -> Cell {
    Cell::orthorhombic(
        Vector3::new(lengths[0], lengths[1], lengths[2]),
        Vector3::new(pbc[0], pbc[1], pbc[2]),
    )
    .unwrap()
}

#[test]
fn test_cluster_near_free_boundary_does_not_wrap() {
    // x is free. Atom 3 would sit 0.4 from atom 0 if x were periodic.
    let positions = vec![
        Vector3::new(0.2, 0.5, 5.0),
        Vector3::new(0.6, 0.5, 5.0),
        Vector3::new(0.4, 9.8, 5.0),
        Vector3::new(11.8, 0.5, 5.0),
        Vector3::new(11.5, 0.5, 9.9),
        Vector3::new(11.5, 0.5, 0.3),
    ];
    let atoms = Arc::new(Atoms::new(cell([12.0, 10.0, 10.0], [false, true, true]), positions));
    let mut nl = NeighborCellLocator::new(atoms, LocatorConfig::new(2.0)).unwrap();
    nl.check_and_update().unwrap();

    let sorted = |i: usize| {
        let mut v = nl.get_full_neighbor_indices(i, None).unwrap();
        v.sort_unstable();
        v
    };
    // Atom 2 joins the cluster through the periodic y axis.
    assert_eq!(sorted(0), vec![1, 2]);
    assert_eq!(sorted(2), vec![0, 1]);
    assert!(sorted(3).is_empty());
    // Atoms 4 and 5 meet through the periodic z axis.
    assert_eq!(sorted(4), vec![5]);
    assert_eq!(sorted(5), vec![4]);

    for i in 0..6 {
        for d in &nl.get_full_neighbors(i, None).unwrap().displacements {
            assert!(d.x.abs() < 2.0, "atom {} displacement {:?}", i, d);
        }
    }
}

#[test]
fn test_fully_free_cluster() {
    let positions = vec![
        Vector3::new(-3.0, 0.0, 0.0),
        Vector3::new(-2.0, 0.0, 0.0),
        Vector3::new(40.0, 0.0, 0.0),
    ];
    // Non-periodic axes follow the particles wherever they are.
    let atoms = Arc::new(Atoms::new(cell([5.0, 5.0, 5.0], [false; 3]), positions));
    let mut nl = NeighborCellLocator::new(atoms, LocatorConfig::new(1.5)).unwrap();
    nl.check_and_update().unwrap();

    assert_eq!(nl.get_neighbor_indices(0, None).unwrap(), vec![1]);
    assert!(nl.get_full_neighbors(2, None).unwrap().is_empty());
    assert_eq!(nl.wrapped_positions()[2], Vector3::new(40.0, 0.0, 0.0));
}

#[test]
fn test_ghosts_are_neighbors_but_not_sources() {
    // z is split over two domains and this one holds ghosts from both sides.
    // The empty stretches of z are narrower than three cells, so no gap is
    // cut out and z keeps raw coordinates.
    let real = vec![Vector3::new(5.0, 5.0, 0.5), Vector3::new(5.0, 5.0, 4.5)];
    let ghosts = vec![Vector3::new(5.0, 5.0, -0.8), Vector3::new(5.0, 5.0, 5.6)];
    let atoms = Arc::new(Atoms::with_ghosts(cell([10.0; 3], [true; 3]), real, ghosts));
    atoms.set_domains_per_axis([1, 1, 2]);
    let mut nl = NeighborCellLocator::new(atoms, LocatorConfig::new(2.0)).unwrap();
    nl.check_and_update().unwrap();
    assert!(nl.grid().unwrap().axes[2].gap.is_none());

    assert_eq!(nl.get_full_neighbor_indices(0, None).unwrap(), vec![2]);
    assert_eq!(nl.get_full_neighbor_indices(1, None).unwrap(), vec![3]);
    // Ghost indices are above the real ones, so they appear in half lists.
    assert_eq!(nl.get_neighbor_indices(0, None).unwrap(), vec![2]);
    assert_eq!(nl.get_neighbor_indices(1, None).unwrap(), vec![3]);

    assert!(matches!(
        nl.get_full_neighbors(2, None),
        Err(LocatorError::AtomOutOfRange { index: 2, count: 2 })
    ));

    // The decomposed axis never wraps: nothing is near the far end of the cell.
    let far = nl
        .get_full_neighbors_at_point(&Vector3::new(5.0, 5.0, 9.5), None)
        .unwrap();
    assert!(far.is_empty());
}

fn frac(x: f64) -> f64 {
    x - x.floor()
}

/// A domain straddling the periodic seam of x: real atoms in [-1.5, 1.5)
/// and ghosts in [-4, -1.5) and [1.5, 4), in a 20-wide cell.
fn seam_domain() -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
    let real = (0..200)
        .map(|i| {
            let f = i as f64;
            Vector3::new(
                -1.5 + 3.0 * frac(f * 0.618_034),
                20.0 * frac(f * 0.414_214 + 0.1),
                20.0 * frac(f * 0.732_051 + 0.3),
            )
        })
        .collect();
    let ghosts = (0..80)
        .map(|k| {
            let f = k as f64;
            let x = 2.5 * frac(f * 0.381_966 + 0.05);
            Vector3::new(
                if k % 2 == 0 { 1.5 + x } else { -4.0 + x },
                20.0 * frac(f * 0.236_068 + 0.2),
                20.0 * frac(f * 0.154_701 + 0.7),
            )
        })
        .collect();
    (real, ghosts)
}

fn seam_locator(real: Vec<Vector3<f64>>, ghosts: Vec<Vector3<f64>>) -> NeighborCellLocator {
    let atoms = Arc::new(Atoms::with_ghosts(cell([20.0; 3], [true; 3]), real, ghosts));
    atoms.set_domains_per_axis([2, 1, 1]);
    let mut nl = NeighborCellLocator::new(atoms, LocatorConfig::new(2.0)).unwrap();
    nl.check_and_update().unwrap();
    nl
}

fn sorted_lists(nl: &NeighborCellLocator) -> Vec<Vec<usize>> {
    let mut lists = nl.full_neighbor_lists().unwrap();
    for l in &mut lists {
        l.sort_unstable();
    }
    lists
}

#[test]
fn test_decomposed_gap_matches_unwrapped_search() {
    let (real, ghosts) = seam_domain();
    let n_real = real.len();
    let all: Vec<Vector3<f64>> = real.iter().chain(ghosts.iter()).copied().collect();
    let nl = seam_locator(real, ghosts);

    // Everything lives within 0.2 of the seam, so the middle of x is cut out.
    let x = &nl.grid().unwrap().axes[0];
    let gap = x.gap.expect("empty middle of the axis should be a gap");
    assert!(gap.size > 0.5);
    assert_eq!(x.n_cells_true, 9);
    assert!(x.n_cells < x.n_cells_true);

    // With the ghosts in place the domain behaves as if x were not periodic.
    let slab = cell([20.0; 3], [false, true, true]);
    let expected = brute_force_full_neighbors(&slab, &all, 2.0);
    let lists = sorted_lists(&nl);
    assert_eq!(lists.len(), n_real);
    assert!(lists.iter().any(|l| l.iter().any(|&j| j >= n_real)));
    assert_eq!(lists.as_slice(), &expected[..n_real]);
}

#[test]
fn test_decomposed_gap_incremental_move_across_seam() {
    let (real, ghosts) = seam_domain();
    let mut nl = seam_locator(real.clone(), ghosts.clone());
    let atoms = Arc::clone(nl.atoms());

    // Atom 0 starts at x = -1.5 and atom 1 at x > 0; swap their sides.
    assert!(real[0].x < 0.0 && real[1].x > 0.0);
    let moved = [
        (0, Vector3::new(0.4, real[0].y, real[0].z)),
        (1, Vector3::new(-0.6, real[1].y, real[1].z)),
    ];
    for (i, p) in moved {
        atoms.set_position(i, p).unwrap();
    }
    nl.remake_lists_for_modified(&[0, 1]).unwrap();

    let mut real_after = real;
    for (i, p) in moved {
        real_after[i] = p;
    }
    let fresh = seam_locator(real_after, ghosts);

    assert_eq!(nl.grid(), fresh.grid());
    assert_eq!(nl.cell_indices(), fresh.cell_indices());
    let sets = |l: &NeighborCellLocator| -> Vec<BTreeSet<usize>> {
        l.buckets().iter().map(|b| b.iter().copied().collect()).collect()
    };
    assert_eq!(sets(&nl), sets(&fresh));
    assert_eq!(sorted_lists(&nl), sorted_lists(&fresh));
}

#[test]
fn test_boundary_condition_change_rebuilds_layout() {
    let positions = vec![Vector3::new(0.5, 5.0, 5.0), Vector3::new(9.5, 5.0, 5.0)];
    let atoms = Arc::new(Atoms::new(cell([10.0; 3], [true; 3]), positions));
    let mut nl = NeighborCellLocator::new(atoms.clone(), LocatorConfig::new(2.0)).unwrap();
    nl.check_and_update().unwrap();
    assert_eq!(nl.get_full_neighbor_indices(0, None).unwrap(), vec![1]);

    atoms.set_cell(cell([10.0; 3], [false, true, true]));
    assert_eq!(nl.check_neighbor_list(), Ok(true));
    assert!(nl.is_invalid());
    assert_eq!(nl.get_full_neighbors(0, None), Err(LocatorError::StaleStructure));
    nl.check_and_update().unwrap();
    assert!(nl.get_full_neighbor_indices(0, None).unwrap().is_empty());
}

#[test]
fn test_shared_accessor_with_two_cutoffs() {
    let positions: Vec<Vector3<f64>> = (0..27)
        .map(|i| {
            Vector3::new(
                (i % 3) as f64 * 3.0 + 1.0,
                ((i / 3) % 3) as f64 * 3.0 + 1.0,
                (i / 9) as f64 * 3.0 + 1.0,
            )
        })
        .collect();
    let atoms = Arc::new(Atoms::new(cell([9.0; 3], [true; 3]), positions));
    let mut short = NeighborCellLocator::new(atoms.clone(), LocatorConfig::new(3.5)).unwrap();
    let mut long = NeighborCellLocator::new(atoms.clone(), LocatorConfig::new(4.5)).unwrap();
    short.check_and_update().unwrap();
    long.check_and_update().unwrap();
    assert_eq!(Arc::strong_count(&atoms), 3);
    assert!(!atoms.in_use());

    // Simple cubic lattice: 6 nearest neighbors, plus 12 at 3 * sqrt(2).
    for i in 0..27 {
        assert_eq!(short.get_full_neighbors(i, None).unwrap().len(), 6);
        assert_eq!(long.get_full_neighbors(i, None).unwrap().len(), 18);
        assert_eq!(long.get_full_neighbors(i, Some(3.5)).unwrap().len(), 6);
    }
}

#[test]
fn test_cell_thinner_than_cutoff_is_rejected() {
    let positions = vec![Vector3::new(1.0, 1.0, 0.5)];
    let atoms = Arc::new(Atoms::new(cell([10.0, 10.0, 1.5], [true; 3]), positions));
    let mut nl = NeighborCellLocator::new(atoms, LocatorConfig::new(2.0)).unwrap();
    match nl.check_and_update() {
        Err(LocatorError::GeometryTooSmall { axis, .. }) => assert_eq!(axis, 2),
        other => panic!("expected GeometryTooSmall, got {:?}", other),
    }
}

#[test]
fn test_invalid_config_is_rejected() {
    let atoms = Arc::new(Atoms::new(cell([10.0; 3], [true; 3]), vec![]));
    assert!(matches!(
        NeighborCellLocator::new(atoms.clone(), LocatorConfig::new(-1.0)),
        Err(LocatorError::InvalidConfig(_))
    ));
    assert!(matches!(
        NeighborCellLocator::new(atoms, LocatorConfig::new(2.0).with_stencil_reach(3)),
        Err(LocatorError::InvalidConfig(_))
    ));
}
