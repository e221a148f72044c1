use crate::error::{LocatorError, Result};
use nalgebra::{Matrix3, Vector3};

/// Simulation cell. Lattice vectors are the columns of `h`, so that
/// `cart = h * frac`.
#[derive(Clone, Debug, PartialEq)]
pub struct Cell {
    h: Matrix3<f64>,
    h_inv: Matrix3<f64>,
    pbc: Vector3<bool>,
}

impl Cell {
    pub fn new(h: Matrix3<f64>, pbc: Vector3<bool>) -> Result<Self> {
        let h_inv = h.try_inverse().ok_or(LocatorError::SingularCell)?;
        Ok(Self { h, h_inv, pbc })
    }

    /// Orthorhombic cell with the given edge lengths.
    pub fn orthorhombic(lengths: Vector3<f64>, pbc: Vector3<bool>) -> Result<Self> {
        Self::new(Matrix3::from_diagonal(&lengths), pbc)
    }

    pub fn to_fractional(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        self.h_inv * cart
    }

    pub fn to_cartesian(&self, frac: &Vector3<f64>) -> Vector3<f64> {
        self.h * frac
    }

    pub fn h(&self) -> &Matrix3<f64> {
        &self.h
    }

    pub fn h_inv(&self) -> &Matrix3<f64> {
        &self.h_inv
    }

    pub fn pbc(&self) -> &Vector3<bool> {
        &self.pbc
    }

    /// Distance between each pair of opposite faces, `1 / |row_i(h_inv)|`.
    pub fn heights(&self) -> Vector3<f64> {
        Vector3::new(
            1.0 / self.h_inv.row(0).norm(),
            1.0 / self.h_inv.row(1).norm(),
            1.0 / self.h_inv.row(2).norm(),
        )
    }

    /// Cartesian vector of an integer combination of lattice vectors.
    pub fn lattice_translation(&self, t: &Vector3<i32>) -> Vector3<f64> {
        self.h * Vector3::new(t.x as f64, t.y as f64, t.z as f64)
    }

    /// Folds a position back into the primary cell along the periodic axes.
    pub fn wrap(&self, cart: &Vector3<f64>) -> Vector3<f64> {
        let mut frac = self.to_fractional(cart);
        for axis in 0..3 {
            if self.pbc[axis] {
                frac[axis] -= frac[axis].floor();
            }
        }
        self.to_cartesian(&frac)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_coordinate_transformation() {
        let cell = Cell::orthorhombic(Vector3::new(10.0, 5.0, 4.0), Vector3::new(true, true, true))
            .unwrap();

        let cart = Vector3::new(5.0, 1.0, 3.0);
        let frac = cell.to_fractional(&cart);

        assert_relative_eq!(frac.x, 0.5);
        assert_relative_eq!(frac.y, 0.2);
        assert_relative_eq!(frac.z, 0.75);

        let back = cell.to_cartesian(&frac);
        assert_relative_eq!(back, cart, epsilon = 1e-12);
    }

    #[test]
    fn test_triclinic_heights() {
        // Second lattice vector tilted into x; the y-height is unchanged.
        let h = Matrix3::new(10.0, 3.0, 0.0, 0.0, 8.0, 0.0, 0.0, 0.0, 6.0);
        let cell = Cell::new(h, Vector3::new(true, true, true)).unwrap();
        let heights = cell.heights();

        assert_relative_eq!(heights.y, 8.0, epsilon = 1e-12);
        assert_relative_eq!(heights.z, 6.0, epsilon = 1e-12);
        // Distance between the faces spanned by (a2, a3) is shorter than |a1|.
        assert!(heights.x < 10.0);
        assert_relative_eq!(heights.x, 10.0 * 8.0 / (73.0f64).sqrt(), epsilon = 1e-12);
    }

    #[test]
    fn test_singular_cell() {
        let cell = Cell::new(Matrix3::zeros(), Vector3::new(true, true, true));
        assert_eq!(cell, Err(LocatorError::SingularCell));
    }

    #[test]
    fn test_lattice_translation() {
        let h = Matrix3::new(10.0, 2.0, 0.0, 0.0, 10.0, 0.0, 0.0, 0.0, 10.0);
        let cell = Cell::new(h, Vector3::new(true, true, true)).unwrap();
        let t = cell.lattice_translation(&Vector3::new(1, -1, 0));
        assert_relative_eq!(t, Vector3::new(8.0, -10.0, 0.0), epsilon = 1e-12);
    }

    #[test]
    fn test_mixed_pbc_wrapping() {
        let cell = Cell::orthorhombic(Vector3::repeat(10.0), Vector3::new(true, false, true))
            .unwrap();

        let wrapped = cell.wrap(&Vector3::new(15.0, 15.0, -2.0));

        assert_relative_eq!(wrapped.x, 5.0); // Periodic
        assert_relative_eq!(wrapped.y, 15.0); // Free
        assert_relative_eq!(wrapped.z, 8.0); // Periodic
    }
}
