use crate::cell::Cell;
use nalgebra::Vector3;

pub const NUM_TRANSLATIONS: usize = 27;

/// Per-axis weights used to combine the axis digits into one translation index.
pub const AXIS_WEIGHTS: [usize; 3] = [1, 3, 9];

/// Digit of a single-axis translation: 0 -> 0, +1 -> 1, -1 -> 2.
#[inline]
pub fn axis_digit(t: i32) -> usize {
    match t {
        0 => 0,
        1 => 1,
        -1 => 2,
        _ => panic!("translation component {} outside [-1, 1]", t),
    }
}

/// The 27 periodic-image translations, in units of lattice vectors.
///
/// Index 0 is the identity. An index is `d0 + 3 d1 + 9 d2` where `d_i` is
/// the [`axis_digit`] of the translation along axis `i`, so wraps along
/// several axes compose by adding their contributions.
#[derive(Clone, Debug)]
pub struct TranslationTable {
    vectors: [Vector3<i32>; NUM_TRANSLATIONS],
}

impl TranslationTable {
    pub fn new() -> Self {
        const DIGIT_VALUE: [i32; 3] = [0, 1, -1];
        let mut vectors = [Vector3::zeros(); NUM_TRANSLATIONS];
        for (k, v) in vectors.iter_mut().enumerate() {
            *v = Vector3::new(
                DIGIT_VALUE[k % 3],
                DIGIT_VALUE[(k / 3) % 3],
                DIGIT_VALUE[k / 9],
            );
        }
        Self { vectors }
    }

    pub fn get(&self, index: usize) -> &Vector3<i32> {
        &self.vectors[index]
    }

    pub fn index_of(t: &Vector3<i32>) -> usize {
        (0..3).map(|a| axis_digit(t[a]) * AXIS_WEIGHTS[a]).sum()
    }

    /// Index of the opposite translation.
    pub fn inverse(&self, index: usize) -> usize {
        Self::index_of(&(-self.vectors[index]))
    }

    /// Cartesian translation vectors for a given cell.
    pub fn cartesian(&self, cell: &Cell) -> [Vector3<f64>; NUM_TRANSLATIONS] {
        let mut out = [Vector3::zeros(); NUM_TRANSLATIONS];
        for (o, t) in out.iter_mut().zip(self.vectors.iter()) {
            *o = cell.lattice_translation(t);
        }
        out
    }
}

impl Default for TranslationTable {
    fn default() -> Self {
        Self::new()
    }
}
