//! Boolean row selection applied to a function output.

use crate::{
    error::{ConstraintError, Result},
    types::{DMatrix, DVector, Scalar},
};

/// A boolean sequence selecting, in order, which rows of an output are exposed.
///
/// The selected row indices are computed once at construction so that
/// selection on the hot path is a plain indexed copy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Mask {
    bits: Vec<bool>,
    selected: Vec<usize>,
}

impl Mask {
    /// Creates a mask from its boolean entries.
    pub fn new(bits: Vec<bool>) -> Self {
        let selected = bits
            .iter()
            .enumerate()
            .filter_map(|(i, &b)| b.then_some(i))
            .collect();
        Self { bits, selected }
    }

    /// The identity mask of length `n`.
    pub fn all(n: usize) -> Self {
        Self::new(vec![true; n])
    }

    /// Length of the unmasked output.
    pub fn len(&self) -> usize {
        self.bits.len()
    }

    /// Whether the mask has no entries at all.
    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Number of exposed rows.
    pub fn count(&self) -> usize {
        self.selected.len()
    }

    /// Whether every row is exposed.
    pub fn is_identity(&self) -> bool {
        self.selected.len() == self.bits.len()
    }

    /// The boolean entries.
    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    /// Indices of the exposed rows, in order.
    pub fn selected(&self) -> &[usize] {
        &self.selected
    }

    /// Checks that the mask covers an output of `rows` rows.
    pub fn check_length(&self, rows: usize) -> Result<()> {
        if self.bits.len() == rows {
            Ok(())
        } else {
            Err(ConstraintError::invalid_mask(format!(
                "mask has {} entries but the output has {rows} rows",
                self.bits.len()
            )))
        }
    }

    /// Copies the exposed entries of `src` into `dst`.
    pub fn select<T: Scalar>(&self, src: &DVector<T>, dst: &mut DVector<T>) {
        debug_assert_eq!(src.len(), self.len());
        debug_assert_eq!(dst.len(), self.count());
        for (k, &i) in self.selected.iter().enumerate() {
            dst[k] = src[i];
        }
    }

    /// Copies the exposed rows of `src` into `dst`.
    pub fn select_rows<T: Scalar>(&self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        debug_assert_eq!(src.nrows(), self.len());
        debug_assert_eq!(dst.nrows(), self.count());
        for (k, &i) in self.selected.iter().enumerate() {
            dst.row_mut(k).copy_from(&src.row(i));
        }
    }
}

impl From<Vec<bool>> for Mask {
    fn from(bits: Vec<bool>) -> Self {
        Self::new(bits)
    }
}
