//! Ordered index sets over configuration and velocity vectors.
//!
//! A [`BlockIndices`] selects a sub-vector of a configuration (or of a
//! tangent vector) as a list of disjoint `[start, start + len)` segments,
//! kept in declaration order. All gather/scatter operations copy whole
//! segments at once, so selecting a few contiguous joints out of a large
//! Jacobian costs one block copy per segment instead of one per entry.
//!
//! Segments are normalized on construction: empty segments are dropped and
//! a segment that starts exactly where the previous one ends is merged into
//! it. Overlapping segments are rejected.

use crate::{
    error::{ConstraintError, Result},
    types::{DMatrix, DVector, Scalar},
};
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use std::fmt;

/// A contiguous interval of indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Segment {
    /// First index of the interval
    pub start: usize,
    /// Number of indices
    pub len: usize,
}

impl Segment {
    /// Creates a segment `[start, start + len)`.
    pub const fn new(start: usize, len: usize) -> Self {
        Self { start, len }
    }

    /// One past the last index.
    pub const fn end(&self) -> usize {
        self.start + self.len
    }

    fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end() && other.start < self.end()
    }
}

/// An ordered set of disjoint index segments.
#[derive(Debug, Clone, PartialEq, Eq, Default, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BlockIndices {
    segments: Vec<Segment>,
    count: usize,
}

impl BlockIndices {
    /// The empty index set.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The contiguous set `[start, start + len)`.
    pub fn range(start: usize, len: usize) -> Self {
        if len == 0 {
            return Self::empty();
        }
        Self {
            segments: vec![Segment::new(start, len)],
            count: len,
        }
    }

    /// Builds an index set from segments, in order.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndexSet` if two segments overlap.
    pub fn new<I>(segments: I) -> Result<Self>
    where
        I: IntoIterator<Item = Segment>,
    {
        let mut result = Self::empty();
        for segment in segments {
            result.push(segment)?;
        }
        Ok(result)
    }

    /// Builds an index set from individual indices, in order.
    pub fn from_indices(indices: &[usize]) -> Result<Self> {
        Self::new(indices.iter().map(|&i| Segment::new(i, 1)))
    }

    fn push(&mut self, segment: Segment) -> Result<()> {
        if segment.len == 0 {
            return Ok(());
        }
        if let Some(existing) = self.segments.iter().find(|s| s.overlaps(&segment)) {
            return Err(ConstraintError::invalid_index_set(format!(
                "segment [{}, {}) overlaps [{}, {})",
                segment.start,
                segment.end(),
                existing.start,
                existing.end()
            )));
        }
        self.count += segment.len;
        match self.segments.last_mut() {
            Some(last) if last.end() == segment.start => last.len += segment.len,
            _ => self.segments.push(segment),
        }
        Ok(())
    }

    /// The normalized segments.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of selected indices.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether no index is selected.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Iterates over the selected indices in order.
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        self.segments.iter().flat_map(|s| s.start..s.end())
    }

    /// Selected indices collected into a vector.
    pub fn to_vec(&self) -> Vec<usize> {
        self.iter().collect()
    }

    /// Whether `index` is selected.
    pub fn contains(&self, index: usize) -> bool {
        self.segments
            .iter()
            .any(|s| s.start <= index && index < s.end())
    }

    /// Position of `index` inside the compressed vector, if selected.
    pub fn position_of(&self, index: usize) -> Option<usize> {
        let mut offset = 0;
        for s in &self.segments {
            if s.start <= index && index < s.end() {
                return Some(offset + index - s.start);
            }
            offset += s.len;
        }
        None
    }

    /// Checks that every index is below `dim`.
    pub fn check_bounds(&self, dim: usize, what: &str) -> Result<()> {
        match self.segments.iter().find(|s| s.end() > dim) {
            Some(s) => Err(ConstraintError::invalid_index_set(format!(
                "{what}: segment [{}, {}) out of bounds for dimension {dim}",
                s.start,
                s.end()
            ))),
            None => Ok(()),
        }
    }

    /// Whether the two sets share at least one index.
    pub fn intersects(&self, other: &Self) -> bool {
        self.segments
            .iter()
            .any(|a| other.segments.iter().any(|b| a.overlaps(b)))
    }

    /// Union of two disjoint sets, `self` first.
    ///
    /// # Errors
    ///
    /// Returns `OverlappingIndices` if the sets share an index.
    pub fn union(&self, other: &Self) -> Result<Self> {
        if self.intersects(other) {
            return Err(ConstraintError::overlapping(self.to_string(), other.to_string()));
        }
        let mut result = self.clone();
        for s in &other.segments {
            result.push(*s)?;
        }
        Ok(result)
    }

    /// Same indices in increasing order.
    pub fn sorted(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.sort_by_key(|s| s.start);
        let mut result = Self::empty();
        for s in segments {
            // Disjoint by construction, sorting cannot create overlaps.
            result.count += s.len;
            match result.segments.last_mut() {
                Some(last) if last.end() == s.start => last.len += s.len,
                _ => result.segments.push(s),
            }
        }
        result
    }

    /// Indices of `[0, dim)` that are not selected, in increasing order.
    pub fn complement(&self, dim: usize) -> Self {
        let sorted = self.sorted();
        let mut result = Self::empty();
        let mut cursor = 0;
        for s in &sorted.segments {
            if s.start >= dim {
                break;
            }
            if s.start > cursor {
                result.segments.push(Segment::new(cursor, s.start - cursor));
                result.count += s.start - cursor;
            }
            cursor = cursor.max(s.end());
        }
        if cursor < dim {
            result.segments.push(Segment::new(cursor, dim - cursor));
            result.count += dim - cursor;
        }
        result
    }

    /// Copies the selected entries of `src` into `dst` (`dst.len() == self.len()`).
    pub fn gather<T: Scalar>(&self, src: &DVector<T>, dst: &mut DVector<T>) {
        debug_assert_eq!(dst.len(), self.count);
        let mut k = 0;
        for s in &self.segments {
            dst.rows_mut(k, s.len).copy_from(&src.rows(s.start, s.len));
            k += s.len;
        }
    }

    /// Writes `src` (`src.len() == self.len()`) into the selected entries of `dst`.
    pub fn scatter<T: Scalar>(&self, src: &DVector<T>, dst: &mut DVector<T>) {
        debug_assert_eq!(src.len(), self.count);
        let mut k = 0;
        for s in &self.segments {
            dst.rows_mut(s.start, s.len).copy_from(&src.rows(k, s.len));
            k += s.len;
        }
    }

    /// Copies the selected rows of `src` into `dst`.
    pub fn gather_rows<T: Scalar>(&self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        debug_assert_eq!(dst.nrows(), self.count);
        let mut k = 0;
        for s in &self.segments {
            dst.rows_mut(k, s.len).copy_from(&src.rows(s.start, s.len));
            k += s.len;
        }
    }

    /// Writes the rows of `src` into the selected rows of `dst`.
    pub fn scatter_rows<T: Scalar>(&self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        debug_assert_eq!(src.nrows(), self.count);
        let mut k = 0;
        for s in &self.segments {
            dst.rows_mut(s.start, s.len).copy_from(&src.rows(k, s.len));
            k += s.len;
        }
    }

    /// Copies the selected rows of `src` into the same rows of `dst`.
    pub fn copy_rows<T: Scalar>(&self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        for s in &self.segments {
            dst.rows_mut(s.start, s.len).copy_from(&src.rows(s.start, s.len));
        }
    }

    /// Copies the selected columns of `src` into `dst`.
    pub fn gather_columns<T: Scalar>(&self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        debug_assert_eq!(dst.ncols(), self.count);
        let mut k = 0;
        for s in &self.segments {
            dst.columns_mut(k, s.len)
                .copy_from(&src.columns(s.start, s.len));
            k += s.len;
        }
    }

    /// Writes the columns of `src` into the selected columns of `dst`.
    pub fn scatter_columns<T: Scalar>(&self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        debug_assert_eq!(src.ncols(), self.count);
        let mut k = 0;
        for s in &self.segments {
            dst.columns_mut(s.start, s.len)
                .copy_from(&src.columns(k, s.len));
            k += s.len;
        }
    }

    /// Zeroes the selected rows of `m`.
    pub fn zero_rows<T: Scalar>(&self, m: &mut DMatrix<T>) {
        for s in &self.segments {
            m.rows_mut(s.start, s.len).fill(T::zero());
        }
    }

    /// Zeroes the selected columns of `m`.
    pub fn zero_columns<T: Scalar>(&self, m: &mut DMatrix<T>) {
        for s in &self.segments {
            m.columns_mut(s.start, s.len).fill(T::zero());
        }
    }

    /// Copies the block `src[self, cols]` into `dst`.
    pub fn gather_block<T: Scalar>(&self, cols: &Self, src: &DMatrix<T>, dst: &mut DMatrix<T>) {
        debug_assert_eq!(dst.shape(), (self.count, cols.count));
        let mut r = 0;
        for rs in &self.segments {
            let mut c = 0;
            for cs in &cols.segments {
                dst.view_mut((r, c), (rs.len, cs.len))
                    .copy_from(&src.view((rs.start, cs.start), (rs.len, cs.len)));
                c += cs.len;
            }
            r += rs.len;
        }
    }
}

impl fmt::Display for BlockIndices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, s) in self.segments.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "[{}, {})", s.start, s.end())?;
        }
        write!(f, "}}")
    }
}
