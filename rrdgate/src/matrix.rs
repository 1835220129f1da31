//! Zero-copy ownership of engine-allocated value matrices.
//!
//! Fetch and xport replies carry a row-major matrix of `f64` that the engine
//! allocated. Copying it on every call would dominate the cost of wide or
//! long queries, so the binding wraps the allocation in a [`ForeignMatrix`]
//! and hands ownership to the caller instead.
//!
//! # Release
//!
//! The allocation is released exactly once: either by
//! [`ForeignMatrix::release`] (which consumes the handle) or when the handle
//! is dropped. Because release takes `self` by value, reading after release
//! and releasing twice do not compile.
//!
//! ```compile_fail
//! # fn demo(m: rrdgate::matrix::ForeignMatrix) {
//! m.release();
//! let _ = m.as_slice(); // use of moved value
//! # }
//! ```

use std::ffi::c_void;
use std::fmt;
use std::ptr::NonNull;
use std::slice;

use crate::engine::Release;
use crate::error::{Result, RrdError};

/// An engine allocation awaiting release.
///
/// Owns the pointer from the moment the engine returns it, so early-return
/// paths (bad bounds, size overflow) cannot leak it.
pub(crate) struct ForeignAlloc {
    ptr: Option<NonNull<f64>>,
    release: Release,
}

impl ForeignAlloc {
    /// Takes ownership of `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be null or an unreleased engine allocation that `release`
    /// frees, and no one else may release it.
    pub(crate) unsafe fn new(ptr: *mut f64, release: Release) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            release,
        }
    }

    /// Turns the allocation into a matrix of `rows × columns` values.
    ///
    /// # Safety
    ///
    /// The allocation must hold at least `rows * columns` initialized `f64`s.
    ///
    /// # Errors
    ///
    /// Returns an engine error if the size overflows, or if the engine
    /// reported a non-empty matrix without a buffer. The allocation is
    /// released on error.
    pub(crate) unsafe fn into_matrix(self, rows: usize, columns: usize) -> Result<ForeignMatrix> {
        let len = rows.checked_mul(columns).ok_or_else(|| {
            RrdError::engine(format!("matrix of {rows} rows × {columns} columns overflows"))
        })?;
        if len > 0 && self.ptr.is_none() {
            return Err(RrdError::engine(format!(
                "engine returned no buffer for {rows} rows × {columns} columns"
            )));
        }
        Ok(ForeignMatrix {
            alloc: self,
            rows,
            columns,
        })
    }
}

impl Drop for ForeignAlloc {
    fn drop(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            tracing::trace!(ptr = ?ptr, "releasing engine matrix");
            // SAFETY: The pointer is an engine allocation owned solely by this
            // value, and `take()` guarantees it is released only once.
            unsafe { (self.release)(ptr.as_ptr().cast::<c_void>()) };
        }
    }
}

/// A row-major `f64` matrix owned by the caller but allocated by the engine.
///
/// Rows are time steps; columns are data sources (fetch) or exported
/// definitions (xport).
pub struct ForeignMatrix {
    alloc: ForeignAlloc,
    rows: usize,
    columns: usize,
}

// SAFETY: The matrix exclusively owns its allocation and never mutates it;
// the engine's deallocator (`free`) may run on any thread.
unsafe impl Send for ForeignMatrix {}

// SAFETY: Shared access is read-only.
unsafe impl Sync for ForeignMatrix {}

impl ForeignMatrix {
    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn columns(&self) -> usize {
        self.columns
    }

    /// Total number of values.
    pub fn len(&self) -> usize {
        self.rows * self.columns
    }

    /// Whether the matrix holds no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the values without copying.
    pub fn as_slice(&self) -> &[f64] {
        match self.alloc.ptr {
            // SAFETY: `into_matrix` checked that a non-empty matrix has a
            // buffer of at least `len` values, owned by us until drop.
            Some(ptr) => unsafe { slice::from_raw_parts(ptr.as_ptr(), self.len()) },
            None => &[],
        }
    }

    /// Returns the value at `column` of `row`.
    pub fn value_at(&self, column: usize, row: usize) -> Option<f64> {
        if column >= self.columns || row >= self.rows {
            return None;
        }
        self.as_slice().get(row * self.columns + column).copied()
    }

    /// Borrows one row.
    pub fn row(&self, row: usize) -> Option<&[f64]> {
        if row >= self.rows {
            return None;
        }
        let start = row * self.columns;
        self.as_slice().get(start..start + self.columns)
    }

    /// Iterates over rows.
    pub fn iter_rows(&self) -> impl Iterator<Item = &[f64]> {
        (0..self.rows).filter_map(move |r| self.row(r))
    }

    /// Copies the values into a native vector.
    pub fn to_vec(&self) -> Vec<f64> {
        self.as_slice().to_vec()
    }

    /// Releases the engine allocation.
    ///
    /// Dropping the matrix has the same effect; this spells it out at the
    /// call site.
    pub fn release(self) {
        drop(self);
    }
}

impl fmt::Debug for ForeignMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ForeignMatrix")
            .field("rows", &self.rows)
            .field("columns", &self.columns)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::release_with_free;

    fn malloc_matrix(values: &[f64]) -> *mut f64 {
        // SAFETY: Non-zero allocation sized for `values`.
        let ptr = unsafe { libc::malloc(std::mem::size_of_val(values).max(1)) }.cast::<f64>();
        assert!(!ptr.is_null());
        // SAFETY: `ptr` has room for `values.len()` doubles.
        unsafe { std::ptr::copy_nonoverlapping(values.as_ptr(), ptr, values.len()) };
        ptr
    }

    fn matrix(values: &[f64], rows: usize, columns: usize) -> ForeignMatrix {
        let ptr = malloc_matrix(values);
        // SAFETY: Fresh malloc'd buffer holding `rows * columns` values.
        unsafe { ForeignAlloc::new(ptr, release_with_free).into_matrix(rows, columns) }.unwrap()
    }

    #[test]
    fn test_row_major_access() {
        let m = matrix(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.columns(), 2);
        assert_eq!(m.value_at(0, 0), Some(1.0));
        assert_eq!(m.value_at(1, 0), Some(2.0));
        assert_eq!(m.value_at(0, 2), Some(5.0));
        assert_eq!(m.value_at(2, 0), None);
        assert_eq!(m.value_at(0, 3), None);
        assert_eq!(m.row(1), Some(&[3.0, 4.0][..]));
        assert_eq!(m.iter_rows().count(), 3);
        m.release();
    }

    #[test]
    fn test_to_vec_is_independent() {
        let m = matrix(&[1.0, 2.0], 1, 2);
        let mut copy = m.to_vec();
        copy[0] = 99.0;
        assert_eq!(m.to_vec(), vec![1.0, 2.0]);
        assert_eq!(m.to_vec(), m.to_vec());
    }

    #[test]
    fn test_empty_matrix_without_buffer() {
        // SAFETY: Null is accepted when nothing is owned, and an empty matrix
        // reads nothing.
        let m = unsafe {
            ForeignAlloc::new(std::ptr::null_mut(), release_with_free).into_matrix(0, 3)
        }
        .unwrap();
        assert!(m.is_empty());
        assert!(m.as_slice().is_empty());
        assert_eq!(m.iter_rows().count(), 0);
    }

    #[test]
    fn test_missing_buffer_is_an_engine_error() {
        // SAFETY: Null is accepted when nothing is owned.
        let alloc = unsafe { ForeignAlloc::new(std::ptr::null_mut(), release_with_free) };
        // SAFETY: No buffer to read.
        let err = unsafe { alloc.into_matrix(2, 2) }.unwrap_err();
        assert!(err.as_engine().is_some());
    }

    #[test]
    fn test_overflowing_size_releases_buffer() {
        let ptr = malloc_matrix(&[0.0]);
        // SAFETY: Fresh malloc'd buffer; `into_matrix` fails before reading.
        let err = unsafe { ForeignAlloc::new(ptr, release_with_free).into_matrix(usize::MAX, 2) }
            .unwrap_err();
        assert!(err.to_string().contains("overflows"));
    }
}
