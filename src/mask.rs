//! Active-cell mask lookup.
//!
//! The mask computation itself happens upstream; the engine only consumes
//! a per-calendar-month grid of active cells and treats it as a pure
//! function of month. Cells outside the mask carry zero loss weight.

use crate::error::Result;
use ndarray::Array2;
use std::path::{Path, PathBuf};

/// Supplier of per-month active-cell masks.
///
/// Implementations must be pure in the month argument: the same month
/// always yields the same grid.
pub trait MaskProvider {
    /// Active-cell mask for a calendar month (1..=12).
    fn active_cell_mask(&self, month: u32) -> Result<Array2<f32>>;
}

/// Mask provider reading per-month `.npy` grids from a directory.
///
/// Expects the upstream stage's layout:
/// `active_grid_cell_mask_{month:02}.npy`.
#[derive(Debug, Clone)]
pub struct NpyMaskProvider {
    dir: PathBuf,
}

impl NpyMaskProvider {
    /// Create a provider rooted at the mask directory.
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Path of one month's mask file.
    pub fn mask_path(&self, month: u32) -> PathBuf {
        self.dir
            .join(format!("active_grid_cell_mask_{:02}.npy", month))
    }
}

impl MaskProvider for NpyMaskProvider {
    fn active_cell_mask(&self, month: u32) -> Result<Array2<f32>> {
        let path = self.mask_path(month);
        let mask: Array2<f32> = ndarray_npy::read_npy(&path)?;
        Ok(mask)
    }
}

/// Mask provider backed by a closure, for tests and synthetic runs.
pub struct FnMaskProvider<F>
where
    F: Fn(u32) -> Array2<f32>,
{
    f: F,
}

impl<F> FnMaskProvider<F>
where
    F: Fn(u32) -> Array2<f32>,
{
    /// Wrap a closure as a mask provider.
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> MaskProvider for FnMaskProvider<F>
where
    F: Fn(u32) -> Array2<f32>,
{
    fn active_cell_mask(&self, month: u32) -> Result<Array2<f32>> {
        Ok((self.f)(month))
    }
}
