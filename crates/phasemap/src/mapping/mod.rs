//! Transport map construction.
//!
//! A transport map is a precomputed sparse resampling operator: for every
//! destination cell it stores a fixed number of `(source cell, weight)` pairs
//! derived from a continuous coordinate transform.
//!
//! # Modules
//!
//! - [`coordinates`]: destination cell to continuous source coordinate
//! - [`interpolation`]: 1-D Lagrange weights and their tensor product
//! - [`transport`]: the per-cell stencil table

pub mod coordinates;
pub mod interpolation;
pub mod transport;

use crate::error::{Result, TransportError};

pub use coordinates::{CoordinateConvention, CoordinateMapper};
pub use interpolation::{tensor_product, InterpolationOrder, MAX_POINTS};
pub use transport::{StencilEntry, TransportMap, NO_CLAMP};

/// Grid geometry shared by maps and distribution buffers.
///
/// Cells are flattened as `q * ysize + p`, where `q` runs along the first
/// axis (`xsize` cells) and `p` along the second (`ysize` cells).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GridSize {
    xsize: u32,
    ysize: u32,
}

impl GridSize {
    /// Create a grid, rejecting empty grids and cell counts beyond `u32`.
    pub fn new(xsize: u32, ysize: u32) -> Result<Self> {
        let cells = xsize as u64 * ysize as u64;
        if cells == 0 || cells > u32::MAX as u64 {
            return Err(TransportError::InvalidGrid { xsize, ysize });
        }
        Ok(Self { xsize, ysize })
    }

    /// Create a square grid.
    pub fn square(size: u32) -> Result<Self> {
        Self::new(size, size)
    }

    /// Size along the first axis.
    #[inline]
    pub fn xsize(&self) -> u32 {
        self.xsize
    }

    /// Size along the second axis.
    #[inline]
    pub fn ysize(&self) -> u32 {
        self.ysize
    }

    /// Total number of cells.
    #[inline]
    pub fn cells(&self) -> usize {
        self.xsize as usize * self.ysize as usize
    }

    /// Flattened index of `(q, p)`, or `None` if out of range.
    #[inline]
    pub fn index(&self, q: i64, p: i64) -> Option<u32> {
        if q < 0 || p < 0 || q >= self.xsize as i64 || p >= self.ysize as i64 {
            return None;
        }
        Some(q as u32 * self.ysize + p as u32)
    }

    /// Split a flattened index into `(q, p)`.
    #[inline]
    pub fn coords(&self, cell: usize) -> (u32, u32) {
        let ysize = self.ysize as usize;
        ((cell / ysize) as u32, (cell % ysize) as u32)
    }
}
