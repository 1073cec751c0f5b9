//! Owned density grid.

use crate::error::{Result, TransportError};
use crate::mapping::GridSize;

/// A 2-D `f32` density over a [`GridSize`], flattened as `q * ysize + p`.
#[derive(Debug, Clone, PartialEq)]
pub struct PhaseSpace {
    grid: GridSize,
    data: Vec<f32>,
}

impl PhaseSpace {
    /// All-zero density.
    pub fn new(grid: GridSize) -> Self {
        Self {
            grid,
            data: vec![0.0; grid.cells()],
        }
    }

    /// Density with `f(q, p)` at every cell.
    pub fn from_fn<F>(grid: GridSize, mut f: F) -> Self
    where
        F: FnMut(u32, u32) -> f32,
    {
        let data = (0..grid.cells())
            .map(|cell| {
                let (q, p) = grid.coords(cell);
                f(q, p)
            })
            .collect();
        Self { grid, data }
    }

    /// Gaussian centered on the grid, normalized to unit integral.
    ///
    /// Widths are in cells. A zero or negative width gives a single peak
    /// at the center cell.
    pub fn gaussian(grid: GridSize, sigma_q: f64, sigma_p: f64) -> Self {
        let qc = grid.xsize() as f64 / 2.0;
        let pc = grid.ysize() as f64 / 2.0;
        let mut space = Self::from_fn(grid, |q, p| {
            let dq = axis_term(q as f64 - qc, sigma_q);
            let dp = axis_term(p as f64 - pc, sigma_p);
            (-(dq + dp) / 2.0).exp() as f32
        });
        space.normalize();
        space
    }

    /// Wrap an existing buffer.
    pub fn from_vec(grid: GridSize, data: Vec<f32>) -> Result<Self> {
        TransportError::check_len(grid.cells(), data.len())?;
        Ok(Self { grid, data })
    }

    /// Grid geometry.
    pub fn grid(&self) -> GridSize {
        self.grid
    }

    /// Flattened index of `(q, p)`.
    #[inline]
    pub fn index(&self, q: u32, p: u32) -> Option<usize> {
        self.grid
            .index(q as i64, p as i64)
            .map(|index| index as usize)
    }

    /// Value at `(q, p)`.
    pub fn get(&self, q: u32, p: u32) -> Option<f32> {
        self.index(q, p).map(|i| self.data[i])
    }

    /// Mutable value at `(q, p)`.
    pub fn get_mut(&mut self, q: u32, p: u32) -> Option<&mut f32> {
        let i = self.index(q, p)?;
        Some(&mut self.data[i])
    }

    /// Set the value at `(q, p)`.
    pub fn set(&mut self, q: u32, p: u32, value: f32) -> Result<()> {
        let cell = self
            .get_mut(q, p)
            .ok_or(TransportError::CellOutOfRange { q, p })?;
        *cell = value;
        Ok(())
    }

    /// Flattened values.
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable flattened values.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume into the flattened buffer.
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Exchange the values with a same-sized buffer.
    pub(crate) fn swap_data(&mut self, buffer: &mut Vec<f32>) {
        debug_assert_eq!(buffer.len(), self.data.len());
        std::mem::swap(&mut self.data, buffer);
    }

    /// Sum over all cells, accumulated in `f64`.
    pub fn integral(&self) -> f64 {
        self.data.iter().map(|&v| v as f64).sum()
    }

    /// Smallest and largest value.
    pub fn extent(&self) -> (f32, f32) {
        self.data
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
                (lo.min(v), hi.max(v))
            })
    }

    /// Scale to unit integral. A zero density is left unchanged.
    pub fn normalize(&mut self) {
        let total = self.integral();
        if total != 0.0 && total.is_finite() {
            let scale = (1.0 / total) as f32;
            self.data.iter_mut().for_each(|v| *v *= scale);
        }
    }
}

fn axis_term(d: f64, sigma: f64) -> f64 {
    if sigma > 0.0 {
        (d / sigma).powi(2)
    } else if d == 0.0 {
        0.0
    } else {
        f64::INFINITY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let grid = GridSize::new(3, 4).unwrap();
        let mut space = PhaseSpace::new(grid);
        space.set(2, 1, 5.0).unwrap();
        assert_eq!(space.get(2, 1), Some(5.0));
        assert_eq!(space.data()[2 * 4 + 1], 5.0);
        assert_eq!(space.get(3, 0), None);
        assert!(matches!(
            space.set(0, 4, 1.0),
            Err(TransportError::CellOutOfRange { q: 0, p: 4 })
        ));

        *space.get_mut(0, 0).unwrap() = -1.0;
        assert_eq!(space.extent(), (-1.0, 5.0));
        assert_eq!(space.integral(), 4.0);
    }

    #[test]
    fn test_from_vec_checks_length() {
        let grid = GridSize::square(2).unwrap();
        assert!(PhaseSpace::from_vec(grid, vec![0.0; 4]).is_ok());
        assert!(matches!(
            PhaseSpace::from_vec(grid, vec![0.0; 5]),
            Err(TransportError::BufferSizeMismatch {
                expected: 4,
                actual: 5
            })
        ));
    }

    #[test]
    fn test_gaussian() {
        let space = PhaseSpace::gaussian(GridSize::square(32).unwrap(), 3.0, 5.0);
        assert!((space.integral() - 1.0).abs() < 1e-5);

        let (_, peak) = space.extent();
        assert_eq!(space.get(16, 16), Some(peak));
        // Wider along p than along q.
        assert!(space.get(16, 22).unwrap() > space.get(22, 16).unwrap());
    }

    #[test]
    fn test_point_gaussian() {
        let space = PhaseSpace::gaussian(GridSize::square(8).unwrap(), 0.0, 0.0);
        assert_eq!(space.get(4, 4), Some(1.0));
        assert_eq!(space.integral(), 1.0);
    }

    #[test]
    fn test_normalize_zero() {
        let mut space = PhaseSpace::new(GridSize::square(4).unwrap());
        space.normalize();
        assert_eq!(space.integral(), 0.0);
    }
}
