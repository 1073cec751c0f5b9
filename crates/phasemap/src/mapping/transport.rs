//! Precomputed per-cell interpolation stencils.
//!
//! ## Layout
//!
//! The stencil table is one flat array of `cells * N*N` entries. Cell `c`
//! owns entries `c*N*N .. (c+1)*N*N`; entry `i*N + j` is the tap at row
//! offset `i` and column offset `j`:
//!
//! ```text
//!   source row  id - off + i        (off = (N-1)/2)
//!   source col  jd - off + j
//!   weight      icq[i] * icp[j]
//! ```
//!
//! Taps that fall outside the grid are stored as [`StencilEntry::DROPPED`],
//! so applying the map never branches on bounds. Density transported across
//! the edge is lost, never reflected or wrapped.

use std::sync::Arc;
use std::time::Instant;

use rayon::prelude::*;

use super::coordinates::{CoordinateConvention, CoordinateMapper};
use super::interpolation::{tensor_product, InterpolationOrder, MAX_POINTS};
use super::GridSize;
use crate::error::Result;

/// Clamp-tap sentinel for cells without any transport contribution.
pub const NO_CLAMP: u32 = u32::MAX;

/// One `(source cell, weight)` pair of a stencil.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct StencilEntry {
    /// Flattened source cell index (0 for dropped taps).
    pub index: u32,
    /// Interpolation weight (0 for dropped taps).
    pub weight: f64,
}

impl StencilEntry {
    /// A tap that contributes nothing.
    pub const DROPPED: StencilEntry = StencilEntry {
        index: 0,
        weight: 0.0,
    };
}

/// Sparse resampling operator for one rotation angle.
///
/// Immutable once built; [`rebuild`](Self::rebuild) replaces the whole table.
#[derive(Debug, Clone)]
pub struct TransportMap {
    grid: GridSize,
    order: InterpolationOrder,
    convention: CoordinateConvention,
    angle: f64,
    stencils: Vec<StencilEntry>,
    /// Inner 2x2 source cells per destination cell (orders >= 3 only).
    clamp_taps: Vec<[u32; 4]>,
}

impl TransportMap {
    /// Build the map for a rotation by `angle` radians.
    pub fn rotation(
        grid: GridSize,
        order: InterpolationOrder,
        convention: CoordinateConvention,
        angle: f64,
    ) -> Result<Self> {
        let start = Instant::now();
        let (stencils, clamp_taps) = build_tables(grid, order, convention, angle);

        tracing::debug!(
            cells = grid.cells(),
            order = order.points(),
            %convention,
            angle,
            elapsed_us = start.elapsed().as_micros() as u64,
            "built transport map"
        );

        Ok(Self {
            grid,
            order,
            convention,
            angle,
            stencils,
            clamp_taps,
        })
    }

    /// Build the map for an order given as a plain number of points.
    pub fn rotation_with_points(
        grid: GridSize,
        points: u32,
        convention: CoordinateConvention,
        angle: f64,
    ) -> Result<Self> {
        let order = InterpolationOrder::try_from(points)?;
        Self::rotation(grid, order, convention, angle)
    }

    /// Replace the table with the one for a new angle.
    ///
    /// The new table is built completely before the old one is dropped.
    pub fn rebuild(&mut self, angle: f64) {
        let (stencils, clamp_taps) = build_tables(self.grid, self.order, self.convention, angle);
        self.stencils = stencils;
        self.clamp_taps = clamp_taps;
        self.angle = angle;
    }

    /// Wrap in an `Arc` for sharing between backends.
    pub fn into_shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Grid geometry.
    pub fn grid(&self) -> GridSize {
        self.grid
    }

    /// Interpolation order.
    pub fn order(&self) -> InterpolationOrder {
        self.order
    }

    /// Coordinate convention.
    pub fn convention(&self) -> CoordinateConvention {
        self.convention
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Number of destination cells.
    pub fn cells(&self) -> usize {
        self.grid.cells()
    }

    /// Stencil entries per cell.
    pub fn taps_per_cell(&self) -> usize {
        self.order.taps()
    }

    /// The stencil of one destination cell.
    ///
    /// # Panics
    ///
    /// Panics if `cell >= self.cells()`.
    pub fn stencil(&self, cell: usize) -> &[StencilEntry] {
        let taps = self.taps_per_cell();
        &self.stencils[cell * taps..(cell + 1) * taps]
    }

    /// All stencil entries, cell-major.
    pub fn entries(&self) -> &[StencilEntry] {
        &self.stencils
    }

    /// Inner clamp taps per cell; empty for orders below 3.
    pub fn clamp_taps(&self) -> &[[u32; 4]] {
        &self.clamp_taps
    }

    /// Sum of the weights of one cell's stencil.
    pub fn weight_sum(&self, cell: usize) -> f64 {
        self.stencil(cell).iter().map(|e| e.weight).sum()
    }
}

fn build_tables(
    grid: GridSize,
    order: InterpolationOrder,
    convention: CoordinateConvention,
    angle: f64,
) -> (Vec<StencilEntry>, Vec<[u32; 4]>) {
    let mapper = CoordinateMapper::new(grid, convention, angle);
    let taps = order.taps();
    let mut stencils = vec![StencilEntry::DROPPED; grid.cells() * taps];
    let mut clamp_taps = if order.can_overshoot() {
        vec![[NO_CLAMP; 4]; grid.cells()]
    } else {
        Vec::new()
    };

    if order.can_overshoot() {
        stencils
            .par_chunks_mut(taps)
            .zip(clamp_taps.par_iter_mut())
            .enumerate()
            .for_each(|(cell, (stencil, clamp))| {
                if let Some(base) = build_cell(grid, order, &mapper, cell, stencil) {
                    *clamp = inner_taps(grid, base);
                }
            });
    } else {
        stencils
            .par_chunks_mut(taps)
            .enumerate()
            .for_each(|(cell, stencil)| {
                build_cell(grid, order, &mapper, cell, stencil);
            });
    }

    (stencils, clamp_taps)
}

/// Fill one cell's stencil. Returns the base source cell `(id, jd)` if the
/// cell receives any contribution.
fn build_cell(
    grid: GridSize,
    order: InterpolationOrder,
    mapper: &CoordinateMapper,
    cell: usize,
    stencil: &mut [StencilEntry],
) -> Option<(i64, i64)> {
    let (q, p) = grid.coords(cell);
    let (qs, ps) = mapper.map(q, p);
    if !qs.is_finite() || !ps.is_finite() {
        return None;
    }

    let (id, xiq) = split(qs);
    let (jd, xip) = split(ps);
    grid.index(id, jd)?;

    let n = order.points();
    let off = order.offset() as i64;
    let icq = order.coefficients(xiq);
    let icp = order.coefficients(xip);
    let mut weights = [0.0; MAX_POINTS * MAX_POINTS];
    tensor_product(&icq[..n], &icp[..n], &mut weights[..n * n]);

    for i in 0..n {
        let i0 = id + i as i64 - off;
        for j in 0..n {
            let j0 = jd + j as i64 - off;
            let k = i * n + j;
            stencil[k] = match grid.index(i0, j0) {
                Some(index) => StencilEntry {
                    index,
                    weight: weights[k],
                },
                None => StencilEntry::DROPPED,
            };
        }
    }

    Some((id, jd))
}

/// Source cells `(id..=id+1) x (jd..=jd+1)`; out-of-range ones fall back to the base.
fn inner_taps(grid: GridSize, (id, jd): (i64, i64)) -> [u32; 4] {
    let base = grid.index(id, jd).unwrap_or(NO_CLAMP);
    let tap = |dq: i64, dp: i64| grid.index(id + dq, jd + dp).unwrap_or(base);
    [tap(0, 0), tap(0, 1), tap(1, 0), tap(1, 1)]
}

/// Floor split of a coordinate into base cell and fractional offset in `[0, 1)`.
#[inline]
fn split(coord: f64) -> (i64, f64) {
    let base = coord.floor();
    (base as i64, coord - base)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(size: u32, order: InterpolationOrder, angle: f64) -> TransportMap {
        TransportMap::rotation(
            GridSize::square(size).unwrap(),
            order,
            CoordinateConvention::PixelCentered,
            angle,
        )
        .unwrap()
    }

    #[test]
    fn test_split() {
        assert_eq!(split(2.25), (2, 0.25));
        assert_eq!(split(3.0), (3, 0.0));
        let (base, frac) = split(-0.25);
        assert_eq!(base, -1);
        assert!((frac - 0.75).abs() < 1e-15);
    }

    #[test]
    fn test_table_sizes() {
        for order in InterpolationOrder::ALL {
            let m = map(6, order, 0.3);
            assert_eq!(m.entries().len(), 36 * order.taps());
            assert_eq!(m.stencil(5).len(), order.taps());
            let expected_clamp = if order.can_overshoot() { 36 } else { 0 };
            assert_eq!(m.clamp_taps().len(), expected_clamp);
        }
    }

    #[test]
    fn test_identity_stencil() {
        let m = map(5, InterpolationOrder::Cubic, 0.0);
        for cell in 0..m.cells() {
            let nonzero: Vec<_> = m.stencil(cell).iter().filter(|e| e.weight != 0.0).collect();
            assert_eq!(nonzero.len(), 1);
            assert_eq!(nonzero[0].index as usize, cell);
            assert_eq!(nonzero[0].weight, 1.0);
        }
    }

    #[test]
    fn test_indices_in_range() {
        let m = map(8, InterpolationOrder::Cubic, 0.7);
        assert!(m.entries().iter().all(|e| (e.index as usize) < m.cells()));
        assert!(m
            .clamp_taps()
            .iter()
            .flatten()
            .all(|&t| t == NO_CLAMP || (t as usize) < m.cells()));
    }

    #[test]
    fn test_clamp_taps_fall_back_to_base() {
        let m = map(4, InterpolationOrder::Quadratic, 0.0);
        // Cell (3, 3) at identity: (id+1, *) and (*, jd+1) are off the grid.
        let cell = 3 * 4 + 3;
        assert_eq!(m.clamp_taps()[cell], [15, 15, 15, 15]);
        // Cell (1, 1): full inner block.
        assert_eq!(m.clamp_taps()[5], [5, 6, 9, 10]);
    }

    #[test]
    fn test_empty_cells_have_no_clamp() {
        // A half turn about X/2 moves row 0 onto source row X, off the grid.
        let m = map(4, InterpolationOrder::Cubic, std::f64::consts::PI);
        for p in 0..4 {
            assert!(m.stencil(p).iter().all(|e| *e == StencilEntry::DROPPED));
            assert_eq!(m.clamp_taps()[p], [NO_CLAMP; 4]);
        }
    }

    #[test]
    fn test_rebuild_replaces_table() {
        let mut m = map(8, InterpolationOrder::Linear, 0.0);
        let fresh = map(8, InterpolationOrder::Linear, 0.5);
        m.rebuild(0.5);
        assert_eq!(m.angle(), 0.5);
        assert_eq!(m.entries(), fresh.entries());
    }

    #[test]
    fn test_rotation_with_points_rejects_bad_order() {
        let grid = GridSize::square(4).unwrap();
        let err = TransportMap::rotation_with_points(grid, 6, CoordinateConvention::default(), 0.0)
            .unwrap_err();
        assert!(matches!(err, crate::TransportError::UnsupportedOrder(6)));
    }
}
