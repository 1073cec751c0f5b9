//! Host evaluation of a transport map.

use std::sync::Arc;

use rayon::prelude::*;

use super::{clamp_enabled, saturate, TransportBackend};
use crate::error::{Result, TransportError};
use crate::mapping::TransportMap;

/// Grids smaller than this run sequentially even when parallel is enabled.
const PARALLEL_THRESHOLD: usize = 64 * 64;

/// Evaluates stencils on the host, one output cell at a time.
///
/// Every output cell reads a disjoint stencil and writes a disjoint slot, so
/// the parallel path needs no locking and produces the same bits as the
/// sequential one.
#[derive(Debug, Clone)]
pub struct CpuBackend {
    map: Arc<TransportMap>,
    saturate_requested: bool,
    saturate: bool,
    parallel: bool,
}

impl CpuBackend {
    /// Create a sequential backend.
    pub fn new(map: Arc<TransportMap>, saturate: bool) -> Self {
        Self {
            saturate: clamp_enabled(map.order(), saturate),
            saturate_requested: saturate,
            map,
            parallel: false,
        }
    }

    /// Enable or disable rayon parallelism across output cells.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Whether the saturation clamp is active.
    pub fn is_saturating(&self) -> bool {
        self.saturate
    }

    /// Whether output cells are processed in parallel.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    #[inline]
    fn eval_cell(&self, source: &[f32], cell: usize) -> f32 {
        let value = self
            .map
            .stencil(cell)
            .iter()
            .fold(0.0f32, |acc, e| acc + source[e.index as usize] * e.weight as f32);

        if self.saturate {
            saturate(value, source, &self.map.clamp_taps()[cell])
        } else {
            value
        }
    }
}

impl TransportBackend for CpuBackend {
    fn name(&self) -> &'static str {
        if self.parallel {
            "cpu-parallel"
        } else {
            "cpu"
        }
    }

    fn map(&self) -> &TransportMap {
        &self.map
    }

    fn set_map(&mut self, map: Arc<TransportMap>) -> Result<()> {
        self.saturate = clamp_enabled(map.order(), self.saturate_requested);
        self.map = map;
        Ok(())
    }

    fn apply(&self, source: &[f32], destination: &mut [f32]) -> Result<()> {
        let cells = self.map.cells();
        TransportError::check_len(cells, source.len())?;
        TransportError::check_len(cells, destination.len())?;

        if self.parallel && cells >= PARALLEL_THRESHOLD {
            destination
                .par_iter_mut()
                .enumerate()
                .for_each(|(cell, out)| *out = self.eval_cell(source, cell));
        } else {
            for (cell, out) in destination.iter_mut().enumerate() {
                *out = self.eval_cell(source, cell);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::{CoordinateConvention, GridSize, InterpolationOrder};

    fn shared_map(size: u32, order: InterpolationOrder, angle: f64) -> Arc<TransportMap> {
        TransportMap::rotation(
            GridSize::square(size).unwrap(),
            order,
            CoordinateConvention::PixelCentered,
            angle,
        )
        .unwrap()
        .into_shared()
    }

    fn ramp(cells: usize) -> Vec<f32> {
        (0..cells).map(|i| ((i * 7) % 13) as f32).collect()
    }

    #[test]
    fn test_identity_copies_source() {
        let backend = CpuBackend::new(shared_map(8, InterpolationOrder::Nearest, 0.0), false);
        let source = ramp(64);
        let mut destination = vec![-1.0; 64];
        backend.apply(&source, &mut destination).unwrap();
        assert_eq!(destination, source);
    }

    #[test]
    fn test_size_mismatch() {
        let backend = CpuBackend::new(shared_map(4, InterpolationOrder::Linear, 0.0), false);
        let mut destination = vec![0.0; 16];
        let err = backend.apply(&[0.0; 15], &mut destination).unwrap_err();
        assert!(matches!(
            err,
            TransportError::BufferSizeMismatch {
                expected: 16,
                actual: 15
            }
        ));
        let mut short = vec![0.0; 3];
        assert!(backend.apply(&[0.0; 16], &mut short).is_err());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let map = shared_map(96, InterpolationOrder::Cubic, 0.37);
        let source = ramp(map.cells());
        let sequential = CpuBackend::new(map.clone(), true);
        let parallel = CpuBackend::new(map, true).parallel(true);

        let mut a = vec![0.0; source.len()];
        let mut b = vec![0.0; source.len()];
        sequential.apply(&source, &mut a).unwrap();
        parallel.apply(&source, &mut b).unwrap();
        assert_eq!(a, b);
        assert_eq!(parallel.name(), "cpu-parallel");
    }

    #[test]
    fn test_clamp_ignored_for_low_orders() {
        let backend = CpuBackend::new(shared_map(4, InterpolationOrder::Linear, 0.2), true);
        assert!(!backend.is_saturating());

        let mut backend = CpuBackend::new(shared_map(4, InterpolationOrder::Cubic, 0.2), true);
        assert!(backend.is_saturating());
        backend
            .set_map(shared_map(4, InterpolationOrder::Nearest, 0.2))
            .unwrap();
        assert!(!backend.is_saturating());
    }
}
