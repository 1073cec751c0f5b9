//! Repeated application of one transport map.

use std::time::Instant;

use crate::backend::TransportBackend;
use crate::error::{Result, TransportError};
use crate::phase_space::PhaseSpace;

/// Steps a density forward by ping-ponging two buffers through a backend.
pub struct Simulation {
    backend: Box<dyn TransportBackend>,
    state: PhaseSpace,
    scratch: Vec<f32>,
    steps_taken: u64,
}

impl Simulation {
    /// Start from `initial`, which must match the backend's grid.
    pub fn new(backend: Box<dyn TransportBackend>, initial: PhaseSpace) -> Result<Self> {
        let expected = backend.map().grid();
        if initial.grid() != expected {
            return Err(TransportError::BufferSizeMismatch {
                expected: expected.cells(),
                actual: initial.grid().cells(),
            });
        }

        tracing::debug!(
            backend = backend.name(),
            cells = expected.cells(),
            "simulation initialized"
        );

        Ok(Self {
            scratch: vec![0.0; expected.cells()],
            backend,
            state: initial,
            steps_taken: 0,
        })
    }

    /// Apply the map once.
    pub fn step(&mut self) -> Result<()> {
        self.backend.apply(self.state.data(), &mut self.scratch)?;
        self.state.swap_data(&mut self.scratch);
        self.steps_taken += 1;
        Ok(())
    }

    /// Apply the map `steps` times.
    ///
    /// `observer` sees the state every `outstep` steps (counted from the
    /// start of the simulation) and after the last step.
    pub fn run<F>(&mut self, steps: u64, outstep: u32, mut observer: F) -> Result<()>
    where
        F: FnMut(u64, &PhaseSpace),
    {
        let outstep = outstep.max(1) as u64;
        let start = Instant::now();

        for i in 1..=steps {
            self.step()?;
            if self.steps_taken % outstep == 0 || i == steps {
                let (lo, hi) = self.state.extent();
                tracing::debug!(
                    step = self.steps_taken,
                    integral = self.state.integral(),
                    min = lo,
                    max = hi,
                    "output step"
                );
                observer(self.steps_taken, &self.state);
            }
        }

        tracing::debug!(
            steps,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "run finished"
        );
        Ok(())
    }

    /// Current density.
    pub fn state(&self) -> &PhaseSpace {
        &self.state
    }

    /// Steps applied so far.
    pub fn steps_taken(&self) -> u64 {
        self.steps_taken
    }

    /// The backend applying the map.
    pub fn backend(&self) -> &dyn TransportBackend {
        self.backend.as_ref()
    }

    /// Mutable backend, e.g. to bind a map for a new angle.
    pub fn backend_mut(&mut self) -> &mut dyn TransportBackend {
        self.backend.as_mut()
    }

    /// Consume the simulation and return the current density.
    pub fn into_state(self) -> PhaseSpace {
        self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::CpuBackend;
    use crate::mapping::{CoordinateConvention, GridSize, InterpolationOrder, TransportMap};

    fn cpu(size: u32, order: InterpolationOrder, angle: f64) -> Box<dyn TransportBackend> {
        let map = TransportMap::rotation(
            GridSize::square(size).unwrap(),
            order,
            CoordinateConvention::PixelCentered,
            angle,
        )
        .unwrap();
        Box::new(CpuBackend::new(map.into_shared(), false))
    }

    #[test]
    fn test_identity_run_is_stationary() {
        let grid = GridSize::square(16).unwrap();
        let initial = PhaseSpace::gaussian(grid, 2.0, 3.0);
        let mut sim =
            Simulation::new(cpu(16, InterpolationOrder::Nearest, 0.0), initial.clone()).unwrap();
        sim.run(5, 1, |_, _| {}).unwrap();
        assert_eq!(sim.steps_taken(), 5);
        assert_eq!(sim.state(), &initial);
    }

    #[test]
    fn test_observer_schedule() {
        let grid = GridSize::square(8).unwrap();
        let mut sim = Simulation::new(
            cpu(8, InterpolationOrder::Linear, 0.1),
            PhaseSpace::gaussian(grid, 1.5, 1.5),
        )
        .unwrap();

        let mut seen = Vec::new();
        sim.run(10, 4, |step, _| seen.push(step)).unwrap();
        assert_eq!(seen, vec![4, 8, 10]);

        seen.clear();
        sim.run(3, 4, |step, _| seen.push(step)).unwrap();
        assert_eq!(seen, vec![12, 13]);
    }

    #[test]
    fn test_rotation_keeps_mass() {
        let grid = GridSize::square(64).unwrap();
        let mut sim = Simulation::new(
            cpu(64, InterpolationOrder::Linear, 0.05),
            PhaseSpace::gaussian(grid, 4.0, 4.0),
        )
        .unwrap();
        sim.run(10, 100, |_, _| {}).unwrap();
        assert!((sim.state().integral() - 1.0).abs() < 1e-2);
    }

    #[test]
    fn test_grid_mismatch() {
        let initial = PhaseSpace::new(GridSize::square(4).unwrap());
        let result = Simulation::new(cpu(8, InterpolationOrder::Linear, 0.0), initial);
        assert!(matches!(
            result,
            Err(TransportError::BufferSizeMismatch {
                expected: 64,
                actual: 16
            })
        ));
    }
}
