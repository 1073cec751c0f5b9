//! # phasemap
//!
//! Transport of 2-D phase-space densities by precomputed interpolation
//! stencils.
//!
//! A [`TransportMap`] stores, for every destination cell, the source cells
//! and Lagrange weights that resample the grid under a rotation. Building
//! the map is the expensive part; applying it is a fixed-arity gather that
//! runs on the host ([`CpuBackend`]) or on a GPU through WebGPU
//! ([`WgpuBackend`], `wgpu` feature).
//!
//! ```ignore
//! use phasemap::{CoordinateConvention, CpuBackend, GridSize, InterpolationOrder,
//!                PhaseSpace, Simulation, TransportMap};
//!
//! let grid = GridSize::square(256)?;
//! let map = TransportMap::rotation(
//!     grid,
//!     InterpolationOrder::Cubic,
//!     CoordinateConvention::PixelCentered,
//!     std::f64::consts::TAU / 4000.0,
//! )?;
//! let backend = CpuBackend::new(map.into_shared(), true).parallel(true);
//! let mut sim = Simulation::new(Box::new(backend), PhaseSpace::gaussian(grid, 20.0, 20.0))?;
//! sim.run(4000, 100, |step, state| println!("{step}: {}", state.integral()))?;
//! ```
//!
//! ## Run
//!
//! ```bash
//! cargo run -p phasemap --release -- run --backend wgpu
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod mapping;
pub mod phase_space;
pub mod simulation;

pub use backend::{BackendKind, CpuBackend, TransportBackend};
#[cfg(feature = "wgpu")]
pub use backend::{WgpuBackend, WgpuContext};
pub use config::{SimulationConfig, TransportConfig};
pub use error::{Result, TransportError};
pub use mapping::{
    CoordinateConvention, CoordinateMapper, GridSize, InterpolationOrder, StencilEntry,
    TransportMap, NO_CLAMP,
};
pub use phase_space::PhaseSpace;
pub use simulation::Simulation;
