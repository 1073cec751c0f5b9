//! Run configuration.
//!
//! Loaded with the `config` crate from TOML files, with environment
//! overrides under the `PHASEMAP` prefix:
//!
//! ```toml
//! xsize = 512
//! ysize = 512
//! interpolation_points = 4
//! interpolate_clamped = true
//! convention = "pixel"
//! backend = "wgpu"
//!
//! [simulation]
//! steps = 4000
//! rotations = 2.5
//! outstep = 100
//! ```
//!
//! `PHASEMAP__SIMULATION__STEPS=2000` overrides `simulation.steps`.

use std::f64::consts::TAU;
use std::path::Path;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::backend::BackendKind;
use crate::error::{Result, TransportError};
use crate::mapping::{CoordinateConvention, GridSize, InterpolationOrder, TransportMap};

const ENV_PREFIX: &str = "PHASEMAP";

/// Grid, interpolation and backend settings for a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Cells along the first (position) axis.
    #[serde(default = "default_size")]
    pub xsize: u32,

    /// Cells along the second (momentum) axis.
    #[serde(default = "default_size")]
    pub ysize: u32,

    /// Interpolation points per axis (1 to 4).
    #[serde(default = "default_points")]
    pub interpolation_points: u32,

    /// Clip interpolated values to their inner neighbors.
    #[serde(default = "default_true")]
    pub interpolate_clamped: bool,

    /// Mapping from cell indices to rotation coordinates.
    #[serde(default)]
    pub convention: CoordinateConvention,

    /// Where maps are applied.
    #[serde(default)]
    pub backend: BackendKind,

    /// Use rayon for the CPU backend.
    #[serde(default = "default_true")]
    pub parallel: bool,

    /// Time stepping.
    #[serde(default)]
    pub simulation: SimulationConfig,
}

fn default_size() -> u32 {
    256
}

fn default_points() -> u32 {
    4
}

fn default_true() -> bool {
    true
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            xsize: default_size(),
            ysize: default_size(),
            interpolation_points: default_points(),
            interpolate_clamped: true,
            convention: CoordinateConvention::default(),
            backend: BackendKind::default(),
            parallel: true,
            simulation: SimulationConfig::default(),
        }
    }
}

/// Time-stepping settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Steps per full rotation (synchrotron period).
    #[serde(default = "default_steps")]
    pub steps: u32,

    /// Number of rotations to simulate.
    #[serde(default = "default_rotations")]
    pub rotations: f64,

    /// Report every `outstep` steps.
    #[serde(default = "default_outstep")]
    pub outstep: u32,
}

fn default_steps() -> u32 {
    4000
}

fn default_rotations() -> f64 {
    1.0
}

fn default_outstep() -> u32 {
    100
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            steps: default_steps(),
            rotations: default_rotations(),
            outstep: default_outstep(),
        }
    }
}

impl TransportConfig {
    /// Load from a TOML file, then apply `PHASEMAP__*` environment overrides.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML text. Environment variables are not consulted.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        self.grid()?;
        self.order()?;

        if !self.backend.is_available() {
            return Err(TransportError::BackendUnavailable(format!(
                "{} (not compiled in)",
                self.backend
            )));
        }
        if self.simulation.steps == 0 {
            return Err(TransportError::config("simulation.steps must be positive"));
        }
        if !self.simulation.rotations.is_finite() || self.simulation.rotations < 0.0 {
            return Err(TransportError::config(
                "simulation.rotations must be a non-negative number",
            ));
        }
        if self.simulation.outstep == 0 {
            return Err(TransportError::config("simulation.outstep must be positive"));
        }

        Ok(())
    }

    /// Grid geometry.
    pub fn grid(&self) -> Result<GridSize> {
        GridSize::new(self.xsize, self.ysize)
    }

    /// Interpolation order.
    pub fn order(&self) -> Result<InterpolationOrder> {
        InterpolationOrder::try_from(self.interpolation_points)
    }

    /// Rotation per step in radians.
    pub fn angle_per_step(&self) -> f64 {
        TAU / self.simulation.steps as f64
    }

    /// Steps needed for the configured number of rotations.
    pub fn total_steps(&self) -> u64 {
        (self.simulation.steps as f64 * self.simulation.rotations).round() as u64
    }

    /// Build the single-step map.
    pub fn transport_map(&self) -> Result<TransportMap> {
        TransportMap::rotation(
            self.grid()?,
            self.order()?,
            self.convention,
            self.angle_per_step(),
        )
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .try_parsing(true)
}
