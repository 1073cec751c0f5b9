//! Execution backends for applying a transport map.
//!
//! Both backends compute, for every destination cell,
//!
//! ```text
//! dst[c] = sum_k src[stencil[c][k].index] * stencil[c][k].weight
//! ```
//!
//! accumulated in `f32` in tap order, followed by the optional saturation
//! clamp. The clamp bounds each value by the source values at the four inner
//! taps of its stencil, regardless of the interpolation order.

pub mod cpu;

#[cfg(feature = "wgpu")]
pub mod wgpu_compute;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TransportError};
use crate::mapping::{InterpolationOrder, TransportMap, NO_CLAMP};

pub use cpu::CpuBackend;

#[cfg(feature = "wgpu")]
pub use wgpu_compute::{WgpuBackend, WgpuContext};

/// A strategy for applying a transport map to a distribution buffer.
pub trait TransportBackend: Send {
    /// Short backend name for logs.
    fn name(&self) -> &'static str;

    /// The map currently bound to this backend.
    fn map(&self) -> &TransportMap;

    /// Bind a new map, replacing the previous one.
    fn set_map(&mut self, map: Arc<TransportMap>) -> Result<()>;

    /// Transport `source` into `destination`.
    ///
    /// Both buffers must hold exactly `map().cells()` values.
    fn apply(&self, source: &[f32], destination: &mut [f32]) -> Result<()>;
}

/// Backend selector used by configuration and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Host evaluation (optionally rayon-parallel).
    #[default]
    Cpu,
    /// WebGPU compute shader.
    Wgpu,
}

impl BackendKind {
    /// Whether this backend was compiled in.
    pub fn is_available(self) -> bool {
        match self {
            BackendKind::Cpu => true,
            BackendKind::Wgpu => cfg!(feature = "wgpu"),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Cpu => f.write_str("cpu"),
            BackendKind::Wgpu => f.write_str("wgpu"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(BackendKind::Cpu),
            "wgpu" | "gpu" => Ok(BackendKind::Wgpu),
            _ => Err(TransportError::BackendUnavailable(s.to_string())),
        }
    }
}

/// Whether the clamp actually runs for this order.
pub(crate) fn clamp_enabled(order: InterpolationOrder, requested: bool) -> bool {
    if requested && !order.can_overshoot() {
        tracing::warn!(
            order = order.points(),
            "saturation clamp ignored: order cannot overshoot"
        );
    }
    requested && order.can_overshoot()
}

/// Clip `value` into the range of the source values at `taps`.
#[inline]
pub(crate) fn saturate(value: f32, source: &[f32], taps: &[u32; 4]) -> f32 {
    if taps[0] == NO_CLAMP {
        return value;
    }
    let mut lo = f32::INFINITY;
    let mut hi = f32::NEG_INFINITY;
    for &t in taps {
        let v = source[t as usize];
        lo = lo.min(v);
        hi = hi.max(v);
    }
    value.min(hi).max(lo)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_saturate() {
        let source = [1.0, 3.0, 2.0, 5.0, -4.0];
        assert_eq!(saturate(6.0, &source, &[0, 1, 2, 3]), 5.0);
        assert_eq!(saturate(0.5, &source, &[0, 1, 2, 3]), 1.0);
        assert_eq!(saturate(2.5, &source, &[0, 1, 2, 3]), 2.5);
        assert_eq!(saturate(-9.0, &source, &[NO_CLAMP; 4]), -9.0);
    }

    #[test]
    fn test_clamp_enabled() {
        assert!(clamp_enabled(InterpolationOrder::Cubic, true));
        assert!(!clamp_enabled(InterpolationOrder::Cubic, false));
        assert!(!clamp_enabled(InterpolationOrder::Linear, true));
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("CPU".parse::<BackendKind>().unwrap(), BackendKind::Cpu);
        assert_eq!("gpu".parse::<BackendKind>().unwrap(), BackendKind::Wgpu);
        assert!("cuda".parse::<BackendKind>().is_err());
        assert!(BackendKind::Cpu.is_available());
    }
}
