//! Backward coordinate mapping for rotations.
//!
//! For each destination cell the mapper returns the continuous coordinate in
//! the source grid that moves onto it under a rotation by `angle`. Three
//! centering conventions are available. They are mathematically equal and
//! differ only in floating-point rounding for asymmetric grids.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::GridSize;
use crate::error::TransportError;

/// How grid indices are centered before rotating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CoordinateConvention {
    /// Rotate absolute cell offsets from `(X/2, Y/2)`.
    #[default]
    #[serde(rename = "pixel")]
    PixelCentered,
    /// Rotate offsets normalized to `[-0.5, 0.5)` per axis.
    #[serde(rename = "unit")]
    UnitCentered,
    /// Rotate offsets normalized to `[-1, 1)`, centered in signed integers.
    #[serde(rename = "signed")]
    SignedCentered,
}

impl CoordinateConvention {
    /// All conventions.
    pub const ALL: [CoordinateConvention; 3] = [
        CoordinateConvention::PixelCentered,
        CoordinateConvention::UnitCentered,
        CoordinateConvention::SignedCentered,
    ];

    /// Short name used in configuration files.
    pub fn as_str(self) -> &'static str {
        match self {
            CoordinateConvention::PixelCentered => "pixel",
            CoordinateConvention::UnitCentered => "unit",
            CoordinateConvention::SignedCentered => "signed",
        }
    }
}

impl fmt::Display for CoordinateConvention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CoordinateConvention {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pixel" => Ok(CoordinateConvention::PixelCentered),
            "unit" => Ok(CoordinateConvention::UnitCentered),
            "signed" => Ok(CoordinateConvention::SignedCentered),
            _ => Err(TransportError::UnknownConvention(s.to_string())),
        }
    }
}

type MapFn = fn(&CoordinateMapper, u32, u32) -> (f64, f64);

/// Maps destination cells to continuous source coordinates.
///
/// The convention is resolved to a function pointer once at construction,
/// so [`map`](Self::map) does not branch on it.
#[derive(Clone)]
pub struct CoordinateMapper {
    xsize: f64,
    ysize: f64,
    xsize_i: i64,
    ysize_i: i64,
    cos: f64,
    /// `-sin(angle)`
    sin: f64,
    angle: f64,
    convention: CoordinateConvention,
    map_fn: MapFn,
}

impl CoordinateMapper {
    /// Create a mapper for a rotation by `angle` radians.
    pub fn new(grid: GridSize, convention: CoordinateConvention, angle: f64) -> Self {
        let map_fn: MapFn = match convention {
            CoordinateConvention::PixelCentered => Self::map_pixel,
            CoordinateConvention::UnitCentered => Self::map_unit,
            CoordinateConvention::SignedCentered => Self::map_signed,
        };

        Self {
            xsize: grid.xsize() as f64,
            ysize: grid.ysize() as f64,
            xsize_i: grid.xsize() as i64,
            ysize_i: grid.ysize() as i64,
            cos: angle.cos(),
            sin: -angle.sin(),
            angle,
            convention,
            map_fn,
        }
    }

    /// Source coordinate `(q', p')` of destination cell `(q, p)`, in grid units.
    #[inline]
    pub fn map(&self, q: u32, p: u32) -> (f64, f64) {
        (self.map_fn)(self, q, p)
    }

    /// Rotation angle in radians.
    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Convention in use.
    pub fn convention(&self) -> CoordinateConvention {
        self.convention
    }

    fn map_pixel(&self, q: u32, p: u32) -> (f64, f64) {
        let dq = q as f64 - self.xsize / 2.0;
        let dp = p as f64 - self.ysize / 2.0;
        let qs = self.cos * dq - self.sin * dp + self.xsize / 2.0;
        let ps = self.sin * dq + self.cos * dp + self.ysize / 2.0;
        (qs, ps)
    }

    fn map_unit(&self, q: u32, p: u32) -> (f64, f64) {
        let dq = (q as f64 - self.xsize / 2.0) / self.xsize;
        let dp = (p as f64 - self.ysize / 2.0) / self.ysize;
        let qr = self.cos * dq - self.sin * dp;
        let pr = self.sin * dq + self.cos * dp;
        ((qr + 0.5) * self.xsize, (pr + 0.5) * self.ysize)
    }

    fn map_signed(&self, q: u32, p: u32) -> (f64, f64) {
        let dq = (2 * q as i64 - self.xsize_i) as f64 / self.xsize;
        let dp = (2 * p as i64 - self.ysize_i) as f64 / self.ysize;
        let qr = self.cos * dq - self.sin * dp;
        let pr = self.sin * dq + self.cos * dp;
        ((qr + 1.0) * self.xsize / 2.0, (pr + 1.0) * self.ysize / 2.0)
    }
}

impl fmt::Debug for CoordinateMapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CoordinateMapper")
            .field("xsize", &self.xsize_i)
            .field("ysize", &self.ysize_i)
            .field("angle", &self.angle)
            .field("convention", &self.convention)
            .finish()
    }
}
