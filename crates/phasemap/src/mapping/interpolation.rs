//! Lagrange interpolation coefficients.
//!
//! An order-N stencil interpolates between N equally spaced samples per
//! axis. For a fractional offset `ξ` from the base sample, the samples sit at
//! `-(N-1)/2 ..= N/2` (integer division) relative to the base.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TransportError;

/// Largest supported number of points per axis.
pub const MAX_POINTS: usize = 4;

/// Number of samples per axis used to interpolate a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
#[repr(u32)]
pub enum InterpolationOrder {
    /// Nearest sample, offset ignored.
    Nearest = 1,
    /// Linear between two samples.
    Linear = 2,
    /// Quadratic Lagrange through three samples.
    Quadratic = 3,
    /// Cubic Lagrange through four samples.
    #[default]
    Cubic = 4,
}

impl InterpolationOrder {
    /// All supported orders.
    pub const ALL: [InterpolationOrder; 4] = [
        InterpolationOrder::Nearest,
        InterpolationOrder::Linear,
        InterpolationOrder::Quadratic,
        InterpolationOrder::Cubic,
    ];

    /// Points per axis (N).
    #[inline]
    pub fn points(self) -> usize {
        self as usize
    }

    /// Stencil entries per cell (N*N).
    #[inline]
    pub fn taps(self) -> usize {
        self.points() * self.points()
    }

    /// Index shift from the base sample to the first tap, `(N-1)/2`.
    #[inline]
    pub fn offset(self) -> usize {
        (self.points() - 1) / 2
    }

    /// Whether interpolated values can leave the range of their neighbors.
    #[inline]
    pub fn can_overshoot(self) -> bool {
        self.points() >= 3
    }

    /// Weights for fractional offset `xi`; only the first N entries are used.
    #[inline]
    pub fn coefficients(self, xi: f64) -> [f64; MAX_POINTS] {
        (self.kernel())(xi)
    }

    /// The coefficient function for this order.
    pub fn kernel(self) -> fn(f64) -> [f64; MAX_POINTS] {
        match self {
            InterpolationOrder::Nearest => nearest,
            InterpolationOrder::Linear => linear,
            InterpolationOrder::Quadratic => quadratic,
            InterpolationOrder::Cubic => cubic,
        }
    }
}

impl TryFrom<u32> for InterpolationOrder {
    type Error = TransportError;

    fn try_from(n: u32) -> Result<Self, Self::Error> {
        match n {
            1 => Ok(InterpolationOrder::Nearest),
            2 => Ok(InterpolationOrder::Linear),
            3 => Ok(InterpolationOrder::Quadratic),
            4 => Ok(InterpolationOrder::Cubic),
            _ => Err(TransportError::UnsupportedOrder(n)),
        }
    }
}

impl From<InterpolationOrder> for u32 {
    fn from(order: InterpolationOrder) -> Self {
        order as u32
    }
}

impl fmt::Display for InterpolationOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", *self as u32)
    }
}

fn nearest(_xi: f64) -> [f64; MAX_POINTS] {
    [1.0, 0.0, 0.0, 0.0]
}

fn linear(xi: f64) -> [f64; MAX_POINTS] {
    [1.0 - xi, xi, 0.0, 0.0]
}

// Samples at -1, 0, 1.
fn quadratic(xi: f64) -> [f64; MAX_POINTS] {
    [
        xi * (xi - 1.0) / 2.0,
        1.0 - xi * xi,
        xi * (xi + 1.0) / 2.0,
        0.0,
    ]
}

// Samples at -1, 0, 1, 2.
fn cubic(xi: f64) -> [f64; MAX_POINTS] {
    [
        (xi - 1.0) * (xi - 2.0) * xi * (-1.0 / 6.0),
        (xi + 1.0) * (xi - 1.0) * (xi - 2.0) / 2.0,
        (2.0 - xi) * xi * (xi + 1.0) / 2.0,
        xi * (xi + 1.0) * (xi - 1.0) * (1.0 / 6.0),
    ]
}

/// Separable 2-D weights: `out[i * N + j] = row[i] * col[j]`.
///
/// `row` and `col` must have the same length N and `out` length N*N.
#[inline]
pub fn tensor_product(row: &[f64], col: &[f64], out: &mut [f64]) {
    let n = col.len();
    debug_assert_eq!(row.len(), n);
    debug_assert_eq!(out.len(), n * n);
    for (i, &r) in row.iter().enumerate() {
        for (j, &c) in col.iter().enumerate() {
            out[i * n + j] = r * c;
        }
    }
}
