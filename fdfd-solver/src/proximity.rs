//! Distance-to-source feature maps.
//!
//! Models get the source position as an extra input channel: a map over the
//! device window whose value depends on the distance of each cell to the
//! source.

use std::{
    fmt::Display,
    str::FromStr,
};

use nalgebra::{
    Point2,
    Vector2,
};

use crate::{
    error::ConfigurationError,
    lattice::Lattice,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, strum::VariantArray)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum ProximityTransform {
    /// `d`
    Linear,
    /// `d^2`
    Squared,
    /// `1 / sqrt(1 + d^2)`
    InvLinear,
    /// `1 / (1 + d^2)`
    #[default]
    InvSquared,
}

impl ProximityTransform {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProximityTransform::Linear => "linear",
            ProximityTransform::Squared => "squared",
            ProximityTransform::InvLinear => "inv_linear",
            ProximityTransform::InvSquared => "inv_squared",
        }
    }

    /// Applies the transform to a squared distance.
    pub fn apply(&self, distance_squared: f64) -> f64 {
        match self {
            ProximityTransform::Linear => distance_squared.sqrt(),
            ProximityTransform::Squared => distance_squared,
            ProximityTransform::InvLinear => (1.0 + distance_squared).sqrt().recip(),
            ProximityTransform::InvSquared => (1.0 + distance_squared).recip(),
        }
    }
}

impl Display for ProximityTransform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ProximityTransform {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "linear" => Ok(Self::Linear),
            "squared" => Ok(Self::Squared),
            "inv_linear" => Ok(Self::InvLinear),
            "inv_squared" => Ok(Self::InvSquared),
            _ => {
                Err(ConfigurationError::InvalidProximityTransform {
                    value: s.to_owned(),
                })
            }
        }
    }
}

fn distance_squared(a: &Point2<usize>, b: &Point2<usize>) -> f64 {
    let dx = a.x as f64 - b.x as f64;
    let dy = a.y as f64 - b.y as f64;
    dx * dx + dy * dy
}

/// Proximity map of shape `shape` for a source at `source`, both in the same
/// coordinates.
///
/// The map is indexed `[x][y]` like the field lattices: `map[Point2::new(x, y)]`
/// is the transformed distance from cell `(x, y)` to the source. The source may
/// lie outside of the map.
pub fn proximity_map(
    shape: Vector2<usize>,
    source: &Point2<usize>,
    transform: ProximityTransform,
) -> Lattice<f64> {
    Lattice::from_fn(shape, |point| transform.apply(distance_squared(&point, source)))
}
