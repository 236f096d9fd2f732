//! Random permittivity blocks.

use fdfd_solver::{
    ConfigurationError,
    Lattice,
    constants::SILICON_PERMITTIVITY,
};
use nalgebra::Vector2;
use rand::{
    Rng,
    RngCore,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Produces square permittivity blocks for the device window.
pub trait PermittivityGenerator: Send + Sync {
    /// Side length of the generated blocks.
    fn size(&self) -> usize;

    fn generate(&self, rng: &mut dyn RngCore) -> Lattice<f64>;
}

impl<G: PermittivityGenerator + ?Sized> PermittivityGenerator for Box<G> {
    fn size(&self) -> usize {
        (**self).size()
    }

    fn generate(&self, rng: &mut dyn RngCore) -> Lattice<f64> {
        (**self).generate(rng)
    }
}

/// Every cell independently uniform in `[0, max)`.
#[derive(Clone, Copy, Debug)]
pub struct UniformFill {
    pub size: usize,
    pub max: f64,
}

impl UniformFill {
    pub fn new(size: usize) -> Self {
        Self {
            size,
            max: SILICON_PERMITTIVITY,
        }
    }
}

impl PermittivityGenerator for UniformFill {
    fn size(&self) -> usize {
        self.size
    }

    fn generate(&self, rng: &mut dyn RngCore) -> Lattice<f64> {
        Lattice::from_fn(Vector2::repeat(self.size), |_| {
            self.max * rng.gen_range(0.0..1.0)
        })
    }
}

/// Placement shared by the inclusion generators.
///
/// Inclusions are anchored at least `margin` cells away from the edges and
/// have extents in `[5, 16)` cells.
#[derive(Clone, Copy, Debug)]
struct Placement {
    size: usize,
    margin: usize,
}

const MIN_EXTENT: usize = 5;
const MAX_EXTENT: usize = 16;

impl Placement {
    fn new(size: usize, margin: usize) -> Result<Self, ConfigurationError> {
        if 2 * margin >= size {
            return Err(ConfigurationError::InvalidParameter {
                name: "margin",
                reason: format!("a margin of {margin} leaves no room in a block of size {size}"),
            });
        }
        Ok(Self { size, margin })
    }

    fn anchor(&self, rng: &mut dyn RngCore) -> Vector2<usize> {
        Vector2::new(
            rng.gen_range(self.margin..self.size - self.margin),
            rng.gen_range(self.margin..self.size - self.margin),
        )
    }

    fn extent(&self, rng: &mut dyn RngCore) -> Vector2<usize> {
        Vector2::new(
            rng.gen_range(MIN_EXTENT..MAX_EXTENT),
            rng.gen_range(MIN_EXTENT..MAX_EXTENT),
        )
    }
}

/// A single silicon rectangle in vacuum.
///
/// The rectangle is clipped at the block edge.
#[derive(Clone, Copy, Debug)]
pub struct RectangleInclusion {
    placement: Placement,
    pub permittivity: f64,
}

impl RectangleInclusion {
    pub fn new(size: usize, margin: usize) -> Result<Self, ConfigurationError> {
        Ok(Self {
            placement: Placement::new(size, margin)?,
            permittivity: SILICON_PERMITTIVITY,
        })
    }
}

impl PermittivityGenerator for RectangleInclusion {
    fn size(&self) -> usize {
        self.placement.size
    }

    fn generate(&self, rng: &mut dyn RngCore) -> Lattice<f64> {
        let corner = self.placement.anchor(rng);
        let end = corner + self.placement.extent(rng);

        Lattice::from_fn(Vector2::repeat(self.placement.size), |point| {
            let inside = point.x >= corner.x && point.x < end.x && point.y >= corner.y && point.y < end.y;
            if inside { self.permittivity } else { 1.0 }
        })
    }
}

/// A single silicon ellipse in vacuum, axis-aligned.
#[derive(Clone, Copy, Debug)]
pub struct EllipseInclusion {
    placement: Placement,
    pub permittivity: f64,
}

impl EllipseInclusion {
    pub fn new(size: usize, margin: usize) -> Result<Self, ConfigurationError> {
        Ok(Self {
            placement: Placement::new(size, margin)?,
            permittivity: SILICON_PERMITTIVITY,
        })
    }
}

impl PermittivityGenerator for EllipseInclusion {
    fn size(&self) -> usize {
        self.placement.size
    }

    fn generate(&self, rng: &mut dyn RngCore) -> Lattice<f64> {
        let center = self.placement.anchor(rng).cast::<f64>();
        let radii = self.placement.extent(rng).cast::<f64>();

        Lattice::from_fn(Vector2::repeat(self.placement.size), |point| {
            let offset = point.coords.cast::<f64>() - center;
            let r = offset.component_div(&radii).norm_squared();
            if r <= 1.0 { self.permittivity } else { 1.0 }
        })
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum GeneratorKind {
    #[default]
    Uniform,
    Rectangle,
    Ellipse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratorConfig {
    #[serde(default)]
    pub kind: GeneratorKind,

    #[serde(default = "default_margin")]
    pub margin: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::default(),
            margin: default_margin(),
        }
    }
}

fn default_margin() -> usize {
    16
}

impl GeneratorConfig {
    pub fn build(&self, size: usize) -> Result<Box<dyn PermittivityGenerator>, ConfigurationError> {
        if size == 0 {
            return Err(ConfigurationError::InvalidParameter {
                name: "device size",
                reason: "must be at least 1".to_owned(),
            });
        }

        Ok(match self.kind {
            GeneratorKind::Uniform => Box::new(UniformFill::new(size)),
            GeneratorKind::Rectangle => Box::new(RectangleInclusion::new(size, self.margin)?),
            GeneratorKind::Ellipse => Box::new(EllipseInclusion::new(size, self.margin)?),
        })
    }
}
