//! Ready-made simulation scenarios.
//!
//! Each runner holds an immutable configuration and an [`OperatorAssembler`]
//! for its grid. Solving never mutates the runner, so a runner can be shared
//! between threads and reused for any number of instances.

use nalgebra::{
    Point2,
    Vector2,
};
use num::complex::Complex64;
use rand::Rng;

use crate::{
    constants::{
        DEFAULT_LENGTH_SCALE,
        OMEGA_1550,
        PhysicalConstants,
    },
    error::{
        ConfigurationError,
        Error,
    },
    geometry::GridGeometry,
    lattice::Lattice,
    linalg::{
        LinearSolver,
        SparseLu,
    },
    operator::{
        Boundary,
        MaxwellOperators,
        OperatorAssembler,
        OperatorConfig,
        Polarization,
    },
    pml::PmlParameters,
    solver::{
        FieldSolver,
        Fields,
        Source,
    },
};

/// Permittivity used for the reflecting walls of cavities.
///
/// Large enough that the field inside the walls is numerically zero.
pub const DEFAULT_WALL_PERMITTIVITY: f64 = -1e20;

/// Physical parameters shared by all scenarios.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct SimulationConfig {
    /// Angular frequency in rad/s.
    pub omega: f64,
    /// Cell size in units of `length_scale`.
    pub spacing: f64,
    pub length_scale: f64,
    pub polarization: Polarization,
    pub boundary: Boundary,
    pub pml: PmlParameters,
    pub constants: PhysicalConstants,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            omega: 2.0 * OMEGA_1550,
            spacing: 0.05,
            length_scale: DEFAULT_LENGTH_SCALE,
            polarization: Polarization::Ez,
            boundary: Boundary::Dirichlet,
            pml: PmlParameters::default(),
            constants: PhysicalConstants::SI,
        }
    }
}

impl SimulationConfig {
    pub fn with_omega(mut self, omega: f64) -> Self {
        self.omega = omega;
        self
    }

    pub fn with_polarization(mut self, polarization: Polarization) -> Self {
        self.polarization = polarization;
        self
    }

    pub fn operator_config(&self, geometry: &GridGeometry) -> OperatorConfig {
        OperatorConfig {
            shape: geometry.shape(),
            pml: geometry.pml(),
            spacing: self.spacing,
            length_scale: self.length_scale,
            omega: self.omega,
            polarization: self.polarization,
            pml_parameters: self.pml,
            constants: self.constants,
            boundary: self.boundary,
        }
    }

    fn assembler(&self, geometry: &GridGeometry) -> Result<OperatorAssembler, ConfigurationError> {
        geometry.validate()?;
        OperatorAssembler::new(self.operator_config(geometry))
    }
}

/// Result of an [`OpenSimulation`].
///
/// Both field sets are clipped to the device window.
#[derive(Clone, Debug)]
pub struct OpenSolution {
    /// Source position relative to the device window.
    pub source: Point2<usize>,
    pub fields: Fields,
    pub vacuum_fields: Fields,
}

/// A device in open space, surrounded by a vacuum buffer and PML.
///
/// This is the dataset scenario: every instance is solved twice at the same
/// source, once with the device and once with vacuum in its place.
#[derive(Clone, Debug)]
pub struct OpenSimulation<S = SparseLu> {
    geometry: GridGeometry,
    config: SimulationConfig,
    background_permittivity: f64,
    assembler: OperatorAssembler,
    solver: FieldSolver<S>,
}

impl OpenSimulation {
    pub fn new(geometry: GridGeometry, config: SimulationConfig) -> Result<Self, ConfigurationError> {
        Self::with_solver(geometry, config, SparseLu)
    }
}

impl<S: LinearSolver> OpenSimulation<S> {
    pub fn with_solver(
        geometry: GridGeometry,
        config: SimulationConfig,
        linear_solver: S,
    ) -> Result<Self, ConfigurationError> {
        let assembler = config.assembler(&geometry)?;
        Ok(Self {
            geometry,
            config,
            background_permittivity: 1.0,
            assembler,
            solver: FieldSolver::with_solver(linear_solver),
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn assembler(&self) -> &OperatorAssembler {
        &self.assembler
    }

    /// The full grid with `block` placed into the device window.
    pub fn permittivity(&self, block: &Lattice<f64>) -> Result<Lattice<f64>, ConfigurationError> {
        block.ensure_shape(&self.geometry.device_shape())?;
        let mut permittivity = Lattice::from_value(self.geometry.shape(), self.background_permittivity);
        permittivity.embed(&self.geometry.device_start(), block)?;
        Ok(permittivity)
    }

    /// Draws a source position (device-local) near the left edge of the
    /// device.
    ///
    /// `x` is drawn from `[0, buffer - 1)` and `y` from `[0, device)`.
    pub fn random_source<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
    ) -> Result<Point2<usize>, ConfigurationError> {
        let buffer = self.geometry.x.buffer;
        if buffer < 2 || self.geometry.y.device == 0 {
            return Err(ConfigurationError::EmptySourceRegion { buffer });
        }
        let x = rng.gen_range(0..buffer - 1);
        let y = rng.gen_range(0..self.geometry.y.device);
        Ok(Point2::new(x, y))
    }

    pub fn solve(
        &self,
        block: &Lattice<f64>,
        source: Point2<usize>,
    ) -> Result<OpenSolution, Error> {
        let permittivity = self.permittivity(block)?;
        let vacuum = Lattice::from_value(self.geometry.shape(), self.background_permittivity);
        let global = Source::unit(self.geometry.to_global(&source));

        let window = self.geometry.device_window();

        let vacuum_fields = self
            .solver
            .solve(&self.assembler, &vacuum, &global)?
            .window(window.clone());
        let fields = self
            .solver
            .solve(&self.assembler, &permittivity, &global)?
            .window(window);

        Ok(OpenSolution {
            source,
            fields,
            vacuum_fields,
        })
    }

    pub fn solve_with_random_source<R: Rng + ?Sized>(
        &self,
        block: &Lattice<f64>,
        rng: &mut R,
    ) -> Result<OpenSolution, Error> {
        let source = self.random_source(rng)?;
        self.solve(block, source)
    }
}

/// Result of a closed-domain scenario.
#[derive(Clone, Debug)]
pub struct CavitySolution {
    /// Permittivity including the walls (or clipped to the device window).
    pub permittivity: Lattice<f64>,
    /// Source in grid coordinates.
    pub source: Source,
    pub fields: Fields,
}

/// A device enclosed by reflecting walls.
///
/// The walls are modelled as cells of a huge negative permittivity, which
/// forces the field inside them to zero.
#[derive(Clone, Debug)]
pub struct CavitySimulation<S = SparseLu> {
    geometry: GridGeometry,
    config: SimulationConfig,
    wall_permittivity: f64,
    clip: bool,
    assembler: OperatorAssembler,
    solver: FieldSolver<S>,
}

impl CavitySimulation {
    pub fn new(geometry: GridGeometry, config: SimulationConfig) -> Result<Self, ConfigurationError> {
        Self::with_solver(geometry, config, SparseLu)
    }

    /// 32 cell cavity with 4 wall cells on each side, at 1550 nm.
    pub fn with_defaults(polarization: Polarization) -> Result<Self, ConfigurationError> {
        Self::new(
            GridGeometry::symmetric(32, 0, 4),
            SimulationConfig::default()
                .with_omega(OMEGA_1550)
                .with_polarization(polarization),
        )
    }
}

impl<S: LinearSolver> CavitySimulation<S> {
    pub fn with_solver(
        geometry: GridGeometry,
        config: SimulationConfig,
        linear_solver: S,
    ) -> Result<Self, ConfigurationError> {
        let assembler = config.assembler(&geometry)?;
        Ok(Self {
            geometry,
            config,
            wall_permittivity: DEFAULT_WALL_PERMITTIVITY,
            clip: false,
            assembler,
            solver: FieldSolver::with_solver(linear_solver),
        })
    }

    pub fn with_wall_permittivity(mut self, wall_permittivity: f64) -> Self {
        self.wall_permittivity = wall_permittivity;
        self
    }

    /// Clip the returned permittivity and fields to the device window.
    pub fn with_clip(mut self, clip: bool) -> Self {
        self.clip = clip;
        self
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn assembler(&self) -> &OperatorAssembler {
        &self.assembler
    }

    pub fn permittivity(&self, block: &Lattice<f64>) -> Result<Lattice<f64>, ConfigurationError> {
        block.ensure_shape(&self.geometry.device_shape())?;
        let mut permittivity = Lattice::from_value(self.geometry.shape(), self.wall_permittivity);
        permittivity.embed(&self.geometry.device_start(), block)?;
        Ok(permittivity)
    }

    /// Solves with the source at `source` (grid coordinates), or at the grid
    /// center.
    ///
    /// `source.x` indexes the first grid axis and `source.y` the second, the
    /// same as for the fields. Coordinates are not swapped.
    pub fn solve(
        &self,
        block: &Lattice<f64>,
        source: Option<Point2<usize>>,
    ) -> Result<CavitySolution, Error> {
        let permittivity = self.permittivity(block)?;
        let source = Source::new(
            source.unwrap_or_else(|| self.geometry.center()),
            Complex64::new(0.0, 1.0),
        );

        if self.geometry.to_local(&source.position).is_none() {
            tracing::warn!(source = ?source.position, "cavity source lies inside the walls");
        }

        let fields = self.solver.solve(&self.assembler, &permittivity, &source)?;

        if self.clip {
            let window = self.geometry.device_window();
            Ok(CavitySolution {
                permittivity: permittivity.window(window.clone()),
                source,
                fields: fields.window(window),
            })
        }
        else {
            Ok(CavitySolution {
                permittivity,
                source,
                fields,
            })
        }
    }

    /// Operators for an empty (unit permittivity) cavity.
    pub fn operators(&self) -> Result<MaxwellOperators, ConfigurationError> {
        let empty = Lattice::from_value(self.geometry.device_shape(), 1.0);
        self.assembler.assemble(&self.permittivity(&empty)?)
    }
}

/// Parameters of a 1D line.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(default)
)]
pub struct LineConfig {
    pub device_length: usize,
    pub npml: usize,
    pub buffer_length: usize,
    /// Permittivity of the buffer cells. The default turns them into
    /// reflecting walls. Use 1 for an open line terminated by PML.
    pub buffer_permittivity: f64,
}

impl Default for LineConfig {
    fn default() -> Self {
        Self {
            device_length: 64,
            npml: 0,
            buffer_length: 4,
            buffer_permittivity: DEFAULT_WALL_PERMITTIVITY,
        }
    }
}

/// A 1D simulation on an `n x 1` grid.
///
/// PML cells are vacuum, buffer cells have the configured buffer
/// permittivity.
#[derive(Clone, Debug)]
pub struct Simulation1D<S = SparseLu> {
    line: LineConfig,
    geometry: GridGeometry,
    config: SimulationConfig,
    assembler: OperatorAssembler,
    solver: FieldSolver<S>,
}

impl Simulation1D {
    pub fn new(line: LineConfig, config: SimulationConfig) -> Result<Self, ConfigurationError> {
        Self::with_solver(line, config, SparseLu)
    }
}

impl<S: LinearSolver> Simulation1D<S> {
    pub fn with_solver(
        line: LineConfig,
        config: SimulationConfig,
        linear_solver: S,
    ) -> Result<Self, ConfigurationError> {
        let geometry = GridGeometry::one_dimensional(line.device_length, line.npml, line.buffer_length);
        let assembler = config.assembler(&geometry)?;
        Ok(Self {
            line,
            geometry,
            config,
            assembler,
            solver: FieldSolver::with_solver(linear_solver),
        })
    }

    pub fn geometry(&self) -> &GridGeometry {
        &self.geometry
    }

    pub fn assembler(&self) -> &OperatorAssembler {
        &self.assembler
    }

    /// Full line permittivity for a device given as a slice of length
    /// `device_length`.
    pub fn permittivity(&self, device: &[f64]) -> Result<Lattice<f64>, ConfigurationError> {
        if device.len() != self.line.device_length {
            return Err(ConfigurationError::ShapeMismatch {
                expected: self.geometry.device_shape(),
                got: Vector2::new(device.len(), 1),
            });
        }

        let start = self.geometry.x.start();
        let end = self.geometry.x.end();
        let npml = self.line.npml;
        let total = self.geometry.x.total();

        Ok(Lattice::from_fn(self.geometry.shape(), |point| {
            let x = point.x;
            if x >= start && x < end {
                device[x - start]
            }
            else if x < npml || x >= total - npml {
                1.0
            }
            else {
                self.line.buffer_permittivity
            }
        }))
    }

    /// Solves with the source at grid cell `source` or the center of the line.
    pub fn solve(&self, device: &[f64], source: Option<usize>) -> Result<CavitySolution, Error> {
        let permittivity = self.permittivity(device)?;
        let source = Source::new(
            source.map_or_else(|| self.geometry.center(), |x| Point2::new(x, 0)),
            Complex64::new(0.0, 1.0),
        );
        let fields = self.solver.solve(&self.assembler, &permittivity, &source)?;
        Ok(CavitySolution {
            permittivity,
            source,
            fields,
        })
    }

    /// Operators for a unit permittivity device.
    pub fn operators(&self) -> Result<MaxwellOperators, ConfigurationError> {
        let device = vec![1.0; self.line.device_length];
        self.assembler.assemble(&self.permittivity(&device)?)
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }
}
