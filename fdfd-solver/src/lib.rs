#![warn(unused_qualifications)]

//! Finite-difference frequency-domain (FDFD) operators and solvers.
//!
//! A simulation is described by a permittivity [`Lattice`], an angular
//! frequency and a single point source. The [`OperatorAssembler`] turns this
//! into a sparse linear system (the curl-curl operator plus a diagonal
//! material operator), which the [`FieldSolver`] solves for the field
//! components. The same operators can be handed to a model as a physics
//! residual (see [`residual`]) without solving anything.
//!
//! The simulation runners in [`simulation`] wrap this for the concrete
//! scenarios: an open domain with PML, a closed cavity and a 1D line.

pub mod constants;
pub mod error;
pub mod geometry;
pub mod lattice;
pub mod linalg;
pub mod operator;
pub mod pml;
pub mod proximity;
pub mod residual;
pub mod simulation;
pub mod solver;

pub use crate::{
    constants::PhysicalConstants,
    error::{
        ConfigurationError,
        Error,
        SolverError,
    },
    geometry::{
        AxisPadding,
        GridGeometry,
    },
    lattice::{
        Axis,
        Lattice,
        Strider,
    },
    operator::{
        Boundary,
        Derivatives,
        MaxwellOperators,
        OperatorAssembler,
        OperatorConfig,
        Polarization,
    },
    proximity::ProximityTransform,
    residual::PhysicsResidual,
    simulation::{
        CavitySimulation,
        OpenSimulation,
        Simulation1D,
        SimulationConfig,
    },
    solver::{
        FieldComponent,
        FieldSolver,
        Fields,
        Source,
    },
};

/// Complex scalar used for all field values and operator entries.
pub use num::complex::Complex64;
