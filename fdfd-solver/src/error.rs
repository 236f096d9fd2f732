use nalgebra::{
    Point2,
    Vector2,
};

use crate::lattice::Axis;

/// Invalid simulation setup. These are never retried.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("Invalid polarization: {value} (expected Ez or Hz)")]
    InvalidPolarization { value: String },

    #[error("Invalid proximity transform: {value}")]
    InvalidProximityTransform { value: String },

    #[error("Grid has no cells along the {axis:?} axis")]
    EmptyGrid { axis: Axis },

    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vector2<usize>,
        got: Vector2<usize>,
    },

    #[error("Source position {position:?} is outside of the grid {shape:?}")]
    SourceOutsideGrid {
        position: Point2<usize>,
        shape: Vector2<usize>,
    },

    #[error("A buffer of {buffer} cells leaves no room for a random source")]
    EmptySourceRegion { buffer: usize },

    #[error("Invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

/// Failure of the linear solve.
#[derive(Clone, Debug, thiserror::Error)]
pub enum SolverError {
    #[error("System matrix is singular (non-finite solution in row {row})")]
    Singular { row: usize },

    #[error("Sparse LU failed: {reason}")]
    Factorization { reason: String },

    #[error("Solver did not converge after {iterations} iterations (relative residual {residual:e})")]
    DidNotConverge { iterations: usize, residual: f64 },

    #[error("Solver broke down after {iterations} iterations")]
    Breakdown { iterations: usize },

    #[error("Dimension mismatch: matrix is {rows}x{cols}, right-hand side has {rhs} entries")]
    DimensionMismatch { rows: usize, cols: usize, rhs: usize },
}

#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Solver(#[from] SolverError),
}
