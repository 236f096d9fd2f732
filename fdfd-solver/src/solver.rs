use std::ops::RangeBounds;

use nalgebra::{
    DVector,
    Point2,
    Vector2,
};
use num::complex::Complex64;

use crate::{
    error::{
        ConfigurationError,
        Error,
    },
    lattice::{
        Axis,
        Lattice,
        Strider,
    },
    linalg::{
        LinearSolver,
        SparseLu,
    },
    operator::{
        MaxwellOperators,
        OperatorAssembler,
        OperatorConfig,
        Polarization,
        grid_average,
    },
};

/// Point source on a single grid cell.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Source {
    /// Position in grid coordinates (including padding).
    pub position: Point2<usize>,
    pub amplitude: Complex64,
}

impl Source {
    pub fn new(position: Point2<usize>, amplitude: Complex64) -> Self {
        Self {
            position,
            amplitude,
        }
    }

    /// Source with amplitude 1.
    pub fn unit(position: Point2<usize>) -> Self {
        Self::new(position, Complex64::new(1.0, 0.0))
    }

    /// Right-hand side of the linear system for this source.
    pub fn rhs(&self, config: &OperatorConfig) -> Result<DVector<Complex64>, ConfigurationError> {
        let strider = Strider::new(&config.shape);
        let index = strider.index(&self.position).ok_or_else(|| {
            ConfigurationError::SourceOutsideGrid {
                position: self.position,
                shape: config.shape,
            }
        })?;

        let mut rhs = DVector::zeros(strider.len());
        rhs[index] = config.source_coefficient() * self.amplitude;
        Ok(rhs)
    }
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::VariantArray,
)]
pub enum FieldComponent {
    Ex,
    Ey,
    Ez,
    Hx,
    Hy,
    Hz,
}

impl FieldComponent {
    /// The three components solved for with `polarization`, in storage order.
    pub fn for_polarization(polarization: Polarization) -> [Self; 3] {
        match polarization {
            Polarization::Ez => [Self::Hx, Self::Hy, Self::Ez],
            Polarization::Hz => [Self::Ex, Self::Ey, Self::Hz],
        }
    }
}

/// Solved field components on the grid.
#[derive(Clone, Debug, PartialEq)]
pub enum Fields {
    Ez {
        hx: Lattice<Complex64>,
        hy: Lattice<Complex64>,
        ez: Lattice<Complex64>,
    },
    Hz {
        ex: Lattice<Complex64>,
        ey: Lattice<Complex64>,
        hz: Lattice<Complex64>,
    },
}

impl Fields {
    pub fn polarization(&self) -> Polarization {
        match self {
            Fields::Ez { .. } => Polarization::Ez,
            Fields::Hz { .. } => Polarization::Hz,
        }
    }

    /// The out-of-plane component the system was solved for.
    pub fn principal(&self) -> &Lattice<Complex64> {
        match self {
            Fields::Ez { ez, .. } => ez,
            Fields::Hz { hz, .. } => hz,
        }
    }

    pub fn components(&self) -> [(FieldComponent, &Lattice<Complex64>); 3] {
        match self {
            Fields::Ez { hx, hy, ez } => {
                [
                    (FieldComponent::Hx, hx),
                    (FieldComponent::Hy, hy),
                    (FieldComponent::Ez, ez),
                ]
            }
            Fields::Hz { ex, ey, hz } => {
                [
                    (FieldComponent::Ex, ex),
                    (FieldComponent::Ey, ey),
                    (FieldComponent::Hz, hz),
                ]
            }
        }
    }

    /// Inverse of [`components`](Self::components).
    pub fn from_components(
        polarization: Polarization,
        [first, second, principal]: [Lattice<Complex64>; 3],
    ) -> Self {
        match polarization {
            Polarization::Ez => {
                Fields::Ez {
                    hx: first,
                    hy: second,
                    ez: principal,
                }
            }
            Polarization::Hz => {
                Fields::Hz {
                    ex: first,
                    ey: second,
                    hz: principal,
                }
            }
        }
    }

    pub fn get(&self, component: FieldComponent) -> Option<&Lattice<Complex64>> {
        self.components()
            .into_iter()
            .find_map(|(c, lattice)| (c == component).then_some(lattice))
    }

    pub fn shape(&self) -> Vector2<usize> {
        self.principal().shape()
    }

    /// Clips all components to `range`.
    pub fn window(&self, range: impl RangeBounds<Point2<usize>> + Clone) -> Self {
        match self {
            Fields::Ez { hx, hy, ez } => {
                Fields::Ez {
                    hx: hx.window(range.clone()),
                    hy: hy.window(range.clone()),
                    ez: ez.window(range),
                }
            }
            Fields::Hz { ex, ey, hz } => {
                Fields::Hz {
                    ex: ex.window(range.clone()),
                    ey: ey.window(range.clone()),
                    hz: hz.window(range),
                }
            }
        }
    }
}

/// Solves the FDFD system for a single source.
///
/// This is a pure function of the assembler, permittivity and source. The
/// linear solve itself is delegated to `S`.
#[derive(Clone, Copy, Debug, Default)]
pub struct FieldSolver<S = SparseLu> {
    pub linear_solver: S,
}

impl FieldSolver {
    pub fn new() -> Self {
        Self::with_solver(SparseLu)
    }
}

impl<S: LinearSolver> FieldSolver<S> {
    pub fn with_solver(linear_solver: S) -> Self {
        Self { linear_solver }
    }

    pub fn solve(
        &self,
        assembler: &OperatorAssembler,
        permittivity: &Lattice<f64>,
        source: &Source,
    ) -> Result<Fields, Error> {
        let operators = assembler.assemble(permittivity)?;
        self.solve_operators(assembler, &operators, permittivity, source)
    }

    /// Like [`solve`](Self::solve), but with operators that were already
    /// assembled for `permittivity`.
    pub fn solve_operators(
        &self,
        assembler: &OperatorAssembler,
        operators: &MaxwellOperators,
        permittivity: &Lattice<f64>,
        source: &Source,
    ) -> Result<Fields, Error> {
        let config = assembler.config();
        permittivity.ensure_shape(&config.shape)?;
        let rhs = source.rhs(config)?;

        let system = operators.system_matrix();
        tracing::trace!(
            size = system.nrows(),
            nnz = system.nnz(),
            source = ?source.position,
            "solving"
        );

        let solution = self.linear_solver.solve(&system, &rhs)?;

        derive_fields(assembler, permittivity, solution).map_err(Error::from)
    }
}

fn derive_fields(
    assembler: &OperatorAssembler,
    permittivity: &Lattice<f64>,
    solution: DVector<Complex64>,
) -> Result<Fields, ConfigurationError> {
    let config = assembler.config();
    let derivatives = assembler.derivatives();
    let shape = config.shape;
    let i_omega = Complex64::new(0.0, config.omega);

    match config.polarization {
        Polarization::Ez => {
            let denominator = i_omega * config.constants.vacuum_permeability * config.length_scale;

            let hx = (&derivatives.dyb * &solution)
                .iter()
                .map(|x| -x / denominator)
                .collect();
            let hy = (&derivatives.dxb * &solution)
                .iter()
                .map(|x| x / denominator)
                .collect();

            Ok(Fields::Ez {
                hx: Lattice::from_vec(shape, hx)?,
                hy: Lattice::from_vec(shape, hy)?,
                ez: Lattice::from_vec(shape, solution.data.into())?,
            })
        }
        Polarization::Hz => {
            let denominator = i_omega * config.constants.vacuum_permittivity * config.length_scale;
            let eps_x = grid_average(permittivity, Axis::X);
            let eps_y = grid_average(permittivity, Axis::Y);

            let ex = (&derivatives.dyb * &solution)
                .iter()
                .zip(eps_y.as_slice())
                .map(|(x, eps)| x / (denominator * *eps))
                .collect();
            let ey = (&derivatives.dxb * &solution)
                .iter()
                .zip(eps_x.as_slice())
                .map(|(x, eps)| -x / (denominator * *eps))
                .collect();

            Ok(Fields::Hz {
                ex: Lattice::from_vec(shape, ex)?,
                ey: Lattice::from_vec(shape, ey)?,
                hz: Lattice::from_vec(shape, solution.data.into())?,
            })
        }
    }
}
