//! Assembly of the discretized Maxwell operators.
//!
//! Both polarizations reduce to a scalar equation for the out-of-plane
//! component `u` (Ez or Hz):
//!
//! ```text
//! (curl_curl + omega^2 * mu_0 * L0 * material) u = b
//! ```
//!
//! `curl_curl` is built from forward and backward differences on a Yee grid,
//! each left-multiplied with the PML stretch factors. All matrices act on the
//! row-major flattened grid (see [`Strider`](crate::lattice::Strider)).

use std::{
    fmt::Display,
    str::FromStr,
    sync::Arc,
};

use nalgebra::{
    Point2,
    Vector2,
};
use nalgebra_sparse::{
    CooMatrix,
    CsrMatrix,
};
use num::complex::Complex64;

use crate::{
    constants::{
        DEFAULT_LENGTH_SCALE,
        PhysicalConstants,
    },
    error::ConfigurationError,
    lattice::{
        Axis,
        Lattice,
        Strider,
    },
    linalg::diagonal,
    pml::{
        PmlAxis,
        PmlParameters,
        StencilSide,
    },
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, strum::VariantArray)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Polarization {
    /// Ez, Hx, Hy (TM)
    #[default]
    Ez,
    /// Hz, Ex, Ey (TE)
    Hz,
}

impl Polarization {
    pub fn as_str(&self) -> &'static str {
        match self {
            Polarization::Ez => "Ez",
            Polarization::Hz => "Hz",
        }
    }
}

impl Display for Polarization {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Polarization {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("ez") {
            Ok(Self::Ez)
        }
        else if s.eq_ignore_ascii_case("hz") {
            Ok(Self::Hz)
        }
        else {
            Err(ConfigurationError::InvalidPolarization {
                value: s.to_owned(),
            })
        }
    }
}

/// How difference stencils are truncated at the edge of the grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(
    feature = "serde",
    derive(serde::Serialize, serde::Deserialize),
    serde(rename_all = "snake_case")
)]
pub enum Boundary {
    /// Field vanishes outside of the grid.
    #[default]
    Dirichlet,
    /// Stencils wrap around to the opposite edge.
    Periodic,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OperatorConfig {
    /// Grid shape in cells.
    pub shape: Vector2<usize>,
    /// PML thickness in cells per axis.
    pub pml: Vector2<usize>,
    /// Cell size in units of `length_scale`.
    pub spacing: f64,
    pub length_scale: f64,
    /// Angular frequency in rad/s.
    pub omega: f64,
    pub polarization: Polarization,
    pub pml_parameters: PmlParameters,
    pub constants: PhysicalConstants,
    pub boundary: Boundary,
}

impl OperatorConfig {
    pub fn new(shape: Vector2<usize>, spacing: f64, omega: f64) -> Self {
        Self {
            shape,
            pml: Vector2::zeros(),
            spacing,
            length_scale: DEFAULT_LENGTH_SCALE,
            omega,
            polarization: Polarization::default(),
            pml_parameters: PmlParameters::default(),
            constants: PhysicalConstants::default(),
            boundary: Boundary::default(),
        }
    }

    pub fn with_pml(mut self, pml: Vector2<usize>) -> Self {
        self.pml = pml;
        self
    }

    pub fn with_polarization(mut self, polarization: Polarization) -> Self {
        self.polarization = polarization;
        self
    }

    pub fn with_length_scale(mut self, length_scale: f64) -> Self {
        self.length_scale = length_scale;
        self
    }

    pub fn with_boundary(mut self, boundary: Boundary) -> Self {
        self.boundary = boundary;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        for axis in Axis::ALL {
            if *axis.vector_component(&self.shape) == 0 {
                return Err(ConfigurationError::EmptyGrid { axis });
            }
        }

        let positive = |name: &'static str, value: f64| {
            if value > 0.0 && value.is_finite() {
                Ok(())
            }
            else {
                Err(ConfigurationError::InvalidParameter {
                    name,
                    reason: format!("must be positive and finite, but is {value}"),
                })
            }
        };
        positive("grid spacing", self.spacing)?;
        positive("length scale", self.length_scale)?;
        positive("angular frequency", self.omega)?;

        Ok(())
    }

    /// Permeability times length scale, the factor in front of the material
    /// operator.
    pub fn coupling(&self) -> f64 {
        self.constants.vacuum_permeability * self.length_scale
    }

    /// Scaling from the source amplitude to the right-hand side entry.
    pub fn source_coefficient(&self) -> Complex64 {
        let i_omega = Complex64::new(0.0, self.omega);
        match self.polarization {
            Polarization::Ez => i_omega * self.constants.vacuum_permeability * self.length_scale,
            Polarization::Hz => -i_omega * self.constants.vacuum_permittivity * self.length_scale,
        }
    }

    fn stretch_factors(&self, axis: Axis, side: StencilSide) -> Vec<Complex64> {
        let pml_axis = PmlAxis {
            cells: *axis.vector_component(&self.shape),
            thickness: *axis.vector_component(&self.pml),
            spacing: self.spacing,
        };
        self.pml_parameters.stretch_factors(
            &pml_axis,
            side,
            self.omega,
            self.length_scale,
            &self.constants,
        )
    }
}

/// PML-stretched difference operators.
#[derive(Clone, derive_more::Debug)]
pub struct Derivatives {
    #[debug(skip)]
    pub dxf: CsrMatrix<Complex64>,
    #[debug(skip)]
    pub dxb: CsrMatrix<Complex64>,
    #[debug(skip)]
    pub dyf: CsrMatrix<Complex64>,
    #[debug(skip)]
    pub dyb: CsrMatrix<Complex64>,
}

impl Derivatives {
    pub fn new(config: &OperatorConfig) -> Self {
        let strider = Strider::new(&config.shape);

        let build = |axis, side| {
            let factors = config.stretch_factors(axis, side);
            let inverse = diagonal(
                strider
                    .iter(..)
                    .map(|(_, point)| factors[axis_coordinate(&point, axis)].inv()),
            );
            &inverse * &difference(&strider, axis, side, config.spacing, config.boundary)
        };

        Self {
            dxf: build(Axis::X, StencilSide::Forward),
            dxb: build(Axis::X, StencilSide::Backward),
            dyf: build(Axis::Y, StencilSide::Forward),
            dyb: build(Axis::Y, StencilSide::Backward),
        }
    }
}

fn axis_coordinate(point: &Point2<usize>, axis: Axis) -> usize {
    match axis {
        Axis::X => point.x,
        Axis::Y => point.y,
    }
}

fn with_coordinate(mut point: Point2<usize>, axis: Axis, value: usize) -> Point2<usize> {
    match axis {
        Axis::X => point.x = value,
        Axis::Y => point.y = value,
    }
    point
}

/// Unstretched first difference along `axis`, scaled by `1 / spacing`.
fn difference(
    strider: &Strider,
    axis: Axis,
    side: StencilSide,
    spacing: f64,
    boundary: Boundary,
) -> CsrMatrix<Complex64> {
    let n = strider.len();
    let extent = *axis.vector_component(strider.shape());
    let mut coo = CooMatrix::new(n, n);

    // a single cell has no neighbours, and wrapping onto itself cancels out
    if extent > 1 {
        let h = Complex64::new(1.0 / spacing, 0.0);

        for (row, point) in strider.iter(..) {
            let coordinate = axis_coordinate(&point, axis);

            let (diagonal, neighbour) = match side {
                StencilSide::Forward => {
                    let neighbour = if coordinate + 1 < extent {
                        Some(coordinate + 1)
                    }
                    else {
                        (boundary == Boundary::Periodic).then_some(0)
                    };
                    (-h, neighbour)
                }
                StencilSide::Backward => {
                    let neighbour = if coordinate > 0 {
                        Some(coordinate - 1)
                    }
                    else {
                        (boundary == Boundary::Periodic).then_some(extent - 1)
                    };
                    (h, neighbour)
                }
            };

            coo.push(row, row, diagonal);

            if let Some(neighbour) = neighbour {
                let col = strider.index_unchecked(&with_coordinate(point, axis, neighbour));
                coo.push(row, col, -diagonal);
            }
        }
    }

    CsrMatrix::from(&coo)
}

/// Averages the permittivity onto the cell faces normal to `axis`.
///
/// `out[i] = (eps[i] + eps[i - 1]) / 2` along `axis`, wrapping around at the
/// lower edge.
pub fn grid_average(permittivity: &Lattice<f64>, axis: Axis) -> Lattice<f64> {
    let extent = *axis.vector_component(&permittivity.shape());
    Lattice::from_fn(permittivity.shape(), |point| {
        let coordinate = axis_coordinate(&point, axis);
        let previous = with_coordinate(point, axis, (coordinate + extent - 1) % extent);
        0.5 * (permittivity[point] + permittivity[previous])
    })
}

/// The curl-curl and material operators of one simulation instance.
///
/// The full system matrix is
/// `curl_curl + omega^2 * coupling * material`.
#[derive(Clone, derive_more::Debug)]
pub struct MaxwellOperators {
    #[debug(skip)]
    pub curl_curl: Arc<CsrMatrix<Complex64>>,
    #[debug(skip)]
    pub material: CsrMatrix<Complex64>,
    /// `mu_0 * L0`
    pub coupling: f64,
    pub omega: f64,
    pub shape: Vector2<usize>,
    pub polarization: Polarization,
}

/// Single non-zero matrix entry, split into real and imaginary part.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Triplet {
    pub row: usize,
    pub col: usize,
    pub re: f64,
    pub im: f64,
}

/// Operators in coordinate form for consumers outside of Rust.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct OperatorTriplets {
    pub size: usize,
    pub shape: [usize; 2],
    pub polarization: Polarization,
    pub omega: f64,
    pub coupling: f64,
    pub curl_curl: Vec<Triplet>,
    pub material: Vec<Triplet>,
}

impl MaxwellOperators {
    pub fn size(&self) -> usize {
        self.material.nrows()
    }

    /// Factor in front of the material operator, `omega^2 * mu_0 * L0`.
    pub fn material_factor(&self) -> f64 {
        self.omega.powi(2) * self.coupling
    }

    pub fn system_matrix(&self) -> CsrMatrix<Complex64> {
        &*self.curl_curl + &(&self.material * Complex64::new(self.material_factor(), 0.0))
    }

    pub fn to_triplets(&self) -> OperatorTriplets {
        let triplets = |matrix: &CsrMatrix<Complex64>| {
            matrix
                .triplet_iter()
                .map(|(row, col, value)| {
                    Triplet {
                        row,
                        col,
                        re: value.re,
                        im: value.im,
                    }
                })
                .collect()
        };

        OperatorTriplets {
            size: self.size(),
            shape: [self.shape.x, self.shape.y],
            polarization: self.polarization,
            omega: self.omega,
            coupling: self.coupling,
            curl_curl: triplets(&self.curl_curl),
            material: triplets(&self.material),
        }
    }
}

/// Builds operators for a fixed grid, frequency and polarization.
///
/// The derivative operators (and in Ez mode the curl-curl operator) don't
/// depend on the permittivity, so they are built once and shared between all
/// instances assembled with this.
#[derive(Clone, Debug)]
pub struct OperatorAssembler {
    config: OperatorConfig,
    derivatives: Arc<Derivatives>,
    curl_curl: Option<Arc<CsrMatrix<Complex64>>>,
}

impl OperatorAssembler {
    pub fn new(config: OperatorConfig) -> Result<Self, ConfigurationError> {
        config.validate()?;

        let derivatives = Arc::new(Derivatives::new(&config));

        let curl_curl = match config.polarization {
            Polarization::Ez => Some(Arc::new(ez_curl_curl(&derivatives))),
            Polarization::Hz => None,
        };

        tracing::debug!(
            shape = ?config.shape,
            pml = ?config.pml,
            polarization = %config.polarization,
            nnz = curl_curl.as_ref().map(|matrix| matrix.nnz()),
            "operator assembler"
        );

        Ok(Self {
            config,
            derivatives,
            curl_curl,
        })
    }

    pub fn config(&self) -> &OperatorConfig {
        &self.config
    }

    pub fn shape(&self) -> Vector2<usize> {
        self.config.shape
    }

    pub fn polarization(&self) -> Polarization {
        self.config.polarization
    }

    pub fn derivatives(&self) -> &Arc<Derivatives> {
        &self.derivatives
    }

    pub fn assemble(
        &self,
        permittivity: &Lattice<f64>,
    ) -> Result<MaxwellOperators, ConfigurationError> {
        permittivity.ensure_shape(&self.config.shape)?;

        let vacuum_permittivity = self.config.constants.vacuum_permittivity;
        let length_scale = self.config.length_scale;

        let (curl_curl, material) = match self.config.polarization {
            Polarization::Ez => {
                let curl_curl = self
                    .curl_curl
                    .clone()
                    .unwrap_or_else(|| Arc::new(ez_curl_curl(&self.derivatives)));
                let material = diagonal(
                    permittivity
                        .as_slice()
                        .iter()
                        .map(|eps| Complex64::new(vacuum_permittivity * length_scale * eps, 0.0)),
                );
                (curl_curl, material)
            }
            Polarization::Hz => {
                let curl_curl = self.hz_curl_curl(permittivity);
                let material = diagonal(
                    std::iter::repeat_n(
                        Complex64::new(vacuum_permittivity * length_scale, 0.0),
                        permittivity.len(),
                    ),
                );
                (Arc::new(curl_curl), material)
            }
        };

        Ok(MaxwellOperators {
            curl_curl,
            material,
            coupling: self.config.coupling(),
            omega: self.config.omega,
            shape: self.config.shape,
            polarization: self.config.polarization,
        })
    }

    fn hz_curl_curl(&self, permittivity: &Lattice<f64>) -> CsrMatrix<Complex64> {
        let d = &self.derivatives;

        let weighted = |backward: &CsrMatrix<Complex64>, axis: Axis| {
            let inverse = diagonal(
                grid_average(permittivity, axis)
                    .as_slice()
                    .iter()
                    .map(|eps| Complex64::new(eps.recip(), 0.0)),
            );
            &inverse * backward
        };

        &(&d.dxf * &weighted(&d.dxb, Axis::X)) + &(&d.dyf * &weighted(&d.dyb, Axis::Y))
    }
}

fn ez_curl_curl(d: &Derivatives) -> CsrMatrix<Complex64> {
    &(&d.dxf * &d.dxb) + &(&d.dyf * &d.dyb)
}

/// Ez operators for a permittivity grid with the same PML thickness on both
/// axes.
pub fn operators_2d(
    permittivity: &Lattice<f64>,
    npml: usize,
    omega: f64,
    spacing: f64,
    length_scale: f64,
) -> Result<MaxwellOperators, ConfigurationError> {
    let config = OperatorConfig::new(permittivity.shape(), spacing, omega)
        .with_pml(Vector2::repeat(npml))
        .with_length_scale(length_scale);
    OperatorAssembler::new(config)?.assemble(permittivity)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use nalgebra::{
        DVector,
        Vector2,
    };
    use nalgebra_sparse::{
        CsrMatrix,
        SparseEntry,
    };
    use num::complex::Complex64;

    use crate::{
        constants::{
            DEFAULT_LENGTH_SCALE,
            OMEGA_1550,
            PhysicalConstants,
        },
        error::ConfigurationError,
        lattice::{
            Axis,
            Lattice,
        },
        operator::{
            Boundary,
            OperatorAssembler,
            OperatorConfig,
            Polarization,
            grid_average,
            operators_2d,
        },
    };

    fn entry(matrix: &CsrMatrix<Complex64>, row: usize, col: usize) -> Complex64 {
        matrix
            .get_entry(row, col)
            .map_or(Complex64::new(0.0, 0.0), |entry| entry.into_value())
    }

    fn test_vector(n: usize) -> DVector<Complex64> {
        DVector::from_fn(n, |i, _| {
            Complex64::new((i as f64 * 0.37).sin(), (i as f64 * 0.11).cos())
        })
    }

    #[test]
    fn it_parses_polarizations() {
        assert_eq!("Ez".parse::<Polarization>().unwrap(), Polarization::Ez);
        assert_eq!("hz".parse::<Polarization>().unwrap(), Polarization::Hz);

        match "Ey".parse::<Polarization>() {
            Err(ConfigurationError::InvalidPolarization { value }) => assert_eq!(value, "Ey"),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn it_builds_the_diagonal_material_operator() {
        let permittivity =
            Lattice::from_fn(Vector2::new(4, 3), |p| 1.0 + p.x as f64 + 0.5 * p.y as f64);
        let operators =
            operators_2d(&permittivity, 0, 2.0 * OMEGA_1550, 0.05, DEFAULT_LENGTH_SCALE).unwrap();

        let scale = PhysicalConstants::SI.vacuum_permittivity * DEFAULT_LENGTH_SCALE;
        assert_eq!(operators.material.nnz(), 12);
        for (row, col, value) in operators.material.triplet_iter() {
            assert_eq!(row, col);
            assert_relative_eq!(value.re, scale * permittivity[row], max_relative = 1e-14);
            assert_eq!(value.im, 0.0);
        }
    }

    #[test]
    fn it_builds_difference_stencils() {
        let config = OperatorConfig::new(Vector2::new(3, 2), 0.5, OMEGA_1550);
        let assembler = OperatorAssembler::new(config).unwrap();
        let d = assembler.derivatives();

        // (x, y) = (0, 0) is row 0, its x neighbour (1, 0) is row 2
        assert_eq!(entry(&d.dxf, 0, 0), Complex64::new(-2.0, 0.0));
        assert_eq!(entry(&d.dxf, 0, 2), Complex64::new(2.0, 0.0));
        assert_eq!(entry(&d.dyf, 0, 1), Complex64::new(2.0, 0.0));
        assert_eq!(entry(&d.dxb, 2, 0), Complex64::new(-2.0, 0.0));
        assert_eq!(entry(&d.dxb, 2, 2), Complex64::new(2.0, 0.0));

        // truncated at the edges
        assert!(matches!(d.dxf.get_entry(4, 0), Some(SparseEntry::Zero)));
        assert_eq!(entry(&d.dxf, 4, 4), Complex64::new(-2.0, 0.0));
        assert!(matches!(d.dxb.get_entry(0, 4), Some(SparseEntry::Zero)));
        assert_eq!(d.dxf.row(4).nnz(), 1);
    }

    #[test]
    fn it_wraps_periodic_stencils() {
        let config = OperatorConfig::new(Vector2::new(3, 2), 1.0, OMEGA_1550)
            .with_boundary(Boundary::Periodic);
        let assembler = OperatorAssembler::new(config).unwrap();
        let d = assembler.derivatives();

        assert_eq!(entry(&d.dxf, 4, 0), Complex64::new(1.0, 0.0));
        assert_eq!(entry(&d.dxb, 0, 4), Complex64::new(-1.0, 0.0));

        // constant fields have no derivative
        let ones = DVector::from_element(6, Complex64::new(1.0, 0.0));
        for matrix in [&d.dxf, &d.dxb, &d.dyf, &d.dyb] {
            assert!((matrix * &ones).iter().all(|x| x.norm() < 1e-12));
        }
    }

    #[test]
    fn it_has_no_derivative_along_single_cell_axes() {
        let config = OperatorConfig::new(Vector2::new(8, 1), 0.05, OMEGA_1550)
            .with_pml(Vector2::new(2, 0));
        let assembler = OperatorAssembler::new(config).unwrap();
        assert_eq!(assembler.derivatives().dyf.nnz(), 0);
        assert_eq!(assembler.derivatives().dyb.nnz(), 0);
        assert!(assembler.derivatives().dxf.nnz() > 0);
    }

    #[test]
    fn it_shares_the_ez_curl_curl_operator() {
        let shape = Vector2::new(6, 6);
        let config = OperatorConfig::new(shape, 0.05, OMEGA_1550).with_pml(Vector2::new(2, 2));
        let assembler = OperatorAssembler::new(config).unwrap();

        let vacuum = assembler.assemble(&Lattice::from_value(shape, 1.0)).unwrap();
        let device = assembler.assemble(&Lattice::from_value(shape, 12.0)).unwrap();
        assert!(Arc::ptr_eq(&vacuum.curl_curl, &device.curl_curl));
    }

    #[test]
    fn it_reduces_hz_to_ez_in_vacuum() {
        let shape = Vector2::new(5, 4);
        let config = OperatorConfig::new(shape, 0.05, OMEGA_1550).with_pml(Vector2::new(1, 1));
        let vacuum = Lattice::from_value(shape, 1.0);

        let ez = OperatorAssembler::new(config).unwrap().assemble(&vacuum).unwrap();
        let hz = OperatorAssembler::new(config.with_polarization(Polarization::Hz))
            .unwrap()
            .assemble(&vacuum)
            .unwrap();

        let x = test_vector(20);
        let ez_x = &*ez.curl_curl * &x;
        let hz_x = &*hz.curl_curl * &x;
        for (a, b) in ez_x.iter().zip(&hz_x) {
            assert!((a - b).norm() <= 1e-9 * a.norm().max(1.0));
        }

        // in vacuum the material operators agree too
        let ez_m = &ez.material * &x;
        let hz_m = &hz.material * &x;
        for (a, b) in ez_m.iter().zip(&hz_m) {
            assert!((a - b).norm() <= 1e-12 * a.norm());
        }
    }

    #[test]
    fn it_combines_the_system_matrix() {
        let shape = Vector2::new(4, 4);
        let permittivity = Lattice::from_fn(shape, |p| 1.0 + (p.x * p.y) as f64);
        let operators =
            operators_2d(&permittivity, 1, OMEGA_1550, 0.05, DEFAULT_LENGTH_SCALE).unwrap();

        let x = test_vector(16);
        let system_x = &operators.system_matrix() * &x;
        let curl_curl_x = &*operators.curl_curl * &x;
        let material_x = &operators.material * &x;
        let factor = operators.material_factor();

        for i in 0..16 {
            let expected = curl_curl_x[i] + factor * material_x[i];
            assert!((system_x[i] - expected).norm() <= 1e-9 * expected.norm());
        }
    }

    #[test]
    fn it_exports_triplets() {
        let permittivity = Lattice::from_value(Vector2::new(3, 3), 2.0);
        let operators =
            operators_2d(&permittivity, 0, OMEGA_1550, 0.1, DEFAULT_LENGTH_SCALE).unwrap();
        let triplets = operators.to_triplets();

        assert_eq!(triplets.size, 9);
        assert_eq!(triplets.material.len(), 9);
        assert_eq!(triplets.curl_curl.len(), operators.curl_curl.nnz());
        assert!(triplets.material.iter().all(|t| t.row == t.col && t.im == 0.0));
    }

    #[test]
    fn it_rejects_mismatched_permittivity() {
        let config = OperatorConfig::new(Vector2::new(4, 4), 0.05, OMEGA_1550);
        let assembler = OperatorAssembler::new(config).unwrap();
        assert!(matches!(
            assembler.assemble(&Lattice::from_value(Vector2::new(4, 5), 1.0)),
            Err(ConfigurationError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn it_averages_onto_cell_faces() {
        let permittivity = Lattice::from_rows([[1.0, 2.0], [3.0, 5.0]]);
        let x = grid_average(&permittivity, Axis::X);
        let y = grid_average(&permittivity, Axis::Y);
        assert_eq!(x, Lattice::from_rows([[2.0, 3.5], [2.0, 3.5]]));
        assert_eq!(y, Lattice::from_rows([[1.5, 1.5], [4.0, 4.0]]));
    }
}
