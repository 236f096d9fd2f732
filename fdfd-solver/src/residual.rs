//! Physics residual for model training.
//!
//! A model that predicts fields can be trained without ground truth by
//! penalizing how far its prediction is from satisfying the discretized
//! Maxwell equation. This evaluates that residual on the sparse operators,
//! the same ones the [`FieldSolver`](crate::solver::FieldSolver) inverts.

use std::sync::Arc;

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use num::complex::Complex64;

use crate::{
    error::{
        Error,
        SolverError,
    },
    lattice::Lattice,
    operator::{
        MaxwellOperators,
        OperatorConfig,
    },
    solver::Source,
};

/// `r = curl_curl u + omega^2 mu_0 L0 material u - b`
#[derive(Clone, derive_more::Debug)]
pub struct PhysicsResidual {
    #[debug(skip)]
    curl_curl: Arc<CsrMatrix<Complex64>>,
    #[debug(skip)]
    material: CsrMatrix<Complex64>,
    material_factor: f64,
    #[debug(skip)]
    rhs: DVector<Complex64>,
}

impl PhysicsResidual {
    pub fn new(operators: &MaxwellOperators, rhs: DVector<Complex64>) -> Result<Self, SolverError> {
        if rhs.len() != operators.size() {
            return Err(SolverError::DimensionMismatch {
                rows: operators.size(),
                cols: operators.size(),
                rhs: rhs.len(),
            });
        }

        Ok(Self {
            curl_curl: operators.curl_curl.clone(),
            material: operators.material.clone(),
            material_factor: operators.material_factor(),
            rhs,
        })
    }

    /// Residual for a point source, with the right-hand side scaled the same
    /// way as for the solver.
    pub fn for_source(
        operators: &MaxwellOperators,
        config: &OperatorConfig,
        source: &Source,
    ) -> Result<Self, Error> {
        let rhs = source.rhs(config)?;
        Ok(Self::new(operators, rhs)?)
    }

    pub fn rhs(&self) -> &[Complex64] {
        self.rhs.as_slice()
    }

    fn residual(&self, field: &[Complex64]) -> Result<DVector<Complex64>, SolverError> {
        if field.len() != self.rhs.len() {
            return Err(SolverError::DimensionMismatch {
                rows: self.curl_curl.nrows(),
                cols: self.curl_curl.ncols(),
                rhs: field.len(),
            });
        }

        let field = DVector::from_column_slice(field);
        let material = &self.material * &field * Complex64::from(self.material_factor);
        Ok(&*self.curl_curl * &field + material - &self.rhs)
    }

    pub fn evaluate(&self, field: &[Complex64]) -> Result<Vec<Complex64>, SolverError> {
        Ok(self.residual(field)?.data.into())
    }

    pub fn evaluate_lattice(&self, field: &Lattice<Complex64>) -> Result<Lattice<Complex64>, Error> {
        let residual = self.evaluate(field.as_slice())?;
        Ok(Lattice::from_vec(field.shape(), residual)?)
    }

    /// `|r| / |b|`
    pub fn relative_norm(&self, field: &[Complex64]) -> Result<f64, SolverError> {
        Ok(self.residual(field)?.norm() / self.rhs.norm())
    }
}
