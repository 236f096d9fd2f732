//! Sparse linear algebra over complex CSR matrices.
//!
//! Operators are assembled as [`CsrMatrix<Complex64>`], vectors are nalgebra
//! [`DVector`]s. Products between the two come from nalgebra-sparse.

mod iterative;
mod sparse_lu;

use nalgebra::DVector;
use nalgebra_sparse::{
    CooMatrix,
    CsrMatrix,
};
use num::complex::Complex64;

pub use self::{
    iterative::BiCgStab,
    sparse_lu::SparseLu,
};
use crate::error::SolverError;

/// Solves `A x = b` for a square sparse system.
///
/// Implementations must not modify `matrix`.
pub trait LinearSolver {
    fn solve(
        &self,
        matrix: &CsrMatrix<Complex64>,
        rhs: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>, SolverError>;
}

impl<S: LinearSolver + ?Sized> LinearSolver for &S {
    fn solve(
        &self,
        matrix: &CsrMatrix<Complex64>,
        rhs: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>, SolverError> {
        (**self).solve(matrix, rhs)
    }
}

impl<S: LinearSolver + ?Sized> LinearSolver for Box<S> {
    fn solve(
        &self,
        matrix: &CsrMatrix<Complex64>,
        rhs: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>, SolverError> {
        (**self).solve(matrix, rhs)
    }
}

pub(crate) fn check_dimensions(
    matrix: &CsrMatrix<Complex64>,
    rhs: &DVector<Complex64>,
) -> Result<(), SolverError> {
    if matrix.nrows() != matrix.ncols() || matrix.nrows() != rhs.len() {
        Err(SolverError::DimensionMismatch {
            rows: matrix.nrows(),
            cols: matrix.ncols(),
            rhs: rhs.len(),
        })
    }
    else {
        Ok(())
    }
}

/// Square diagonal matrix.
pub fn diagonal(values: impl IntoIterator<Item = Complex64>) -> CsrMatrix<Complex64> {
    let values = values.into_iter().collect::<Vec<_>>();
    let n = values.len();
    let mut coo = CooMatrix::new(n, n);
    for (i, value) in values.into_iter().enumerate() {
        coo.push(i, i, value);
    }
    CsrMatrix::from(&coo)
}
