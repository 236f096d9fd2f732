use faer::{
    Mat,
    c64,
    linalg::solvers::Solve,
    sparse::{
        SparseColMat,
        Triplet,
    },
};
use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use num::complex::Complex64;

use crate::{
    error::SolverError,
    linalg::{
        LinearSolver,
        check_dimensions,
    },
};

/// Sparse direct solver.
///
/// Factors the system with faer's sparse LU (fill-reducing column ordering,
/// partial pivoting). Nothing is cached between calls, since every instance
/// has a different system matrix.
#[derive(Clone, Copy, Debug, Default)]
pub struct SparseLu;

impl LinearSolver for SparseLu {
    fn solve(
        &self,
        matrix: &CsrMatrix<Complex64>,
        rhs: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>, SolverError> {
        check_dimensions(matrix, rhs)?;

        let n = rhs.len();
        if n == 0 {
            return Ok(DVector::zeros(0));
        }

        let triplets = matrix
            .triplet_iter()
            .map(|(row, col, value)| Triplet::new(row, col, c64::new(value.re, value.im)))
            .collect::<Vec<_>>();
        let system = SparseColMat::<usize, c64>::try_new_from_triplets(n, n, &triplets)
            .map_err(|error| {
                SolverError::Factorization {
                    reason: format!("{error:?}"),
                }
            })?;

        let lu = system.as_ref().sp_lu().map_err(|error| {
            SolverError::Factorization {
                reason: format!("{error:?}"),
            }
        })?;

        let mut x = Mat::<c64>::from_fn(n, 1, |row, _| c64::new(rhs[row].re, rhs[row].im));
        lu.solve_in_place(x.as_mut());

        let solution = DVector::from_fn(n, |row, _| {
            let value = x[(row, 0)];
            Complex64::new(value.re, value.im)
        });

        tracing::trace!(n, nnz = matrix.nnz(), "sparse lu");

        // a zero pivot doesn't fail the factorization, but poisons the solution
        if let Some(row) = solution.iter().position(|value| !value.is_finite()) {
            return Err(SolverError::Singular { row });
        }

        Ok(solution)
    }
}
