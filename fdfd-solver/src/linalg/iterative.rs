use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use num::{
    Zero,
    complex::Complex64,
};

use crate::{
    error::SolverError,
    linalg::{
        LinearSolver,
        check_dimensions,
    },
};

/// Unpreconditioned BiCGSTAB for complex non-Hermitian systems.
///
/// Starts from `x = 0` and stops once `|b - A x| / |b|` drops below
/// `tolerance`.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct BiCgStab {
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for BiCgStab {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 10_000,
        }
    }
}

impl LinearSolver for BiCgStab {
    fn solve(
        &self,
        matrix: &CsrMatrix<Complex64>,
        rhs: &DVector<Complex64>,
    ) -> Result<DVector<Complex64>, SolverError> {
        check_dimensions(matrix, rhs)?;

        let n = rhs.len();
        let mut x = DVector::zeros(n);

        let b_norm = rhs.norm();
        if b_norm == 0.0 {
            return Ok(x);
        }

        let mut r = rhs.clone();
        let r_hat = rhs.clone();
        let mut p = DVector::zeros(n);
        let mut v = DVector::zeros(n);

        let one = Complex64::new(1.0, 0.0);
        let mut rho = one;
        let mut alpha = one;
        let mut omega = one;
        let mut residual = 1.0;

        for iteration in 1..=self.max_iterations {
            let rho_next = r_hat.dotc(&r);
            if rho_next.is_zero() || omega.is_zero() {
                return Err(SolverError::Breakdown {
                    iterations: iteration,
                });
            }

            let beta = (rho_next / rho) * (alpha / omega);
            p = &r + (&p - &v * omega) * beta;

            v = matrix * &p;
            let r_hat_v = r_hat.dotc(&v);
            if r_hat_v.is_zero() {
                return Err(SolverError::Breakdown {
                    iterations: iteration,
                });
            }
            alpha = rho_next / r_hat_v;

            let s = &r - &v * alpha;

            residual = s.norm() / b_norm;
            if residual < self.tolerance {
                x.axpy(alpha, &p, one);
                tracing::trace!(iteration, residual, "bicgstab converged (half step)");
                return Ok(x);
            }

            let t = matrix * &s;
            let t_t = t.dotc(&t);
            if t_t.is_zero() {
                return Err(SolverError::Breakdown {
                    iterations: iteration,
                });
            }
            omega = t.dotc(&s) / t_t;

            x.axpy(alpha, &p, one);
            x.axpy(omega, &s, one);

            r = &s - &t * omega;

            residual = r.norm() / b_norm;
            if residual < self.tolerance {
                tracing::trace!(iteration, residual, "bicgstab converged");
                return Ok(x);
            }

            if !residual.is_finite() {
                return Err(SolverError::Breakdown {
                    iterations: iteration,
                });
            }

            rho = rho_next;
        }

        Err(SolverError::DidNotConverge {
            iterations: self.max_iterations,
            residual,
        })
    }
}
