use nalgebra::{DMatrix, DVector};
use std::fmt;

/// Solve a dense square system via Nalgebra's LU Decomposition with partial pivoting
///
/// This casts the sparse matrix as a dense matrix object, which uses a very
/// large amount of memory when the system is large. The assembled systems of
/// this crate are bounded by the adaptivity loop's DOF budget, which keeps them
/// within dense-solve range.
pub fn lu_solve(matrix: DMatrix<f64>, rhs: DVector<f64>) -> Result<DVector<f64>, SolveError> {
    if matrix.nrows() != rhs.len() {
        return Err(SolveError::DimensionMismatch(matrix.nrows(), rhs.len()));
    }
    matrix
        .lu()
        .solve(&rhs)
        .ok_or(SolveError::SingularMatrix)
}

/// Error type for linear system solves
#[derive(Debug, Clone)]
pub enum SolveError {
    SingularMatrix,
    DimensionMismatch(usize, usize),
}

impl fmt::Display for SolveError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::SingularMatrix => write!(
                f,
                "System matrix is singular to working precision; cannot solve!"
            ),
            Self::DimensionMismatch(mat_dim, rhs_dim) => write!(
                f,
                "Matrix dimension ({}) does not match RHS length ({}); cannot solve!",
                mat_dim, rhs_dim
            ),
        }
    }
}

impl std::error::Error for SolveError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn solves_a_small_system() {
        let matrix = DMatrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let rhs = DVector::from_vec(vec![5.0, 10.0]);
        let x = lu_solve(matrix, rhs).unwrap();
        assert!((x[0] - 1.0).abs() < 1e-12);
        assert!((x[1] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_singular_systems() {
        let matrix = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let rhs = DVector::from_vec(vec![1.0, 1.0]);
        assert!(matches!(
            lu_solve(matrix, rhs),
            Err(SolveError::SingularMatrix)
        ));
    }
}
