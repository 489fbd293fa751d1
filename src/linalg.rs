//! Sparse accumulation and dense solution of the assembled linear systems

/// Dense LU solves via Nalgebra
pub mod solve;
/// Sparsely Packed Matrix
pub mod sparse_matrix;

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use solve::{lu_solve, SolveError};
use sparse_matrix::SparseMatrix;
use std::sync::mpsc::channel;

/// The contribution of one Elem to a [LinearSystem]: a local stiffness matrix
/// (in global coordinates) and the touched RHS entries
pub struct ElemContribution {
    pub matrix: SparseMatrix,
    pub rhs_entries: Vec<(usize, f64)>,
}

/// An assembled linear system `A x = b`
pub struct LinearSystem {
    /// System Matrix
    pub matrix: SparseMatrix,
    /// Right hand side vector
    pub rhs: DVector<f64>,
}

impl LinearSystem {
    pub fn new(num_dofs: usize) -> Self {
        Self {
            matrix: SparseMatrix::new(num_dofs),
            rhs: DVector::zeros(num_dofs),
        }
    }

    pub fn num_dofs(&self) -> usize {
        self.matrix.dimension
    }

    /// Accumulate a value into the RHS vector
    pub fn add_rhs(&mut self, idx: usize, value: f64) {
        assert!(
            idx < self.rhs.len(),
            "RHS index exceeded system dimension; cannot insert value!"
        );
        self.rhs[idx] += value;
    }

    /// Fold one Elem's contribution into the system
    pub fn consume_contribution(&mut self, mut contribution: ElemContribution) {
        self.matrix.consume_matrix(&mut contribution.matrix);
        for (idx, value) in contribution.rhs_entries {
            self.add_rhs(idx, value);
        }
    }

    /// Solve the system, consuming it
    pub fn solve(self) -> Result<DVector<f64>, SolveError> {
        let dense: DMatrix<f64> = self.matrix.into();
        lu_solve(dense, self.rhs)
    }
}

impl ParallelExtend<ElemContribution> for LinearSystem {
    fn par_extend<I>(&mut self, contributions_iter: I)
    where
        I: IntoParallelIterator<Item = ElemContribution>,
    {
        let (sender, receiver) = channel();

        contributions_iter
            .into_par_iter()
            .for_each_with(sender, |s, contribution| {
                s.send(contribution).expect(
                    "Failed to send sub-matrices over MSPC channel; cannot construct Matrices!",
                )
            });

        receiver.iter().for_each(|contribution| {
            self.consume_contribution(contribution);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn diag_contribution(dim: usize, idx: usize, value: f64, rhs: f64) -> ElemContribution {
        let mut matrix = SparseMatrix::new(dim);
        matrix.insert([idx, idx], value);
        ElemContribution {
            matrix,
            rhs_entries: vec![(idx, rhs)],
        }
    }

    #[test]
    fn serial_accumulation_and_solve() {
        let mut system = LinearSystem::new(3);
        for idx in 0..3 {
            system.consume_contribution(diag_contribution(3, idx, (idx + 1) as f64, 1.0));
        }
        let x = system.solve().unwrap();
        for idx in 0..3 {
            assert!((x[idx] - 1.0 / (idx + 1) as f64).abs() < 1e-12);
        }
    }

    #[test]
    fn parallel_extension_matches_serial() {
        let dim = 64;

        let mut serial = LinearSystem::new(dim);
        for idx in 0..dim {
            serial.consume_contribution(diag_contribution(dim, idx, 2.0, idx as f64));
        }

        let mut parallel = LinearSystem::new(dim);
        parallel.par_extend(
            (0..dim)
                .into_par_iter()
                .map(|idx| diag_contribution(dim, idx, 2.0, idx as f64)),
        );

        let xs = serial.solve().unwrap();
        let xp = parallel.solve().unwrap();
        for idx in 0..dim {
            assert!((xs[idx] - xp[idx]).abs() < 1e-14);
        }
    }
}
