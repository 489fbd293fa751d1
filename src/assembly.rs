//! Assembly of a [WeakForm] over a set of Spaces into a [LinearSystem]
//!
//! All Spaces of a system share one Mesh, so their layouts enumerate the same
//! active leaves. The global DOF numbering concatenates the fields: field `f`'s
//! patch DOFs are offset by the total DOF count of fields `0..f`.

use crate::basis::{gauss_legendre, legendre, legendre_deriv, QuadRule};
use crate::linalg::{ElemContribution, LinearSystem};
use crate::linalg::solve::SolveError;
use crate::linalg::sparse_matrix::SparseMatrix;
use crate::solution::Solution;
use crate::space::{DofLayout, Space};
use crate::weak_form::{FormContext, ShapeFn, WeakForm};

use nalgebra::DVector;
use rayon::prelude::*;

/// A [WeakForm] paired with the Spaces it is discretized over
pub struct DiscreteProblem<'a> {
    weak_form: &'a WeakForm,
    spaces: &'a [Space],
}

impl<'a> DiscreteProblem<'a> {
    pub fn new(weak_form: &'a WeakForm, spaces: &'a [Space]) -> Self {
        assert_eq!(
            weak_form.num_fields(),
            spaces.len(),
            "Number of Spaces must match the Weak Form's field count!"
        );
        Self { weak_form, spaces }
    }

    /// Total DOF count of the concatenated fields
    pub fn num_dofs(&self) -> usize {
        self.spaces.iter().map(|space| space.num_dofs()).sum()
    }

    /// Assemble the system serially
    pub fn assemble(&self, prev: &[Solution], dt: f64, time: f64) -> LinearSystem {
        let (layouts, field_offsets, num_dofs) = self.global_numbering();
        let num_leaves = layouts[0].patches.len();

        let mut system = LinearSystem::new(num_dofs);
        for leaf_idx in 0..num_leaves {
            let contribution =
                self.elem_contribution(leaf_idx, &layouts, &field_offsets, num_dofs, prev, dt, time);
            system.consume_contribution(contribution);
        }
        system
    }

    /// Assemble the system with Elem contributions computed in parallel
    pub fn assemble_parallel(&self, prev: &[Solution], dt: f64, time: f64) -> LinearSystem {
        let (layouts, field_offsets, num_dofs) = self.global_numbering();
        let num_leaves = layouts[0].patches.len();

        let mut system = LinearSystem::new(num_dofs);
        system.par_extend((0..num_leaves).into_par_iter().map(|leaf_idx| {
            self.elem_contribution(leaf_idx, &layouts, &field_offsets, num_dofs, prev, dt, time)
        }));
        system
    }

    /// Assemble (in parallel) and solve, splitting the result into one Solution per field
    pub fn solve(
        &self,
        prev: &[Solution],
        dt: f64,
        time: f64,
    ) -> Result<Vec<Solution>, SolveError> {
        let system = self.assemble_parallel(prev, dt, time);
        let x = system.solve()?;

        let mut solutions = Vec::with_capacity(self.spaces.len());
        let mut offset = 0;
        for space in self.spaces {
            let n = space.num_dofs();
            let coeffs = DVector::from_iterator(n, x.as_slice()[offset..offset + n].iter().copied());
            solutions.push(Solution::from_coeffs(space, coeffs));
            offset += n;
        }
        Ok(solutions)
    }

    fn global_numbering(&self) -> (Vec<DofLayout>, Vec<usize>, usize) {
        let layouts: Vec<DofLayout> = self.spaces.iter().map(|space| space.layout()).collect();
        let mut field_offsets = Vec::with_capacity(layouts.len());
        let mut total = 0;
        for layout in &layouts {
            field_offsets.push(total);
            total += layout.num_dofs;
        }
        (layouts, field_offsets, total)
    }

    #[allow(clippy::too_many_arguments)]
    fn elem_contribution(
        &self,
        leaf_idx: usize,
        layouts: &[DofLayout],
        field_offsets: &[usize],
        num_dofs: usize,
        prev: &[Solution],
        dt: f64,
        time: f64,
    ) -> ElemContribution {
        let rect = layouts[0].patches[leaf_idx].rect;
        debug_assert!(layouts
            .iter()
            .all(|l| l.patches[leaf_idx].elem_id == layouts[0].patches[leaf_idx].elem_id));

        let max_order = layouts
            .iter()
            .map(|l| l.patches[leaf_idx].order)
            .max()
            .expect("Systems must have at least one field!") as usize;
        let rule = gauss_legendre(max_order + 2);
        let nq = rule.len();
        let jacobian = rect.area() / 4.0;

        // per-field shape tables: [point][mode] -> ShapeFn
        let shapes: Vec<Vec<Vec<ShapeFn>>> = layouts
            .iter()
            .map(|layout| {
                let patch = &layout.patches[leaf_idx];
                shape_table(&rule, patch.order as usize, rect.width(), rect.height())
            })
            .collect();

        // physical coordinates and previous-state values at each point
        let mut points = Vec::with_capacity(nq * nq);
        for xi in rule.nodes.iter() {
            for eta in rule.nodes.iter() {
                let [x, y] = rect.from_parametric(*xi, *eta);
                let prev_vals: Vec<f64> = if prev.is_empty() {
                    vec![0.0; self.spaces.len()]
                } else {
                    prev.iter()
                        .map(|sln| sln.eval(x, y).unwrap_or(0.0))
                        .collect()
                };
                points.push((x, y, prev_vals));
            }
        }

        let mut matrix = SparseMatrix::new(num_dofs);
        let mut rhs_entries = Vec::new();

        for (point_idx, (x, y, prev_vals)) in points.iter().enumerate() {
            let a = point_idx / nq;
            let b = point_idx % nq;
            let weight = rule.weights[a] * rule.weights[b] * jacobian;
            let ctx = FormContext {
                x: *x,
                y: *y,
                prev: prev_vals,
                dt,
                time,
            };

            for form in self.weak_form.matrix_forms() {
                let (test_f, trial_f) = form.block();
                let test_patch = &layouts[test_f].patches[leaf_idx];
                let trial_patch = &layouts[trial_f].patches[leaf_idx];

                for (mu, v) in shapes[test_f][point_idx].iter().enumerate() {
                    let row = field_offsets[test_f] + test_patch.offset + mu;
                    for (nu, u) in shapes[trial_f][point_idx].iter().enumerate() {
                        let col = field_offsets[trial_f] + trial_patch.offset + nu;
                        let value = weight * form.eval(&ctx, u, v);
                        if value != 0.0 {
                            matrix.insert([row, col], value);
                        }
                    }
                }
            }

            for form in self.weak_form.vector_forms() {
                let test_f = form.block();
                let test_patch = &layouts[test_f].patches[leaf_idx];
                for (mu, v) in shapes[test_f][point_idx].iter().enumerate() {
                    let row = field_offsets[test_f] + test_patch.offset + mu;
                    let value = weight * form.eval(&ctx, v);
                    if value != 0.0 {
                        rhs_entries.push((row, value));
                    }
                }
            }
        }

        ElemContribution {
            matrix,
            rhs_entries,
        }
    }
}

// tensor-Legendre values and physical gradients at every quadrature point
fn shape_table(
    rule: &QuadRule,
    order: usize,
    width: f64,
    height: f64,
) -> Vec<Vec<ShapeFn>> {
    let nq = rule.len();
    let mut table = Vec::with_capacity(nq * nq);

    for xi in rule.nodes.iter() {
        for eta in rule.nodes.iter() {
            let mut modes = Vec::with_capacity((order + 1) * (order + 1));
            for i in 0..=order {
                for j in 0..=order {
                    modes.push(ShapeFn {
                        value: legendre(i, *xi) * legendre(j, *eta),
                        dx: legendre_deriv(i, *xi) * (2.0 / width) * legendre(j, *eta),
                        dy: legendre(i, *xi) * legendre_deriv(j, *eta) * (2.0 / height),
                    });
                }
            }
            table.push(modes);
        }
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::projection::project_fn;
    use crate::space::share_mesh;
    use crate::weak_form::{TimeDerivMatrixForm, TimeDerivVectorForm};

    fn implicit_euler_form(num_fields: usize) -> WeakForm {
        let mut wf = WeakForm::new(num_fields);
        for field in 0..num_fields {
            wf.add_matrix_form(Box::new(TimeDerivMatrixForm { field }))
                .add_vector_form(Box::new(TimeDerivVectorForm { field }));
        }
        wf
    }

    #[test]
    fn pure_mass_system_reproduces_the_previous_state() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let space = Space::new(&mesh, 2).unwrap();
        let prev = project_fn(&space, |x, y| x * x + y);

        let wf = implicit_euler_form(1);
        let spaces = [space];
        let problem = DiscreteProblem::new(&wf, &spaces);
        let slns = problem.solve(std::slice::from_ref(&prev), 0.1, 0.0).unwrap();

        for (a, b) in prev.coeffs().iter().zip(slns[0].coeffs().iter()) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn serial_and_parallel_assembly_agree() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 3, 3));
        let spaces = [
            Space::new(&mesh, 1).unwrap(),
            Space::new(&mesh, 2).unwrap(),
        ];
        let prev = vec![
            project_fn(&spaces[0], |x, _| x),
            project_fn(&spaces[1], |_, y| y),
        ];

        let wf = implicit_euler_form(2);
        let problem = DiscreteProblem::new(&wf, &spaces);

        let serial = problem.assemble(&prev, 0.05, 0.0);
        let parallel = problem.assemble_parallel(&prev, 0.05, 0.0);

        let xs = serial.solve().unwrap();
        let xp = parallel.solve().unwrap();
        assert_eq!(xs.len(), xp.len());
        for (a, b) in xs.iter().zip(xp.iter()) {
            assert!((a - b).abs() < 1e-10);
        }
    }

    #[test]
    fn fields_occupy_disjoint_global_blocks() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 1));
        let spaces = [
            Space::new(&mesh, 1).unwrap(),
            Space::new(&mesh, 1).unwrap(),
        ];
        let wf = implicit_euler_form(2);
        let problem = DiscreteProblem::new(&wf, &spaces);
        assert_eq!(problem.num_dofs(), 2 * 2 * 4);

        let system = problem.assemble(&[], 1.0, 0.0);
        // diagonal blocks only: no entry couples the two fields
        let field_size = 8;
        for ([r, c], _) in system.matrix.iter() {
            assert_eq!(r < field_size, c < field_size);
        }
    }
}
