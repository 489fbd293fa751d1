//! Orthogonal (L2) projection onto a Space
//!
//! The tensor-Legendre basis is orthogonal over each Elem, so the element mass
//! matrices are diagonal and projections reduce to scaled quadrature sums. No
//! linear solve is required.
//!
//! When the projection source is another `Solution`, quadrature is applied over
//! the overlap regions between target and source patches. The source is
//! polynomial on each of its own patches but only piecewise polynomial over a
//! target patch, so integrating overlap-by-overlap keeps the quadrature exact.

use crate::basis::{gauss_legendre, legendre_norm_squared, legendre_table, QuadRule};
use crate::solution::Solution;
use crate::space::{Patch, Space};

use nalgebra::DVector;

/// Project a pointwise function onto a Space (e.g. to discretize initial conditions)
pub fn project_fn<F>(space: &Space, f: F) -> Solution
where
    F: Fn(f64, f64) -> f64,
{
    let layout = space.layout();
    let mut coeffs = DVector::zeros(layout.num_dofs);

    for patch in &layout.patches {
        let n = patch.order as usize;
        let rule = gauss_legendre(n + 2);

        let block = patch_moments(patch, &rule, |xi, eta| {
            let [x, y] = patch.rect.from_parametric(xi, eta);
            f(x, y)
        });
        for (local, value) in block.into_iter().enumerate() {
            coeffs[patch.offset + local] = value;
        }
    }

    Solution::from_coeffs(space, coeffs)
}

/// Project a Solution onto a Space
///
/// The source may live on a finer, coarser, or unrelated discretization of the
/// same domain; when source and target patches coincide (including orders) the
/// projection reproduces the source coefficients exactly.
pub fn project_solution(space: &Space, source: &Solution) -> Solution {
    let layout = space.layout();
    let mut coeffs = DVector::zeros(layout.num_dofs);

    for patch in &layout.patches {
        let n = patch.order as usize;
        let area = patch.rect.area();

        // raw inner products <u_src, P_i P_j> over the target patch
        let mut moments = vec![0.0; (n + 1) * (n + 1)];
        for (src_idx, src_patch) in source.layout().patches.iter().enumerate() {
            let overlap = match patch.rect.intersect(&src_patch.rect) {
                Some(overlap) => overlap,
                None => continue,
            };
            let rule = gauss_legendre(n.max(src_patch.order as usize) + 2);
            let jacobian = overlap.area() / 4.0;

            for (a, xi_sub) in rule.nodes.iter().enumerate() {
                for (b, eta_sub) in rule.nodes.iter().enumerate() {
                    let [x, y] = overlap.from_parametric(*xi_sub, *eta_sub);
                    let [xi_src, eta_src] = src_patch.rect.to_parametric(x, y);
                    let u = source.eval_on_patch(src_idx, xi_src, eta_src);

                    let [xi_t, eta_t] = patch.rect.to_parametric(x, y);
                    let px = legendre_table(n, xi_t);
                    let py = legendre_table(n, eta_t);

                    let weight = rule.weights[a] * rule.weights[b] * jacobian;
                    for i in 0..=n {
                        for j in 0..=n {
                            moments[i * (n + 1) + j] += weight * u * px[i] * py[j];
                        }
                    }
                }
            }
        }

        // divide by the diagonal mass matrix: (area / 4) ||P_i||² ||P_j||²
        for i in 0..=n {
            for j in 0..=n {
                let mass = (area / 4.0) * legendre_norm_squared(i) * legendre_norm_squared(j);
                coeffs[patch.offset + i * (n + 1) + j] = moments[i * (n + 1) + j] / mass;
            }
        }
    }

    Solution::from_coeffs(space, coeffs)
}

/// Project each field of a coupled system onto its Space
pub fn project_solutions(spaces: &[Space], sources: &[Solution]) -> Vec<Solution> {
    assert_eq!(
        spaces.len(),
        sources.len(),
        "Number of Spaces and source Solutions must match; cannot project!"
    );
    spaces
        .iter()
        .zip(sources.iter())
        .map(|(space, source)| project_solution(space, source))
        .collect()
}

// <f, P_i P_j> / (||P_i||² ||P_j||²) over one patch; the area Jacobians cancel
fn patch_moments<F>(patch: &Patch, rule: &QuadRule, f: F) -> Vec<f64>
where
    F: Fn(f64, f64) -> f64,
{
    let n = patch.order as usize;
    let mut block = vec![0.0; (n + 1) * (n + 1)];

    for (a, xi) in rule.nodes.iter().enumerate() {
        for (b, eta) in rule.nodes.iter().enumerate() {
            let value = f(*xi, *eta);
            let px = legendre_table(n, *xi);
            let py = legendre_table(n, *eta);
            let weight = rule.weights[a] * rule.weights[b];
            for i in 0..=n {
                for j in 0..=n {
                    block[i * (n + 1) + j] += weight * value * px[i] * py[j];
                }
            }
        }
    }

    for i in 0..=n {
        for j in 0..=n {
            block[i * (n + 1) + j] /= legendre_norm_squared(i) * legendre_norm_squared(j);
        }
    }
    block
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::space::{construct_refined_spaces, share_mesh};

    fn space_on(nx: usize, ny: usize, order: u8) -> Space {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), nx, ny));
        Space::new(&mesh, order).unwrap()
    }

    #[test]
    fn linear_functions_are_reproduced_exactly() {
        let space = space_on(2, 2, 2);
        let sln = project_fn(&space, |x, y| 3.0 * x - 2.0 * y + 1.0);

        for &(x, y) in &[(0.1, 0.1), (0.45, 0.82), (0.9, 0.3)] {
            let exact = 3.0 * x - 2.0 * y + 1.0;
            assert!((sln.eval(x, y).unwrap() - exact).abs() < 1e-12);
        }
    }

    #[test]
    fn projection_onto_the_same_space_is_the_identity() {
        let space = space_on(2, 2, 2);
        let sln = project_fn(&space, |x, y| (4.0 * x).sin() * y);
        let reprojected = project_solution(&space, &sln);

        for (a, b) in sln.coeffs().iter().zip(reprojected.coeffs().iter()) {
            assert!((a - b).abs() < 1e-11);
        }
    }

    #[test]
    fn projection_onto_a_refined_space_is_exact_for_polynomials() {
        let coarse = space_on(2, 2, 1);
        let sln = project_fn(&coarse, |x, y| x + 2.0 * y);

        let refined = construct_refined_spaces(std::slice::from_ref(&coarse), 1).unwrap();
        let fine_sln = project_solution(&refined.spaces()[0], &sln);

        assert!((fine_sln.eval(0.3, 0.7).unwrap() - (0.3 + 2.0 * 0.7)).abs() < 1e-11);
    }

    #[test]
    fn coarsening_preserves_the_mean() {
        let fine = space_on(4, 4, 2);
        let sln = project_fn(&fine, |x, y| (3.0 * x + y).cos());

        let coarse = space_on(1, 1, 0);
        let coarse_sln = project_solution(&coarse, &sln);

        // the P_0 coefficient of a single-patch order-0 space is the domain mean
        let rule = gauss_legendre(8);
        let mut mean = 0.0;
        for (a, xi) in rule.nodes.iter().enumerate() {
            for (b, eta) in rule.nodes.iter().enumerate() {
                let x = (xi + 1.0) / 2.0;
                let y = (eta + 1.0) / 2.0;
                mean += rule.weights[a] * rule.weights[b] * (3.0_f64 * x + y).cos() / 4.0;
            }
        }
        assert!((coarse_sln.patch_mean(0) - mean).abs() < 1e-6);
    }
}
