use crate::basis::gauss_legendre;
use crate::solution::Solution;

/// Norm used to measure one field's discretization error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormType {
    /// `∫ e²`
    L2,
    /// `∫ e² + |∇e|²`
    Energy,
}

/// The result of comparing a coarse and a reference solution set
///
/// `elem_errors_sq` is ordered like the coarse solutions' patch lists: one
/// entry per active coarse leaf, summed over all field components.
#[derive(Debug, Clone)]
pub struct ErrorEstimate {
    pub elem_errors_sq: Vec<(usize, f64)>,
    pub total_err_sq: f64,
    pub total_norm_sq: f64,
}

impl ErrorEstimate {
    /// Scalar relative error in percent of the total reference-solution norm
    pub fn err_est_rel(&self) -> f64 {
        if self.total_norm_sq <= 0.0 {
            return 0.0;
        }
        (self.total_err_sq / self.total_norm_sq).sqrt() * 100.0
    }
}

/// Estimate the discretization error of `coarse` against `reference`
///
/// Both slices hold one Solution per field. Every field's error is integrated
/// over the coarse leaves, subdivided over the overlapping reference patches so
/// the quadrature sees only polynomial integrands. The aggregate is scaled to
/// percent of the total reference norm by [`ErrorEstimate::err_est_rel`].
/// Deterministic for identical inputs.
pub fn calc_err_est(
    coarse: &[Solution],
    reference: &[Solution],
    norms: &[NormType],
) -> ErrorEstimate {
    assert!(
        !coarse.is_empty() && coarse.len() == reference.len() && coarse.len() == norms.len(),
        "Field counts of the coarse solutions, reference solutions, and norms must match!"
    );

    let num_coarse_patches = coarse[0].layout().patches.len();
    let mut elem_errors_sq: Vec<(usize, f64)> = coarse[0]
        .layout()
        .patches
        .iter()
        .map(|patch| (patch.elem_id, 0.0))
        .collect();
    let mut total_norm_sq = 0.0;

    for ((c_sln, r_sln), norm) in coarse.iter().zip(reference.iter()).zip(norms.iter()) {
        assert_eq!(
            c_sln.layout().patches.len(),
            num_coarse_patches,
            "All coarse fields must share one Mesh topology!"
        );

        for (patch_idx, c_patch) in c_sln.layout().patches.iter().enumerate() {
            let mut patch_err_sq = 0.0;

            for (r_idx, r_patch) in r_sln.layout().patches.iter().enumerate() {
                let overlap = match c_patch.rect.intersect(&r_patch.rect) {
                    Some(overlap) => overlap,
                    None => continue,
                };
                let rule = gauss_legendre(c_patch.order.max(r_patch.order) as usize + 2);
                let jacobian = overlap.area() / 4.0;

                for (a, xi) in rule.nodes.iter().enumerate() {
                    for (b, eta) in rule.nodes.iter().enumerate() {
                        let [x, y] = overlap.from_parametric(*xi, *eta);
                        let [xi_c, eta_c] = c_patch.rect.to_parametric(x, y);
                        let [xi_r, eta_r] = r_patch.rect.to_parametric(x, y);

                        let u_c = c_sln.eval_on_patch(patch_idx, xi_c, eta_c);
                        let u_r = r_sln.eval_on_patch(r_idx, xi_r, eta_r);
                        let weight = rule.weights[a] * rule.weights[b] * jacobian;

                        let mut err_sq = (u_c - u_r).powi(2);
                        let mut norm_sq = u_r.powi(2);
                        if *norm == NormType::Energy {
                            let g_c = c_sln.grad_on_patch(patch_idx, xi_c, eta_c);
                            let g_r = r_sln.grad_on_patch(r_idx, xi_r, eta_r);
                            err_sq += (g_c[0] - g_r[0]).powi(2) + (g_c[1] - g_r[1]).powi(2);
                            norm_sq += g_r[0].powi(2) + g_r[1].powi(2);
                        }

                        patch_err_sq += weight * err_sq;
                        total_norm_sq += weight * norm_sq;
                    }
                }
            }

            elem_errors_sq[patch_idx].1 += patch_err_sq;
        }
    }

    let total_err_sq = elem_errors_sq.iter().map(|(_, e)| e).sum();
    ErrorEstimate {
        elem_errors_sq,
        total_err_sq,
        total_norm_sq,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::projection::{project_fn, project_solution};
    use crate::space::{construct_refined_spaces, share_mesh, Space};

    #[test]
    fn identical_solutions_have_zero_error() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let space = Space::new(&mesh, 2).unwrap();
        let sln = project_fn(&space, |x, y| x * y + 1.0);

        let est = calc_err_est(
            std::slice::from_ref(&sln),
            std::slice::from_ref(&sln),
            &[NormType::L2],
        );
        assert!(est.total_err_sq < 1e-20);
        assert!(est.err_est_rel() < 1e-8);
    }

    #[test]
    fn error_concentrates_where_the_field_is_rough() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 1));
        let space = Space::new(&mesh, 1).unwrap();

        // smooth on the left half, sharp on the right half
        let f = |x: f64, y: f64| {
            if x < 0.5 {
                0.1 * y
            } else {
                ((x - 0.5) * 40.0).tanh() * (10.0 * y).sin()
            }
        };

        let refined = construct_refined_spaces(std::slice::from_ref(&space), 1).unwrap();
        let r_sln = project_fn(&refined.spaces()[0], f);
        let c_sln = project_solution(&space, &r_sln);

        let est = calc_err_est(
            std::slice::from_ref(&c_sln),
            std::slice::from_ref(&r_sln),
            &[NormType::L2],
        );

        let left = est.elem_errors_sq[0].1;
        let right = est.elem_errors_sq[1].1;
        assert!(right > 10.0 * left);
        assert!(est.err_est_rel() > 0.0);
    }

    #[test]
    fn energy_norm_sees_gradient_mismatch() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 1, 1));
        let space = Space::new(&mesh, 1).unwrap();

        let refined = construct_refined_spaces(std::slice::from_ref(&space), 1).unwrap();
        let r_sln = project_fn(&refined.spaces()[0], |x, y| (x * x - y * y) * 3.0);
        let c_sln = project_solution(&space, &r_sln);

        let l2 = calc_err_est(
            std::slice::from_ref(&c_sln),
            std::slice::from_ref(&r_sln),
            &[NormType::L2],
        );
        let energy = calc_err_est(
            std::slice::from_ref(&c_sln),
            std::slice::from_ref(&r_sln),
            &[NormType::Energy],
        );
        assert!(energy.total_err_sq > l2.total_err_sq);
    }
}
