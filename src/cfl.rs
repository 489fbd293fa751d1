//! CFL-based time step adaption
//!
//! After each accepted step the driver recomputes the step size from the
//! reference solutions' cell-mean states and the equation's characteristic
//! speed. The CFL number itself may be re-set each step (time ramping).

use crate::solution::Solution;
use crate::weak_form::CharacteristicSpeed;

/// Computes `Δt = CFL · min over leaves of (h_min / max_speed)` from cell means
#[derive(Debug, Clone)]
pub struct CflCalculation {
    number: f64,
}

impl CflCalculation {
    pub fn new(number: f64) -> Self {
        assert!(number > 0.0, "CFL numbers must be positive!");
        Self { number }
    }

    pub fn number(&self) -> f64 {
        self.number
    }

    pub fn set_number(&mut self, number: f64) {
        assert!(number > 0.0, "CFL numbers must be positive!");
        self.number = number;
    }

    /// Recompute the step size for a semi-implicit scheme
    ///
    /// `slns` holds one Solution per field over a common layout; the state
    /// vector handed to `speed` is the per-patch mean of every field. Returns
    /// `None` when no patch has a positive wave speed (the caller keeps its
    /// current step size).
    pub fn calculate_semi_implicit(
        &self,
        slns: &[Solution],
        speed: &dyn CharacteristicSpeed,
    ) -> Option<f64> {
        assert!(!slns.is_empty(), "Cannot compute a CFL step without fields!");

        let num_patches = slns[0].layout().patches.len();
        let mut min_ratio: Option<f64> = None;

        for patch_idx in 0..num_patches {
            let state: Vec<f64> = slns.iter().map(|sln| sln.patch_mean(patch_idx)).collect();
            let max_speed = speed.max_speed(&state);
            if max_speed <= 0.0 {
                continue;
            }

            let h_min = slns[0].layout().patches[patch_idx].rect.min_side();
            let ratio = h_min / max_speed;
            min_ratio = Some(match min_ratio {
                Some(current) => current.min(ratio),
                None => ratio,
            });
        }

        min_ratio.map(|ratio| self.number * ratio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::projection::project_fn;
    use crate::space::{share_mesh, Space};

    struct StateMagnitude;

    impl CharacteristicSpeed for StateMagnitude {
        fn max_speed(&self, state: &[f64]) -> f64 {
            state.iter().map(|s| s.abs()).fold(0.0, f64::max)
        }
    }

    #[test]
    fn smallest_leaf_with_fastest_state_limits_the_step() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        mesh.write().unwrap().execute_h_refinements(vec![0], -1).unwrap();
        let space = Space::new(&mesh, 0).unwrap();
        let sln = project_fn(&space, |_, _| 4.0);

        let cfl = CflCalculation::new(0.5);
        let dt = cfl
            .calculate_semi_implicit(std::slice::from_ref(&sln), &StateMagnitude)
            .unwrap();
        // smallest leaves have side 0.25; dt = 0.5 * 0.25 / 4.0
        assert!((dt - 0.03125).abs() < 1e-12);
    }

    #[test]
    fn zero_speed_yields_no_step() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let space = Space::new(&mesh, 0).unwrap();
        let sln = project_fn(&space, |_, _| 0.0);

        let cfl = CflCalculation::new(1.0);
        assert!(cfl
            .calculate_semi_implicit(std::slice::from_ref(&sln), &StateMagnitude)
            .is_none());
    }

    #[test]
    fn step_scales_with_the_cfl_number() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 1, 1));
        let space = Space::new(&mesh, 0).unwrap();
        let sln = project_fn(&space, |_, _| 2.0);

        let mut cfl = CflCalculation::new(0.1);
        let dt_a = cfl
            .calculate_semi_implicit(std::slice::from_ref(&sln), &StateMagnitude)
            .unwrap();
        cfl.set_number(0.4);
        let dt_b = cfl
            .calculate_semi_implicit(std::slice::from_ref(&sln), &StateMagnitude)
            .unwrap();
        assert!((dt_b / dt_a - 4.0).abs() < 1e-12);
    }
}
