//! Shock capturing: a vertex-free flux limiter driven by a discontinuity detector
//!
//! The detector flags patches whose cell means jump sharply against a
//! neighbor's. Flagged patches have their high-order modes truncated, which
//! bounds the oscillations a high-order expansion develops across a shock.

use crate::solution::Solution;
use tracing::debug;

/// Patches flagged by the discontinuity detector, as indices into the
/// solutions' shared patch list
#[derive(Debug, Clone, Default)]
pub struct DetectedPatches {
    /// Strong jumps: truncate to the cell mean (first-order)
    pub first_order: Vec<usize>,
    /// Moderate jumps: truncate above the linear modes (second-order)
    pub second_order: Vec<usize>,
}

/// Mode-truncation limiter bounded by a mean-jump discontinuity detector
#[derive(Debug, Clone)]
pub struct FluxLimiter {
    detector_threshold: f64,
}

impl FluxLimiter {
    pub fn new(detector_threshold: f64) -> Self {
        assert!(
            detector_threshold > 0.0,
            "Detector thresholds must be positive!"
        );
        Self { detector_threshold }
    }

    /// Run the discontinuity detector over a multi-field solution set
    ///
    /// The indicator per patch is the largest normalized mean jump against any
    /// leaf neighbor, over all fields: `|m_self - m_nb| / (|m_self| + |m_nb|)`.
    /// Indicators above the detector threshold flag the patch first-order;
    /// above half the threshold, second-order.
    pub fn detect(&self, slns: &[Solution]) -> DetectedPatches {
        assert!(!slns.is_empty(), "Cannot run the detector without fields!");

        let layout = slns[0].layout();
        let mut detected = DetectedPatches::default();

        for (patch_idx, patch) in layout.patches.iter().enumerate() {
            let neighbor_ids = slns[0]
                .mesh_handle()
                .with_mesh(|mesh| mesh.leaf_neighbors(patch.elem_id))
                .unwrap_or_default();

            let mut indicator = 0.0_f64;
            for sln in slns {
                let mean_self = sln.patch_mean(patch_idx);
                for nb_id in &neighbor_ids {
                    if let Some(nb_idx) = sln.patch_index_of_elem(*nb_id) {
                        let mean_nb = sln.patch_mean(nb_idx);
                        let scale = mean_self.abs() + mean_nb.abs();
                        if scale > 0.0 {
                            indicator = indicator.max((mean_self - mean_nb).abs() / scale);
                        }
                    }
                }
            }

            if indicator > self.detector_threshold {
                detected.first_order.push(patch_idx);
            } else if indicator > 0.5 * self.detector_threshold {
                detected.second_order.push(patch_idx);
            }
        }

        debug!(
            first_order = detected.first_order.len(),
            second_order = detected.second_order.len(),
            "discontinuity detector"
        );
        detected
    }

    /// Truncate detector-flagged patches to their cell means
    pub fn limit_according_to_detector(&self, slns: &mut [Solution]) {
        let detected = self.detect(slns);
        for sln in slns.iter_mut() {
            for &patch_idx in &detected.first_order {
                truncate_above(sln, patch_idx, 0);
            }
        }
    }

    /// Truncate moderately-flagged patches above their linear modes
    pub fn limit_second_orders_according_to_detector(&self, slns: &mut [Solution]) {
        let detected = self.detect(slns);
        for sln in slns.iter_mut() {
            for &patch_idx in &detected.second_order {
                truncate_above(sln, patch_idx, 1);
            }
        }
    }
}

// zero every tensor mode with an index above `keep` in either direction
fn truncate_above(sln: &mut Solution, patch_idx: usize, keep: usize) {
    let order = sln.layout().patches[patch_idx].order as usize;
    if order <= keep {
        return;
    }
    let coeffs = sln.patch_coeffs_mut(patch_idx);
    for i in 0..=order {
        for j in 0..=order {
            if i > keep || j > keep {
                coeffs[i * (order + 1) + j] = 0.0;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::projection::project_fn;
    use crate::space::{share_mesh, Space};

    fn step_solution() -> Solution {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 4, 1));
        let space = Space::new(&mesh, 2).unwrap();
        // a jump between the second and third columns
        project_fn(&space, |x, _| if x < 0.5 { 1.0 } else { 10.0 })
    }

    #[test]
    fn detector_flags_the_jump_columns() {
        let sln = step_solution();
        let limiter = FluxLimiter::new(0.5);
        let detected = limiter.detect(std::slice::from_ref(&sln));

        // patches 1 and 2 straddle the jump ((10-1)/11 ≈ 0.82 > 0.5)
        assert!(detected.first_order.contains(&1));
        assert!(detected.first_order.contains(&2));
        assert!(!detected.first_order.contains(&0));
        assert!(!detected.first_order.contains(&3));
    }

    #[test]
    fn limiting_flattens_flagged_patches_and_preserves_means() {
        let mut slns = vec![step_solution()];
        let means_before: Vec<f64> = (0..4).map(|idx| slns[0].patch_mean(idx)).collect();

        let limiter = FluxLimiter::new(0.5);
        limiter.limit_according_to_detector(&mut slns);

        for idx in 1..=2 {
            // all higher modes are gone
            for (mode, c) in slns[0].patch_coeffs(idx).iter().enumerate() {
                if mode > 0 {
                    assert_eq!(*c, 0.0);
                }
            }
            assert!((slns[0].patch_mean(idx) - means_before[idx]).abs() < 1e-14);
        }
    }

    #[test]
    fn smooth_fields_are_untouched() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 4, 1));
        let space = Space::new(&mesh, 2).unwrap();
        let mut slns = vec![project_fn(&space, |x, y| 5.0 + 0.01 * x * y)];
        let coeffs_before = slns[0].coeffs().clone();

        let limiter = FluxLimiter::new(0.5);
        limiter.limit_according_to_detector(&mut slns);
        limiter.limit_second_orders_according_to_detector(&mut slns);

        for (a, b) in coeffs_before.iter().zip(slns[0].coeffs().iter()) {
            assert!((a - b).abs() < 1e-14);
        }
    }
}
