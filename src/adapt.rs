//! Error-driven hp-refinement of the coarse Spaces
//!
//! [`calc_err_est`] measures a coarse solution set against a reference set;
//! [`adapt`] flags the worst coarse Elems per a marking strategy, asks the
//! [RefinementSelector] to choose between splitting and raising order for each,
//! and applies the chosen refinements to the Spaces.

/// Coarse-vs-reference error estimation
pub mod error_estimate;
/// h-vs-p refinement choice per flagged Elem
pub mod selector;

pub use error_estimate::{calc_err_est, ErrorEstimate, NormType};
pub use selector::{RefinementDecision, RefinementSelector};

use crate::mesh::refinement::{HRefError, PRefError};
use crate::space::Space;

use std::fmt;
use tracing::debug;

/// How flagged Elems are chosen from the per-Elem error breakdown
///
/// All three operate on the Elems sorted by descending error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkingStrategy {
    /// Flag top Elems until `threshold` of the total squared error is covered;
    /// Elems with errors within 2% of the last flagged one are flagged too
    ErrorFraction,
    /// Flag every Elem whose error exceeds `threshold` times the largest error
    FractionOfMax,
    /// Flag every Elem whose error exceeds `threshold` outright
    Absolute,
}

/// The outcome of one [adapt] call
#[derive(Debug, Clone, Copy)]
pub struct AdaptResult {
    pub num_h_refinements: usize,
    pub num_p_refinements: usize,
    /// No admissible refinement was applied; further iteration cannot improve
    /// the discretization
    pub done: bool,
}

/// Error type for an adaptivity step
#[derive(Debug)]
pub enum AdaptError {
    HRef(HRefError),
    PRef(PRefError),
}

impl fmt::Display for AdaptError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::HRef(err) => write!(f, "Adaptivity step failed to h-refine: {}", err),
            Self::PRef(err) => write!(f, "Adaptivity step failed to p-refine: {}", err),
        }
    }
}

impl std::error::Error for AdaptError {}

impl From<HRefError> for AdaptError {
    fn from(err: HRefError) -> Self {
        Self::HRef(err)
    }
}

impl From<PRefError> for AdaptError {
    fn from(err: PRefError) -> Self {
        Self::PRef(err)
    }
}

/// Refine the coarse Spaces against a per-Elem error breakdown
///
/// Flags Elems per `strategy`/`threshold`, lets the `selector` choose a
/// refinement for each, and applies them: h-splits once through the shared
/// Mesh (with hanging-node `regularity` enforced), p-raises to every field's
/// Space. Returns `done = true` when nothing could be applied.
pub fn adapt(
    spaces: &mut [Space],
    estimate: &ErrorEstimate,
    selector: &RefinementSelector,
    threshold: f64,
    strategy: MarkingStrategy,
    regularity: i32,
) -> Result<AdaptResult, AdaptError> {
    assert!(!spaces.is_empty(), "Cannot adapt an empty set of Spaces!");
    assert!(
        threshold > 0.0,
        "Marking thresholds must be positive; cannot adapt!"
    );

    let marked = mark_elems(estimate, threshold, strategy);

    let mut h_ids = Vec::new();
    let mut p_ids = Vec::new();
    {
        let mesh = spaces[0].mesh();
        let mesh = mesh.read().expect("Shared Mesh lock was poisoned!");
        for elem_id in marked {
            let order = spaces
                .iter()
                .map(|space| space.order_of(&mesh, elem_id))
                .max()
                .expect("Systems must have at least one field!");
            let h_refineable = mesh.elem_is_h_refineable(elem_id).map_err(AdaptError::from)?;

            match selector.select(order, h_refineable) {
                RefinementDecision::HSplit => h_ids.push(elem_id),
                RefinementDecision::PRaise => p_ids.push(elem_id),
                RefinementDecision::Skip => {}
            }
        }
    }

    debug!(
        num_h = h_ids.len(),
        num_p = p_ids.len(),
        "applying refinements"
    );

    if !p_ids.is_empty() {
        for space in spaces.iter_mut() {
            space.p_refine_elems(&p_ids, 1, selector.max_p_order())?;
        }
    }
    if !h_ids.is_empty() {
        // one split through the shared Mesh; sister Spaces observe it
        spaces[0].execute_h_refinements(h_ids.clone(), regularity)?;
    }

    Ok(AdaptResult {
        num_h_refinements: h_ids.len(),
        num_p_refinements: p_ids.len(),
        done: h_ids.is_empty() && p_ids.is_empty(),
    })
}

// flag elems per the marking strategy; input errors are squared norms
fn mark_elems(estimate: &ErrorEstimate, threshold: f64, strategy: MarkingStrategy) -> Vec<usize> {
    let mut ranked: Vec<(usize, f64)> = estimate
        .elem_errors_sq
        .iter()
        .copied()
        .filter(|(_, err_sq)| *err_sq > 0.0)
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("Elem errors must not be NaN!"));

    if ranked.is_empty() {
        return Vec::new();
    }

    match strategy {
        MarkingStrategy::ErrorFraction => {
            let target = threshold * estimate.total_err_sq;
            let mut marked = Vec::new();
            let mut processed = 0.0;
            let mut last_marked = f64::MAX;
            for (elem_id, err_sq) in ranked {
                if processed >= target && err_sq < 0.98 * last_marked {
                    break;
                }
                processed += err_sq;
                last_marked = err_sq;
                marked.push(elem_id);
            }
            marked
        }
        MarkingStrategy::FractionOfMax => {
            let max_err = ranked[0].1.sqrt();
            ranked
                .into_iter()
                .filter(|(_, err_sq)| err_sq.sqrt() > threshold * max_err)
                .map(|(elem_id, _)| elem_id)
                .collect()
        }
        MarkingStrategy::Absolute => ranked
            .into_iter()
            .filter(|(_, err_sq)| err_sq.sqrt() > threshold)
            .map(|(elem_id, _)| elem_id)
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::elem::Rect;
    use crate::mesh::Mesh;
    use crate::space::{share_mesh, total_num_dofs};

    fn estimate_with_errors(errors: &[f64]) -> ErrorEstimate {
        ErrorEstimate {
            elem_errors_sq: errors.iter().copied().enumerate().collect(),
            total_err_sq: errors.iter().sum(),
            total_norm_sq: 1.0,
        }
    }

    #[test]
    fn fraction_of_max_flags_the_worst_elems() {
        let est = estimate_with_errors(&[1.0, 0.5, 0.04, 0.01]);
        let marked = mark_elems(&est, 0.3, MarkingStrategy::FractionOfMax);
        // errors 1.0, ~0.707, 0.2, 0.1 vs threshold 0.3 * 1.0
        assert_eq!(marked, vec![0, 1]);
    }

    #[test]
    fn error_fraction_marks_ties_together() {
        let est = estimate_with_errors(&[0.5, 0.5, 0.001]);
        let marked = mark_elems(&est, 0.3, MarkingStrategy::ErrorFraction);
        // elem 0 covers the 0.3 fraction; elem 1 has an identical error and is
        // taken along, elem 2 is not
        assert_eq!(marked, vec![0, 1]);
    }

    #[test]
    fn absolute_strategy_uses_the_raw_error() {
        let est = estimate_with_errors(&[4.0, 0.25, 0.01]);
        let marked = mark_elems(&est, 0.4, MarkingStrategy::Absolute);
        assert_eq!(marked, vec![0, 1]);
    }

    #[test]
    fn adapt_grows_the_dof_count() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let mut spaces = vec![Space::new(&mesh, 1).unwrap()];
        let ndof_before = total_num_dofs(&spaces);

        let est = estimate_with_errors(&[1.0, 0.8, 0.01, 0.01]);
        let selector = RefinementSelector::new(4);
        let result = adapt(
            &mut spaces,
            &est,
            &selector,
            0.3,
            MarkingStrategy::FractionOfMax,
            1,
        )
        .unwrap();

        assert!(!result.done);
        assert_eq!(result.num_p_refinements, 2);
        assert!(total_num_dofs(&spaces) > ndof_before);
    }

    #[test]
    fn saturated_selector_falls_back_to_splits() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let mut spaces = vec![Space::new(&mesh, 2).unwrap()];

        let est = estimate_with_errors(&[1.0, 0.01, 0.01, 0.01]);
        let selector = RefinementSelector::new(2); // orders already at the cap
        let result = adapt(
            &mut spaces,
            &est,
            &selector,
            0.5,
            MarkingStrategy::FractionOfMax,
            1,
        )
        .unwrap();

        assert_eq!(result.num_h_refinements, 1);
        assert_eq!(result.num_p_refinements, 0);
        assert_eq!(mesh.read().unwrap().num_leaves(), 7);
    }

    #[test]
    fn not_done_iterations_strictly_grow_the_dofs() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let mut spaces = vec![Space::new(&mesh, 1).unwrap()];
        let selector = RefinementSelector::new(3);

        let ndofs_start = total_num_dofs(&spaces);
        let mut last_ndofs = ndofs_start;
        for _ in 0..8 {
            // the error stays pinned on the first current leaf, so every
            // iteration applies a refinement (p until the cap, then h)
            let leaf = spaces[0].mesh().read().unwrap().leaf_ids()[0];
            let est = ErrorEstimate {
                elem_errors_sq: vec![(leaf, 1.0)],
                total_err_sq: 1.0,
                total_norm_sq: 1.0,
            };
            let result = adapt(
                &mut spaces,
                &est,
                &selector,
                0.5,
                MarkingStrategy::FractionOfMax,
                -1,
            )
            .unwrap();

            let ndofs = total_num_dofs(&spaces);
            if result.done {
                break;
            }
            assert!(ndofs > last_ndofs);
            last_ndofs = ndofs;
        }
        assert!(last_ndofs > ndofs_start);
    }

    #[test]
    fn zero_error_terminates_adaptation() {
        let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 2, 2));
        let mut spaces = vec![Space::new(&mesh, 1).unwrap()];

        let est = estimate_with_errors(&[0.0, 0.0, 0.0, 0.0]);
        let selector = RefinementSelector::new(4);
        let result = adapt(
            &mut spaces,
            &est,
            &selector,
            0.3,
            MarkingStrategy::ErrorFraction,
            1,
        )
        .unwrap();
        assert!(result.done);
    }
}
