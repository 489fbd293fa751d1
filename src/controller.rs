//! The adaptive refinement controller: one time step's converge-or-refine loop
//!
//! For one physical time step, find a coarse-mesh solution whose estimated
//! relative error against a finer reference solution is below tolerance,
//! refining the coarse Spaces as needed, bounded by a DOF budget.

use crate::adapt::{
    adapt, calc_err_est, AdaptError, MarkingStrategy, NormType, RefinementSelector,
};
use crate::assembly::DiscreteProblem;
use crate::linalg::solve::SolveError;
use crate::mesh::refinement::HRefError;
use crate::projection::project_solutions;
use crate::solution::Solution;
use crate::space::{construct_refined_spaces, total_num_dofs, Space};
use crate::weak_form::WeakForm;

use std::fmt;
use tracing::{error, info};

/// Immutable tuning of the adaptivity loop
#[derive(Debug, Clone)]
pub struct AdaptConfig {
    /// Relative error tolerance in percent
    pub err_stop: f64,
    /// Coarse DOF ceiling; reaching it forces acceptance
    pub ndof_stop: usize,
    /// Marking threshold, interpreted per `strategy`
    pub threshold: f64,
    pub strategy: MarkingStrategy,
    /// Maximum hanging-node level difference (negative: unconstrained)
    pub regularity: i32,
    /// Order increase of the reference Spaces over the coarse Spaces
    pub order_increase: u8,
    /// Order cap for p-refinement of the coarse Spaces
    pub max_p_order: u8,
    /// Error norm per field
    pub norms: Vec<NormType>,
}

/// The accepted state of one converged adaptivity loop
#[derive(Debug)]
pub struct AdaptOutcome {
    /// Reference solutions (hold the reference Mesh alive through their handles)
    pub ref_slns: Vec<Solution>,
    /// Their projections onto the coarse Spaces
    pub coarse_slns: Vec<Solution>,
    /// Final relative error estimate in percent
    pub err_est_rel: f64,
    pub iterations: usize,
    /// Refinements applied to the coarse Spaces across all iterations
    pub refinements_applied: usize,
    /// The loop was cut off by `ndof_stop` rather than `err_stop`
    pub budget_hit: bool,
}

/// Error type for the adaptivity loop; all variants abort the run
#[derive(Debug)]
pub enum ControllerError {
    Solve(SolveError),
    Adapt(AdaptError),
    RefSpaces(HRefError),
}

impl fmt::Display for ControllerError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Solve(err) => write!(f, "Reference system solve failed: {}", err),
            Self::Adapt(err) => write!(f, "Failed to refine the coarse Spaces: {}", err),
            Self::RefSpaces(err) => {
                write!(f, "Failed to construct the reference Spaces: {}", err)
            }
        }
    }
}

impl std::error::Error for ControllerError {}

impl From<SolveError> for ControllerError {
    fn from(err: SolveError) -> Self {
        Self::Solve(err)
    }
}

impl From<AdaptError> for ControllerError {
    fn from(err: AdaptError) -> Self {
        Self::Adapt(err)
    }
}

impl From<HRefError> for ControllerError {
    fn from(err: HRefError) -> Self {
        Self::RefSpaces(err)
    }
}

/// Drives the per-time-step adaptivity loop over a set of coarse Spaces
pub struct AdaptivityController {
    config: AdaptConfig,
    selector: RefinementSelector,
    /// One-shot: the first solve of a run has no reference-space iterate worth
    /// projecting from, so the previous state is sampled directly
    skip_prev_projection: bool,
}

impl AdaptivityController {
    pub fn new(config: AdaptConfig) -> Self {
        assert!(config.err_stop > 0.0, "err_stop must be positive!");
        assert!(config.ndof_stop > 0, "ndof_stop must be positive!");
        let selector = RefinementSelector::new(config.max_p_order);
        Self {
            config,
            selector,
            skip_prev_projection: true,
        }
    }

    pub fn config(&self) -> &AdaptConfig {
        &self.config
    }

    /// Converge one time step's adaptivity loop
    ///
    /// Iterates: build reference Spaces, solve the system on them, post-process
    /// (shock capturing), project down, estimate the error, then either accept
    /// or refine the coarse Spaces and repeat. The DOF budget dominates the
    /// error tolerance on every exit decision. Per-iteration temporaries (the
    /// reference Spaces, the assembled system) are dropped on every path; the
    /// final reference solutions keep their Mesh alive through shared handles
    /// until the caller commits them.
    pub fn converge_step(
        &mut self,
        spaces: &mut [Space],
        weak_form: &WeakForm,
        prev: &[Solution],
        dt: f64,
        time: f64,
        post_process: Option<&dyn Fn(&mut [Solution])>,
    ) -> Result<AdaptOutcome, ControllerError> {
        assert_eq!(
            self.config.norms.len(),
            spaces.len(),
            "AdaptConfig must carry one norm per field!"
        );

        let mut ndofs_prev: Option<usize> = None;
        let mut iterations = 0;
        let mut refinements_applied = 0;

        loop {
            iterations += 1;

            let ref_spaces = construct_refined_spaces(spaces, self.config.order_increase)?;
            let ref_ndofs = ref_spaces.num_dofs();
            info!(
                iteration = iterations,
                coarse_ndofs = total_num_dofs(spaces),
                ref_ndofs,
                "adaptivity step"
            );

            // a stalled reference DOF count means p-refinement saturated; bias
            // the selector toward splits so the discretization keeps growing
            if ndofs_prev == Some(ref_ndofs) {
                self.selector
                    .set_error_weights(2.0 * self.selector.error_weight_h(), 1.0);
            } else {
                self.selector.reset_error_weights();
            }
            ndofs_prev = Some(ref_ndofs);

            let prev_ref;
            let prev_for_forms: &[Solution] = if self.skip_prev_projection {
                self.skip_prev_projection = false;
                prev
            } else {
                prev_ref = project_solutions(ref_spaces.spaces(), prev);
                &prev_ref
            };

            let problem = DiscreteProblem::new(weak_form, ref_spaces.spaces());
            let mut ref_slns = match problem.solve(prev_for_forms, dt, time) {
                Ok(slns) => slns,
                Err(err) => {
                    error!(%err, "reference solve failed; aborting run");
                    return Err(err.into());
                }
            };

            if let Some(post_process) = post_process {
                post_process(&mut ref_slns);
            }

            let coarse_slns = project_solutions(spaces, &ref_slns);
            let estimate = calc_err_est(&coarse_slns, &ref_slns, &self.config.norms);
            let err_est_rel = estimate.err_est_rel();
            info!(err_est_rel, "error estimate");

            if err_est_rel < self.config.err_stop {
                return Ok(AdaptOutcome {
                    ref_slns,
                    coarse_slns,
                    err_est_rel,
                    iterations,
                    refinements_applied,
                    budget_hit: false,
                });
            }

            let result = adapt(
                spaces,
                &estimate,
                &self.selector,
                self.config.threshold,
                self.config.strategy,
                self.config.regularity,
            )?;
            refinements_applied += result.num_h_refinements + result.num_p_refinements;

            let coarse_ndofs = total_num_dofs(spaces);
            let budget_hit = coarse_ndofs >= self.config.ndof_stop;
            if result.done || budget_hit {
                if budget_hit {
                    info!(
                        coarse_ndofs,
                        ndof_stop = self.config.ndof_stop,
                        "DOF budget reached; accepting out-of-tolerance solution"
                    );
                }
                return Ok(AdaptOutcome {
                    ref_slns,
                    coarse_slns,
                    err_est_rel,
                    iterations,
                    refinements_applied,
                    budget_hit,
                });
            }
        }
    }
}
