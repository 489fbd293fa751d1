//! The time-stepping driver: advances simulation time, invoking the adaptivity
//! controller once per step and managing previous-state handoff
//!
//! One run follows `INIT → (optional RESTORE) → [time loop: UNREFINE? →
//! ADAPT-LOOP → COMMIT → CHECKPOINT?] → END (time ≥ t_final)`.

use crate::cfl::CflCalculation;
use crate::continuity::{Continuity, ContinuityError, Record};
use crate::controller::{AdaptConfig, AdaptivityController, ControllerError};
use crate::limiter::FluxLimiter;
use crate::mesh::refinement::PRefError;
use crate::solution::Solution;
use crate::space::{share_mesh, total_num_dofs, Space};
use crate::weak_form::{CharacteristicSpeed, WeakForm};

use std::fmt;
use tracing::info;

/// Immutable configuration of one run
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Simulation time horizon
    pub t_final: f64,
    /// Step size before the first CFL recomputation (and throughout, for
    /// fixed-step runs)
    pub initial_time_step: f64,
    /// Globally de-refine every this many steps (0: never)
    pub unref_freq: usize,
    /// Expansion order the Spaces are reset to on de-refinement
    pub p_init: u8,
    /// Emit visualization output and checkpoints every this many steps (0: never)
    pub every_nth_step: usize,
    /// Resume from the newest checkpoint record when one is available
    pub reuse_checkpoint: bool,
}

/// Mutable run state threaded through the time loop
#[derive(Debug, Clone)]
pub struct RunState {
    pub time: f64,
    pub step: usize,
    pub time_step: f64,
    /// Refinements applied since the last global de-refinement
    pub refinement_count: usize,
}

/// CFL-based step size control for hyperbolic systems
pub struct CflControl {
    pub calculation: CflCalculation,
    pub speed: Box<dyn CharacteristicSpeed>,
    /// CFL number as a function of simulation time (time ramping)
    pub number_schedule: Option<Box<dyn Fn(f64) -> f64>>,
}

/// What happened during one accepted time step
#[derive(Debug, Clone, Copy)]
pub struct StepSummary {
    pub err_est_rel: f64,
    pub iterations: usize,
    pub budget_hit: bool,
    /// The step began with a global de-refinement
    pub unrefined: bool,
}

/// Error type for a run; all variants are fatal
#[derive(Debug)]
pub enum DriverError {
    Controller(ControllerError),
    Continuity(ContinuityError),
    PRef(PRefError),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Controller(err) => write!(f, "{}", err),
            Self::Continuity(err) => write!(f, "{}", err),
            Self::PRef(err) => write!(f, "Failed to reset expansion orders: {}", err),
        }
    }
}

impl std::error::Error for DriverError {}

impl From<ControllerError> for DriverError {
    fn from(err: ControllerError) -> Self {
        Self::Controller(err)
    }
}

impl From<ContinuityError> for DriverError {
    fn from(err: ContinuityError) -> Self {
        Self::Continuity(err)
    }
}

impl From<PRefError> for DriverError {
    fn from(err: PRefError) -> Self {
        Self::PRef(err)
    }
}

/// Advances a coupled system through time with per-step hp-adaptivity
pub struct TimeDriver {
    config: RunConfig,
    state: RunState,
    controller: AdaptivityController,
    spaces: Vec<Space>,
    prev: Vec<Solution>,
    cfl: Option<CflControl>,
    limiter: Option<FluxLimiter>,
    continuity: Option<Continuity>,
}

impl TimeDriver {
    /// * `spaces`: the coarse Spaces, one per field, sharing one Mesh
    /// * `initial`: the initial state, one Solution per field
    pub fn new(
        config: RunConfig,
        adapt_config: AdaptConfig,
        spaces: Vec<Space>,
        initial: Vec<Solution>,
    ) -> Self {
        assert_eq!(
            spaces.len(),
            initial.len(),
            "Field counts of the Spaces and the initial state must match!"
        );
        assert!(config.t_final > 0.0, "t_final must be positive!");
        assert!(
            config.initial_time_step > 0.0,
            "Time steps must be positive!"
        );

        let state = RunState {
            time: 0.0,
            step: 0,
            time_step: config.initial_time_step,
            refinement_count: 0,
        };
        Self {
            config,
            state,
            controller: AdaptivityController::new(adapt_config),
            spaces,
            prev: initial,
            cfl: None,
            limiter: None,
            continuity: None,
        }
    }

    pub fn with_cfl(mut self, cfl: CflControl) -> Self {
        self.cfl = Some(cfl);
        self
    }

    pub fn with_shock_capturing(mut self, limiter: FluxLimiter) -> Self {
        self.limiter = Some(limiter);
        self
    }

    pub fn with_continuity(mut self, continuity: Continuity) -> Self {
        self.continuity = Some(continuity);
        self
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn spaces(&self) -> &[Space] {
        &self.spaces
    }

    /// The accepted state at the last completed step
    pub fn prev_solutions(&self) -> &[Solution] {
        &self.prev
    }

    /// Restore the run from the newest checkpoint record, if one exists
    ///
    /// Returns whether a record was restored. The restored Mesh becomes the
    /// live shared Mesh of fresh Spaces; solutions are rebound to it.
    pub fn try_restore(&mut self) -> Result<bool, DriverError> {
        let continuity = match &self.continuity {
            Some(continuity) => continuity,
            None => return Ok(false),
        };
        if !continuity.have_record_available() {
            return Ok(false);
        }

        let record = continuity.last_record()?;
        let mesh = share_mesh(record.load_mesh()?);
        self.spaces = record.load_spaces(&mesh)?;
        self.prev = record.load_solutions(&mesh)?;
        self.state.time = record.get_time();
        self.state.step = record.get_num();
        if let Some(dt) = record.get_time_step_length() {
            self.state.time_step = dt;
        }

        info!(
            step = self.state.step,
            time = self.state.time,
            "restored from checkpoint"
        );
        Ok(true)
    }

    /// Advance one time step: optional de-refinement, adaptivity loop, commit,
    /// CFL step-size update
    pub fn advance(&mut self, weak_form: &WeakForm) -> Result<StepSummary, DriverError> {
        self.state.step += 1;
        info!(
            step = self.state.step,
            time = self.state.time,
            dt = self.state.time_step,
            ndofs = total_num_dofs(&self.spaces),
            "time step"
        );

        // periodic de-refinement: forget transient refinement to bound
        // long-run mesh growth
        let mut unrefined = false;
        if self.config.unref_freq > 0
            && self.state.step > 1
            && self.state.step % self.config.unref_freq == 0
            && self.state.refinement_count > 0
        {
            info!("global de-refinement");
            self.spaces[0].unrefine_all_mesh_elements();
            for space in self.spaces.iter_mut() {
                space.set_uniform_order(self.config.p_init)?;
            }
            self.state.refinement_count = 0;
            unrefined = true;
        }

        if let Some(cfl) = &mut self.cfl {
            if let Some(schedule) = &cfl.number_schedule {
                cfl.calculation.set_number(schedule(self.state.time));
            }
        }

        let limiter = self.limiter.clone();
        let post_process = limiter.map(|lim| {
            move |slns: &mut [Solution]| {
                lim.limit_second_orders_according_to_detector(slns);
                lim.limit_according_to_detector(slns);
            }
        });
        let post_process: Option<&dyn Fn(&mut [Solution])> = post_process
            .as_ref()
            .map(|pp| pp as &dyn Fn(&mut [Solution]));
        let outcome = self.controller.converge_step(
            &mut self.spaces,
            weak_form,
            &self.prev,
            self.state.time_step,
            self.state.time,
            post_process,
        )?;
        self.state.refinement_count += outcome.refinements_applied;

        // commit: the reference solutions become the accepted previous state,
        // each taking a private copy of the reference Mesh so the per-step
        // reference discretization can be dropped
        self.state.time += self.state.time_step;
        self.prev = outcome
            .ref_slns
            .into_iter()
            .map(Solution::into_owned)
            .collect();

        if let Some(cfl) = &self.cfl {
            if let Some(dt) = cfl
                .calculation
                .calculate_semi_implicit(&self.prev, cfl.speed.as_ref())
            {
                self.state.time_step = dt;
            }
        }

        Ok(StepSummary {
            err_est_rel: outcome.err_est_rel,
            iterations: outcome.iterations,
            budget_hit: outcome.budget_hit,
            unrefined,
        })
    }

    /// Run to `t_final`, invoking `on_output` (visualization sink) and writing
    /// a checkpoint every `every_nth_step` accepted steps
    pub fn run(
        &mut self,
        weak_form: &WeakForm,
        mut on_output: impl FnMut(&RunState, &[Solution]),
    ) -> Result<(), DriverError> {
        if self.config.reuse_checkpoint {
            self.try_restore()?;
        }

        while self.state.time < self.config.t_final {
            self.advance(weak_form)?;

            if self.config.every_nth_step > 0 && self.state.step % self.config.every_nth_step == 0
            {
                on_output(&self.state, &self.prev);
                self.write_checkpoint()?;
            }
        }

        info!(
            steps = self.state.step,
            time = self.state.time,
            "run complete"
        );
        Ok(())
    }

    fn write_checkpoint(&self) -> Result<(), DriverError> {
        let continuity = match &self.continuity {
            Some(continuity) => continuity,
            None => return Ok(()),
        };

        let mut record = Record::new(self.state.step, self.state.time);
        {
            let mesh = self.spaces[0].mesh();
            let mesh = mesh.read().expect("Shared Mesh lock was poisoned!");
            record.save_mesh(&mesh);
        }
        record
            .save_spaces(&self.spaces)
            .save_solutions(&self.prev)
            .save_time_step_length(self.state.time_step);
        continuity.add_record(&record)?;
        Ok(())
    }
}
