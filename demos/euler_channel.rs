//! Compressible Euler flow through a channel with hp-adaptivity, shock
//! capturing, CFL-adapted time stepping and checkpointed restart
//!
//! The system is advanced with a linearized implicit Euler scheme: the flux
//! Jacobians are frozen at the previous-time-step state, so each step solves
//! one linear system per adaptivity iteration. Results land in
//! `./euler_channel_out/` as legacy-VTK files plottable with Visit.

use hp_adapt_2d::adapt::{MarkingStrategy, NormType};
use hp_adapt_2d::cfl::CflCalculation;
use hp_adapt_2d::continuity::Continuity;
use hp_adapt_2d::controller::AdaptConfig;
use hp_adapt_2d::driver::{CflControl, RunConfig, TimeDriver};
use hp_adapt_2d::fields::{DerivedField, FieldExport};
use hp_adapt_2d::limiter::FluxLimiter;
use hp_adapt_2d::mesh::Mesh;
use hp_adapt_2d::projection::project_fn;
use hp_adapt_2d::space::{share_mesh, Space};
use hp_adapt_2d::weak_form::{
    CharacteristicSpeed, FormContext, MatrixFormVol, ShapeFn, TimeDerivVectorForm, VectorFormVol,
    WeakForm,
};

use tracing::info;

const KAPPA: f64 = 1.4;

// exterior (inlet) state
const RHO_EXT: f64 = 1.0;
const V1_EXT: f64 = 1.25;
const V2_EXT: f64 = 0.0;
const P_EXT: f64 = 7142.8571428571425;

const P_INIT: u8 = 0;
const T_FINAL: f64 = 0.05;
const INITIAL_TIME_STEP: f64 = 1e-5;
const UNREF_FREQ: usize = 5;
const EVERY_NTH_STEP: usize = 5;

const ERR_STOP: f64 = 0.5;
const NDOF_STOP: usize = 30_000;
const THRESHOLD: f64 = 0.3;
const DETECTOR_THRESHOLD: f64 = 0.25;

/// Conservative state indices
const RHO: usize = 0;
const RHO_V1: usize = 1;
const RHO_V2: usize = 2;
const ENERGY: usize = 3;

fn pressure(state: &[f64]) -> f64 {
    let q2 = (state[RHO_V1] * state[RHO_V1] + state[RHO_V2] * state[RHO_V2]) / state[RHO];
    (KAPPA - 1.0) * (state[ENERGY] - 0.5 * q2)
}

fn sound_speed(state: &[f64]) -> f64 {
    (KAPPA * pressure(state) / state[RHO]).abs().sqrt()
}

/// `∂F_x/∂W` and `∂F_y/∂W` at a conservative state
fn flux_jacobians(state: &[f64]) -> [[[f64; 4]; 4]; 2] {
    let rho = state[RHO];
    let u = state[RHO_V1] / rho;
    let v = state[RHO_V2] / rho;
    let q2 = u * u + v * v;
    let h = (state[ENERGY] + pressure(state)) / rho;
    let km1 = KAPPA - 1.0;

    let a_x = [
        [0.0, 1.0, 0.0, 0.0],
        [0.5 * km1 * q2 - u * u, (3.0 - KAPPA) * u, -km1 * v, km1],
        [-u * v, v, u, 0.0],
        [u * (0.5 * km1 * q2 - h), h - km1 * u * u, -km1 * u * v, KAPPA * u],
    ];
    let a_y = [
        [0.0, 0.0, 1.0, 0.0],
        [-u * v, v, u, 0.0],
        [0.5 * km1 * q2 - v * v, -km1 * u, (3.0 - KAPPA) * v, km1],
        [v * (0.5 * km1 * q2 - h), -km1 * u * v, h - km1 * v * v, KAPPA * v],
    ];
    [a_x, a_y]
}

/// One `(test, trial)` block of the linearized implicit Euler system:
/// `(u v) δ_ij / Δt - A_x[i][j] u ∂v/∂x - A_y[i][j] u ∂v/∂y`
struct EulerMatrixForm {
    test: usize,
    trial: usize,
}

impl MatrixFormVol for EulerMatrixForm {
    fn block(&self) -> (usize, usize) {
        (self.test, self.trial)
    }

    fn eval(&self, ctx: &FormContext, u: &ShapeFn, v: &ShapeFn) -> f64 {
        let [a_x, a_y] = flux_jacobians(ctx.prev);
        let mut result = -a_x[self.test][self.trial] * u.value * v.dx
            - a_y[self.test][self.trial] * u.value * v.dy;
        if self.test == self.trial {
            result += u.value * v.value / ctx.dt;
        }
        result
    }
}

/// Weak far-field forcing toward the exterior state, strongest near the inlet
struct FarFieldForm {
    field: usize,
    exterior: f64,
    rate: f64,
}

impl VectorFormVol for FarFieldForm {
    fn block(&self) -> usize {
        self.field
    }

    fn eval(&self, ctx: &FormContext, v: &ShapeFn) -> f64 {
        let weight = (-4.0 * ctx.x).exp();
        self.rate * weight * (self.exterior - ctx.prev[self.field]) * v.value
    }
}

struct EulerSpeed;

impl CharacteristicSpeed for EulerSpeed {
    fn max_speed(&self, state: &[f64]) -> f64 {
        if state[RHO] <= 0.0 {
            return 0.0;
        }
        let speed = (state[RHO_V1] * state[RHO_V1] + state[RHO_V2] * state[RHO_V2]).sqrt()
            / state[RHO];
        speed + sound_speed(state)
    }
}

fn exterior_state() -> [f64; 4] {
    let energy = P_EXT / (KAPPA - 1.0) + 0.5 * RHO_EXT * (V1_EXT * V1_EXT + V2_EXT * V2_EXT);
    [RHO_EXT, RHO_EXT * V1_EXT, RHO_EXT * V2_EXT, energy]
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    std::fs::create_dir_all("./euler_channel_out")?;

    // the channel: 4 x 1, meshed 8 x 2
    let mesh = share_mesh(Mesh::from_file("./demos/euler_channel.mesh.json")?);
    let spaces: Vec<Space> = (0..4)
        .map(|_| Space::new(&mesh, P_INIT))
        .collect::<Result<_, _>>()?;

    // uniform exterior state with a pressure bump near the inlet to kick off a
    // right-running wave
    let ext = exterior_state();
    let initial = vec![
        project_fn(&spaces[RHO], |_, _| ext[RHO]),
        project_fn(&spaces[RHO_V1], |_, _| ext[RHO_V1]),
        project_fn(&spaces[RHO_V2], |_, _| ext[RHO_V2]),
        project_fn(&spaces[ENERGY], |x, _| {
            if x < 0.5 {
                1.5 * ext[ENERGY]
            } else {
                ext[ENERGY]
            }
        }),
    ];

    let mut weak_form = WeakForm::new(4);
    for test in 0..4 {
        for trial in 0..4 {
            weak_form.add_matrix_form(Box::new(EulerMatrixForm { test, trial }));
        }
    }
    for (field, exterior) in ext.iter().enumerate() {
        weak_form
            .add_vector_form(Box::new(TimeDerivVectorForm { field }))
            .add_vector_form(Box::new(FarFieldForm {
                field,
                exterior: *exterior,
                rate: 100.0,
            }));
    }

    let adapt_config = AdaptConfig {
        err_stop: ERR_STOP,
        ndof_stop: NDOF_STOP,
        threshold: THRESHOLD,
        strategy: MarkingStrategy::FractionOfMax,
        regularity: 1,
        order_increase: 1,
        max_p_order: 4,
        norms: vec![NormType::L2; 4],
    };
    let run_config = RunConfig {
        t_final: T_FINAL,
        initial_time_step: INITIAL_TIME_STEP,
        unref_freq: UNREF_FREQ,
        p_init: P_INIT,
        every_nth_step: EVERY_NTH_STEP,
        reuse_checkpoint: true,
    };

    let mut export = FieldExport::new(
        vec![
            "rho".into(),
            "rho_v1".into(),
            "rho_v2".into(),
            "energy".into(),
        ],
        [4, 4],
    );
    export.add_derived(DerivedField::new("pressure", pressure));
    export.add_derived(DerivedField::new("mach", |state: &[f64]| {
        let speed =
            (state[RHO_V1] * state[RHO_V1] + state[RHO_V2] * state[RHO_V2]).sqrt() / state[RHO];
        speed / sound_speed(state)
    }));
    export.add_derived(DerivedField::new("entropy", |state: &[f64]| {
        (pressure(state) / P_EXT).ln() - KAPPA * (state[RHO] / RHO_EXT).ln()
    }));

    let mut driver = TimeDriver::new(run_config, adapt_config, spaces, initial)
        .with_cfl(CflControl {
            calculation: CflCalculation::new(1.0),
            speed: Box::new(EulerSpeed),
            // ramp the CFL number up once the startup transient has passed
            number_schedule: Some(Box::new(|time| (1.0 + 400.0 * time).min(10.0))),
        })
        .with_shock_capturing(FluxLimiter::new(DETECTOR_THRESHOLD))
        .with_continuity(Continuity::new("./euler_channel_out/checkpoints")?);

    driver.run(&weak_form, |state, slns| {
        export.reinit(slns);
        let path = format!("./euler_channel_out/step_{}.vtk", state.step);
        if let Err(err) = export.print_all_to_vtk(&path) {
            info!(%err, "failed to write VTK output");
        }
    })?;

    info!(
        steps = driver.state().step,
        time = driver.state().time,
        "channel flow complete"
    );
    Ok(())
}
