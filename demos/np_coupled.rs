//! A two-field coupled transport problem run at a fixed time step
//!
//! Ion concentration drifts in the electric field of a potential it sources
//! itself (a linearized Nernst-Planck / potential coupling). Each implicit
//! Euler step is linearized at the previous state, so the coupling enters the
//! off-diagonal blocks of one linear system. No CFL control and no shock
//! capturing; the adaptivity loop alone tracks the moving concentration front.

use hp_adapt_2d::adapt::{MarkingStrategy, NormType};
use hp_adapt_2d::controller::AdaptConfig;
use hp_adapt_2d::driver::{RunConfig, TimeDriver};
use hp_adapt_2d::fields::{DerivedField, FieldExport};
use hp_adapt_2d::mesh::{elem::Rect, Mesh};
use hp_adapt_2d::projection::project_fn;
use hp_adapt_2d::space::{share_mesh, Space};
use hp_adapt_2d::weak_form::{
    FormContext, MatrixFormVol, ShapeFn, TimeDerivMatrixForm, TimeDerivVectorForm, VectorFormVol,
    WeakForm,
};

use tracing::info;

const CONCENTRATION: usize = 0;
const POTENTIAL: usize = 1;

/// Ion diffusivity
const DIFFUSIVITY: f64 = 0.05;
/// Electrophoretic mobility
const MOBILITY: f64 = 0.1;
/// Charge coupling strength of the potential equation
const CHARGE_COUPLING: f64 = 10.0;
/// Background concentration the charge density is measured against
const C_REF: f64 = 1.0;

const P_INIT: u8 = 1;
const TIME_STEP: f64 = 0.01;
const T_FINAL: f64 = 0.25;

/// Diffusive stiffness on one diagonal block
struct DiffusionForm {
    field: usize,
    coeff: f64,
}

impl MatrixFormVol for DiffusionForm {
    fn block(&self) -> (usize, usize) {
        (self.field, self.field)
    }

    fn eval(&self, _ctx: &FormContext, u: &ShapeFn, v: &ShapeFn) -> f64 {
        self.coeff * (u.dx * v.dx + u.dy * v.dy)
    }
}

/// Electromigration: `μ c_prev ∇φ · ∇v` against the concentration test field
struct MigrationForm;

impl MatrixFormVol for MigrationForm {
    fn block(&self) -> (usize, usize) {
        (CONCENTRATION, POTENTIAL)
    }

    fn eval(&self, ctx: &FormContext, u: &ShapeFn, v: &ShapeFn) -> f64 {
        MOBILITY * ctx.prev[CONCENTRATION] * (u.dx * v.dx + u.dy * v.dy)
    }
}

/// Charge density sourcing the potential: `K c v`
struct ChargeForm;

impl MatrixFormVol for ChargeForm {
    fn block(&self) -> (usize, usize) {
        (POTENTIAL, CONCENTRATION)
    }

    fn eval(&self, _ctx: &FormContext, u: &ShapeFn, v: &ShapeFn) -> f64 {
        CHARGE_COUPLING * u.value * v.value
    }
}

/// Constant background charge on the potential's RHS
struct BackgroundChargeForm;

impl VectorFormVol for BackgroundChargeForm {
    fn block(&self) -> usize {
        POTENTIAL
    }

    fn eval(&self, _ctx: &FormContext, v: &ShapeFn) -> f64 {
        CHARGE_COUPLING * C_REF * v.value
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt().with_target(false).init();

    std::fs::create_dir_all("./np_coupled_out")?;

    let mesh = share_mesh(Mesh::rectangle(Rect::new(0.0, 1.0, 0.0, 1.0), 4, 4));
    let spaces = vec![Space::new(&mesh, P_INIT)?, Space::new(&mesh, P_INIT)?];

    // a concentrated ion blob in the lower-left corner over the background
    let initial = vec![
        project_fn(&spaces[CONCENTRATION], |x, y| {
            let r2 = (x - 0.25) * (x - 0.25) + (y - 0.25) * (y - 0.25);
            C_REF + 2.0 * (-40.0 * r2).exp()
        }),
        project_fn(&spaces[POTENTIAL], |_, _| 0.0),
    ];

    // both fields carry the implicit Euler pseudo-time term; for the potential
    // it acts as a damped update toward the quasi-static solution
    let mut weak_form = WeakForm::new(2);
    weak_form
        .add_matrix_form(Box::new(TimeDerivMatrixForm {
            field: CONCENTRATION,
        }))
        .add_matrix_form(Box::new(TimeDerivMatrixForm { field: POTENTIAL }))
        .add_matrix_form(Box::new(DiffusionForm {
            field: CONCENTRATION,
            coeff: DIFFUSIVITY,
        }))
        .add_matrix_form(Box::new(DiffusionForm {
            field: POTENTIAL,
            coeff: 1.0,
        }))
        .add_matrix_form(Box::new(MigrationForm))
        .add_matrix_form(Box::new(ChargeForm))
        .add_vector_form(Box::new(TimeDerivVectorForm {
            field: CONCENTRATION,
        }))
        .add_vector_form(Box::new(TimeDerivVectorForm { field: POTENTIAL }))
        .add_vector_form(Box::new(BackgroundChargeForm));

    let adapt_config = AdaptConfig {
        err_stop: 0.1,
        ndof_stop: 10_000,
        threshold: 0.4,
        strategy: MarkingStrategy::ErrorFraction,
        regularity: 1,
        order_increase: 1,
        max_p_order: 5,
        norms: vec![NormType::L2, NormType::Energy],
    };
    let run_config = RunConfig {
        t_final: T_FINAL,
        initial_time_step: TIME_STEP,
        unref_freq: 0,
        p_init: P_INIT,
        every_nth_step: 5,
        reuse_checkpoint: false,
    };

    let mut export = FieldExport::new(vec!["concentration".into(), "potential".into()], [5, 5]);
    export.add_derived(DerivedField::new("excess_charge", |state: &[f64]| {
        CHARGE_COUPLING * (state[CONCENTRATION] - C_REF)
    }));

    let mut driver = TimeDriver::new(run_config, adapt_config, spaces, initial);
    driver.run(&weak_form, |state, slns| {
        export.reinit(slns);
        let path = format!("./np_coupled_out/step_{}.vtk", state.step);
        if let Err(err) = export.print_all_to_vtk(&path) {
            info!(%err, "failed to write VTK output");
        }
    })?;

    info!(steps = driver.state().step, "transport run complete");
    Ok(())
}
