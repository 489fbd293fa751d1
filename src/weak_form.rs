//! Weak form declarations: the equation-specific ingredients of an assembled system
//!
//! A coupled system supplies its volumetric integrands as trait objects. Each
//! matrix form targets one `(test_field, trial_field)` block of the system
//! matrix and each vector form one test-field block of the RHS, so a weak form
//! describes an arbitrary coupling structure without the assembly routines
//! knowing anything about the physics.

use std::fmt;

/// A shape function's value and physical-space gradient at a quadrature point
#[derive(Debug, Clone, Copy)]
pub struct ShapeFn {
    pub value: f64,
    pub dx: f64,
    pub dy: f64,
}

/// Pointwise data available to volumetric forms at a quadrature point
pub struct FormContext<'a> {
    /// Physical coordinates of the quadrature point
    pub x: f64,
    pub y: f64,
    /// Previous-time-step field values at this point, one per field
    pub prev: &'a [f64],
    /// Current time step size
    pub dt: f64,
    /// Current simulation time
    pub time: f64,
}

/// A volumetric bilinear integrand contributing to one block of the system matrix
pub trait MatrixFormVol: Send + Sync {
    /// The `(test_field, trial_field)` block this form contributes to
    fn block(&self) -> (usize, usize);

    /// Evaluate the integrand at a quadrature point; `u` is the trial function
    /// and `v` the test function
    fn eval(&self, ctx: &FormContext, u: &ShapeFn, v: &ShapeFn) -> f64;
}

/// A volumetric linear integrand contributing to one block of the RHS vector
pub trait VectorFormVol: Send + Sync {
    /// The test field this form contributes to
    fn block(&self) -> usize;

    fn eval(&self, ctx: &FormContext, v: &ShapeFn) -> f64;
}

/// Largest local wave speed of a hyperbolic system, evaluated on cell-mean states
///
/// Drives the CFL-based time step adaption. Systems without a meaningful wave
/// speed (e.g. parabolic problems run at a fixed step) need not implement this.
pub trait CharacteristicSpeed: Send + Sync {
    fn max_speed(&self, state: &[f64]) -> f64;
}

/// A complete volumetric weak form for a system of `num_fields` coupled fields
pub struct WeakForm {
    num_fields: usize,
    matrix_forms: Vec<Box<dyn MatrixFormVol>>,
    vector_forms: Vec<Box<dyn VectorFormVol>>,
}

impl WeakForm {
    pub fn new(num_fields: usize) -> Self {
        assert!(num_fields > 0, "Weak Forms must have at least one field!");
        Self {
            num_fields,
            matrix_forms: Vec::new(),
            vector_forms: Vec::new(),
        }
    }

    pub fn num_fields(&self) -> usize {
        self.num_fields
    }

    pub fn add_matrix_form(&mut self, form: Box<dyn MatrixFormVol>) -> &mut Self {
        let (test, trial) = form.block();
        assert!(
            test < self.num_fields && trial < self.num_fields,
            "Matrix form block ({}, {}) exceeds the number of fields!",
            test,
            trial
        );
        self.matrix_forms.push(form);
        self
    }

    pub fn add_vector_form(&mut self, form: Box<dyn VectorFormVol>) -> &mut Self {
        assert!(
            form.block() < self.num_fields,
            "Vector form block {} exceeds the number of fields!",
            form.block()
        );
        self.vector_forms.push(form);
        self
    }

    pub fn matrix_forms(&self) -> &[Box<dyn MatrixFormVol>] {
        &self.matrix_forms
    }

    pub fn vector_forms(&self) -> &[Box<dyn VectorFormVol>] {
        &self.vector_forms
    }
}

impl fmt::Debug for WeakForm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("WeakForm")
            .field("num_fields", &self.num_fields)
            .field("num_matrix_forms", &self.matrix_forms.len())
            .field("num_vector_forms", &self.vector_forms.len())
            .finish()
    }
}

// ----------------------------------------------------------------------------------------------------
// common implicit-Euler time discretization forms
// ----------------------------------------------------------------------------------------------------

/// The `(u v) / Δt` matrix block of an implicit Euler time discretization
pub struct TimeDerivMatrixForm {
    pub field: usize,
}

impl MatrixFormVol for TimeDerivMatrixForm {
    fn block(&self) -> (usize, usize) {
        (self.field, self.field)
    }

    fn eval(&self, ctx: &FormContext, u: &ShapeFn, v: &ShapeFn) -> f64 {
        u.value * v.value / ctx.dt
    }
}

/// The `(u_prev v) / Δt` RHS block of an implicit Euler time discretization
pub struct TimeDerivVectorForm {
    pub field: usize,
}

impl VectorFormVol for TimeDerivVectorForm {
    fn block(&self) -> usize {
        self.field
    }

    fn eval(&self, ctx: &FormContext, v: &ShapeFn) -> f64 {
        ctx.prev[self.field] * v.value / ctx.dt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn forms_register_against_their_blocks() {
        let mut wf = WeakForm::new(2);
        wf.add_matrix_form(Box::new(TimeDerivMatrixForm { field: 0 }))
            .add_matrix_form(Box::new(DiffusionForm {
                field: 1,
                coeff: 0.5,
            }))
            .add_vector_form(Box::new(TimeDerivVectorForm { field: 0 }));

        assert_eq!(wf.matrix_forms().len(), 2);
        assert_eq!(wf.vector_forms().len(), 1);
        assert_eq!(wf.matrix_forms()[1].block(), (1, 1));
    }

    #[test]
    #[should_panic]
    fn out_of_range_blocks_are_rejected() {
        let mut wf = WeakForm::new(1);
        wf.add_matrix_form(Box::new(TimeDerivMatrixForm { field: 1 }));
    }

    #[test]
    fn time_derivative_forms_scale_with_dt() {
        let ctx = FormContext {
            x: 0.0,
            y: 0.0,
            prev: &[2.0],
            dt: 0.5,
            time: 0.0,
        };
        let shape = ShapeFn {
            value: 1.0,
            dx: 0.0,
            dy: 0.0,
        };

        let m = TimeDerivMatrixForm { field: 0 };
        let v = TimeDerivVectorForm { field: 0 };
        assert!((m.eval(&ctx, &shape, &shape) - 2.0).abs() < 1e-15);
        assert!((v.eval(&ctx, &shape) - 4.0).abs() < 1e-15);
    }
}
