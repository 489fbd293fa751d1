//! An hp-Adaptive time-stepping toolkit for coupled 2D systems, using a
//! discontinuous tensor-Legendre basis over rectangular quadtree Meshes
//!
//! The crate is layered bottom-up:
//! * [`mesh`] and [`basis`]: the geometric substrate and the L2 shapeset
//! * [`space`] and [`solution`]: per-field DOF bookkeeping and discrete states
//! * [`weak_form`], [`assembly`] and [`linalg`]: the problem statement and its
//!   assembled linear systems
//! * [`projection`], [`adapt`] and [`controller`]: the per-time-step
//!   converge-or-refine loop against a finer reference discretization
//! * [`driver`]: the time loop, with CFL step-size adaption ([`cfl`]), shock
//!   capturing ([`limiter`]), checkpointing ([`continuity`]) and visualization
//!   output ([`fields`])

pub mod basis;
pub mod mesh;

pub mod solution;
pub mod space;

pub mod assembly;
pub mod linalg;
pub mod weak_form;

pub mod adapt;
pub mod controller;
pub mod projection;

pub mod cfl;
pub mod continuity;
pub mod driver;
pub mod fields;
pub mod limiter;

pub use adapt::{MarkingStrategy, NormType};
pub use controller::{AdaptConfig, AdaptivityController};
pub use driver::{CflControl, RunConfig, TimeDriver};
pub use mesh::{elem::Rect, Mesh};
pub use solution::Solution;
pub use space::{share_mesh, Space};
pub use weak_form::{
    CharacteristicSpeed, FormContext, MatrixFormVol, ShapeFn, VectorFormVol, WeakForm,
};
