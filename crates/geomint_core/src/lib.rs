//! The `geomint_core` crate integrates Hamiltonian systems
//! `dp/dt = -H_q(p, q)`, `dq/dt = H_p(p, q)` with symplectic step rules.
//!
//! Key components:
//! - **Traits**: `Hamiltonian` (partial derivatives + dimension), `StepRule` (single-step
//!   algorithms), `RootFinder` / `ImplicitEquation` (the implicit solves inside a step).
//! - **Systems**: closure-backed `HamiltonianSystem` and expression-backed
//!   `ExpressionHamiltonian` (bytecode VM with dual-number Jacobians).
//! - **Step rules**: `SymplecticEuler` and `StormerVerlet`, selectable through `StepMethod`.
//! - **Integrator**: drives a rule over an arbitrary output time grid and returns a `Trajectory`.
pub mod autodiff;
pub mod equation_engine;
pub mod error;
pub mod hamiltonian;
pub mod integrator;
pub mod newton;
pub mod step_rules;
pub mod traits;

pub use equation_engine::ExpressionHamiltonian;
pub use error::{GeomintError, GeomintResult};
pub use hamiltonian::{HamiltonianSystem, HamiltonianSystemBuilder};
pub use integrator::{solve, Integrator, IntegratorConfig, Trajectory};
pub use newton::{Newton, NewtonSettings};
pub use step_rules::{StepMethod, StormerVerlet, SymplecticEuler};
pub use traits::{Hamiltonian, ImplicitEquation, RootFinder, StepRule};
