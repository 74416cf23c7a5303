use crate::error::GeomintResult;
use num_traits::{Float, FromPrimitive};
use std::fmt::Debug;

/// A trait for types that can be used as scalars when evaluating Hamiltonian derivatives.
/// Must support basic arithmetic, debug printing, and conversion from f64.
pub trait Scalar: Float + FromPrimitive + Debug + 'static {}

impl<T: Float + FromPrimitive + Debug + 'static> Scalar for T {}

/// A Hamiltonian system given through its partial derivatives.
///
/// The equations of motion are `dp/dt = -H_q(p, q)` and `dq/dt = H_p(p, q)`.
pub trait Hamiltonian: Send + Sync {
    /// Returns the dimension `d` of `p` (and of `q`).
    fn dimension(&self) -> usize;

    /// Evaluates `H_p(p, q)` into `out`.
    fn hp(&self, p: &[f64], q: &[f64], out: &mut [f64]);

    /// Evaluates `H_q(p, q)` into `out`.
    fn hq(&self, p: &[f64], q: &[f64], out: &mut [f64]);

    /// Writes the row-major `d x d` block `∂H_q/∂p` into `out`.
    /// Returns `false` when the system has no analytic derivative to offer.
    fn hq_jacobian_p(&self, _p: &[f64], _q: &[f64], _out: &mut [f64]) -> bool {
        false
    }

    /// Writes the row-major `d x d` block `∂H_p/∂q` into `out`.
    /// Returns `false` when the system has no analytic derivative to offer.
    fn hp_jacobian_q(&self, _p: &[f64], _q: &[f64], _out: &mut [f64]) -> bool {
        false
    }
}

/// A square nonlinear equation `f(x) = 0` in `k` unknowns.
pub trait ImplicitEquation {
    fn dimension(&self) -> usize;

    fn residual(&self, x: &[f64], out: &mut [f64]);

    /// Row-major `k x k` Jacobian of the residual.
    /// Returns `false` when only the residual is known; root finders then approximate it.
    fn jacobian(&self, _x: &[f64], _out: &mut [f64]) -> bool {
        false
    }
}

/// Solves `f(x) = 0` near an initial guess.
pub trait RootFinder: Send + Sync {
    /// Returns `x*` with `‖f(x*)‖` below the finder's tolerance, or
    /// [`GeomintError::NonConvergence`](crate::error::GeomintError::NonConvergence)
    /// once its iteration budget is spent.
    fn solve(&self, equation: &dyn ImplicitEquation, guess: &[f64]) -> GeomintResult<Vec<f64>>;
}

/// A single-step integration rule.
pub trait StepRule: Send + Sync {
    /// Human readable name, used in logs.
    fn name(&self) -> &'static str;

    /// Advances `(p, q)` by a step of size `h` (which may be negative).
    fn step(
        &self,
        system: &dyn Hamiltonian,
        p: &[f64],
        q: &[f64],
        h: f64,
    ) -> GeomintResult<(Vec<f64>, Vec<f64>)>;
}
