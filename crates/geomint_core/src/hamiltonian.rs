use crate::error::{GeomintError, GeomintResult};
use crate::integrator::{Integrator, Trajectory};
use crate::traits::{Hamiltonian, StepRule};
use std::fmt;

type DerivativeFn = Box<dyn Fn(&[f64], &[f64], &mut [f64]) + Send + Sync>;

/// A Hamiltonian system defined by its partial derivatives `H_p` and `H_q`.
///
/// The dimension is part of the definition and is never inferred from the
/// state passed to a solve. Immutable once built.
pub struct HamiltonianSystem {
    hp: DerivativeFn,
    hq: DerivativeFn,
    hq_jacobian_p: Option<DerivativeFn>,
    hp_jacobian_q: Option<DerivativeFn>,
    dimension: usize,
}

impl HamiltonianSystem {
    /// Builds a system of dimension `dimension` from `H_p` and `H_q`.
    ///
    /// Each function receives `(p, q, out)` and writes `dimension` values to `out`.
    pub fn new<P, Q>(hp: P, hq: Q, dimension: usize) -> GeomintResult<Self>
    where
        P: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
        Q: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
    {
        Self::builder().hp(hp).hq(hq).dimension(dimension).build()
    }

    /// Builds a one dimensional system from scalar functions of `(p, q)`.
    pub fn scalar<P, Q>(hp: P, hq: Q) -> GeomintResult<Self>
    where
        P: Fn(f64, f64) -> f64 + Send + Sync + 'static,
        Q: Fn(f64, f64) -> f64 + Send + Sync + 'static,
    {
        Self::new(
            move |p, q, out| out[0] = hp(p[0], q[0]),
            move |p, q, out| out[0] = hq(p[0], q[0]),
            1,
        )
    }

    pub fn builder() -> HamiltonianSystemBuilder {
        HamiltonianSystemBuilder::default()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Solves with the default rule (symplectic Euler).
    pub fn solve(&self, p0: &[f64], q0: &[f64], t: &[f64]) -> GeomintResult<Trajectory> {
        Integrator::default().solve(self, p0, q0, t)
    }

    /// Solves with an explicit step rule.
    pub fn solve_with(
        &self,
        p0: &[f64],
        q0: &[f64],
        t: &[f64],
        rule: &dyn StepRule,
    ) -> GeomintResult<Trajectory> {
        crate::integrator::solve(self, p0, q0, t, rule)
    }
}

impl Hamiltonian for HamiltonianSystem {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn hp(&self, p: &[f64], q: &[f64], out: &mut [f64]) {
        (self.hp)(p, q, out)
    }

    fn hq(&self, p: &[f64], q: &[f64], out: &mut [f64]) {
        (self.hq)(p, q, out)
    }

    fn hq_jacobian_p(&self, p: &[f64], q: &[f64], out: &mut [f64]) -> bool {
        match &self.hq_jacobian_p {
            Some(f) => {
                f(p, q, out);
                true
            }
            None => false,
        }
    }

    fn hp_jacobian_q(&self, p: &[f64], q: &[f64], out: &mut [f64]) -> bool {
        match &self.hp_jacobian_q {
            Some(f) => {
                f(p, q, out);
                true
            }
            None => false,
        }
    }
}

impl fmt::Debug for HamiltonianSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HamiltonianSystem")
            .field("dimension", &self.dimension)
            .field("hq_jacobian_p", &self.hq_jacobian_p.is_some())
            .field("hp_jacobian_q", &self.hp_jacobian_q.is_some())
            .finish_non_exhaustive()
    }
}

/// Collects the parts of a [`HamiltonianSystem`]; `build` rejects incomplete definitions.
#[derive(Default)]
pub struct HamiltonianSystemBuilder {
    hp: Option<DerivativeFn>,
    hq: Option<DerivativeFn>,
    hq_jacobian_p: Option<DerivativeFn>,
    hp_jacobian_q: Option<DerivativeFn>,
    dimension: Option<usize>,
}

impl HamiltonianSystemBuilder {
    pub fn hp<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
    {
        self.hp = Some(Box::new(f));
        self
    }

    pub fn hq<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
    {
        self.hq = Some(Box::new(f));
        self
    }

    /// Analytic `∂H_q/∂p`, written row-major into a `d * d` buffer.
    pub fn hq_jacobian_p<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
    {
        self.hq_jacobian_p = Some(Box::new(f));
        self
    }

    /// Analytic `∂H_p/∂q`, written row-major into a `d * d` buffer.
    pub fn hp_jacobian_q<F>(mut self, f: F) -> Self
    where
        F: Fn(&[f64], &[f64], &mut [f64]) + Send + Sync + 'static,
    {
        self.hp_jacobian_q = Some(Box::new(f));
        self
    }

    pub fn dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn build(self) -> GeomintResult<HamiltonianSystem> {
        let dimension = self
            .dimension
            .ok_or_else(|| GeomintError::invalid("specify the dimension of p and q"))?;
        if dimension == 0 {
            return Err(GeomintError::invalid("dimension must be positive"));
        }
        let hp = self
            .hp
            .ok_or_else(|| GeomintError::invalid("missing H_p"))?;
        let hq = self
            .hq
            .ok_or_else(|| GeomintError::invalid("missing H_q"))?;

        Ok(HamiltonianSystem {
            hp,
            hq,
            hq_jacobian_p: self.hq_jacobian_p,
            hp_jacobian_q: self.hp_jacobian_q,
            dimension,
        })
    }
}
