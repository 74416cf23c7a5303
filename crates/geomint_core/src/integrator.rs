use crate::error::{GeomintError, GeomintResult};
use crate::newton::{Newton, NewtonSettings};
use crate::step_rules::{StepMethod, SymplecticEuler};
use crate::traits::{Hamiltonian, StepRule};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// A solved trajectory.
///
/// `p` and `q` are row-major `N x d` tables, one row per entry of `times`.
/// Rows keep length `d` also for one dimensional systems; use
/// [`Trajectory::p_component`] for a plain series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub times: Vec<f64>,
    pub dimension: usize,
    pub p: Vec<f64>,
    pub q: Vec<f64>,
}

impl Trajectory {
    pub fn len(&self) -> usize {
        self.times.len()
    }

    pub fn is_empty(&self) -> bool {
        self.times.is_empty()
    }

    pub fn p_row(&self, n: usize) -> &[f64] {
        &self.p[n * self.dimension..(n + 1) * self.dimension]
    }

    pub fn q_row(&self, n: usize) -> &[f64] {
        &self.q[n * self.dimension..(n + 1) * self.dimension]
    }

    /// Series of coordinate `i` of `p` over all rows.
    pub fn p_component(&self, i: usize) -> Vec<f64> {
        if self.dimension == 0 {
            return Vec::new();
        }
        self.p.iter().skip(i).step_by(self.dimension).copied().collect()
    }

    /// Series of coordinate `i` of `q` over all rows.
    pub fn q_component(&self, i: usize) -> Vec<f64> {
        if self.dimension == 0 {
            return Vec::new();
        }
        self.q.iter().skip(i).step_by(self.dimension).copied().collect()
    }

    /// Evaluates a function of the state (e.g. the Hamiltonian) at every row.
    pub fn evaluate<F>(&self, f: F) -> Vec<f64>
    where
        F: Fn(&[f64], &[f64]) -> f64,
    {
        (0..self.len())
            .map(|n| f(self.p_row(n), self.q_row(n)))
            .collect()
    }

    /// Largest `|f(row n) - f(row 0)|`; the energy error when `f` is the Hamiltonian.
    pub fn max_deviation<F>(&self, f: F) -> f64
    where
        F: Fn(&[f64], &[f64]) -> f64,
    {
        let values = self.evaluate(f);
        let Some(&first) = values.first() else {
            return 0.0;
        };
        values
            .iter()
            .map(|v| (v - first).abs())
            .fold(0.0, f64::max)
    }
}

/// Solves `dp/dt = -H_q, dq/dt = H_p` from `(p0, q0)` at `t[0]` over the grid `t`.
///
/// Step sizes are the consecutive differences of `t`; they may be negative or
/// non-uniform. Row 0 of the result is `(p0, q0)` verbatim.
pub fn solve(
    system: &dyn Hamiltonian,
    p0: &[f64],
    q0: &[f64],
    t: &[f64],
    rule: &dyn StepRule,
) -> GeomintResult<Trajectory> {
    let dim = system.dimension();
    if dim == 0 {
        return Err(GeomintError::invalid("system has zero dimension"));
    }
    if p0.len() != dim || q0.len() != dim {
        return Err(GeomintError::invalid(format!(
            "initial condition dimension mismatch: system has dimension {}, got p0 of length {} and q0 of length {}",
            dim,
            p0.len(),
            q0.len()
        )));
    }
    if t.is_empty() {
        return Err(GeomintError::invalid("time grid is empty"));
    }

    let n_times = t.len();
    debug!(steps = n_times - 1, dimension = dim, method = rule.name(), "solving trajectory");

    let mut p = vec![0.0; n_times * dim];
    let mut q = vec![0.0; n_times * dim];
    p[..dim].copy_from_slice(p0);
    q[..dim].copy_from_slice(q0);

    for n in 1..n_times {
        let h = t[n] - t[n - 1];
        let prev = (n - 1) * dim..n * dim;
        let next = n * dim..(n + 1) * dim;
        let p_prev = &p[prev.clone()];
        let q_prev = &q[prev];

        let (p_next, q_next) = match rule.step(system, p_prev, q_prev, h) {
            Ok(state) => state,
            Err(source) => {
                warn!(index = n, h, error = %source, "step failed");
                return Err(GeomintError::StepFailure {
                    index: n,
                    h,
                    p: p_prev.to_vec(),
                    q: q_prev.to_vec(),
                    source: Box::new(source),
                });
            }
        };
        if p_next.len() != dim || q_next.len() != dim {
            return Err(GeomintError::invalid(format!(
                "step rule `{}` returned a state of the wrong dimension",
                rule.name()
            )));
        }

        p[next.clone()].copy_from_slice(&p_next);
        q[next].copy_from_slice(&q_next);
    }

    debug!(rows = n_times, "trajectory solved");
    Ok(Trajectory {
        times: t.to_vec(),
        dimension: dim,
        p,
        q,
    })
}

/// Settings for an [`Integrator`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegratorConfig {
    pub method: StepMethod,
    pub newton: NewtonSettings,
}

/// A step rule bound for repeated solves.
///
/// `Integrator::default()` uses symplectic Euler with default Newton settings.
pub struct Integrator {
    rule: Box<dyn StepRule>,
}

impl Integrator {
    pub fn new(rule: impl StepRule + 'static) -> Self {
        Self {
            rule: Box::new(rule),
        }
    }

    pub fn from_config(config: &IntegratorConfig) -> GeomintResult<Self> {
        Ok(Self {
            rule: config.method.rule(config.newton)?,
        })
    }

    pub fn from_method(method: StepMethod) -> GeomintResult<Self> {
        Self::from_config(&IntegratorConfig {
            method,
            ..IntegratorConfig::default()
        })
    }

    pub fn rule(&self) -> &dyn StepRule {
        self.rule.as_ref()
    }

    pub fn solve(
        &self,
        system: &dyn Hamiltonian,
        p0: &[f64],
        q0: &[f64],
        t: &[f64],
    ) -> GeomintResult<Trajectory> {
        solve(system, p0, q0, t, self.rule.as_ref())
    }

    /// Solves independent initial conditions `(p0, q0)` in parallel over a shared grid.
    /// Results are returned in input order.
    pub fn solve_batch(
        &self,
        system: &dyn Hamiltonian,
        initial_conditions: &[(Vec<f64>, Vec<f64>)],
        t: &[f64],
    ) -> Vec<GeomintResult<Trajectory>> {
        debug!(count = initial_conditions.len(), "solving batch");
        initial_conditions
            .par_iter()
            .map(|(p0, q0)| self.solve(system, p0, q0, t))
            .collect()
    }
}

impl Default for Integrator {
    fn default() -> Self {
        Self::new(SymplecticEuler::<Newton>::default())
    }
}

impl std::fmt::Debug for Integrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Integrator")
            .field("rule", &self.rule.name())
            .finish()
    }
}
