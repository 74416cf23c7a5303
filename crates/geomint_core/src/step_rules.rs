use crate::error::{GeomintError, GeomintResult};
use crate::newton::{Newton, NewtonSettings};
use crate::traits::{Hamiltonian, ImplicitEquation, RootFinder, StepRule};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Symplectic Euler: implicit in `p`, explicit in `q`. First order.
///
/// ```text
/// p_{n+1} = p_n - h H_q(p_{n+1}, q_n)
/// q_{n+1} = q_n + h H_p(p_{n+1}, q_n)
/// ```
#[derive(Debug, Clone, Default)]
pub struct SymplecticEuler<R: RootFinder = Newton> {
    root_finder: R,
}

impl<R: RootFinder> SymplecticEuler<R> {
    pub fn new(root_finder: R) -> Self {
        Self { root_finder }
    }
}

impl<R: RootFinder> StepRule for SymplecticEuler<R> {
    fn name(&self) -> &'static str {
        "symplectic-euler"
    }

    fn step(
        &self,
        system: &dyn Hamiltonian,
        p: &[f64],
        q: &[f64],
        h: f64,
    ) -> GeomintResult<(Vec<f64>, Vec<f64>)> {
        check_state(system, p, q)?;

        // implicit step in p
        let momentum = MomentumEquation {
            system,
            p_n: p,
            q_n: q,
            coeff: h,
        };
        let p_next = self.root_finder.solve(&momentum, p)?;

        // explicit step in q
        let mut q_next = vec![0.0; q.len()];
        system.hp(&p_next, q, &mut q_next);
        for (qi, &q0) in q_next.iter_mut().zip(q) {
            *qi = q0 + h * *qi;
        }

        Ok((p_next, q_next))
    }
}

/// Störmer–Verlet: half step in `p`, full step in `q`, half step in `p`.
/// Second order and time reversible.
///
/// ```text
/// p_{n+1/2} = p_n - h/2 H_q(p_{n+1/2}, q_n)
/// q_{n+1}   = q_n + h/2 (H_p(p_{n+1/2}, q_n) + H_p(p_{n+1/2}, q_{n+1}))
/// p_{n+1}   = p_{n+1/2} - h/2 H_q(p_{n+1/2}, q_{n+1})
/// ```
#[derive(Debug, Clone, Default)]
pub struct StormerVerlet<R: RootFinder = Newton> {
    root_finder: R,
}

impl<R: RootFinder> StormerVerlet<R> {
    pub fn new(root_finder: R) -> Self {
        Self { root_finder }
    }
}

impl<R: RootFinder> StepRule for StormerVerlet<R> {
    fn name(&self) -> &'static str {
        "stormer-verlet"
    }

    fn step(
        &self,
        system: &dyn Hamiltonian,
        p: &[f64],
        q: &[f64],
        h: f64,
    ) -> GeomintResult<(Vec<f64>, Vec<f64>)> {
        check_state(system, p, q)?;
        let half_h = 0.5 * h;

        // implicit half step in p
        let momentum = MomentumEquation {
            system,
            p_n: p,
            q_n: q,
            coeff: half_h,
        };
        let p_half = self.root_finder.solve(&momentum, p)?;

        // implicit step in q; H_p(p_half, q_n) is fixed across the solve
        let mut hp_n = vec![0.0; q.len()];
        system.hp(&p_half, q, &mut hp_n);
        let position = PositionEquation {
            system,
            p_half: &p_half,
            q_n: q,
            hp_n: &hp_n,
            half_h,
        };
        let q_next = self.root_finder.solve(&position, q)?;

        // explicit half step in p
        let mut p_next = vec![0.0; p.len()];
        system.hq(&p_half, &q_next, &mut p_next);
        for (pi, &ph) in p_next.iter_mut().zip(&p_half) {
            *pi = ph - half_h * *pi;
        }

        Ok((p_next, q_next))
    }
}

fn check_state(system: &dyn Hamiltonian, p: &[f64], q: &[f64]) -> GeomintResult<()> {
    let dim = system.dimension();
    if p.len() != dim || q.len() != dim {
        return Err(GeomintError::invalid(format!(
            "state dimension mismatch: system has dimension {}, got p of length {} and q of length {}",
            dim,
            p.len(),
            q.len()
        )));
    }
    Ok(())
}

/// `p + c H_q(p, q_n) - p_n = 0` in the unknown `p`.
struct MomentumEquation<'a> {
    system: &'a dyn Hamiltonian,
    p_n: &'a [f64],
    q_n: &'a [f64],
    coeff: f64,
}

impl ImplicitEquation for MomentumEquation<'_> {
    fn dimension(&self) -> usize {
        self.p_n.len()
    }

    fn residual(&self, p: &[f64], out: &mut [f64]) {
        self.system.hq(p, self.q_n, out);
        for i in 0..out.len() {
            out[i] = p[i] + self.coeff * out[i] - self.p_n[i];
        }
    }

    fn jacobian(&self, p: &[f64], out: &mut [f64]) -> bool {
        if !self.system.hq_jacobian_p(p, self.q_n, out) {
            return false;
        }
        shift_identity(out, self.p_n.len(), self.coeff);
        true
    }
}

/// `q - q_n - h/2 (H_p(p_half, q_n) + H_p(p_half, q)) = 0` in the unknown `q`.
struct PositionEquation<'a> {
    system: &'a dyn Hamiltonian,
    p_half: &'a [f64],
    q_n: &'a [f64],
    hp_n: &'a [f64],
    half_h: f64,
}

impl ImplicitEquation for PositionEquation<'_> {
    fn dimension(&self) -> usize {
        self.q_n.len()
    }

    fn residual(&self, q: &[f64], out: &mut [f64]) {
        self.system.hp(self.p_half, q, out);
        for i in 0..out.len() {
            out[i] = q[i] - self.q_n[i] - self.half_h * (self.hp_n[i] + out[i]);
        }
    }

    fn jacobian(&self, q: &[f64], out: &mut [f64]) -> bool {
        if !self.system.hp_jacobian_q(self.p_half, q, out) {
            return false;
        }
        shift_identity(out, self.q_n.len(), -self.half_h);
        true
    }
}

/// Replaces the row-major block `J` with `I + scale * J`.
fn shift_identity(block: &mut [f64], dim: usize, scale: f64) {
    for i in 0..dim {
        for j in 0..dim {
            let entry = &mut block[i * dim + j];
            *entry *= scale;
            if i == j {
                *entry += 1.0;
            }
        }
    }
}

/// Selects a step rule by value or by name.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepMethod {
    #[default]
    SymplecticEuler,
    StormerVerlet,
    /// Catalogued but not realized: the crate only ships symplectic rules.
    ExplicitEuler,
}

impl StepMethod {
    pub fn name(self) -> &'static str {
        match self {
            StepMethod::SymplecticEuler => "symplectic-euler",
            StepMethod::StormerVerlet => "stormer-verlet",
            StepMethod::ExplicitEuler => "explicit-euler",
        }
    }

    /// Instantiates the rule with a Newton root finder.
    pub fn rule(self, settings: NewtonSettings) -> GeomintResult<Box<dyn StepRule>> {
        let newton = Newton::new(settings)?;
        match self {
            StepMethod::SymplecticEuler => Ok(Box::new(SymplecticEuler::new(newton))),
            StepMethod::StormerVerlet => Ok(Box::new(StormerVerlet::new(newton))),
            StepMethod::ExplicitEuler => Err(GeomintError::UnimplementedMethod {
                method: self.name().to_string(),
            }),
        }
    }
}

impl fmt::Display for StepMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for StepMethod {
    type Err = GeomintError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['_', ' '], "-");
        match normalized.as_str() {
            "symplectic-euler" | "se" => Ok(StepMethod::SymplecticEuler),
            "stormer-verlet" | "störmer-verlet" | "verlet" | "sv" => Ok(StepMethod::StormerVerlet),
            "explicit-euler" | "forward-euler" | "euler" => Ok(StepMethod::ExplicitEuler),
            _ => Err(GeomintError::invalid(format!("unknown step method `{s}`"))),
        }
    }
}
