use crate::error::{GeomintError, GeomintResult};
use crate::traits::{ImplicitEquation, RootFinder};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NewtonSettings {
    pub max_steps: usize,
    pub damping: f64,
    pub tolerance: f64,
    /// Forward-difference step used when the equation has no analytic Jacobian.
    pub fd_step: f64,
}

impl Default for NewtonSettings {
    fn default() -> Self {
        Self {
            max_steps: 25,
            damping: 1.0,
            tolerance: 1e-10,
            fd_step: 1e-7,
        }
    }
}

impl NewtonSettings {
    pub fn validate(&self) -> GeomintResult<()> {
        if self.max_steps == 0 {
            return Err(GeomintError::invalid("max_steps must be greater than zero"));
        }
        if self.damping.is_nan() || self.damping <= 0.0 {
            return Err(GeomintError::invalid("damping must be positive"));
        }
        if self.tolerance.is_nan() || self.tolerance <= 0.0 {
            return Err(GeomintError::invalid("tolerance must be positive"));
        }
        if self.fd_step.is_nan() || self.fd_step <= 0.0 {
            return Err(GeomintError::invalid("fd_step must be positive"));
        }
        Ok(())
    }
}

/// Newton's method with an LU solve per iteration.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Newton {
    settings: NewtonSettings,
}

impl Newton {
    pub fn new(settings: NewtonSettings) -> GeomintResult<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    pub fn settings(&self) -> &NewtonSettings {
        &self.settings
    }
}

impl RootFinder for Newton {
    fn solve(&self, equation: &dyn ImplicitEquation, guess: &[f64]) -> GeomintResult<Vec<f64>> {
        let dim = equation.dimension();
        if guess.len() != dim {
            return Err(GeomintError::invalid(format!(
                "initial guess dimension mismatch: expected {}, got {}",
                dim,
                guess.len()
            )));
        }

        let settings = &self.settings;
        let mut state = guess.to_vec();
        let mut residual = vec![0.0; dim];
        let mut jacobian = vec![0.0; dim * dim];
        equation.residual(&state, &mut residual);
        let mut residual_norm = l2_norm(&residual);
        let mut iterations = 0usize;

        loop {
            if !residual_norm.is_finite() {
                return Err(GeomintError::NonConvergence {
                    iterations,
                    residual_norm,
                });
            }
            if residual_norm <= settings.tolerance {
                break;
            }
            if iterations >= settings.max_steps {
                return Err(GeomintError::NonConvergence {
                    iterations,
                    residual_norm,
                });
            }

            if !equation.jacobian(&state, &mut jacobian) {
                finite_difference_jacobian(equation, &state, &residual, settings.fd_step, &mut jacobian);
            }
            let delta = solve_linear_system(dim, &jacobian, &residual).ok_or(
                GeomintError::NonConvergence {
                    iterations,
                    residual_norm,
                },
            )?;

            for i in 0..dim {
                state[i] -= settings.damping * delta[i];
            }

            iterations += 1;
            equation.residual(&state, &mut residual);
            residual_norm = l2_norm(&residual);
            trace!(iterations, residual_norm, "newton iteration");
        }

        Ok(state)
    }
}

fn finite_difference_jacobian(
    equation: &dyn ImplicitEquation,
    state: &[f64],
    residual: &[f64],
    fd_step: f64,
    out: &mut [f64],
) {
    let dim = state.len();
    let mut shifted = state.to_vec();
    let mut shifted_residual = vec![0.0; dim];

    for j in 0..dim {
        let step = fd_step * state[j].abs().max(1.0);
        shifted[j] = state[j] + step;
        equation.residual(&shifted, &mut shifted_residual);
        for i in 0..dim {
            out[i * dim + j] = (shifted_residual[i] - residual[i]) / step;
        }
        shifted[j] = state[j];
    }
}

fn solve_linear_system(dim: usize, jacobian: &[f64], residual: &[f64]) -> Option<Vec<f64>> {
    let j_matrix = DMatrix::from_row_slice(dim, dim, jacobian);
    let rhs = DVector::from_column_slice(residual);
    j_matrix
        .lu()
        .solve(&rhs)
        .filter(|v| v.iter().all(|x| x.is_finite()))
        .map(|v| v.iter().cloned().collect())
}

pub(crate) fn l2_norm(values: &[f64]) -> f64 {
    values.iter().map(|v| v * v).sum::<f64>().sqrt()
}
