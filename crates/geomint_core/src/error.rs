use thiserror::Error;

/// Errors surfaced by system construction, root finding and trajectory solves.
#[derive(Error, Debug)]
pub enum GeomintError {
    #[error("Invalid configuration: {what}")]
    InvalidConfiguration { what: String },

    #[error("Root finder failed to converge in {iterations} steps (‖f(x)‖ = {residual_norm:e})")]
    NonConvergence {
        iterations: usize,
        residual_norm: f64,
    },

    #[error("Step {index} failed (h = {h}, p = {p:?}, q = {q:?})")]
    StepFailure {
        index: usize,
        h: f64,
        p: Vec<f64>,
        q: Vec<f64>,
        #[source]
        source: Box<GeomintError>,
    },

    #[error("Step method `{method}` is not implemented")]
    UnimplementedMethod { method: String },
}

impl GeomintError {
    pub(crate) fn invalid(what: impl Into<String>) -> Self {
        GeomintError::InvalidConfiguration { what: what.into() }
    }
}

pub type GeomintResult<T> = Result<T, GeomintError>;
