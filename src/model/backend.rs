//! The mixed-model fitting capability consumed by the per-gene-set tasks.

use crate::error::Result;
use crate::model::spec::ModelSpec;
use crate::reshape::long::LongTable;
use serde::{Deserialize, Serialize};

/// Estimation mode for a mixed-model fit.
///
/// Likelihood-ratio comparison of nested fixed-effect specifications is only
/// valid under `Ml`; the analysis layer always requests it. `Reml` is
/// exposed for standalone variance-component estimation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LikelihoodMode {
    Ml,
    Reml,
}

/// How a fit terminated.
///
/// `Converged` is the "fully converged" sentinel used by the end-of-batch
/// summaries. `IterationLimit` and `Singular` fits still carry estimates,
/// mirroring the relative/X-convergence, iteration-limit, and
/// singular-convergence diagnostics of classic mixed-model optimizers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConvergenceCode {
    /// Relative change in the log-likelihood fell below tolerance.
    Converged,
    /// Iteration budget exhausted before the tolerance was met.
    IterationLimit,
    /// A singular covariance or fixed-effect cross-product needed ridging.
    Singular,
}

impl ConvergenceCode {
    /// Whether this code signals full convergence.
    pub fn is_converged(&self) -> bool {
        matches!(self, ConvergenceCode::Converged)
    }
}

impl std::fmt::Display for ConvergenceCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConvergenceCode::Converged => write!(f, "converged"),
            ConvergenceCode::IterationLimit => write!(f, "iteration-limit"),
            ConvergenceCode::Singular => write!(f, "singular"),
        }
    }
}

/// A fitted mixed model, as exposed to the analysis layer.
#[derive(Debug, Clone)]
pub struct FittedModel {
    /// Log-likelihood at termination (ML or REML per the requested mode).
    pub log_likelihood: f64,
    /// Deviance: −2 × log-likelihood.
    pub deviance: f64,
    /// Akaike information criterion.
    pub aic: f64,
    /// Bayesian information criterion.
    pub bic: f64,
    /// Parameter count behind AIC/BIC: fixed effects + variance components.
    pub n_params: usize,
    /// Termination diagnostic.
    pub convergence: ConvergenceCode,
    /// Fixed-effect estimates, in `coefficient_names` order.
    pub coefficients: Vec<f64>,
    /// Fixed-effect column names.
    pub coefficient_names: Vec<String>,
    /// Fitted values per long-table row: X·β + Z·û.
    pub fitted: Vec<f64>,
}

/// A mixed-model fitting backend.
///
/// Unrecoverable numerical failure (a design the fitter cannot factor even
/// with ridging) is an `Err`; the per-gene-set task treats it as a null
/// model for that hypothesis without aborting the batch.
pub trait MixedModelBackend: Sync {
    /// Fit one model specification to a long-format table.
    fn fit(&self, spec: &ModelSpec, data: &LongTable, mode: LikelihoodMode) -> Result<FittedModel>;
}
