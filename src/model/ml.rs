//! Default mixed-model backend: iterative profiled-variance estimation with
//! maximum-likelihood or REML objectives.
//!
//! Fits `y = Xβ + Σ_k Z_k u_k + ε` with `u_k ~ N(0, τ²_k I)` and
//! `ε ~ N(0, σ²I)`, one isotropic variance component per random term.
//! Estimation alternates GLS solves for β with damped moment updates for
//! the variance components, the marginal covariance `V = σ²I + Σ τ²_k Z_k Z_k'`
//! factored by Cholesky at every step.

use crate::error::{Result, TcgsaError};
use crate::model::backend::{ConvergenceCode, FittedModel, LikelihoodMode, MixedModelBackend};
use crate::model::spec::{
    FixedTerm, InteractWith, ModelSpec, RandomGrouping, RandomSlope, RandomTerm, TimeColumn,
};
use crate::reshape::long::{CovariateColumn, LongTable};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::f64::consts::PI;

/// Configuration for the iterative fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MlConfig {
    /// Maximum profile iterations.
    pub max_iter: usize,
    /// Convergence tolerance on the log-likelihood.
    pub tol: f64,
    /// Ridge added to ill-conditioned factorizations.
    pub ridge: f64,
    /// Lower bound for variance components.
    pub var_lower_bound: f64,
}

impl Default for MlConfig {
    fn default() -> Self {
        Self {
            max_iter: 200,
            tol: 1e-6,
            ridge: 1e-8,
            var_lower_bound: 1e-10,
        }
    }
}

/// The default fitting backend.
#[derive(Debug, Clone, Default)]
pub struct MlBackend {
    pub config: MlConfig,
}

impl MlBackend {
    /// Create a backend with default settings.
    pub fn new() -> Self {
        Self::default()
    }
}

impl MixedModelBackend for MlBackend {
    fn fit(&self, spec: &ModelSpec, data: &LongTable, mode: LikelihoodMode) -> Result<FittedModel> {
        let n = data.n_rows();
        if n == 0 {
            return Err(TcgsaError::EmptyData("empty observation table".to_string()));
        }
        let y = DVector::from_column_slice(&data.expression);

        let (x, coefficient_names) = build_fixed_matrix(spec, data)?;
        let p = x.ncols();
        if n <= p {
            return Err(TcgsaError::Numerical(
                "model is saturated (observations <= fixed effects)".to_string(),
            ));
        }

        let blocks = build_random_blocks(spec, data)?;
        let zzt: Vec<DMatrix<f64>> = blocks.iter().map(|z| z * z.transpose()).collect();
        let block_cols: Vec<usize> = blocks.iter().map(|z| z.ncols()).collect();

        let cfg = &self.config;
        let (mut sigma2, tau2_init) = initialize_variances(&y, &x, cfg)?;
        let mut tau2: Vec<f64> = vec![tau2_init; blocks.len()];

        let mut ll_prev = f64::NEG_INFINITY;
        let mut converged = false;
        let mut any_singular = false;
        let mut last: Option<ProfileSolve> = None;

        for _ in 0..cfg.max_iter {
            let solve = solve_profile(&x, &y, &blocks, &zzt, sigma2, &tau2, mode, cfg)?;
            any_singular |= solve.singular;

            if (solve.log_likelihood - ll_prev).abs() < cfg.tol {
                converged = true;
                last = Some(solve);
                break;
            }
            ll_prev = solve.log_likelihood;

            // Damped moment updates, residual variance from the quadratic
            // form and each component from its projected residuals.
            let new_sigma2 = (solve.quad_form / (n - p) as f64).max(cfg.var_lower_bound);
            sigma2 = 0.5 * new_sigma2 + 0.5 * sigma2;
            for (k, z) in blocks.iter().enumerate() {
                let ztr = z.transpose() * &solve.v_inv_r;
                let new_tau2 = (ztr.norm_squared() / block_cols[k] as f64).max(cfg.var_lower_bound);
                tau2[k] = (0.5 * new_tau2 + 0.5 * tau2[k]).max(cfg.var_lower_bound);
            }

            last = Some(solve);
        }

        let solve = match last {
            Some(s) => s,
            None => solve_profile(&x, &y, &blocks, &zzt, sigma2, &tau2, mode, cfg)?,
        };

        let convergence = if any_singular {
            ConvergenceCode::Singular
        } else if converged {
            ConvergenceCode::Converged
        } else {
            ConvergenceCode::IterationLimit
        };

        // Fixed effects + one variance component per random term + residual.
        let n_params = p + blocks.len() + 1;
        let k = n_params as f64;
        let deviance = -2.0 * solve.log_likelihood;
        let aic = deviance + 2.0 * k;
        let bic = deviance + k * (n as f64).ln();

        Ok(FittedModel {
            log_likelihood: solve.log_likelihood,
            deviance,
            aic,
            bic,
            n_params,
            convergence,
            coefficients: solve.beta.iter().cloned().collect(),
            coefficient_names,
            fitted: solve.fitted,
        })
    }
}

/// One GLS solve at fixed variance components.
struct ProfileSolve {
    log_likelihood: f64,
    quad_form: f64,
    beta: DVector<f64>,
    v_inv_r: DVector<f64>,
    fitted: Vec<f64>,
    singular: bool,
}

#[allow(clippy::too_many_arguments)]
fn solve_profile(
    x: &DMatrix<f64>,
    y: &DVector<f64>,
    blocks: &[DMatrix<f64>],
    zzt: &[DMatrix<f64>],
    sigma2: f64,
    tau2: &[f64],
    mode: LikelihoodMode,
    cfg: &MlConfig,
) -> Result<ProfileSolve> {
    let n = y.len();
    let p = x.ncols();
    let mut singular = false;

    // V = sigma2*I + sum tau2_k Z_k Z_k'
    let mut v = DMatrix::zeros(n, n);
    for (t, m) in tau2.iter().zip(zzt) {
        v += m * *t;
    }
    for i in 0..n {
        v[(i, i)] += sigma2 + cfg.ridge;
    }

    let v_chol = match v.clone().cholesky() {
        Some(c) => c,
        None => {
            singular = true;
            let v_ridge = &v + DMatrix::identity(n, n) * 0.01;
            v_ridge.cholesky().ok_or_else(|| {
                TcgsaError::Numerical("marginal covariance is not positive definite".to_string())
            })?
        }
    };

    let v_inv_x = v_chol.solve(x);
    let v_inv_y = v_chol.solve(y);

    let xtvinvx = x.transpose() * &v_inv_x;
    let xtvinvx_inv = match xtvinvx.clone().try_inverse() {
        Some(inv) => inv,
        None => {
            singular = true;
            let ridged = &xtvinvx + DMatrix::identity(p, p) * cfg.ridge.max(1e-6);
            ridged.try_inverse().ok_or_else(|| {
                TcgsaError::Numerical("fixed-effect cross-product is singular".to_string())
            })?
        }
    };

    let beta = &xtvinvx_inv * (x.transpose() * &v_inv_y);
    let residuals = y - x * &beta;
    let v_inv_r = v_chol.solve(&residuals);
    let quad_form = residuals.dot(&v_inv_r);

    let log_det_v = 2.0 * v_chol.l().diagonal().map(|d| d.ln()).sum();

    let log_likelihood = match mode {
        LikelihoodMode::Ml => -0.5 * (n as f64 * (2.0 * PI).ln() + log_det_v + quad_form),
        LikelihoodMode::Reml => {
            let log_det_xtvinvx = match xtvinvx.clone().cholesky() {
                Some(c) => 2.0 * c.l().diagonal().map(|d| d.ln()).sum(),
                None => p as f64 * xtvinvx[(0, 0)].abs().max(f64::MIN_POSITIVE).ln(),
            };
            -0.5 * ((n - p) as f64 * (2.0 * PI).ln()
                + log_det_v
                + log_det_xtvinvx
                + quad_form)
        }
    };

    // Fitted values include the BLUPs: X beta + sum_k tau2_k Z_k Z_k' V^-1 r.
    let mut fitted_vec = x * &beta;
    for (z, t) in blocks.iter().zip(tau2) {
        let u = z.transpose() * &v_inv_r * *t;
        fitted_vec += z * u;
    }

    Ok(ProfileSolve {
        log_likelihood,
        quad_form,
        beta,
        v_inv_r,
        fitted: fitted_vec.iter().cloned().collect(),
        singular,
    })
}

/// OLS-based starting values for the variance components.
fn initialize_variances(y: &DVector<f64>, x: &DMatrix<f64>, cfg: &MlConfig) -> Result<(f64, f64)> {
    let n = y.len();
    let p = x.ncols();

    let xtx = x.transpose() * x;
    let xtx_inv = match xtx.clone().try_inverse() {
        Some(inv) => inv,
        None => (&xtx + DMatrix::identity(p, p) * cfg.ridge.max(1e-6))
            .try_inverse()
            .ok_or_else(|| {
                TcgsaError::Numerical("design matrix is rank deficient".to_string())
            })?,
    };
    let beta = &xtx_inv * (x.transpose() * y);
    let residuals = y - x * beta;
    let rss: f64 = residuals.iter().map(|r| r * r).sum();
    let df = (n - p).max(1);
    let sigma2 = (rss / df as f64).max(cfg.var_lower_bound);
    let tau2 = (0.1 * sigma2).max(cfg.var_lower_bound);
    Ok((sigma2, tau2))
}

fn sorted_levels(values: &[String]) -> Vec<String> {
    let mut levels: Vec<String> = values
        .iter()
        .cloned()
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    levels.sort();
    levels
}

/// Indicator columns for a categorical vector. The alphabetically first
/// level is the reference and is dropped when `skip_first` is set.
fn dummy_columns(
    values: &[String],
    levels: &[String],
    skip_first: bool,
    prefix: &str,
) -> Vec<(String, Vec<f64>)> {
    levels
        .iter()
        .skip(if skip_first { 1 } else { 0 })
        .map(|level| {
            let col: Vec<f64> = values
                .iter()
                .map(|v| if v == level { 1.0 } else { 0.0 })
                .collect();
            (format!("{}{}", prefix, level), col)
        })
        .collect()
}

fn group_values(data: &LongTable) -> Result<(&[String], &[String])> {
    match (&data.group, &data.group_levels) {
        (Some(g), Some(l)) => Ok((g, l)),
        _ => Err(TcgsaError::InvalidParameter(
            "model references a group effect but no group column is present".to_string(),
        )),
    }
}

/// Columns for one time term: a single numeric column, or reference-dropped
/// dummies for a factor time.
fn time_term_columns(tc: &TimeColumn, data: &LongTable) -> Result<Vec<(String, Vec<f64>)>> {
    match tc {
        TimeColumn::Basis(name) => {
            let col = data.basis_column(name).ok_or_else(|| {
                TcgsaError::MissingColumn(name.clone())
            })?;
            Ok(vec![(name.clone(), col.to_vec())])
        }
        TimeColumn::Factor(name) => {
            let (col_name, values) = data
                .time_factor
                .as_ref()
                .filter(|(n, _)| n == name)
                .ok_or_else(|| TcgsaError::MissingColumn(name.clone()))?;
            let levels = sorted_levels(values);
            Ok(dummy_columns(values, &levels, true, col_name))
        }
    }
}

/// Columns for one covariate: numeric passthrough or reference-dropped
/// dummies.
fn covariate_columns(name: &str, data: &LongTable) -> Result<Vec<(String, Vec<f64>)>> {
    match data.covariate(name) {
        Some(CovariateColumn::Numeric(v)) => Ok(vec![(name.to_string(), v.clone())]),
        Some(CovariateColumn::Categorical(v)) => {
            let levels = sorted_levels(v);
            Ok(dummy_columns(v, &levels, true, name))
        }
        None => Err(TcgsaError::MissingColumn(name.to_string())),
    }
}

fn product_columns(
    lhs: &[(String, Vec<f64>)],
    rhs: &[(String, Vec<f64>)],
) -> Vec<(String, Vec<f64>)> {
    let mut out = Vec::with_capacity(lhs.len() * rhs.len());
    for (ln, lv) in lhs {
        for (rn, rv) in rhs {
            let col: Vec<f64> = lv.iter().zip(rv).map(|(a, b)| a * b).collect();
            out.push((format!("{}:{}", ln, rn), col));
        }
    }
    out
}

/// Assemble the fixed-effect design matrix from a model specification.
pub fn build_fixed_matrix(
    spec: &ModelSpec,
    data: &LongTable,
) -> Result<(DMatrix<f64>, Vec<String>)> {
    let n = data.n_rows();
    let mut names: Vec<String> = Vec::new();
    let mut columns: Vec<Vec<f64>> = Vec::new();

    for term in &spec.fixed {
        let term_cols: Vec<(String, Vec<f64>)> = match term {
            FixedTerm::Intercept => vec![("(Intercept)".to_string(), vec![1.0; n])],
            FixedTerm::Probe => {
                dummy_columns(&data.probe, &data.probe_levels, true, "probe")
            }
            FixedTerm::Group => {
                let (values, levels) = group_values(data)?;
                dummy_columns(values, levels, true, "group")
            }
            FixedTerm::Covariate(name) => covariate_columns(name, data)?,
            FixedTerm::Time(tc) => time_term_columns(tc, data)?,
            FixedTerm::Interaction(tc, with) => {
                let lhs = time_term_columns(tc, data)?;
                let rhs = match with {
                    InteractWith::Group => {
                        let (values, levels) = group_values(data)?;
                        dummy_columns(values, levels, true, "group")
                    }
                    InteractWith::Covariate(name) => covariate_columns(name, data)?,
                };
                product_columns(&lhs, &rhs)
            }
        };
        for (name, col) in term_cols {
            names.push(name);
            columns.push(col);
        }
    }

    let mut matrix = DMatrix::zeros(n, columns.len());
    for (j, col) in columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            matrix[(i, j)] = v;
        }
    }
    Ok((matrix, names))
}

/// Per-row grouping labels for a random term.
fn grouping_labels(grouping: RandomGrouping, data: &LongTable) -> (Vec<String>, Vec<String>) {
    match grouping {
        RandomGrouping::Subject => (data.subject.clone(), data.subject_levels.clone()),
        RandomGrouping::Probe => (data.probe.clone(), data.probe_levels.clone()),
        RandomGrouping::SubjectProbe => {
            let labels: Vec<String> = data
                .subject
                .iter()
                .zip(&data.probe)
                .map(|(s, p)| format!("{}:{}", s, p))
                .collect();
            let levels = sorted_levels(&labels);
            (labels, levels)
        }
    }
}

/// Numeric slope columns for a random slope. Factor and group expansions
/// keep every level: random-effect blocks need no reference dropping.
fn random_slope_columns(slope: &RandomSlope, data: &LongTable) -> Result<Vec<Vec<f64>>> {
    let expand_time = |tc: &TimeColumn| -> Result<Vec<Vec<f64>>> {
        match tc {
            TimeColumn::Basis(name) => {
                let col = data
                    .basis_column(name)
                    .ok_or_else(|| TcgsaError::MissingColumn(name.clone()))?;
                Ok(vec![col.to_vec()])
            }
            TimeColumn::Factor(name) => {
                let (_, values) = data
                    .time_factor
                    .as_ref()
                    .filter(|(n, _)| n == name)
                    .ok_or_else(|| TcgsaError::MissingColumn(name.clone()))?;
                let levels = sorted_levels(values);
                Ok(dummy_columns(values, &levels, false, "")
                    .into_iter()
                    .map(|(_, c)| c)
                    .collect())
            }
        }
    };

    match slope {
        RandomSlope::Time(tc) => expand_time(tc),
        RandomSlope::TimeByGroup(tc) => {
            let time_cols = expand_time(tc)?;
            let (values, levels) = group_values(data)?;
            let group_cols: Vec<Vec<f64>> = dummy_columns(values, levels, false, "")
                .into_iter()
                .map(|(_, c)| c)
                .collect();
            let mut out = Vec::with_capacity(time_cols.len() * group_cols.len());
            for t in &time_cols {
                for g in &group_cols {
                    out.push(t.iter().zip(g).map(|(a, b)| a * b).collect());
                }
            }
            Ok(out)
        }
    }
}

/// Assemble one Z block per random term.
pub fn build_random_blocks(spec: &ModelSpec, data: &LongTable) -> Result<Vec<DMatrix<f64>>> {
    let n = data.n_rows();
    let mut blocks = Vec::with_capacity(spec.random.len());

    for term in &spec.random {
        blocks.push(build_random_block(term, data, n)?);
    }
    Ok(blocks)
}

fn build_random_block(term: &RandomTerm, data: &LongTable, n: usize) -> Result<DMatrix<f64>> {
    let (labels, levels) = grouping_labels(term.grouping, data);
    let level_index: std::collections::HashMap<&String, usize> =
        levels.iter().enumerate().map(|(i, l)| (l, i)).collect();
    let row_level: Vec<usize> = labels.iter().map(|l| level_index[l]).collect();

    let mut value_columns: Vec<Vec<f64>> = Vec::new();
    if term.intercept {
        value_columns.push(vec![1.0; n]);
    }
    for slope in &term.slopes {
        value_columns.extend(random_slope_columns(slope, data)?);
    }

    let n_levels = levels.len();
    let mut z = DMatrix::zeros(n, n_levels * value_columns.len());
    for (c, col) in value_columns.iter().enumerate() {
        for (i, &v) in col.iter().enumerate() {
            z[(i, c * n_levels + row_level[i])] = v;
        }
    }
    Ok(z)
}
