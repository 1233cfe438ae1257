//! Wide-to-long reshaping: one observation row per (gene, sample).

use crate::config::AnalysisConfig;
use crate::data::{DesignTable, ExpressionMatrix, VariableType};
use crate::error::{Result, TcgsaError};
use crate::reshape::basis::{TimeBasisPlan, TimeForm};
use std::collections::HashSet;

/// A covariate column carried into the long table, typed like the design
/// column it came from.
#[derive(Debug, Clone, PartialEq)]
pub enum CovariateColumn {
    Numeric(Vec<f64>),
    Categorical(Vec<String>),
}

/// Long-format observation table for one gene set.
///
/// Row order is gene-major: all samples of the first retained gene, then all
/// samples of the second, and so on. Construction depends only on the gene
/// list, the design table, and the basis plan, so two tasks given the same
/// inputs produce identical tables.
#[derive(Debug, Clone)]
pub struct LongTable {
    /// Gene identity per row, carried as a categorical probe column.
    pub probe: Vec<String>,
    /// Distinct probe levels, sorted.
    pub probe_levels: Vec<String>,
    /// Response value per row.
    pub expression: Vec<f64>,
    /// Subject label per row.
    pub subject: Vec<String>,
    /// Distinct subject levels, sorted.
    pub subject_levels: Vec<String>,
    /// Numeric time value per row.
    pub time: Vec<f64>,
    /// Group label per row, when grouping is configured.
    pub group: Option<Vec<String>>,
    /// Distinct group levels, sorted.
    pub group_levels: Option<Vec<String>>,
    /// Covariate columns by name.
    pub covariates: Vec<(String, CovariateColumn)>,
    /// Numeric time-basis columns by name (`t1`..`t3`, `ns*`, expression
    /// components).
    pub basis: Vec<(String, Vec<f64>)>,
    /// Categorical time column for the factor time form.
    pub time_factor: Option<(String, Vec<String>)>,
}

impl LongTable {
    /// Number of observation rows.
    pub fn n_rows(&self) -> usize {
        self.probe.len()
    }

    /// Number of retained genes.
    pub fn n_probes(&self) -> usize {
        self.probe_levels.len()
    }

    /// Look up a numeric basis column by name.
    pub fn basis_column(&self, name: &str) -> Option<&[f64]> {
        self.basis
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Look up a covariate column by name.
    pub fn covariate(&self, name: &str) -> Option<&CovariateColumn> {
        self.covariates
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }
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

/// Reshape a gene-set expression submatrix and design table into long form.
///
/// The expression matrix must already be restricted to the gene set's
/// retained genes and its columns must align with the design rows.
pub fn reshape_long(
    expr: &ExpressionMatrix,
    design: &DesignTable,
    config: &AnalysisConfig,
    plan: &TimeBasisPlan,
) -> Result<LongTable> {
    let n_samples = design.n_samples();
    if expr.n_samples() != n_samples {
        return Err(TcgsaError::DimensionMismatch {
            expected: n_samples,
            actual: expr.n_samples(),
        });
    }
    if expr.sample_ids() != design.sample_ids() {
        return Err(TcgsaError::SampleMismatch(
            "expression columns and design rows disagree".to_string(),
        ));
    }

    let n_genes = expr.n_genes();
    let n_rows = n_genes * n_samples;

    // Per-sample identifier columns, replicated per gene below.
    let subject_wide = design.label_column(&config.subject_var)?;
    let time_wide = design.numeric_column(&config.time_var)?;
    let group_wide = match &config.group_var {
        Some(g) => Some(design.label_column(g)?),
        None => None,
    };

    // Covariates: fixed, time-interacting, and any design variables a user
    // time expression references, minus the columns already carried.
    let mut covariate_names: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    seen.insert(config.subject_var.clone());
    seen.insert(config.time_var.clone());
    if let Some(g) = &config.group_var {
        seen.insert(g.clone());
    }
    for name in config
        .fixed_covariates
        .iter()
        .chain(config.time_covariates.iter())
        .cloned()
        .chain(plan.expression_variables())
    {
        if !name.is_empty() && seen.insert(name.clone()) {
            covariate_names.push(name);
        }
    }

    let mut covariates_wide: Vec<(String, CovariateColumn)> = Vec::new();
    for name in &covariate_names {
        let column = match design.column_type(name) {
            Some(VariableType::Continuous) | Some(VariableType::Ordinal) => {
                CovariateColumn::Numeric(design.numeric_column(name)?)
            }
            Some(VariableType::Categorical) => {
                CovariateColumn::Categorical(design.label_column(name)?)
            }
            None => return Err(TcgsaError::MissingColumn(name.clone())),
        };
        covariates_wide.push((name.clone(), column));
    }

    let basis_wide = plan.evaluate(design, &config.time_var)?;
    let time_factor_wide = match plan.time_form() {
        TimeForm::Factor(col) => Some((col.clone(), design.label_column(col)?)),
        _ => None,
    };

    // Gene-major melt.
    let mut probe = Vec::with_capacity(n_rows);
    let mut expression = Vec::with_capacity(n_rows);
    let mut subject = Vec::with_capacity(n_rows);
    let mut time = Vec::with_capacity(n_rows);
    let mut group = group_wide.as_ref().map(|_| Vec::with_capacity(n_rows));
    let mut covariates: Vec<(String, CovariateColumn)> = covariates_wide
        .iter()
        .map(|(n, c)| {
            let empty = match c {
                CovariateColumn::Numeric(_) => CovariateColumn::Numeric(Vec::with_capacity(n_rows)),
                CovariateColumn::Categorical(_) => {
                    CovariateColumn::Categorical(Vec::with_capacity(n_rows))
                }
            };
            (n.clone(), empty)
        })
        .collect();
    let mut basis: Vec<(String, Vec<f64>)> = basis_wide
        .iter()
        .map(|(n, _)| (n.clone(), Vec::with_capacity(n_rows)))
        .collect();
    let mut time_factor = time_factor_wide
        .as_ref()
        .map(|(n, _)| (n.clone(), Vec::with_capacity(n_rows)));

    for g in 0..n_genes {
        let gene_id = &expr.gene_ids()[g];
        let row = expr.row(g);
        for s in 0..n_samples {
            probe.push(gene_id.clone());
            expression.push(row[s]);
            subject.push(subject_wide[s].clone());
            time.push(time_wide[s]);
            if let (Some(long), Some(wide)) = (group.as_mut(), group_wide.as_ref()) {
                long.push(wide[s].clone());
            }
            for ((_, long), (_, wide)) in covariates.iter_mut().zip(&covariates_wide) {
                match (long, wide) {
                    (CovariateColumn::Numeric(l), CovariateColumn::Numeric(w)) => l.push(w[s]),
                    (CovariateColumn::Categorical(l), CovariateColumn::Categorical(w)) => {
                        l.push(w[s].clone())
                    }
                    _ => unreachable!("covariate column type changed during melt"),
                }
            }
            for ((_, long), (_, wide)) in basis.iter_mut().zip(&basis_wide) {
                long.push(wide[s]);
            }
            if let (Some((_, long)), Some((_, wide))) =
                (time_factor.as_mut(), time_factor_wide.as_ref())
            {
                long.push(wide[s].clone());
            }
        }
    }

    let probe_levels = sorted_levels(&probe);
    let subject_levels = sorted_levels(&subject);
    let group_levels = group.as_ref().map(|g| sorted_levels(g));

    Ok(LongTable {
        probe,
        probe_levels,
        expression,
        subject,
        subject_levels,
        time,
        group,
        group_levels,
        covariates,
        basis,
        time_factor,
    })
}
