//! Assembly of per-task records into the final result structure.

use crate::analysis::fitter::{EstimationArray, FitStatistics, TaskOutcome};
use crate::data::GeneSetCollection;
use crate::error::Result;
use statrs::distribution::{ChiSquared, ContinuousCDF};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Reference p-value for a likelihood-ratio statistic against a chi-squared
/// distribution with `df` degrees of freedom.
///
/// The LR between the two hypotheses involves variance components, so this
/// reference distribution is conservative near the boundary; it is exposed
/// as a screening aid, not as the primary statistic.
pub fn lr_p_value(lr: f64, df: usize) -> f64 {
    if !lr.is_finite() || lr <= 0.0 || df == 0 {
        return 1.0;
    }
    match ChiSquared::new(df as f64) {
        Ok(chi2) => 1.0 - chi2.cdf(lr),
        Err(_) => 1.0,
    }
}

/// The fit table: one row per input gene set, in input order, NA rows
/// preserved.
#[derive(Debug, Clone)]
pub struct FitTable {
    /// Gene-set names, row order.
    pub gene_set_names: Vec<String>,
    /// Per-row statistics; `None` is the all-NA row.
    pub rows: Vec<Option<FitStatistics>>,
}

impl FitTable {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table is empty.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Statistics for one gene set, `None` for an NA row.
    pub fn get(&self, index: usize) -> Option<&FitStatistics> {
        self.rows.get(index).and_then(|r| r.as_ref())
    }

    /// LR per row, NaN for NA rows.
    pub fn lr_values(&self) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| r.as_ref().map_or(f64::NAN, |s| s.lr))
            .collect()
    }

    /// Number of NA rows.
    pub fn n_na(&self) -> usize {
        self.rows.iter().filter(|r| r.is_none()).count()
    }

    /// Chi-squared reference p-value per row, NaN for NA rows.
    pub fn p_values(&self, df: usize) -> Vec<f64> {
        self.rows
            .iter()
            .map(|r| r.as_ref().map_or(f64::NAN, |s| lr_p_value(s.lr, df)))
            .collect()
    }

    /// Write the table as TSV. NA rows render as `NA` in every column.
    pub fn to_tsv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);
        writeln!(
            writer,
            "gene_set\tLR\tAIC_H0\tAIC_H1\tBIC_H0\tBIC_H1\tCVG_H0\tCVG_H1"
        )?;
        for (name, row) in self.gene_set_names.iter().zip(&self.rows) {
            match row {
                Some(s) => writeln!(
                    writer,
                    "{}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{:.6}\t{}\t{}",
                    name, s.lr, s.aic_h0, s.aic_h1, s.bic_h0, s.bic_h1, s.cvg_h0, s.cvg_h1
                )?,
                None => writeln!(writer, "{}\tNA\tNA\tNA\tNA\tNA\tNA\tNA", name)?,
            }
        }
        writer.flush()?;
        Ok(())
    }

    /// Serialize rows to JSON, `null` standing in for NA rows.
    pub fn to_json(&self) -> Result<String> {
        let records: Vec<serde_json::Value> = self
            .gene_set_names
            .iter()
            .zip(&self.rows)
            .map(|(name, row)| {
                let mut value = serde_json::json!({ "gene_set": name });
                value["fit"] = match row {
                    Some(s) => serde_json::to_value(s)?,
                    None => serde_json::Value::Null,
                };
                Ok(value)
            })
            .collect::<Result<_>>()?;
        Ok(serde_json::to_string_pretty(&records)?)
    }
}

/// End-of-batch convergence counts for one hypothesis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceSummary {
    /// `"H0"` or `"H1"`.
    pub hypothesis: &'static str,
    /// Gene sets carrying a convergence code (non-NA rows).
    pub n_with_code: usize,
    /// Among those, fits that fully converged.
    pub n_converged: usize,
}

impl std::fmt::Display for ConvergenceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} gene sets with a convergence code, {} fully converged",
            self.hypothesis, self.n_with_code, self.n_converged
        )
    }
}

/// The complete batch result, covering every input gene set in input order.
#[derive(Debug, Clone)]
pub struct TcgsaResult {
    /// The 7-column fit table.
    pub fit: FitTable,
    /// Descriptor of the resolved time functional form.
    pub time_form: String,
    /// The gene-set definitions, passed through unchanged.
    pub gene_sets: GeneSetCollection,
    /// Group labels per design row, when grouping is configured.
    pub group: Option<Vec<String>>,
    /// Whether the alternative model separated subjects.
    pub separate_subjects: bool,
    /// One estimation array per gene set; `None` marks a skipped set.
    pub estimations: Vec<Option<EstimationArray>>,
    /// Spline degrees of freedom, spline time form only.
    pub spline_df: Option<usize>,
}

impl TcgsaResult {
    /// Convergence summaries for both hypotheses.
    pub fn convergence_summaries(&self) -> (ConvergenceSummary, ConvergenceSummary) {
        let mut h0 = ConvergenceSummary {
            hypothesis: "H0",
            n_with_code: 0,
            n_converged: 0,
        };
        let mut h1 = ConvergenceSummary {
            hypothesis: "H1",
            n_with_code: 0,
            n_converged: 0,
        };
        for stats in self.fit.rows.iter().flatten() {
            h0.n_with_code += 1;
            h1.n_with_code += 1;
            if stats.cvg_h0.is_converged() {
                h0.n_converged += 1;
            }
            if stats.cvg_h1.is_converged() {
                h1.n_converged += 1;
            }
        }
        (h0, h1)
    }
}

/// Merge ordered task records into the final result.
///
/// `outcomes` must already be in gene-set index order; the scheduler
/// guarantees that.
pub fn aggregate(
    outcomes: Vec<TaskOutcome>,
    gene_sets: GeneSetCollection,
    time_form: String,
    group: Option<Vec<String>>,
    separate_subjects: bool,
    spline_df: Option<usize>,
) -> TcgsaResult {
    let mut gene_set_names = Vec::with_capacity(outcomes.len());
    let mut rows = Vec::with_capacity(outcomes.len());
    let mut estimations = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        gene_set_names.push(outcome.gene_set_name);
        rows.push(outcome.stats);
        estimations.push(outcome.estimation);
    }

    TcgsaResult {
        fit: FitTable {
            gene_set_names,
            rows,
        },
        time_form,
        gene_sets,
        group,
        separate_subjects,
        estimations,
        spline_df,
    }
}
