//! Per-gene-set fitting task: intersect, reshape, fit both hypotheses,
//! extract diagnostics, pivot fitted values.

use crate::config::AnalysisConfig;
use crate::data::{DesignTable, ExpressionMatrix, GeneSet};
use crate::error::Result;
use crate::model::backend::{ConvergenceCode, FittedModel, LikelihoodMode, MixedModelBackend};
use crate::model::spec::ModelSpecs;
use crate::reshape::basis::TimeBasisPlan;
use crate::reshape::long::{reshape_long, LongTable};
use ndarray::Array3;
use serde::{Deserialize, Serialize};

/// Fit diagnostics for one gene set. Present only when both hypotheses
/// fitted; a convergence code is therefore only meaningful alongside the LR.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitStatistics {
    /// Deviance(H0) − deviance(H1).
    pub lr: f64,
    pub aic_h0: f64,
    pub aic_h1: f64,
    pub bic_h0: f64,
    pub bic_h1: f64,
    pub cvg_h0: ConvergenceCode,
    pub cvg_h1: ConvergenceCode,
}

/// Fitted expression under H1, indexed by gene × subject × time.
///
/// The time axis carries the distinct sorted time levels of the full design
/// table; (gene, subject, time) combinations with no observation stay NaN.
#[derive(Debug, Clone)]
pub struct EstimationArray {
    pub values: Array3<f64>,
    /// Gene ids along axis 0, in retained order.
    pub gene_ids: Vec<String>,
    /// Subject levels along axis 1, sorted.
    pub subjects: Vec<String>,
    /// Time levels along axis 2, sorted ascending.
    pub times: Vec<f64>,
}

impl EstimationArray {
    /// An all-NaN array with the intended shape, used when a fit failed.
    pub fn nan_shaped(gene_ids: Vec<String>, subjects: Vec<String>, times: Vec<f64>) -> Self {
        let values = Array3::from_elem((gene_ids.len(), subjects.len(), times.len()), f64::NAN);
        Self {
            values,
            gene_ids,
            subjects,
            times,
        }
    }

    /// Shape as (genes, subjects, times).
    pub fn shape(&self) -> (usize, usize, usize) {
        let s = self.values.shape();
        (s[0], s[1], s[2])
    }
}

/// The record one task returns: the statistics (or None for a skipped or
/// failed gene set) and the estimation array (None only when skipped).
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub index: usize,
    pub gene_set_name: String,
    pub stats: Option<FitStatistics>,
    pub estimation: Option<EstimationArray>,
}

impl TaskOutcome {
    fn skipped(index: usize, name: &str) -> Self {
        Self {
            index,
            gene_set_name: name.to_string(),
            stats: None,
            estimation: None,
        }
    }
}

/// Distinct sorted time levels of the full design table.
pub fn design_time_levels(design: &DesignTable, time_var: &str) -> Result<Vec<f64>> {
    let mut times = design.numeric_column(time_var)?;
    times.sort_by(|a, b| a.partial_cmp(b).unwrap());
    times.dedup();
    Ok(times)
}

/// Run the analysis task for one gene set.
///
/// Never fails the batch: any skip or fit failure degrades this gene set's
/// row to NA and emits an informational diagnostic naming it.
#[allow(clippy::too_many_arguments)]
pub fn fit_gene_set(
    index: usize,
    gene_set: &GeneSet,
    expr: &ExpressionMatrix,
    design: &DesignTable,
    config: &AnalysisConfig,
    specs: &ModelSpecs,
    plan: &TimeBasisPlan,
    backend: &dyn MixedModelBackend,
) -> TaskOutcome {
    let name = &gene_set.name;

    // Intersect with the genes actually present, keeping definition order.
    let retained: Vec<String> = gene_set
        .genes
        .iter()
        .filter(|g| expr.has_gene(g))
        .cloned()
        .collect();
    let n_retained = retained.len();

    if n_retained == 0 || n_retained < config.min_gs_size || n_retained > config.max_gs_size {
        eprintln!(
            "gene set '{}' skipped: {} genes after intersection, outside [{}, {}]",
            name, n_retained, config.min_gs_size, config.max_gs_size
        );
        return TaskOutcome::skipped(index, name);
    }

    let subjects = match design.levels(&config.subject_var) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("gene set '{}' failed: {}", name, e);
            return TaskOutcome::skipped(index, name);
        }
    };
    let times = match design_time_levels(design, &config.time_var) {
        Ok(t) => t,
        Err(e) => {
            eprintln!("gene set '{}' failed: {}", name, e);
            return TaskOutcome::skipped(index, name);
        }
    };
    let failed = |reason: &str| {
        eprintln!("gene set '{}' failed: {}", name, reason);
        TaskOutcome {
            index,
            gene_set_name: name.to_string(),
            stats: None,
            estimation: Some(EstimationArray::nan_shaped(
                retained.clone(),
                subjects.clone(),
                times.clone(),
            )),
        }
    };

    let subset = match expr.subset_genes(&retained) {
        Ok(s) => s,
        Err(e) => return failed(&e.to_string()),
    };
    let long = match reshape_long(&subset, design, config, plan) {
        Ok(l) => l,
        Err(e) => return failed(&e.to_string()),
    };

    let pair = specs.variant(n_retained);

    // Each hypothesis is independently fault-isolated; a failure on either
    // side discards the other side's partial result.
    let h0 = backend.fit(&pair.h0, &long, LikelihoodMode::Ml).ok();
    let h1 = backend.fit(&pair.h1, &long, LikelihoodMode::Ml).ok();

    let (h0, h1) = match (h0, h1) {
        (Some(h0), Some(h1)) => (h0, h1),
        (None, _) => return failed("null model did not fit"),
        (_, None) => return failed("alternative model did not fit"),
    };

    let stats = FitStatistics {
        lr: h0.deviance - h1.deviance,
        aic_h0: h0.aic,
        aic_h1: h1.aic,
        bic_h0: h0.bic,
        bic_h1: h1.bic,
        cvg_h0: h0.convergence,
        cvg_h1: h1.convergence,
    };
    let estimation = pivot_fitted(&h1, &long, retained, subjects, times);

    TaskOutcome {
        index,
        gene_set_name: name.to_string(),
        stats: Some(stats),
        estimation: Some(estimation),
    }
}

/// Pivot per-row H1 fitted values into the gene × subject × time array.
fn pivot_fitted(
    model: &FittedModel,
    long: &LongTable,
    gene_ids: Vec<String>,
    subjects: Vec<String>,
    times: Vec<f64>,
) -> EstimationArray {
    let mut array = EstimationArray::nan_shaped(gene_ids, subjects, times);

    for (i, &value) in model.fitted.iter().enumerate() {
        let g = array.gene_ids.iter().position(|g| *g == long.probe[i]);
        let s = array.subjects.iter().position(|s| *s == long.subject[i]);
        let t = array.times.iter().position(|&t| t == long.time[i]);
        if let (Some(g), Some(s), Some(t)) = (g, s, t) {
            array.values[(g, s, t)] = value;
        }
    }
    array
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Variable;
    use crate::model::ml::MlBackend;
    use crate::model::spec::build_model_specs;
    use crate::reshape::basis::TimeForm;
    use nalgebra::DMatrix;

    /// 4 subjects × 3 time points.
    fn test_design() -> DesignTable {
        let mut sample_ids = Vec::new();
        let mut subject = Vec::new();
        let mut time = Vec::new();
        for (si, s) in ["P1", "P2", "P3", "P4"].iter().enumerate() {
            for t in [0.0, 7.0, 14.0] {
                sample_ids.push(format!("S{}_{}", si, t as i64));
                subject.push(Variable::Categorical(s.to_string()));
                time.push(Variable::Continuous(t));
            }
        }
        DesignTable::from_columns(
            sample_ids,
            vec![
                ("Patient_ID".to_string(), subject),
                ("TimePoint".to_string(), time),
            ],
        )
        .unwrap()
    }

    fn test_expression(design: &DesignTable, n_genes: usize) -> ExpressionMatrix {
        let times = design.numeric_column("TimePoint").unwrap();
        let mut values = Vec::new();
        let mut seed = 11u64;
        let mut noise = || {
            seed = seed
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            ((seed >> 33) as f64 / u32::MAX as f64 - 0.5) * 0.2
        };
        for g in 0..n_genes {
            for &t in &times {
                values.push(4.0 + g as f64 * 0.2 + 0.3 * t + noise());
            }
        }
        let data = DMatrix::from_row_slice(n_genes, times.len(), &values);
        let gene_ids: Vec<String> = (0..n_genes).map(|g| format!("g{}", g)).collect();
        ExpressionMatrix::new(data, gene_ids, design.sample_ids().to_vec()).unwrap()
    }

    fn run_one(gene_set: &GeneSet, config: &AnalysisConfig) -> TaskOutcome {
        let design = test_design();
        let expr = test_expression(&design, 5);
        let form = TimeForm::resolve(&config.time_form, &design);
        let plan = TimeBasisPlan::new(&design, &config.time_var, form).unwrap();
        let specs = build_model_specs(config, &plan).unwrap();
        let backend = MlBackend::new();
        fit_gene_set(0, gene_set, &expr, &design, config, &specs, &plan, &backend)
    }

    #[test]
    fn test_fit_within_bounds() {
        let config = AnalysisConfig::new().with_gs_size_bounds(2, 10);
        let gs = GeneSet::new("trend_set", &["g0", "g1", "g2"]);
        let outcome = run_one(&gs, &config);

        let stats = outcome.stats.expect("should fit");
        assert!(stats.lr.is_finite());
        let est = outcome.estimation.expect("should estimate");
        assert_eq!(est.shape(), (3, 4, 3));
        assert_eq!(est.times, vec![0.0, 7.0, 14.0]);
        // Every (gene, subject, time) cell is observed in this design.
        assert!(est.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_size_gate_below_min() {
        let config = AnalysisConfig::new().with_gs_size_bounds(4, 10);
        let gs = GeneSet::new("too_small", &["g0", "g1"]);
        let outcome = run_one(&gs, &config);

        assert!(outcome.stats.is_none());
        assert!(outcome.estimation.is_none());
        assert_eq!(outcome.gene_set_name, "too_small");
    }

    #[test]
    fn test_size_gate_boundary_inclusive() {
        let config = AnalysisConfig::new().with_gs_size_bounds(3, 3);
        let gs = GeneSet::new("exact", &["g0", "g1", "g2"]);
        assert!(run_one(&gs, &config).stats.is_some());
    }

    #[test]
    fn test_intersection_drops_absent_genes() {
        // 4 listed genes but only 2 present: below a min of 3.
        let config = AnalysisConfig::new().with_gs_size_bounds(3, 10);
        let gs = GeneSet::new("ghosts", &["g0", "g1", "nope_a", "nope_b"]);
        assert!(run_one(&gs, &config).stats.is_none());
    }

    #[test]
    fn test_empty_intersection_skipped() {
        let config = AnalysisConfig::new().with_gs_size_bounds(0, 10);
        let gs = GeneSet::new("absent", &["nope_a", "nope_b"]);
        let outcome = run_one(&gs, &config);
        assert!(outcome.stats.is_none());
        assert!(outcome.estimation.is_none());
    }

    #[test]
    fn test_single_gene_uses_single_variant() {
        let config = AnalysisConfig::new().with_gs_size_bounds(1, 10);
        let gs = GeneSet::new("lone", &["g0"]);
        let outcome = run_one(&gs, &config);

        let stats = outcome.stats.expect("single-gene set should fit");
        assert!(stats.lr.is_finite());
        assert_eq!(outcome.estimation.unwrap().shape(), (1, 4, 3));
    }

    #[test]
    fn test_lr_positive_with_strong_trend() {
        let config = AnalysisConfig::new().with_gs_size_bounds(2, 10);
        let gs = GeneSet::new("trend_set", &["g0", "g1", "g2", "g3"]);
        let stats = run_one(&gs, &config).stats.unwrap();
        assert!(
            stats.lr >= 0.0,
            "H1 nests H0, so LR must be nonnegative, got {}",
            stats.lr
        );
    }
}
