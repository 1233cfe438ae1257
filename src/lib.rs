//! Time-Course Gene Set Analysis
//!
//! This library tests gene sets for time trends in longitudinal expression
//! data. For each gene set it fits two nested mixed-effects models (a null
//! model with no time trend and an alternative allowing one, possibly
//! heterogeneous across subjects or groups) and derives a likelihood-ratio
//! statistic, information criteria, and per-gene fitted trajectories.
//!
//! # Overview
//!
//! The library is organized into composable modules:
//!
//! - **data**: Core data structures (ExpressionMatrix, DesignTable, GeneSet)
//! - **config**: Analysis configuration and entry-time validation
//! - **reshape**: Time-basis construction and wide-to-long reshaping
//! - **model**: Declarative model specifications and the mixed-model backend
//! - **analysis**: Per-gene-set fitting, parallel dispatch, progress
//!   monitoring, and result aggregation
//!
//! Gene sets are analyzed independently, one task per set, across a bounded
//! worker pool; results always come back in input order regardless of
//! completion order.
//!
//! # Example
//!
//! ```no_run
//! use timecourse_gsa::prelude::*;
//!
//! // Load data
//! let expr = ExpressionMatrix::from_tsv("expression.tsv").unwrap();
//! let design = DesignTable::from_tsv("design.tsv").unwrap();
//! let gene_sets = GeneSetCollection::new(vec![
//!     GeneSet::new("pathway_a", &["TNF", "IL6", "IL1B"]),
//! ]);
//!
//! // Run the batch analysis
//! let config = AnalysisConfig::new()
//!     .with_time_form("splines")
//!     .with_workers(4);
//! let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();
//!
//! println!("LR per gene set: {:?}", result.fit.lr_values());
//! ```

pub mod analysis;
pub mod config;
pub mod data;
pub mod error;
pub mod model;
pub mod reshape;

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::analysis::{
        aggregate, fit_gene_set, lr_p_value, run_analysis, run_analysis_default, run_tasks,
        ConvergenceSummary, EstimationArray, FitStatistics, FitTable, ProgressMonitor,
        TaskOutcome, TcgsaResult,
    };
    pub use crate::config::{AnalysisConfig, ParallelBackend};
    pub use crate::data::{
        DesignTable, ExpressionMatrix, GeneSet, GeneSetCollection, Variable, VariableType,
    };
    pub use crate::error::{Result, TcgsaError};
    pub use crate::model::{
        build_model_specs, ConvergenceCode, FittedModel, FixedTerm, GroupingMode,
        HypothesisPair, InteractWith, LikelihoodMode, MixedModelBackend, MlBackend, MlConfig,
        ModelSpec, ModelSpecs, RandomGrouping, RandomSlope, RandomStructure, RandomTerm,
        TimeColumn,
    };
    pub use crate::reshape::{
        parse_time_expression, reshape_long, CovariateColumn, LongTable, TimeBasisPlan, TimeForm,
    };
}
