//! Analysis configuration: model structure, covariates, size bounds, workers.

use crate::error::{Result, TcgsaError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How the batch is dispatched across workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParallelBackend {
    /// Bounded thread pool sized to `n_workers`.
    Threads,
    /// Strictly sequential execution on the calling thread.
    Sequential,
}

/// Configuration for a time-course gene set analysis run.
///
/// Defaults follow the conventional clinical-trial layout: subjects in a
/// `Patient_ID` column, sampling times in `TimePoint`, a linear time trend,
/// and gene sets between 10 and 500 genes.
///
/// # Example
/// ```
/// use timecourse_gsa::config::AnalysisConfig;
///
/// let config = AnalysisConfig::new()
///     .with_time_form("splines")
///     .with_group_var("Treatment")
///     .with_workers(4);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Design-table column holding the subject identifier.
    pub subject_var: String,
    /// Design-table column holding the (numeric) sampling time.
    pub time_var: String,
    /// Cross subject and probe into a single random intercept keyed by the
    /// (subject, probe) combination instead of two independent intercepts.
    pub crossed_random: bool,
    /// Covariates entering every model as fixed main effects.
    pub fixed_covariates: Vec<String>,
    /// Covariates interacting with every component of the time term.
    pub time_covariates: Vec<String>,
    /// Time functional form: `"linear"`, `"cubic"`, `"splines"`, a
    /// design-table factor column name, or an algebraic expression over
    /// design columns (`+`, `*`, `/`).
    pub time_form: String,
    /// Group variable for testing group-dependent time trends. Mutually
    /// exclusive with `separate_subjects`.
    pub group_var: Option<String>,
    /// Key the alternative model's random time slope by subject instead of
    /// by probe, detecting subject-heterogeneous trends.
    pub separate_subjects: bool,
    /// Smallest gene-set size analyzed, after intersection (inclusive).
    pub min_gs_size: usize,
    /// Largest gene-set size analyzed, after intersection (inclusive).
    pub max_gs_size: usize,
    /// Worker pool size for the `Threads` backend.
    pub n_workers: usize,
    /// Dispatch strategy.
    pub backend: ParallelBackend,
    /// Progress-sink file; `None` disables monitoring.
    pub monitor_file: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            subject_var: "Patient_ID".to_string(),
            time_var: "TimePoint".to_string(),
            crossed_random: false,
            fixed_covariates: Vec::new(),
            time_covariates: Vec::new(),
            time_form: "linear".to_string(),
            group_var: None,
            separate_subjects: false,
            min_gs_size: 10,
            max_gs_size: 500,
            n_workers: 1,
            backend: ParallelBackend::Threads,
            monitor_file: None,
        }
    }
}

impl AnalysisConfig {
    /// Create a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the subject identifier column.
    pub fn with_subject_var(mut self, name: &str) -> Self {
        self.subject_var = name.to_string();
        self
    }

    /// Set the time column.
    pub fn with_time_var(mut self, name: &str) -> Self {
        self.time_var = name.to_string();
        self
    }

    /// Use a crossed (subject, probe) random intercept.
    pub fn with_crossed_random(mut self, crossed: bool) -> Self {
        self.crossed_random = crossed;
        self
    }

    /// Add fixed-effect covariates.
    pub fn with_fixed_covariates(mut self, names: &[&str]) -> Self {
        self.fixed_covariates = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Add covariates interacting with the time term.
    pub fn with_time_covariates(mut self, names: &[&str]) -> Self {
        self.time_covariates = names.iter().map(|s| s.to_string()).collect();
        self
    }

    /// Set the time functional form.
    pub fn with_time_form(mut self, form: &str) -> Self {
        self.time_form = form.to_string();
        self
    }

    /// Set the group variable.
    pub fn with_group_var(mut self, name: &str) -> Self {
        self.group_var = Some(name.to_string());
        self
    }

    /// Key the random time slope by subject instead of by probe.
    pub fn with_separate_subjects(mut self, separate: bool) -> Self {
        self.separate_subjects = separate;
        self
    }

    /// Set inclusive gene-set size bounds.
    pub fn with_gs_size_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_gs_size = min;
        self.max_gs_size = max;
        self
    }

    /// Set the worker pool size.
    pub fn with_workers(mut self, n: usize) -> Self {
        self.n_workers = n;
        self
    }

    /// Set the dispatch backend.
    pub fn with_backend(mut self, backend: ParallelBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Enable progress monitoring to a file.
    pub fn with_monitor_file<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.monitor_file = Some(path.into());
        self
    }

    /// Validate the configuration before any work starts.
    ///
    /// A group variable and subject separation are contradictory requests
    /// (grouped trends are population-level, subject separation is
    /// per-subject) and are rejected here, not mid-batch.
    pub fn validate(&self) -> Result<()> {
        if self.group_var.is_some() && self.separate_subjects {
            return Err(TcgsaError::ConflictingConfig(
                "a group variable cannot be combined with subject separation".to_string(),
            ));
        }
        if self.min_gs_size > self.max_gs_size {
            return Err(TcgsaError::InvalidParameter(format!(
                "min_gs_size ({}) exceeds max_gs_size ({})",
                self.min_gs_size, self.max_gs_size
            )));
        }
        if self.n_workers == 0 {
            return Err(TcgsaError::InvalidParameter(
                "worker count must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load from YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).map_err(TcgsaError::from)
    }

    /// Save to YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(TcgsaError::from)
    }
}
