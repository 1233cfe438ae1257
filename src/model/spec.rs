//! Declarative mixed-model specifications for the null and alternative
//! hypotheses.
//!
//! Model selection is a total lookup over the random-effect structure and
//! the grouping mode; the result is a value object the fitting backend
//! consumes directly, with no textual formula syntax in between.

use crate::config::AnalysisConfig;
use crate::error::{Result, TcgsaError};
use crate::reshape::basis::{TimeBasisPlan, TimeForm};
use serde::{Deserialize, Serialize};

/// How subject and probe random intercepts are arranged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomStructure {
    /// One random intercept keyed by the (subject, probe) combination.
    Crossed,
    /// Independent random intercepts for probe and for subject.
    Separate,
}

/// How the time trend is allowed to vary across the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupingMode {
    /// Homogeneous trend; random time slope keyed by probe.
    None,
    /// Subject-heterogeneous trend; random time slope keyed by subject.
    SeparateSubjects,
    /// Group-dependent trend; the LR tests the time-by-group interaction.
    Grouped,
}

impl GroupingMode {
    /// Derive the grouping mode from a configuration.
    ///
    /// A group variable together with subject separation is contradictory
    /// and rejected here as well as at entry validation.
    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        match (&config.group_var, config.separate_subjects) {
            (Some(_), true) => Err(TcgsaError::ConflictingConfig(
                "a group variable cannot be combined with subject separation".to_string(),
            )),
            (Some(_), false) => Ok(GroupingMode::Grouped),
            (None, true) => Ok(GroupingMode::SeparateSubjects),
            (None, false) => Ok(GroupingMode::None),
        }
    }
}

/// A time term column: numeric basis column or categorical factor column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeColumn {
    /// Numeric time-basis column (`t1`, `ns2`, an expression component, ...).
    Basis(String),
    /// Categorical design column used as discrete time.
    Factor(String),
}

impl TimeColumn {
    /// Column name in the long table.
    pub fn name(&self) -> &str {
        match self {
            TimeColumn::Basis(n) | TimeColumn::Factor(n) => n,
        }
    }
}

/// What a time term interacts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InteractWith {
    /// The configured group variable.
    Group,
    /// A time covariate, by name.
    Covariate(String),
}

/// A fixed-effect term.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FixedTerm {
    Intercept,
    /// Gene identity as a categorical factor (multi-probe variants only).
    Probe,
    /// The configured group variable as a categorical factor.
    Group,
    /// A fixed covariate, by design-column name.
    Covariate(String),
    /// A time term.
    Time(TimeColumn),
    /// A time term crossed with the group or a time covariate.
    Interaction(TimeColumn, InteractWith),
}

/// What a random effect is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomGrouping {
    Subject,
    Probe,
    /// The (subject, probe) combination.
    SubjectProbe,
}

/// A random slope column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RandomSlope {
    /// Slope on a time term.
    Time(TimeColumn),
    /// Slope on the time-by-group product (grouped cells).
    TimeByGroup(TimeColumn),
}

/// One random-effect term: an intercept and/or slopes, keyed by a grouping.
///
/// Each term contributes one variance component shared by its columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RandomTerm {
    pub intercept: bool,
    pub slopes: Vec<RandomSlope>,
    pub grouping: RandomGrouping,
}

impl RandomTerm {
    fn intercept_for(grouping: RandomGrouping) -> Self {
        Self {
            intercept: true,
            slopes: Vec::new(),
            grouping,
        }
    }

    fn slopes_for(slopes: Vec<RandomSlope>, grouping: RandomGrouping) -> Self {
        Self {
            intercept: false,
            slopes,
            grouping,
        }
    }
}

/// A complete mixed-model specification. The response is always the
/// long-table expression column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSpec {
    pub fixed: Vec<FixedTerm>,
    pub random: Vec<RandomTerm>,
}

/// The (H0, H1) pair for one probe-count variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HypothesisPair {
    pub h0: ModelSpec,
    pub h1: ModelSpec,
}

/// The full specification set for one configuration: an (H0, H1) pair for
/// gene sets retaining more than one gene and one for exactly one gene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSpecs {
    pub multi: HypothesisPair,
    pub single: HypothesisPair,
    /// Names of the numeric time-term columns, in model order.
    pub time_columns: Vec<String>,
    /// Spline degrees of freedom, spline time form only.
    pub spline_df: Option<usize>,
    /// Descriptor of the resolved time form, carried into the result.
    pub time_form: TimeForm,
}

impl ModelSpecs {
    /// Select the variant for a gene set retaining `n_genes` genes.
    pub fn variant(&self, n_genes: usize) -> &HypothesisPair {
        if n_genes > 1 {
            &self.multi
        } else {
            &self.single
        }
    }
}

/// Build both hypothesis pairs from a configuration and a basis plan.
///
/// Pure: identical inputs always produce identical specifications.
pub fn build_model_specs(config: &AnalysisConfig, plan: &TimeBasisPlan) -> Result<ModelSpecs> {
    let structure = if config.crossed_random {
        RandomStructure::Crossed
    } else {
        RandomStructure::Separate
    };
    let mode = GroupingMode::from_config(config)?;

    let time_cols: Vec<TimeColumn> = match plan.time_form() {
        TimeForm::Factor(col) => vec![TimeColumn::Factor(col.clone())],
        _ => plan
            .term_columns()
            .into_iter()
            .map(TimeColumn::Basis)
            .collect(),
    };

    let multi = build_pair(config, structure, mode, &time_cols, true);
    let single = build_pair(config, structure, mode, &time_cols, false);

    Ok(ModelSpecs {
        multi,
        single,
        time_columns: plan.term_columns(),
        spline_df: plan.spline_df(),
        time_form: plan.time_form().clone(),
    })
}

fn base_random(structure: RandomStructure, multi: bool) -> Vec<RandomTerm> {
    if !multi {
        // With a single probe there is nothing to cross or separate.
        return vec![RandomTerm::intercept_for(RandomGrouping::Subject)];
    }
    match structure {
        RandomStructure::Crossed => {
            vec![RandomTerm::intercept_for(RandomGrouping::SubjectProbe)]
        }
        RandomStructure::Separate => vec![
            RandomTerm::intercept_for(RandomGrouping::Probe),
            RandomTerm::intercept_for(RandomGrouping::Subject),
        ],
    }
}

fn slope_grouping(mode: GroupingMode, multi: bool) -> RandomGrouping {
    match mode {
        GroupingMode::SeparateSubjects => RandomGrouping::Subject,
        _ => {
            if multi {
                RandomGrouping::Probe
            } else {
                RandomGrouping::Subject
            }
        }
    }
}

fn build_pair(
    config: &AnalysisConfig,
    structure: RandomStructure,
    mode: GroupingMode,
    time_cols: &[TimeColumn],
    multi: bool,
) -> HypothesisPair {
    let mut fixed_base = vec![FixedTerm::Intercept];
    if multi {
        fixed_base.push(FixedTerm::Probe);
    }
    for cov in &config.fixed_covariates {
        fixed_base.push(FixedTerm::Covariate(cov.clone()));
    }

    let time_fixed: Vec<FixedTerm> = time_cols
        .iter()
        .flat_map(|c| {
            std::iter::once(FixedTerm::Time(c.clone())).chain(
                config
                    .time_covariates
                    .iter()
                    .map(|cov| FixedTerm::Interaction(c.clone(), InteractWith::Covariate(cov.clone()))),
            )
        })
        .collect();

    let random_base = base_random(structure, multi);
    let grouping = slope_grouping(mode, multi);

    match mode {
        GroupingMode::None | GroupingMode::SeparateSubjects => {
            let h0 = ModelSpec {
                fixed: fixed_base.clone(),
                random: random_base.clone(),
            };

            let mut h1_fixed = fixed_base;
            h1_fixed.extend(time_fixed);
            let mut h1_random = random_base;
            h1_random.push(RandomTerm::slopes_for(
                time_cols.iter().cloned().map(RandomSlope::Time).collect(),
                grouping,
            ));
            let h1 = ModelSpec {
                fixed: h1_fixed,
                random: h1_random,
            };
            HypothesisPair { h0, h1 }
        }
        GroupingMode::Grouped => {
            // The null already carries the time main effect; the LR tests
            // specifically for a group-dependent trend.
            let mut h0_fixed = fixed_base;
            h0_fixed.push(FixedTerm::Group);
            h0_fixed.extend(time_fixed);
            let h0 = ModelSpec {
                fixed: h0_fixed.clone(),
                random: random_base.clone(),
            };

            let mut h1_fixed = h0_fixed;
            h1_fixed.extend(
                time_cols
                    .iter()
                    .map(|c| FixedTerm::Interaction(c.clone(), InteractWith::Group)),
            );
            let mut h1_random = random_base;
            h1_random.push(RandomTerm::slopes_for(
                time_cols
                    .iter()
                    .cloned()
                    .map(RandomSlope::TimeByGroup)
                    .collect(),
                grouping,
            ));
            let h1 = ModelSpec {
                fixed: h1_fixed,
                random: h1_random,
            };
            HypothesisPair { h0, h1 }
        }
    }
}
