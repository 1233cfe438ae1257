//! Time-basis construction: standardized polynomial columns, natural cubic
//! spline bases, and user-supplied algebraic time expressions.

use crate::data::DesignTable;
use crate::error::{Result, TcgsaError};
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Scale applied to spline basis values so slope coefficients stay in an
/// estimable range.
const SPLINE_SCALE: f64 = 10.0;

/// The functional form of the time trend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeForm {
    /// Single standardized linear term.
    Linear,
    /// Standardized linear, quadratic, and cubic terms.
    Cubic,
    /// Natural cubic spline basis with data-driven knots.
    Splines,
    /// User algebraic expression over design columns (`+`, `*`, `/`), one
    /// model term per top-level summand.
    Expression(String),
    /// A design-table column treated as a discrete (factor) time.
    Factor(String),
}

impl TimeForm {
    /// Resolve the configured time-form string against a design table.
    ///
    /// The keywords `linear`, `cubic`, and `splines` are recognized first;
    /// any other value naming a design column is a factor form, and
    /// everything else is parsed as an expression.
    pub fn resolve(raw: &str, design: &DesignTable) -> Self {
        match raw {
            "linear" => TimeForm::Linear,
            "cubic" => TimeForm::Cubic,
            "splines" => TimeForm::Splines,
            other => {
                if design.has_column(other) {
                    TimeForm::Factor(other.to_string())
                } else {
                    TimeForm::Expression(other.to_string())
                }
            }
        }
    }

    /// Human-readable descriptor carried into the final result.
    pub fn describe(&self) -> String {
        match self {
            TimeForm::Linear => "linear".to_string(),
            TimeForm::Cubic => "cubic".to_string(),
            TimeForm::Splines => "splines".to_string(),
            TimeForm::Expression(e) => e.clone(),
            TimeForm::Factor(c) => format!("factor({})", c),
        }
    }
}

/// One multiplicative factor of an expression component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum ExprFactor {
    Var(String),
    Const(f64),
}

/// A top-level summand of a user time expression, evaluated as a product /
/// quotient chain over design columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExprComponent {
    name: String,
    // (is_division, factor) pairs; the first entry is always multiplicative.
    factors: Vec<(bool, ExprFactor)>,
}

impl ExprComponent {
    /// Column name of this component in the long table.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Design variables referenced by this component.
    pub fn variables(&self) -> Vec<&str> {
        self.factors
            .iter()
            .filter_map(|(_, f)| match f {
                ExprFactor::Var(v) => Some(v.as_str()),
                ExprFactor::Const(_) => None,
            })
            .collect()
    }

    fn evaluate(&self, design: &DesignTable) -> Result<Vec<f64>> {
        let n = design.n_samples();
        let mut acc = vec![1.0; n];
        for (divide, factor) in &self.factors {
            let values = match factor {
                ExprFactor::Var(v) => design.numeric_column(v)?,
                ExprFactor::Const(c) => vec![*c; n],
            };
            for (a, v) in acc.iter_mut().zip(values) {
                if *divide {
                    if v == 0.0 {
                        return Err(TcgsaError::Numerical(format!(
                            "division by zero evaluating time expression '{}'",
                            self.name
                        )));
                    }
                    *a /= v;
                } else {
                    *a *= v;
                }
            }
        }
        Ok(acc)
    }
}

/// Parse a user time expression into its top-level summands.
///
/// Supported grammar: `component (+ component)*` where a component is a
/// `*`/`/` chain of design-column names and numeric literals.
pub fn parse_time_expression(expr: &str, design: &DesignTable) -> Result<Vec<ExprComponent>> {
    let token_re = Regex::new(r"[A-Za-z_][A-Za-z0-9_.]*|[0-9]+(?:\.[0-9]+)?|[+*/]|\S").unwrap();
    let mut components = Vec::new();

    for summand in expr.split('+') {
        let summand = summand.trim();
        if summand.is_empty() {
            return Err(TcgsaError::TimeExprParse(format!(
                "empty summand in time expression '{}'",
                expr
            )));
        }
        let tokens: Vec<&str> = token_re.find_iter(summand).map(|m| m.as_str()).collect();
        let mut factors: Vec<(bool, ExprFactor)> = Vec::new();
        let mut expect_factor = true;
        let mut divide_next = false;
        for token in &tokens {
            match *token {
                "*" | "/" => {
                    if expect_factor {
                        return Err(TcgsaError::TimeExprParse(format!(
                            "misplaced operator '{}' in '{}'",
                            token, summand
                        )));
                    }
                    divide_next = *token == "/";
                    expect_factor = true;
                }
                t => {
                    if !expect_factor {
                        return Err(TcgsaError::TimeExprParse(format!(
                            "expected operator before '{}' in '{}'",
                            t, summand
                        )));
                    }
                    let factor = if let Ok(c) = t.parse::<f64>() {
                        ExprFactor::Const(c)
                    } else if design.has_column(t) {
                        ExprFactor::Var(t.to_string())
                    } else {
                        return Err(TcgsaError::TimeExprParse(format!(
                            "unknown design column '{}' in time expression",
                            t
                        )));
                    };
                    factors.push((divide_next, factor));
                    divide_next = false;
                    expect_factor = false;
                }
            }
        }
        if expect_factor {
            return Err(TcgsaError::TimeExprParse(format!(
                "dangling operator in '{}'",
                summand
            )));
        }
        let name = tokens.join("");
        components.push(ExprComponent { name, factors });
    }

    Ok(components)
}

/// Deterministic plan for materializing time-basis columns.
///
/// Built once per analysis from the full design table and shared by the
/// model-specification builder (which needs the column names and spline
/// degrees of freedom) and the reshaper (which needs the column values), so
/// the two can never disagree.
#[derive(Debug, Clone)]
pub struct TimeBasisPlan {
    time_form: TimeForm,
    /// Mean and standard deviation of t, t², t³ over the design rows.
    power_scaling: [(f64, f64); 3],
    /// Full knot vector (boundary + interior) for the spline form.
    knots: Option<Vec<f64>>,
    /// Parsed components for the expression form.
    components: Option<Vec<ExprComponent>>,
}

impl TimeBasisPlan {
    /// Build the plan from a design table, a time column, and a form.
    pub fn new(design: &DesignTable, time_var: &str, time_form: TimeForm) -> Result<Self> {
        let time = design.numeric_column(time_var)?;
        if time.is_empty() {
            return Err(TcgsaError::EmptyData("design table has no samples".to_string()));
        }

        let mut power_scaling = [(0.0, 1.0); 3];
        for (j, slot) in power_scaling.iter_mut().enumerate() {
            let powered: Vec<f64> = time.iter().map(|t| t.powi(j as i32 + 1)).collect();
            *slot = mean_sd(&powered)?;
        }

        let knots = match time_form {
            TimeForm::Splines => Some(spline_knots(&time)?),
            _ => None,
        };

        let components = match &time_form {
            TimeForm::Expression(expr) => Some(parse_time_expression(expr, design)?),
            _ => None,
        };

        Ok(Self {
            time_form,
            power_scaling,
            knots,
            components,
        })
    }

    /// The resolved time form.
    pub fn time_form(&self) -> &TimeForm {
        &self.time_form
    }

    /// Names of the numeric time-term columns the model uses, in order.
    ///
    /// Empty for the factor form, whose time term is categorical.
    pub fn term_columns(&self) -> Vec<String> {
        match &self.time_form {
            TimeForm::Linear => vec!["t1".to_string()],
            TimeForm::Cubic => vec!["t1".to_string(), "t2".to_string(), "t3".to_string()],
            TimeForm::Splines => {
                let df = self.spline_df().unwrap_or(0);
                (1..=df).map(|k| format!("ns{}", k)).collect()
            }
            TimeForm::Expression(_) => self
                .components
                .as_ref()
                .map(|cs| cs.iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default(),
            TimeForm::Factor(_) => Vec::new(),
        }
    }

    /// Spline degrees of freedom (basis column count), spline form only.
    pub fn spline_df(&self) -> Option<usize> {
        self.knots.as_ref().map(|k| k.len() - 1)
    }

    /// Design variables referenced by an expression form, if any.
    pub fn expression_variables(&self) -> Vec<String> {
        self.components
            .as_ref()
            .map(|cs| {
                cs.iter()
                    .flat_map(|c| c.variables())
                    .map(|v| v.to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Materialize all basis columns for one design table, per sample row.
    ///
    /// Standardized power columns `t1`/`t2`/`t3` are always produced; spline
    /// or expression columns are added per the form. The output depends only
    /// on the design table and the plan.
    pub fn evaluate(&self, design: &DesignTable, time_var: &str) -> Result<Vec<(String, Vec<f64>)>> {
        let time = design.numeric_column(time_var)?;
        let mut columns = Vec::new();

        for j in 0..3 {
            let (mean, sd) = self.power_scaling[j];
            let col: Vec<f64> = time
                .iter()
                .map(|t| (t.powi(j as i32 + 1) - mean) / sd)
                .collect();
            columns.push((format!("t{}", j + 1), col));
        }

        if let Some(knots) = &self.knots {
            let df = knots.len() - 1;
            let mut spline_cols: Vec<Vec<f64>> = vec![Vec::with_capacity(time.len()); df];
            for &t in &time {
                let basis = natural_spline_basis(t, knots);
                for (col, value) in spline_cols.iter_mut().zip(basis) {
                    col.push(value * SPLINE_SCALE);
                }
            }
            for (k, col) in spline_cols.into_iter().enumerate() {
                columns.push((format!("ns{}", k + 1), col));
            }
        }

        if let Some(components) = &self.components {
            for component in components {
                columns.push((component.name().to_string(), component.evaluate(design)?));
            }
        }

        Ok(columns)
    }
}

/// Mean and sample standard deviation; errors when the column is constant.
fn mean_sd(values: &[f64]) -> Result<(f64, f64)> {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = if values.len() > 1 {
        values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)
    } else {
        0.0
    };
    let sd = var.sqrt();
    if sd < 1e-12 {
        return Err(TcgsaError::Numerical(
            "time variable has no variation".to_string(),
        ));
    }
    Ok((mean, sd))
}

/// Knot vector for the natural cubic spline basis.
///
/// Interior knot count is `ceil(distinct time points / 4)`, placed at evenly
/// spaced quantiles of the time variable; boundary knots sit at the observed
/// min and max. Duplicate positions are collapsed.
fn spline_knots(time: &[f64]) -> Result<Vec<f64>> {
    let mut sorted = time.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());

    let mut distinct = sorted.clone();
    distinct.dedup();
    if distinct.len() < 2 {
        return Err(TcgsaError::Numerical(
            "spline basis requires at least two distinct time points".to_string(),
        ));
    }

    let n_interior = distinct.len().div_ceil(4);
    let mut knots = vec![sorted[0]];
    for i in 1..=n_interior {
        let p = i as f64 / (n_interior + 1) as f64;
        knots.push(quantile(&sorted, p));
    }
    knots.push(sorted[sorted.len() - 1]);

    knots.dedup_by(|a, b| (*a - *b).abs() < 1e-12);
    if knots.len() < 2 {
        return Err(TcgsaError::Numerical(
            "degenerate spline knot vector".to_string(),
        ));
    }
    Ok(knots)
}

/// Linear-interpolation quantile over pre-sorted values (R type 7).
fn quantile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    let h = p * (n - 1) as f64;
    let lo = h.floor() as usize;
    let hi = h.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        sorted[lo] + (h - lo as f64) * (sorted[hi] - sorted[lo])
    }
}

/// Natural cubic spline basis at `t` for the given knot vector, excluding
/// the intercept: the linear term followed by the truncated-power
/// combinations with linearity enforced beyond the boundary knots.
fn natural_spline_basis(t: f64, knots: &[f64]) -> Vec<f64> {
    let m = knots.len();
    let last = knots[m - 1];
    let second_last = knots[m - 2];

    let d = |k: usize| -> f64 {
        let pos = |x: f64| if x > 0.0 { x.powi(3) } else { 0.0 };
        (pos(t - knots[k]) - pos(t - last)) / (last - knots[k])
    };

    let d_last = {
        let pos = |x: f64| if x > 0.0 { x.powi(3) } else { 0.0 };
        (pos(t - second_last) - pos(t - last)) / (last - second_last)
    };

    let mut basis = Vec::with_capacity(m - 1);
    basis.push(t);
    for k in 0..m - 2 {
        basis.push(d(k) - d_last);
    }
    basis
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Variable;
    use approx::assert_relative_eq;

    fn design_with_times(times: &[f64]) -> DesignTable {
        let sample_ids: Vec<String> = (0..times.len()).map(|i| format!("S{}", i)).collect();
        let time_col: Vec<Variable> = times.iter().map(|&t| Variable::Continuous(t)).collect();
        let age_col: Vec<Variable> = (0..times.len())
            .map(|i| Variable::Continuous(20.0 + i as f64))
            .collect();
        DesignTable::from_columns(
            sample_ids,
            vec![
                ("TimePoint".to_string(), time_col),
                ("Age".to_string(), age_col),
            ],
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_keywords() {
        let design = design_with_times(&[0.0, 1.0]);
        assert_eq!(TimeForm::resolve("linear", &design), TimeForm::Linear);
        assert_eq!(TimeForm::resolve("cubic", &design), TimeForm::Cubic);
        assert_eq!(TimeForm::resolve("splines", &design), TimeForm::Splines);
        assert_eq!(
            TimeForm::resolve("Age", &design),
            TimeForm::Factor("Age".to_string())
        );
        assert_eq!(
            TimeForm::resolve("TimePoint*Age", &design),
            TimeForm::Expression("TimePoint*Age".to_string())
        );
    }

    #[test]
    fn test_standardized_linear_column() {
        let design = design_with_times(&[0.0, 1.0, 2.0, 3.0]);
        let plan = TimeBasisPlan::new(&design, "TimePoint", TimeForm::Linear).unwrap();
        let columns = plan.evaluate(&design, "TimePoint").unwrap();

        let t1 = &columns.iter().find(|(n, _)| n == "t1").unwrap().1;
        let mean: f64 = t1.iter().sum::<f64>() / t1.len() as f64;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-12);
        // Sample variance 1 after standardization.
        let var: f64 = t1.iter().map(|v| v * v).sum::<f64>() / (t1.len() - 1) as f64;
        assert_relative_eq!(var, 1.0, epsilon = 1e-12);
        assert_eq!(plan.term_columns(), vec!["t1"]);
    }

    #[test]
    fn test_cubic_terms() {
        let design = design_with_times(&[0.0, 1.0, 2.0, 5.0]);
        let plan = TimeBasisPlan::new(&design, "TimePoint", TimeForm::Cubic).unwrap();
        assert_eq!(plan.term_columns(), vec!["t1", "t2", "t3"]);
        let columns = plan.evaluate(&design, "TimePoint").unwrap();
        assert_eq!(columns.len(), 3);
    }

    #[test]
    fn test_spline_knot_count() {
        // 5 distinct time points -> ceil(5/4) = 2 interior knots -> df 3.
        let design = design_with_times(&[0.0, 1.0, 2.0, 3.0, 4.0, 0.0, 1.0, 2.0, 3.0, 4.0]);
        let plan = TimeBasisPlan::new(&design, "TimePoint", TimeForm::Splines).unwrap();
        assert_eq!(plan.spline_df(), Some(3));
        assert_eq!(plan.term_columns(), vec!["ns1", "ns2", "ns3"]);
    }

    #[test]
    fn test_spline_basis_linear_beyond_boundaries() {
        // A natural spline is linear outside the boundary knots: second
        // differences of the basis evaluated on an exterior grid vanish.
        let knots = vec![0.0, 1.0, 2.0, 3.0];
        let far = [5.0, 6.0, 7.0];
        let values: Vec<Vec<f64>> = far.iter().map(|&t| natural_spline_basis(t, &knots)).collect();
        for j in 0..values[0].len() {
            let second_diff = values[2][j] - 2.0 * values[1][j] + values[0][j];
            assert_relative_eq!(second_diff, 0.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_spline_columns_scaled() {
        let design = design_with_times(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        let plan = TimeBasisPlan::new(&design, "TimePoint", TimeForm::Splines).unwrap();
        let columns = plan.evaluate(&design, "TimePoint").unwrap();
        let ns1 = &columns.iter().find(|(n, _)| n == "ns1").unwrap().1;
        // First basis function is the identity, scaled by 10.
        assert_relative_eq!(ns1[3], 30.0, epsilon = 1e-9);
    }

    #[test]
    fn test_expression_components() {
        let design = design_with_times(&[0.0, 1.0, 2.0, 3.0]);
        let components = parse_time_expression("TimePoint + TimePoint*Age", &design).unwrap();
        assert_eq!(components.len(), 2);
        assert_eq!(components[0].name(), "TimePoint");
        assert_eq!(components[1].name(), "TimePoint*Age");
        assert_eq!(components[1].variables(), vec!["TimePoint", "Age"]);

        let values = components[1].evaluate(&design).unwrap();
        assert_relative_eq!(values[2], 2.0 * 22.0, epsilon = 1e-12);
    }

    #[test]
    fn test_expression_division_and_constants() {
        let design = design_with_times(&[2.0, 4.0, 8.0, 16.0]);
        let components = parse_time_expression("TimePoint/2", &design).unwrap();
        let values = components[0].evaluate(&design).unwrap();
        assert_eq!(values, vec![1.0, 2.0, 4.0, 8.0]);
    }

    #[test]
    fn test_expression_unknown_column() {
        let design = design_with_times(&[0.0, 1.0]);
        assert!(parse_time_expression("Nope*2", &design).is_err());
    }

    #[test]
    fn test_expression_malformed() {
        let design = design_with_times(&[0.0, 1.0]);
        assert!(parse_time_expression("TimePoint*", &design).is_err());
        assert!(parse_time_expression("*TimePoint", &design).is_err());
        assert!(parse_time_expression("TimePoint + ", &design).is_err());
    }

    #[test]
    fn test_constant_time_rejected() {
        let design = design_with_times(&[3.0, 3.0, 3.0]);
        assert!(TimeBasisPlan::new(&design, "TimePoint", TimeForm::Linear).is_err());
    }

    #[test]
    fn test_determinism() {
        let design = design_with_times(&[0.0, 3.0, 7.0, 14.0, 28.0, 0.0, 3.0, 7.0]);
        let plan_a = TimeBasisPlan::new(&design, "TimePoint", TimeForm::Splines).unwrap();
        let plan_b = TimeBasisPlan::new(&design, "TimePoint", TimeForm::Splines).unwrap();
        let cols_a = plan_a.evaluate(&design, "TimePoint").unwrap();
        let cols_b = plan_b.evaluate(&design, "TimePoint").unwrap();
        assert_eq!(cols_a, cols_b);
    }
}
