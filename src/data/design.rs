//! Design table: per-sample variables (subject, time, covariates, group).

use crate::error::{Result, TcgsaError};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A variable value that can be categorical, continuous, or ordinal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Variable {
    /// Categorical variable with string levels.
    Categorical(String),
    /// Continuous numeric variable.
    Continuous(f64),
    /// Ordinal variable with integer rank.
    Ordinal(i64),
    /// Missing value.
    Missing,
}

impl Variable {
    /// Check if this is a missing value.
    pub fn is_missing(&self) -> bool {
        matches!(self, Variable::Missing)
    }

    /// Try to get as categorical string.
    pub fn as_categorical(&self) -> Option<&str> {
        match self {
            Variable::Categorical(s) => Some(s),
            _ => None,
        }
    }

    /// Try to get as continuous f64.
    pub fn as_continuous(&self) -> Option<f64> {
        match self {
            Variable::Continuous(v) => Some(*v),
            Variable::Ordinal(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Render as a level label, whatever the underlying type.
    ///
    /// Subject and group identifiers are frequently numeric-coded; grouping
    /// always works on labels.
    pub fn as_label(&self) -> Option<String> {
        match self {
            Variable::Categorical(s) => Some(s.clone()),
            Variable::Continuous(v) => Some(v.to_string()),
            Variable::Ordinal(v) => Some(v.to_string()),
            Variable::Missing => None,
        }
    }
}

/// Type hint for columns when loading a design table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VariableType {
    Categorical,
    Continuous,
    Ordinal,
}

/// Per-sample design table.
///
/// Rows are samples, in the same order as the expression matrix columns;
/// columns are variables (subject id, time, group, covariates).
#[derive(Debug, Clone)]
pub struct DesignTable {
    /// Sample IDs in order.
    sample_ids: Vec<String>,
    /// Column names in order.
    column_names: Vec<String>,
    /// Column-oriented storage: one value vector per column, sample order.
    columns: Vec<Vec<Variable>>,
    /// Column lookup by name.
    column_index: HashMap<String, usize>,
    /// Inferred or overridden type per column.
    column_types: Vec<VariableType>,
}

impl DesignTable {
    /// Build a design table from columns.
    pub fn from_columns(
        sample_ids: Vec<String>,
        columns: Vec<(String, Vec<Variable>)>,
    ) -> Result<Self> {
        let n_samples = sample_ids.len();
        let mut column_names = Vec::with_capacity(columns.len());
        let mut values = Vec::with_capacity(columns.len());
        let mut column_types = Vec::with_capacity(columns.len());
        for (name, col) in columns {
            if col.len() != n_samples {
                return Err(TcgsaError::DimensionMismatch {
                    expected: n_samples,
                    actual: col.len(),
                });
            }
            column_types.push(infer_type(&col));
            column_names.push(name);
            values.push(col);
        }
        let column_index = column_names
            .iter()
            .enumerate()
            .map(|(i, n)| (n.clone(), i))
            .collect();
        Ok(Self {
            sample_ids,
            column_names,
            columns: values,
            column_index,
            column_types,
        })
    }

    /// Load a design table from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with column names (first column is sample ID)
    /// - Subsequent rows: sample ID followed by variable values
    ///
    /// Columns are inferred as continuous if all values parse as numbers,
    /// otherwise categorical. Empty strings and `NA` are missing.
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| TcgsaError::EmptyData("Empty design table file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(TcgsaError::EmptyData(
                "Design table must have at least one variable column".to_string(),
            ));
        }
        let column_names: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();
        let n_cols = column_names.len();

        let mut sample_ids: Vec<String> = Vec::new();
        let mut raw_columns: Vec<Vec<String>> = vec![Vec::new(); n_cols];

        for line_result in lines {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            sample_ids.push(fields[0].to_string());
            for (col_idx, raw) in raw_columns.iter_mut().enumerate() {
                let value = fields.get(col_idx + 1).map(|s| s.trim()).unwrap_or("");
                raw.push(value.to_string());
            }
        }

        if sample_ids.is_empty() {
            return Err(TcgsaError::EmptyData("No samples in design table".to_string()));
        }

        let columns: Vec<(String, Vec<Variable>)> = column_names
            .into_iter()
            .zip(raw_columns)
            .map(|(name, raw)| {
                let numeric = raw
                    .iter()
                    .all(|v| is_missing_str(v) || v.parse::<f64>().is_ok());
                let parsed: Vec<Variable> = raw
                    .into_iter()
                    .map(|v| {
                        if is_missing_str(&v) {
                            Variable::Missing
                        } else if numeric {
                            Variable::Continuous(v.parse().unwrap())
                        } else {
                            Variable::Categorical(v)
                        }
                    })
                    .collect();
                (name, parsed)
            })
            .collect();

        Self::from_columns(sample_ids, columns)
    }

    /// Sample IDs in order.
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Column names in order.
    pub fn column_names(&self) -> &[String] {
        &self.column_names
    }

    /// Number of samples (rows).
    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }

    /// Check if a column exists.
    pub fn has_column(&self, name: &str) -> bool {
        self.column_index.contains_key(name)
    }

    /// Get all values for a column.
    pub fn column(&self, name: &str) -> Result<&[Variable]> {
        let idx = self
            .column_index
            .get(name)
            .ok_or_else(|| TcgsaError::MissingColumn(name.to_string()))?;
        Ok(&self.columns[*idx])
    }

    /// Get the type of a column.
    pub fn column_type(&self, name: &str) -> Option<VariableType> {
        self.column_index.get(name).map(|&i| self.column_types[i])
    }

    /// Get a column as numeric values; missing or non-numeric values error.
    pub fn numeric_column(&self, name: &str) -> Result<Vec<f64>> {
        self.column(name)?
            .iter()
            .map(|v| {
                v.as_continuous().ok_or_else(|| {
                    TcgsaError::InvalidParameter(format!(
                        "column '{}' is not fully numeric",
                        name
                    ))
                })
            })
            .collect()
    }

    /// Get a column as level labels; missing values error.
    pub fn label_column(&self, name: &str) -> Result<Vec<String>> {
        self.column(name)?
            .iter()
            .map(|v| {
                v.as_label().ok_or_else(|| {
                    TcgsaError::InvalidParameter(format!(
                        "column '{}' contains missing values",
                        name
                    ))
                })
            })
            .collect()
    }

    /// Unique sorted levels for a column, rendered as labels.
    pub fn levels(&self, name: &str) -> Result<Vec<String>> {
        let labels = self.label_column(name)?;
        let mut levels: Vec<String> = labels.into_iter().collect::<HashSet<_>>().into_iter().collect();
        levels.sort();
        Ok(levels)
    }

    /// Subset to the given samples, in the given order.
    pub fn subset_samples(&self, sample_ids: &[String]) -> Result<Self> {
        let index: HashMap<&String, usize> = self
            .sample_ids
            .iter()
            .enumerate()
            .map(|(i, s)| (s, i))
            .collect();
        let mut rows = Vec::with_capacity(sample_ids.len());
        for sid in sample_ids {
            let row = index.get(sid).ok_or_else(|| {
                TcgsaError::SampleMismatch(format!("sample '{}' not found in design table", sid))
            })?;
            rows.push(*row);
        }
        let columns = self
            .column_names
            .iter()
            .zip(&self.columns)
            .map(|(name, col)| {
                (
                    name.clone(),
                    rows.iter().map(|&r| col[r].clone()).collect::<Vec<_>>(),
                )
            })
            .collect();
        Self::from_columns(sample_ids.to_vec(), columns)
    }
}

fn is_missing_str(v: &str) -> bool {
    v.is_empty() || v == "NA" || v == "na"
}

fn infer_type(col: &[Variable]) -> VariableType {
    let mut has_cat = false;
    let mut has_ord = false;
    for v in col {
        match v {
            Variable::Categorical(_) => has_cat = true,
            Variable::Ordinal(_) => has_ord = true,
            _ => {}
        }
    }
    if has_cat {
        VariableType::Categorical
    } else if has_ord {
        VariableType::Ordinal
    } else {
        VariableType::Continuous
    }
}
