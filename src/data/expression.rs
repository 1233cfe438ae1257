//! Dense expression matrix: genes (rows) by samples (columns).

use crate::error::{Result, TcgsaError};
use nalgebra::DMatrix;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// A dense matrix of expression values across samples.
///
/// Rows represent genes (probes), columns represent samples. Column order
/// must align with the design table's sample rows.
#[derive(Debug, Clone)]
pub struct ExpressionMatrix {
    /// Expression values (genes × samples).
    data: DMatrix<f64>,
    /// Gene identifiers (row names).
    gene_ids: Vec<String>,
    /// Sample identifiers (column names).
    sample_ids: Vec<String>,
    /// Row lookup by gene id.
    gene_index: HashMap<String, usize>,
}

impl ExpressionMatrix {
    /// Create a new ExpressionMatrix from a dense matrix and identifiers.
    pub fn new(
        data: DMatrix<f64>,
        gene_ids: Vec<String>,
        sample_ids: Vec<String>,
    ) -> Result<Self> {
        if data.nrows() != gene_ids.len() {
            return Err(TcgsaError::DimensionMismatch {
                expected: data.nrows(),
                actual: gene_ids.len(),
            });
        }
        if data.ncols() != sample_ids.len() {
            return Err(TcgsaError::DimensionMismatch {
                expected: data.ncols(),
                actual: sample_ids.len(),
            });
        }
        let gene_index = gene_ids
            .iter()
            .enumerate()
            .map(|(i, g)| (g.clone(), i))
            .collect();
        Ok(Self {
            data,
            gene_ids,
            sample_ids,
            gene_index,
        })
    }

    /// Load an expression matrix from a TSV file.
    ///
    /// Expected format:
    /// - First row: header with sample IDs (first column is the gene ID header)
    /// - Subsequent rows: gene ID followed by expression values
    pub fn from_tsv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut lines = reader.lines();

        let header_line = lines
            .next()
            .ok_or_else(|| TcgsaError::EmptyData("Empty expression file".to_string()))??;
        let header: Vec<&str> = header_line.split('\t').collect();
        if header.len() < 2 {
            return Err(TcgsaError::EmptyData(
                "Expression TSV must have at least one sample".to_string(),
            ));
        }
        let sample_ids: Vec<String> = header[1..].iter().map(|s| s.to_string()).collect();
        let n_samples = sample_ids.len();

        let mut gene_ids: Vec<String> = Vec::new();
        let mut values: Vec<f64> = Vec::new();

        for (row_idx, line_result) in lines.enumerate() {
            let line = line_result?;
            if line.trim().is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() != n_samples + 1 {
                return Err(TcgsaError::DimensionMismatch {
                    expected: n_samples + 1,
                    actual: fields.len(),
                });
            }
            gene_ids.push(fields[0].to_string());
            for (col_idx, value_str) in fields[1..].iter().enumerate() {
                let value: f64 =
                    value_str
                        .trim()
                        .parse()
                        .map_err(|_| TcgsaError::InvalidExpression {
                            value: value_str.to_string(),
                            row: row_idx,
                            col: col_idx,
                        })?;
                values.push(value);
            }
        }

        let n_genes = gene_ids.len();
        if n_genes == 0 {
            return Err(TcgsaError::EmptyData("No genes in expression TSV".to_string()));
        }

        let data = DMatrix::from_row_slice(n_genes, n_samples, &values);
        Self::new(data, gene_ids, sample_ids)
    }

    /// Gene identifiers (row names).
    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    /// Sample identifiers (column names).
    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Number of genes (rows).
    pub fn n_genes(&self) -> usize {
        self.data.nrows()
    }

    /// Number of samples (columns).
    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }

    /// Check whether a gene is present.
    pub fn has_gene(&self, gene_id: &str) -> bool {
        self.gene_index.contains_key(gene_id)
    }

    /// Expression values for one gene, in sample order.
    pub fn row(&self, gene_idx: usize) -> Vec<f64> {
        self.data.row(gene_idx).iter().cloned().collect()
    }

    /// Expression values for one gene by id.
    pub fn row_by_id(&self, gene_id: &str) -> Option<Vec<f64>> {
        self.gene_index.get(gene_id).map(|&i| self.row(i))
    }

    /// Restrict to the given genes, preserving the requested order.
    ///
    /// Genes absent from the matrix are silently dropped; the caller decides
    /// what an empty intersection means.
    pub fn subset_genes(&self, gene_ids: &[String]) -> Result<Self> {
        let kept: Vec<(&String, usize)> = gene_ids
            .iter()
            .filter_map(|g| self.gene_index.get(g).map(|&i| (g, i)))
            .collect();

        let n_kept = kept.len();
        let mut data = DMatrix::zeros(n_kept, self.n_samples());
        for (new_row, (_, old_row)) in kept.iter().enumerate() {
            data.set_row(new_row, &self.data.row(*old_row));
        }
        let ids: Vec<String> = kept.iter().map(|(g, _)| (*g).clone()).collect();
        Self::new(data, ids, self.sample_ids.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_test_tsv() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tS1\tS2\tS3").unwrap();
        writeln!(file, "g1\t1.5\t2.0\t2.5").unwrap();
        writeln!(file, "g2\t0.1\t0.2\t0.3").unwrap();
        writeln!(file, "g3\t-1.0\t0.0\t1.0").unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_load_expression() {
        let file = create_test_tsv();
        let expr = ExpressionMatrix::from_tsv(file.path()).unwrap();

        assert_eq!(expr.n_genes(), 3);
        assert_eq!(expr.n_samples(), 3);
        assert_eq!(expr.gene_ids(), &["g1", "g2", "g3"]);
        assert_eq!(expr.sample_ids(), &["S1", "S2", "S3"]);
        assert_eq!(expr.row(0), vec![1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_row_by_id() {
        let file = create_test_tsv();
        let expr = ExpressionMatrix::from_tsv(file.path()).unwrap();

        assert_eq!(expr.row_by_id("g3"), Some(vec![-1.0, 0.0, 1.0]));
        assert_eq!(expr.row_by_id("missing"), None);
    }

    #[test]
    fn test_subset_preserves_requested_order() {
        let file = create_test_tsv();
        let expr = ExpressionMatrix::from_tsv(file.path()).unwrap();

        let subset = expr
            .subset_genes(&["g3".to_string(), "g1".to_string()])
            .unwrap();
        assert_eq!(subset.gene_ids(), &["g3", "g1"]);
        assert_eq!(subset.row(0), vec![-1.0, 0.0, 1.0]);
        assert_eq!(subset.row(1), vec![1.5, 2.0, 2.5]);
    }

    #[test]
    fn test_subset_drops_absent_genes() {
        let file = create_test_tsv();
        let expr = ExpressionMatrix::from_tsv(file.path()).unwrap();

        let subset = expr
            .subset_genes(&["g2".to_string(), "nope".to_string()])
            .unwrap();
        assert_eq!(subset.n_genes(), 1);
        assert_eq!(subset.gene_ids(), &["g2"]);
    }

    #[test]
    fn test_invalid_value_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "gene_id\tS1").unwrap();
        writeln!(file, "g1\tnot_a_number").unwrap();
        file.flush().unwrap();

        assert!(ExpressionMatrix::from_tsv(file.path()).is_err());
    }
}
