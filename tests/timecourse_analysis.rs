//! Integration tests for the time-course gene set analysis batch.

use std::io::Write;
use tempfile::NamedTempFile;
use timecourse_gsa::prelude::*;

const SUBJECTS: [&str; 5] = ["P1", "P2", "P3", "P4", "P5"];
const TIMES: [f64; 4] = [0.0, 7.0, 14.0, 28.0];
const N_GENES: usize = 15;

fn sample_id(subject: &str, time: f64) -> String {
    format!("{}_d{}", subject, time as i64)
}

/// Design table: 5 subjects × 4 time points, two arms, an age covariate.
fn create_design() -> DesignTable {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "sample_id\tPatient_ID\tTimePoint\tArm\tAge").unwrap();
    for (si, subject) in SUBJECTS.iter().enumerate() {
        let arm = if si < 3 { "active" } else { "placebo" };
        for t in TIMES {
            writeln!(
                file,
                "{}\t{}\t{}\t{}\t{}",
                sample_id(subject, t),
                subject,
                t,
                arm,
                30 + si * 2
            )
            .unwrap();
        }
    }
    file.flush().unwrap();
    DesignTable::from_tsv(file.path()).unwrap()
}

/// Expression matrix with a clear time trend in every gene plus small
/// deterministic noise.
fn create_expression() -> ExpressionMatrix {
    let mut seed = 42u64;
    let mut noise = || {
        seed = seed
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        ((seed >> 33) as f64 / u32::MAX as f64 - 0.5) * 0.2
    };

    let mut file = NamedTempFile::new().unwrap();
    let header: Vec<String> = SUBJECTS
        .iter()
        .flat_map(|s| TIMES.iter().map(|&t| sample_id(s, t)))
        .collect();
    writeln!(file, "gene_id\t{}", header.join("\t")).unwrap();
    for g in 0..N_GENES {
        let mut row = vec![format!("gene_{}", g)];
        for (si, _) in SUBJECTS.iter().enumerate() {
            for t in TIMES {
                let value = 5.0 + 0.2 * g as f64 + 0.1 * si as f64 + 0.25 * t + noise();
                row.push(format!("{:.4}", value));
            }
        }
        writeln!(file, "{}", row.join("\t")).unwrap();
    }
    file.flush().unwrap();
    ExpressionMatrix::from_tsv(file.path()).unwrap()
}

fn genes(range: std::ops::Range<usize>) -> Vec<String> {
    range.map(|g| format!("gene_{}", g)).collect()
}

fn gene_set(name: &str, ids: &[String]) -> GeneSet {
    let refs: Vec<&str> = ids.iter().map(|s| s.as_str()).collect();
    GeneSet::new(name, &refs)
}

fn standard_gene_sets() -> GeneSetCollection {
    // A 12-gene set above the floor, a 3-gene set below it, and a set whose
    // listed genes partly do not exist in the matrix.
    let mut missing = genes(0..10);
    missing.push("phantom_a".to_string());
    missing.push("phantom_b".to_string());
    GeneSetCollection::new(vec![
        gene_set("set_big", &genes(0..12)),
        gene_set("set_small", &genes(0..3)),
        gene_set("set_partial", &missing),
    ])
}

#[test]
fn test_batch_shape_and_size_gate() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = standard_gene_sets();
    let config = AnalysisConfig::new().with_workers(2);

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    // Complete, correctly shaped result covering every input gene set.
    assert_eq!(result.fit.len(), 3);
    assert_eq!(result.estimations.len(), 3);
    assert_eq!(
        result.fit.gene_set_names,
        vec!["set_big", "set_small", "set_partial"]
    );
    assert_eq!(result.gene_sets.names(), vec!["set_big", "set_small", "set_partial"]);

    // 12 genes: fitted.
    let big = result.fit.get(0).expect("12-gene set should be analyzed");
    assert!(big.lr.is_finite());

    // 3 genes: below the floor of 10, all-NA row.
    assert!(result.fit.get(1).is_none());
    assert!(result.estimations[1].is_none());

    // 10 retained genes after dropping the phantoms: exactly at the floor,
    // which is inclusive.
    assert!(result.fit.get(2).is_some());
}

#[test]
fn test_twelve_gene_scenario() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = GeneSetCollection::new(vec![gene_set("set_big", &genes(0..12))]);
    let config = AnalysisConfig::new();

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    let stats = result.fit.get(0).expect("should be analyzed");
    // H1 nests H0, so with both hypotheses fitted the LR is nonnegative;
    // the strong simulated trend makes it clearly positive.
    assert!(stats.lr > 0.0, "LR should be positive, got {}", stats.lr);
    assert!(stats.aic_h1 < stats.aic_h0);

    let est = result.estimations[0].as_ref().expect("should estimate");
    assert_eq!(est.shape(), (12, SUBJECTS.len(), TIMES.len()));
    assert_eq!(est.times, TIMES.to_vec());
    assert_eq!(est.subjects, SUBJECTS.iter().map(|s| s.to_string()).collect::<Vec<_>>());
    // Fitted trajectories rise over time for this trend.
    let first = est.values[(0, 0, 0)];
    let last = est.values[(0, 0, TIMES.len() - 1)];
    assert!(last > first, "expected rising trajectory, {} -> {}", first, last);
}

#[test]
fn test_order_invariance_across_worker_counts() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = standard_gene_sets();

    let sequential = AnalysisConfig::new().with_backend(ParallelBackend::Sequential);
    let threaded = AnalysisConfig::new().with_workers(4);

    let r1 = run_analysis_default(&expr, &gene_sets, &design, &sequential).unwrap();
    let r4 = run_analysis_default(&expr, &gene_sets, &design, &threaded).unwrap();

    assert_eq!(r1.fit.gene_set_names, r4.fit.gene_set_names);
    // Tasks are independent and deterministic, so the numbers agree exactly
    // whatever the worker count.
    assert_eq!(r1.fit.rows, r4.fit.rows);
}

#[test]
fn test_single_gene_set_uses_single_probe_variant() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = GeneSetCollection::new(vec![gene_set("lone", &genes(0..1))]);
    let config = AnalysisConfig::new().with_gs_size_bounds(1, 500);

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    assert!(result.fit.get(0).is_some());
    let est = result.estimations[0].as_ref().unwrap();
    assert_eq!(est.shape(), (1, SUBJECTS.len(), TIMES.len()));
}

#[test]
fn test_grouped_analysis_carries_group_vector() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = GeneSetCollection::new(vec![gene_set("set_big", &genes(0..12))]);
    let config = AnalysisConfig::new().with_group_var("Arm");

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    let group = result.group.as_ref().expect("group vector should be present");
    assert_eq!(group.len(), SUBJECTS.len() * TIMES.len());
    assert_eq!(group[0], "active");
    assert_eq!(group[group.len() - 1], "placebo");
    assert!(result.fit.get(0).is_some());
    assert!(!result.separate_subjects);
}

#[test]
fn test_separate_subjects_analysis() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = GeneSetCollection::new(vec![gene_set("set_big", &genes(0..12))]);
    let config = AnalysisConfig::new().with_separate_subjects(true);

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();
    assert!(result.separate_subjects);
    assert!(result.group.is_none());
    assert!(result.fit.get(0).is_some());
}

#[test]
fn test_group_with_separate_subjects_is_fatal() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = standard_gene_sets();
    let config = AnalysisConfig::new()
        .with_group_var("Arm")
        .with_separate_subjects(true);

    assert!(matches!(
        run_analysis_default(&expr, &gene_sets, &design, &config),
        Err(TcgsaError::ConflictingConfig(_))
    ));
}

#[test]
fn test_spline_time_form_reports_df() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = GeneSetCollection::new(vec![gene_set("set_big", &genes(0..12))]);
    let config = AnalysisConfig::new().with_time_form("splines");

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    // 4 distinct time points -> 1 interior knot -> 2 basis columns.
    assert_eq!(result.spline_df, Some(2));
    assert_eq!(result.time_form, "splines");
    assert!(result.fit.get(0).is_some());
}

#[test]
fn test_progress_file_one_line_per_gene_set() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = standard_gene_sets();
    let monitor = NamedTempFile::new().unwrap();
    let config = AnalysisConfig::new()
        .with_workers(3)
        .with_monitor_file(monitor.path());

    run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    let content = std::fs::read_to_string(monitor.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in &lines {
        assert!(
            line.contains("/3 gene sets analyzed (geneset "),
            "unexpected progress line: {}",
            line
        );
    }
    // Counts are 1..=3 in arrival order, whatever that order was.
    let mut counts: Vec<char> = lines.iter().map(|l| l.chars().next().unwrap()).collect();
    counts.sort();
    assert_eq!(counts, vec!['1', '2', '3']);
}

#[test]
fn test_fit_table_tsv_roundtrip() {
    let expr = create_expression();
    let design = create_design();
    let gene_sets = standard_gene_sets();
    let config = AnalysisConfig::new();

    let result = run_analysis_default(&expr, &gene_sets, &design, &config).unwrap();

    let out = NamedTempFile::new().unwrap();
    result.fit.to_tsv(out.path()).unwrap();
    let content = std::fs::read_to_string(out.path()).unwrap();
    let lines: Vec<&str> = content.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("gene_set\tLR"));
    assert!(lines[2].starts_with("set_small\tNA"));
}
