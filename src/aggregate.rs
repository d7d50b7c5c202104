//! Per-model result averaging and the combined results table.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result, bail};
use indexmap::IndexMap;
use tracing::{info, warn};

use crate::config::ResultsConfig;
use crate::model::{ResultRow, SkippedModel};

const TABLE_HEADER: [&str; 3] = ["model", "category", "avg_score"];

/// Mean score per category, in first-appearance order.
pub type CategoryAverages = IndexMap<String, f64>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResultColumns<'a> {
    pub category: &'a str,
    pub score: &'a str,
}

impl<'a> From<&'a ResultsConfig> for ResultColumns<'a> {
    fn from(config: &'a ResultsConfig) -> Self {
        Self {
            category: &config.category_column,
            score: &config.score_column,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompiledTable {
    pub rows: Vec<ResultRow>,
    pub skipped: Vec<SkippedModel>,
}

/// Why a model produced no rows.
#[derive(Debug)]
pub enum ResultFileError {
    Missing,
    Malformed(anyhow::Error),
}

impl ResultFileError {
    pub fn reason(&self) -> String {
        match self {
            Self::Missing => "missing result file".to_string(),
            Self::Malformed(err) => format!("malformed result file: {err:#}"),
        }
    }
}

pub fn average_by_category(
    path: &Path,
    columns: &ResultColumns<'_>,
) -> Result<CategoryAverages, ResultFileError> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Err(ResultFileError::Missing);
        }
        Err(err) => {
            return Err(ResultFileError::Malformed(
                anyhow::Error::new(err).context(format!("failed to open {}", path.display())),
            ));
        }
    };

    read_averages(file, columns).map_err(ResultFileError::Malformed)
}

fn read_averages<R: std::io::Read>(
    input: R,
    columns: &ResultColumns<'_>,
) -> Result<CategoryAverages> {
    let mut reader = csv::ReaderBuilder::new().has_headers(true).from_reader(input);

    let headers = reader.headers().context("failed to read header row")?.clone();
    let category_index = column_index(&headers, columns.category)?;
    let score_index = column_index(&headers, columns.score)?;

    let mut sums: IndexMap<String, (f64, usize)> = IndexMap::new();
    for (row_index, record) in reader.records().enumerate() {
        let row = row_index + 1;
        let record = record.with_context(|| format!("failed to read data row {row}"))?;

        let category = record
            .get(category_index)
            .with_context(|| format!("data row {row} has no {} value", columns.category))?;
        let raw_score = record
            .get(score_index)
            .with_context(|| format!("data row {row} has no {} value", columns.score))?;
        let score = raw_score
            .trim()
            .parse::<f64>()
            .with_context(|| format!("data row {row} has invalid score {raw_score:?}"))?;
        if !score.is_finite() {
            bail!("data row {row} has non-finite score {raw_score:?}");
        }

        let entry = sums.entry(category.to_string()).or_insert((0.0, 0));
        entry.0 += score;
        entry.1 += 1;
    }

    Ok(sums
        .into_iter()
        .map(|(category, (sum, count))| (category, sum / count as f64))
        .collect())
}

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|header| header.trim() == name)
        .with_context(|| format!("missing column {name:?}"))
}

/// Averages every model's result file. Missing or malformed files are
/// recorded as skips and the remaining models still contribute rows.
pub fn compile_table(
    result_paths: &IndexMap<String, PathBuf>,
    columns: &ResultColumns<'_>,
) -> CompiledTable {
    let mut table = CompiledTable::default();

    for (model, path) in result_paths {
        match average_by_category(path, columns) {
            Ok(averages) => {
                info!(model = %model, categories = averages.len(), "averaged model results");
                table
                    .rows
                    .extend(averages.into_iter().map(|(category, avg_score)| ResultRow {
                        model: model.clone(),
                        category,
                        avg_score,
                    }));
            }
            Err(err) => {
                let reason = err.reason();
                warn!(model = %model, path = %path.display(), reason = %reason, "skipping model");
                table.skipped.push(SkippedModel {
                    model: model.clone(),
                    path: path.display().to_string(),
                    reason,
                });
            }
        }
    }

    table
}

pub fn write_results_table(path: &Path, rows: &[ResultRow]) -> Result<()> {
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("failed to create results table: {}", path.display()))?;

    writer
        .write_record(TABLE_HEADER)
        .with_context(|| format!("failed to write header to {}", path.display()))?;
    for row in rows {
        let score = format_score(row.avg_score);
        writer
            .write_record([row.model.as_str(), row.category.as_str(), score.as_str()])
            .with_context(|| format!("failed to write row to {}", path.display()))?;
    }
    writer
        .flush()
        .with_context(|| format!("failed to flush {}", path.display()))?;

    info!(path = %path.display(), rows = rows.len(), "wrote results table");
    Ok(())
}

/// Integral means keep one decimal so the column always reads as a float.
fn format_score(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const COLUMNS: ResultColumns<'static> = ResultColumns {
        category: "celltype",
        score: "mean average precision",
    };

    fn write_result(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).expect("result file should be written");
        path
    }

    #[test]
    fn average_by_category_takes_mean_per_category() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_result(
            dir.path(),
            "summary.csv",
            "dataset,celltype,mean average precision\n\
             d1,catA,1.0\n\
             d2,catA,3.0\n\
             d1,catB,2.0\n",
        );

        let averages = average_by_category(&path, &COLUMNS).expect("valid file");
        assert_eq!(averages.len(), 2);
        assert_eq!(averages["catA"], 2.0);
        assert_eq!(averages["catB"], 2.0);
        assert_eq!(averages.keys().collect::<Vec<_>>(), vec!["catA", "catB"]);
    }

    #[test]
    fn header_only_file_has_no_categories() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_result(dir.path(), "summary.csv", "celltype,mean average precision\n");

        let averages = average_by_category(&path, &COLUMNS).expect("valid file");
        assert!(averages.is_empty());
    }

    #[test]
    fn missing_and_malformed_files_are_distinguished() {
        let dir = tempfile::tempdir().expect("tempdir");

        let missing = average_by_category(&dir.path().join("absent.csv"), &COLUMNS)
            .expect_err("missing file");
        assert!(matches!(missing, ResultFileError::Missing));

        let no_score = write_result(dir.path(), "no_score.csv", "celltype,precision\nT-cell,0.4\n");
        let err = average_by_category(&no_score, &COLUMNS).expect_err("missing column");
        assert!(err.reason().contains("mean average precision"));

        let bad_score = write_result(
            dir.path(),
            "bad_score.csv",
            "celltype,mean average precision\nT-cell,high\n",
        );
        let err = average_by_category(&bad_score, &COLUMNS).expect_err("bad score");
        assert!(err.reason().starts_with("malformed result file"));

        let nan_score = write_result(
            dir.path(),
            "nan_score.csv",
            "celltype,mean average precision\nT-cell,NaN\n",
        );
        assert!(average_by_category(&nan_score, &COLUMNS).is_err());
    }

    #[test]
    fn compile_table_skips_models_without_results() {
        let dir = tempfile::tempdir().expect("tempdir");
        let beta = write_result(
            dir.path(),
            "beta.csv",
            "celltype,mean average precision\nT-cell,0.25\nB-cell,0.5\nT-cell,0.75\n",
        );

        let mut paths = IndexMap::new();
        paths.insert("alpha".to_string(), dir.path().join("alpha.csv"));
        paths.insert("beta".to_string(), beta);

        let table = compile_table(&paths, &COLUMNS);
        assert_eq!(
            table.rows,
            vec![
                ResultRow {
                    model: "beta".to_string(),
                    category: "T-cell".to_string(),
                    avg_score: 0.5,
                },
                ResultRow {
                    model: "beta".to_string(),
                    category: "B-cell".to_string(),
                    avg_score: 0.5,
                },
            ]
        );
        assert_eq!(table.skipped.len(), 1);
        assert_eq!(table.skipped[0].model, "alpha");
        assert_eq!(table.skipped[0].reason, "missing result file");
    }

    #[test]
    fn results_table_has_header_and_one_line_per_row() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("full_results_table.csv");
        let rows = vec![
            ResultRow {
                model: "alpha".to_string(),
                category: "T-cell".to_string(),
                avg_score: 0.5,
            },
            ResultRow {
                model: "beta".to_string(),
                category: "NK, cytotoxic".to_string(),
                avg_score: 0.75,
            },
        ];

        write_results_table(&path, &rows).expect("table should be written");

        let raw = fs::read_to_string(&path).expect("table readable");
        assert_eq!(
            raw,
            "model,category,avg_score\nalpha,T-cell,0.5\nbeta,\"NK, cytotoxic\",0.75\n"
        );
    }

    #[test]
    fn integral_scores_are_written_with_a_decimal_point() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("full_results_table.csv");
        let rows = vec![
            ResultRow {
                model: "alpha".to_string(),
                category: "T-cell".to_string(),
                avg_score: 2.0,
            },
            ResultRow {
                model: "alpha".to_string(),
                category: "B-cell".to_string(),
                avg_score: 0.0,
            },
        ];

        write_results_table(&path, &rows).expect("table should be written");

        let raw = fs::read_to_string(&path).expect("table readable");
        assert_eq!(raw, "model,category,avg_score\nalpha,T-cell,2.0\nalpha,B-cell,0.0\n");
    }
}
