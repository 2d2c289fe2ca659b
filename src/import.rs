use std::fs;
use std::sync::LazyLock;
use std::time::Instant;

use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::ResolvedImport;
use crate::connector::StoreConnector;
use crate::domain::{SampleType, Xref};
use crate::error::GexError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::ExpressionStore;

/// Lines inspected when guessing import settings.
pub const GUESS_SAMPLE_LINES: usize = 50;

/// Share of lines that must hold a system code for a code column to be assumed.
const SYSCODE_THRESHOLD: f64 = 0.9;

static SYSCODE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Z][a-z]?$").expect("static pattern"));

static DATASOURCE_PATTERNS: LazyLock<Vec<(&'static str, Regex)>> = LazyLock::new(|| {
    [
        ("En", r"^ENS[A-Z]*G\d{11}$"),
        ("L", r"^\d+$"),
        ("S", r"^([A-NR-Z][0-9][A-Z][A-Z0-9]{2}[0-9]|[OPQ][0-9][A-Z0-9]{3}[0-9])$"),
        ("Q", r"^[NX][MR]_\d+(\.\d+)?$"),
        ("X", r"^\d+(_[a-z]+)?_at$"),
        ("Ch", r"^HMDB\d{5,7}$"),
        ("Ck", r"^C\d{5}$"),
        ("Ce", r"^CHEBI:\d+$"),
    ]
    .into_iter()
    .map(|(code, pattern)| (code, Regex::new(pattern).expect("static pattern")))
    .collect()
});

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuessedSettings {
    /// Column whose cells look like system codes, if any.
    pub code_column: Option<usize>,
    /// Column holding the identifiers; 0 when no column stands out.
    pub id_column: usize,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub location: Option<Utf8PathBuf>,
    pub samples: usize,
    pub rows_added: usize,
    pub errors: Vec<String>,
    pub error_file: Option<Utf8PathBuf>,
    pub minimum: Option<f64>,
    pub maximum: Option<f64>,
    pub cancelled: bool,
    pub finished_at: String,
}

/// Guesses from the leading lines which column holds system codes, which one
/// holds identifiers and what datasource those identifiers belong to.
///
/// Matches are counted per column. A code column needs
/// [`SYSCODE_THRESHOLD`] of the lines to match; the identifier column is only
/// taken when its best datasource clearly beats the runner-up.
pub fn guess_settings(lines: &[&str], delimiter: &str) -> GuessedSettings {
    let sample: Vec<&str> = lines.iter().take(GUESS_SAMPLE_LINES).copied().collect();
    let width = sample
        .iter()
        .map(|line| line.split(delimiter).count())
        .max()
        .unwrap_or(0);
    if sample.is_empty() {
        return GuessedSettings {
            code_column: None,
            id_column: 0,
            data_source: None,
        };
    }

    let mut syscode_counts = vec![0usize; width];
    let mut counts = vec![vec![0usize; DATASOURCE_PATTERNS.len()]; width];
    for line in &sample {
        for (col, cell) in line.split(delimiter).map(str::trim).enumerate() {
            if SYSCODE_PATTERN.is_match(cell) {
                syscode_counts[col] += 1;
            }
            for (idx, (_, pattern)) in DATASOURCE_PATTERNS.iter().enumerate() {
                if pattern.is_match(cell) {
                    counts[col][idx] += 1;
                }
            }
        }
    }

    let rows = sample.len() as f64;
    let mut code_column: Option<(usize, f64)> = None;
    for (col, &count) in syscode_counts.iter().enumerate() {
        let fraction = count as f64 / rows;
        if fraction > 0.0 && code_column.is_none_or(|(_, max)| fraction > max) {
            code_column = Some((col, fraction));
        }
    }
    let code_column = code_column
        .filter(|(_, fraction)| *fraction >= SYSCODE_THRESHOLD)
        .map(|(col, _)| col);

    let mut best: Option<(usize, &str, f64)> = None;
    let mut second = 0.0;
    for (col, column_counts) in counts.iter().enumerate() {
        for (idx, (code, _)) in DATASOURCE_PATTERNS.iter().enumerate() {
            let fraction = column_counts[idx] as f64 / rows;
            let max = best.map_or(0.0, |(_, _, max)| max);
            if fraction > max {
                second = max;
                best = Some((col, *code, fraction));
            }
        }
    }

    let id_column = match best {
        Some((col, _, max)) if max > 2.0 * second && Some(col) != code_column => col,
        _ => 0,
    };
    GuessedSettings {
        code_column,
        id_column,
        data_source: best.map(|(_, code, _)| code.to_string()),
    }
}

/// Number of columns: the widest line among the header and the leading data
/// lines.
pub fn column_count(lines: &[&str], config: &ResolvedImport) -> usize {
    let first_row = if config.no_header {
        config.first_data_row
    } else {
        config.header_row
    };
    let start = first_row - 1;
    let header_lines = config.first_data_row - 1 - start;
    lines
        .iter()
        .skip(start)
        .take(header_lines + GUESS_SAMPLE_LINES)
        .map(|line| line.split(config.delimiter.as_str()).count())
        .max()
        .unwrap_or(0)
}

/// Column names for the import. Multiple header rows are joined with a space;
/// columns without a header, or all of them when there is no header, are named
/// `Column 1`, `Column 2`, ...
pub fn column_names(lines: &[&str], config: &ResolvedImport) -> Vec<String> {
    let width = column_count(lines, config);
    let mut names = vec![String::new(); width];
    if !config.no_header {
        let header_lines = lines
            .iter()
            .take(config.first_data_row - 1)
            .skip(config.header_row - 1);
        for line in header_lines {
            for (col, cell) in line.split(config.delimiter.as_str()).take(width).enumerate() {
                names[col].push(' ');
                names[col].push_str(cell);
            }
        }
    }
    names
        .into_iter()
        .enumerate()
        .map(|(col, name)| match name.trim() {
            "" => format!("Column {}", col + 1),
            name => name.to_string(),
        })
        .collect()
}

/// Fills in the code column, identifier column and datasource when the
/// configuration names neither a code column nor a datasource.
fn apply_guess(
    config: &ResolvedImport,
    data_lines: &[&str],
) -> Result<ResolvedImport, GexError> {
    let mut config = config.clone();
    if config.code_column.is_some() || config.data_source.is_some() {
        return Ok(config);
    }
    let guessed = guess_settings(data_lines, &config.delimiter);
    info!(?guessed, "guessed import settings");
    if !config.id_column_configured {
        config.id_column = guessed.id_column;
    }
    match guessed.code_column {
        Some(col) if col != config.id_column => config.code_column = Some(col),
        _ => {
            config.data_source = Some(guessed.data_source.ok_or_else(|| {
                GexError::Import("no datasource configured and none could be guessed".to_string())
            })?);
        }
    }
    Ok(config)
}

/// Imports a delimited text file into a new expression store.
///
/// Every data column becomes a sample and every data line one group. Lines
/// that cannot be imported are collected in the report and written to
/// `<store>.ex.txt`. A cancelled import leaves no finalized store behind.
pub fn import_txt(
    config: &ResolvedImport,
    connector: impl StoreConnector + 'static,
    sink: &dyn ProgressSink,
) -> Result<ImportReport, GexError> {
    let started = Instant::now();
    let content = fs::read_to_string(config.source.as_std_path())
        .map_err(|err| GexError::Import(format!("read {}: {err}", config.source)))?;
    let lines: Vec<&str> = content.lines().collect();
    let data_lines = lines.get(config.first_data_row - 1..).unwrap_or_default();

    let config = &apply_guess(config, data_lines)?;
    let data_source = match config.code_column {
        Some(_) => None,
        None => config.data_source.clone(),
    };

    let total_work = sink.total_work();
    let import_work = total_work * 8 / 10;
    let finalize_work = total_work - import_work;

    sink.event(ProgressEvent {
        message: format!("phase=Import; creating expression store {}", config.store),
        elapsed: None,
    });
    let mut store = ExpressionStore::create(config.store.clone(), connector)?;
    let mut report = ImportReport {
        location: None,
        samples: 0,
        rows_added: 0,
        errors: Vec::new(),
        error_file: None,
        minimum: None,
        maximum: None,
        cancelled: false,
        finished_at: String::new(),
    };

    sink.event(ProgressEvent {
        message: "phase=Import; processing headers".to_string(),
        elapsed: None,
    });
    let headers = column_names(&lines, config);
    let width = headers.len();
    if config.id_column >= width || config.code_column.is_some_and(|col| col >= width) {
        return Err(GexError::Import(format!(
            "identifier or system code column out of range for {width} columns"
        )));
    }
    let mut data_columns = Vec::new();
    for (col, header) in headers.iter().enumerate() {
        if sink.is_cancelled() {
            return Ok(cancelled(report));
        }
        if !config.is_data_column(col) {
            continue;
        }
        let sample_id = data_columns.len() as i32;
        let data_type = if config.is_string_column(col) {
            SampleType::Text
        } else {
            SampleType::Numeric
        };
        match store.add_sample(sample_id, header, data_type) {
            Ok(()) => data_columns.push((col, sample_id, data_type)),
            Err(err @ GexError::InvalidSampleName { .. }) => {
                report
                    .errors
                    .push(format!("Error in headerline, can't add column {col} due to: {err}"));
            }
            Err(err) => return Err(err),
        }
    }
    report.samples = data_columns.len();

    sink.event(ProgressEvent {
        message: "phase=Import; processing lines".to_string(),
        elapsed: None,
    });
    let per_line = if data_lines.is_empty() {
        0
    } else {
        import_work / data_lines.len() as u64
    };
    let mut group_id = 0i64;
    for (offset, line) in data_lines.iter().enumerate() {
        if sink.is_cancelled() {
            return Ok(cancelled(report));
        }
        let line_no = config.first_data_row + offset;
        let cells: Vec<&str> = line
            .splitn(width, config.delimiter.as_str())
            .collect();
        if cells.len() < width {
            report.errors.push(format!(
                "Number of columns in line {line_no} doesn't match number of header columns"
            ));
            sink.worked(per_line);
            continue;
        }

        let id = cells[config.id_column].trim();
        let code = match (config.code_column, &data_source) {
            (Some(col), _) => cells[col].trim(),
            (None, Some(code)) => code.as_str(),
            (None, None) => "",
        };
        if id.is_empty() || code.is_empty() {
            report
                .errors
                .push(format!("Line {line_no}:\tmissing identifier or system code"));
            sink.worked(per_line);
            continue;
        }
        let xref = Xref::new(id, code);

        for &(col, sample_id, data_type) in &data_columns {
            let mut value = cells[col];
            if data_type == SampleType::Numeric {
                if value.trim().is_empty() {
                    value = "NaN";
                } else if let Ok(number) = value.trim().parse::<f64>() {
                    track_range(&mut report, number);
                }
            }
            store.add_row(&xref, sample_id, value, group_id)?;
        }
        group_id += 1;
        report.rows_added += 1;
        sink.worked(per_line);
    }
    store.commit()?;

    sink.event(ProgressEvent {
        message: format!(
            "phase=Finalize; {} lines added, {} exceptions",
            report.rows_added,
            report.errors.len()
        ),
        elapsed: None,
    });
    let location = store.finalize()?;
    sink.worked(finalize_work);

    report.error_file = write_error_file(&config.store, &report.errors)?;
    report.location = Some(location);
    report.finished_at = chrono::Utc::now().to_rfc3339();

    let elapsed = started.elapsed();
    sink.event(ProgressEvent {
        message: format!("phase=Done; imported {} lines", report.rows_added),
        elapsed: Some(elapsed),
    });
    sink.finished();
    info!(
        rows = report.rows_added,
        samples = report.samples,
        errors = report.errors.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "expression data import finished"
    );
    Ok(report)
}

fn cancelled(mut report: ImportReport) -> ImportReport {
    warn!("expression data import cancelled");
    report.cancelled = true;
    report.finished_at = chrono::Utc::now().to_rfc3339();
    report
}

fn track_range(report: &mut ImportReport, number: f64) {
    if number.is_nan() {
        return;
    }
    report.minimum = Some(report.minimum.map_or(number, |min| min.min(number)));
    report.maximum = Some(report.maximum.map_or(number, |max| max.max(number)));
}

pub fn error_file_path(store: &Utf8Path) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{store}.ex.txt"))
}

fn write_error_file(store: &Utf8Path, errors: &[String]) -> Result<Option<Utf8PathBuf>, GexError> {
    let path = error_file_path(store);
    if errors.is_empty() {
        if path.as_std_path().exists() {
            fs::remove_file(path.as_std_path())
                .map_err(|err| GexError::Filesystem(err.to_string()))?;
        }
        return Ok(None);
    }
    let mut content = format!(
        "# import of {store} at {}\n",
        chrono::Utc::now().to_rfc3339()
    );
    for error in errors {
        content.push_str(error);
        content.push('\n');
    }
    fs::write(path.as_std_path(), content).map_err(|err| GexError::Filesystem(err.to_string()))?;
    warn!(count = errors.len(), file = %path, "exceptions during import");
    Ok(Some(path))
}
