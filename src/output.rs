use std::io::{self, Write};

use serde::Serialize;
use tracing::info;

use crate::cache::CacheReport;
use crate::domain::SampleType;
use crate::import::ImportReport;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::reporter::ReporterData;
use crate::samples::Samples;

#[derive(Debug, Clone, Serialize)]
pub struct SampleListing {
    pub samples: Vec<SampleEntry>,
    pub used_datasources: Vec<String>,
    pub row_count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SampleEntry {
    pub id: i32,
    pub name: String,
    pub data_type: String,
}

impl SampleListing {
    pub fn new(
        samples: &Samples,
        data_type: Option<SampleType>,
        used_datasources: Vec<String>,
        row_count: i64,
    ) -> Self {
        Self {
            samples: samples
                .of_type(data_type)
                .into_iter()
                .map(|sample| SampleEntry {
                    id: sample.id,
                    name: sample.name.clone(),
                    data_type: sample.data_type.to_string(),
                })
                .collect(),
            used_datasources,
            row_count,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupResult {
    pub report: CacheReport,
    pub entries: Vec<LookupEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupEntry {
    pub xref: String,
    pub reporters: Vec<ReporterData>,
    pub summary: Option<ReporterData>,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_import(result: &ImportReport) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_samples(result: &SampleListing) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_lookup(result: &LookupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

/// Forwards progress events to the log.
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn event(&self, event: ProgressEvent) {
        match event.elapsed {
            Some(elapsed) => info!(elapsed_ms = elapsed.as_millis() as u64, "{}", event.message),
            None => info!("{}", event.message),
        }
    }
}

/// Writes one tab-separated line per reporter: id, code, group, then the
/// value of every sample in id order.
pub fn write_tsv<W: Write>(
    out: &mut W,
    samples: &Samples,
    rows: impl Iterator<Item = ReporterData>,
) -> io::Result<usize> {
    let ordered = samples.ordered();
    let mut header = vec!["id".to_string(), "code".to_string(), "group".to_string()];
    header.extend(ordered.iter().map(|sample| sample.name.clone()));
    writeln!(out, "{}", header.join("\t"))?;

    let mut written = 0;
    for row in rows {
        let (id, code) = row
            .xref()
            .map(|xref| (xref.id().to_string(), xref.code().to_string()))
            .unwrap_or_default();
        let mut cells = vec![id, code, row.group_id().to_string()];
        cells.extend(ordered.iter().map(|sample| {
            row.value(sample.id)
                .map(ToString::to_string)
                .unwrap_or_default()
        }));
        writeln!(out, "{}", cells.join("\t"))?;
        written += 1;
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Sample;

    #[test]
    fn listing_filters_by_data_type() {
        let samples = Samples::new(vec![
            Sample::new(0, "ratio", SampleType::Numeric),
            Sample::new(1, "call", SampleType::Text),
            Sample::new(2, "pvalue", SampleType::Numeric),
        ]);
        let listing = SampleListing::new(&samples, Some(SampleType::Numeric), vec![], 0);
        let names: Vec<&str> = listing.samples.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["ratio", "pvalue"]);

        let all = SampleListing::new(&samples, None, vec!["L".to_string()], 3);
        assert_eq!(all.samples.len(), 3);
        assert_eq!(all.samples[1].data_type, "text");
    }
}
