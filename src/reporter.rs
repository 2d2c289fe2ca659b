use std::collections::BTreeMap;

use serde::Serialize;

use crate::domain::{SampleType, SampleValue, Xref};
use crate::samples::Samples;

/// Separator used when summarizing text samples.
pub const TEXT_SEPARATOR: &str = ", ";

/// All measurements of one reporter occurrence, keyed by sample id.
///
/// Built by collecting every expression row that shares a group id. The xref is
/// filled in by the first row seen for the group.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReporterData {
    xref: Option<Xref>,
    group_id: i64,
    values: BTreeMap<i32, SampleValue>,
    /// Stored text of each value, kept for text summaries.
    #[serde(skip)]
    raw: BTreeMap<i32, String>,
}

impl ReporterData {
    pub fn new(xref: Option<Xref>, group_id: i64) -> Self {
        Self {
            xref,
            group_id,
            values: BTreeMap::new(),
            raw: BTreeMap::new(),
        }
    }

    pub fn xref(&self) -> Option<&Xref> {
        self.xref.as_ref()
    }

    pub fn group_id(&self) -> i64 {
        self.group_id
    }

    pub fn values(&self) -> &BTreeMap<i32, SampleValue> {
        &self.values
    }

    pub fn value(&self, sample_id: i32) -> Option<&SampleValue> {
        self.values.get(&sample_id)
    }

    /// The value as it was stored, before any numeric parsing.
    pub fn raw_value(&self, sample_id: i32) -> Option<&str> {
        self.raw.get(&sample_id).map(String::as_str)
    }

    pub(crate) fn set_xref(&mut self, xref: Xref) {
        self.xref = Some(xref);
    }

    pub(crate) fn set_sample_data(&mut self, sample_id: i32, raw: &str) {
        self.values.insert(sample_id, SampleValue::parse(raw));
        self.raw.insert(sample_id, raw.to_string());
    }

    pub(crate) fn set_value(&mut self, sample_id: i32, value: SampleValue) {
        self.raw.insert(sample_id, value.to_string());
        self.values.insert(sample_id, value);
    }

    /// Collapses duplicate reporters into one record.
    ///
    /// The sample set is taken from the first element. Numeric samples are
    /// averaged over the non-NaN values present; text samples are joined with
    /// [`TEXT_SEPARATOR`]. Reporters lacking a sample are left out of that
    /// sample's summary. Returns `None` for an empty list.
    pub fn summarize(rows: &[ReporterData], samples: &Samples) -> Option<ReporterData> {
        let first = rows.first()?;
        let mut summary = ReporterData::new(first.xref.clone(), first.group_id);

        for (&sample_id, first_value) in &first.values {
            let data_type = samples
                .get(sample_id)
                .map(|sample| sample.data_type)
                .unwrap_or(match first_value {
                    SampleValue::Number(_) => SampleType::Numeric,
                    SampleValue::Text(_) => SampleType::Text,
                });
            let value = match data_type {
                SampleType::Numeric => SampleValue::Number(average(
                    rows.iter().filter_map(|row| row.values.get(&sample_id)),
                )),
                SampleType::Text => SampleValue::Text(concatenate(
                    rows.iter().filter_map(|row| row.raw_value(sample_id)),
                )),
            };
            summary.set_value(sample_id, value);
        }

        Some(summary)
    }
}

fn average<'a>(values: impl Iterator<Item = &'a SampleValue>) -> f64 {
    let (sum, n) = values
        .filter_map(SampleValue::as_number)
        .filter(|number| !number.is_nan())
        .fold((0.0, 0usize), |(sum, n), number| (sum + number, n + 1));
    if n > 0 { sum / n as f64 } else { f64::NAN }
}

fn concatenate<'a>(values: impl Iterator<Item = &'a str>) -> String {
    values.collect::<Vec<_>>().join(TEXT_SEPARATOR)
}
