use std::fmt::Display;
use std::iter::Peekable;

use tracing::error;

use crate::domain::Xref;
use crate::reporter::ReporterData;

/// One persisted expression row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpressionRow {
    pub xref: Xref,
    pub sample_id: i32,
    pub data: String,
    pub group_id: i64,
}

/// Coalesces a group-ordered row stream into one [`ReporterData`] per group.
///
/// Grouping only holds when the input is ordered by group id, so the
/// constructor is crate-private: the store hands these out for the queries it
/// issues with `ORDER BY groupId`. A failure while advancing the cursor is
/// logged and ends the sequence.
pub struct GroupedRows<I, E>
where
    I: Iterator<Item = Result<ExpressionRow, E>>,
{
    rows: Peekable<I>,
    failed: bool,
}

impl<I, E> GroupedRows<I, E>
where
    I: Iterator<Item = Result<ExpressionRow, E>>,
    E: Display,
{
    pub(crate) fn new(rows: I) -> Self {
        Self {
            rows: rows.peekable(),
            failed: false,
        }
    }

    fn take_ok(&mut self) -> Option<ExpressionRow> {
        match self.rows.next()? {
            Ok(row) => Some(row),
            Err(err) => {
                error!(error = %err, "error while iterating over expression rows");
                self.failed = true;
                None
            }
        }
    }
}

impl<I, E> Iterator for GroupedRows<I, E>
where
    I: Iterator<Item = Result<ExpressionRow, E>>,
    E: Display,
{
    type Item = ReporterData;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let first = self.take_ok()?;
        let group = first.group_id;
        let mut data = ReporterData::new(None, group);
        data.set_xref(first.xref);
        data.set_sample_data(first.sample_id, &first.data);

        // Leave the cursor on the first row of the next group.
        loop {
            match self.rows.peek() {
                Some(Ok(row)) if row.group_id == group => {}
                _ => break,
            }
            if let Some(row) = self.take_ok() {
                data.set_sample_data(row.sample_id, &row.data);
            }
        }
        if matches!(self.rows.peek(), Some(Err(_))) {
            // Surface the failure on the next call; the current group is complete
            // up to the last row that could be read.
            let _ = self.take_ok();
        }
        Some(data)
    }
}
