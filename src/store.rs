use std::cell::OnceCell;
use std::collections::BTreeMap;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Row, Statement, params};
use tracing::{debug, info, warn};

use crate::connector::{ConnectMode, StoreConnection, StoreConnector};
use crate::domain::{
    DATA_VALUE_LEN, SAMPLE_NAME_LEN, Sample, SampleType, Xref, truncate_chars,
};
use crate::error::GexError;
use crate::reporter::ReporterData;
use crate::resolver::DatasourceFilter;
use crate::rows::{ExpressionRow, GroupedRows};
use crate::samples::Samples;

/// Schema version written to the `info` table.
pub const GEX_COMPAT_VERSION: i64 = 2;

/// Expression rows inserted between two automatic commits.
pub const COMMIT_INTERVAL: usize = 1000;

const DROP_TABLES: [&str; 3] = [
    "DROP TABLE info",
    "DROP TABLE samples",
    "DROP TABLE expression",
];

const CREATE_INDICES: [&str; 5] = [
    "CREATE INDEX i_expression_id ON expression(id)",
    "CREATE INDEX i_expression_idSample ON expression(idSample)",
    "CREATE INDEX i_expression_data ON expression(data)",
    "CREATE INDEX i_expression_code ON expression(code)",
    "CREATE INDEX i_expression_groupId ON expression(groupId)",
];

const SELECT_ROWS: &str = "SELECT id, code, idSample, data, groupId FROM expression";

/// A relational store of per-sample expression values.
///
/// A store is written once (create, add samples and rows, finalize) and read
/// afterwards. The sample registry and the datasource filter are loaded on
/// first access and kept for the lifetime of the connection.
pub struct ExpressionStore {
    location: Utf8PathBuf,
    connector: Box<dyn StoreConnector>,
    handle: StoreConnection,
    commit_count: usize,
    samples: OnceCell<Samples>,
    used_datasources: OnceCell<DatasourceFilter>,
}

impl ExpressionStore {
    /// Creates an empty store at `location`, replacing any existing one.
    pub fn create(
        location: impl Into<Utf8PathBuf>,
        connector: impl StoreConnector + 'static,
    ) -> Result<Self, GexError> {
        let location = location.into();
        let handle = connector.create_connection(&location, ConnectMode::Recreate)?;
        let mut store = Self::with_handle(location, Box::new(connector), handle);
        store.create_schema()?;
        info!(location = %store.location, "created expression store");
        Ok(store)
    }

    /// Opens a finalized store for reading.
    pub fn open(
        location: impl Into<Utf8PathBuf>,
        connector: impl StoreConnector + 'static,
    ) -> Result<Self, GexError> {
        let location = location.into();
        let handle = connector.create_connection(&location, ConnectMode::Open)?;
        debug!(location = %location, "opened expression store");
        Ok(Self::with_handle(location, Box::new(connector), handle))
    }

    fn with_handle(
        location: Utf8PathBuf,
        connector: Box<dyn StoreConnector>,
        handle: StoreConnection,
    ) -> Self {
        Self {
            location,
            connector,
            handle,
            commit_count: 0,
            samples: OnceCell::new(),
            used_datasources: OnceCell::new(),
        }
    }

    pub fn location(&self) -> &Utf8Path {
        &self.location
    }

    /// Drops and recreates the tables, then starts the write transaction.
    pub fn create_schema(&mut self) -> Result<(), GexError> {
        let conn = self.handle.connection();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK").map_err(GexError::schema)?;
        }
        for statement in DROP_TABLES {
            if let Err(err) = conn.execute(statement, []) {
                warn!(%err, statement, "unable to drop expression data table");
            }
        }
        conn.execute("CREATE TABLE info (version INTEGER PRIMARY KEY)", [])
            .map_err(GexError::schema)?;
        conn.execute("INSERT INTO info VALUES (?1)", params![GEX_COMPAT_VERSION])
            .map_err(GexError::schema)?;
        conn.execute(
            &format!(
                "CREATE TABLE samples (idSample INTEGER PRIMARY KEY, name VARCHAR({SAMPLE_NAME_LEN}), dataType INTEGER)"
            ),
            [],
        )
        .map_err(GexError::schema)?;
        conn.execute(
            &format!(
                "CREATE TABLE expression (id VARCHAR(50), code VARCHAR(50), idSample INTEGER, data VARCHAR({DATA_VALUE_LEN}), groupId INTEGER)"
            ),
            [],
        )
        .map_err(GexError::schema)?;
        conn.execute_batch("BEGIN").map_err(GexError::schema)?;
        self.commit_count = 0;
        self.samples.take();
        self.used_datasources.take();
        Ok(())
    }

    /// Registers a sample and commits right away.
    pub fn add_sample(
        &mut self,
        id: i32,
        name: &str,
        data_type: SampleType,
    ) -> Result<(), GexError> {
        if name.chars().count() > SAMPLE_NAME_LEN {
            return Err(GexError::InvalidSampleName {
                name: name.to_string(),
                max: SAMPLE_NAME_LEN,
            });
        }
        self.handle
            .connection()
            .prepare_cached("INSERT INTO samples (idSample, name, dataType) VALUES (?1, ?2, ?3)")
            .and_then(|mut stmt| stmt.execute(params![id, name, data_type.code()]))
            .map_err(GexError::query)?;
        self.commit()?;
        self.samples.take();
        Ok(())
    }

    /// Inserts one expression row. Values longer than [`DATA_VALUE_LEN`]
    /// characters are truncated. Commits every [`COMMIT_INTERVAL`] rows; the
    /// caller commits after the last one.
    pub fn add_row(
        &mut self,
        xref: &Xref,
        sample_id: i32,
        value: &str,
        group_id: i64,
    ) -> Result<(), GexError> {
        let value = truncate_chars(value, DATA_VALUE_LEN);
        self.handle
            .connection()
            .prepare_cached(
                "INSERT INTO expression (id, code, idSample, data, groupId) VALUES (?1, ?2, ?3, ?4, ?5)",
            )
            .and_then(|mut stmt| {
                stmt.execute(params![xref.id(), xref.code(), sample_id, value, group_id])
            })
            .map_err(GexError::query)?;
        self.used_datasources.take();
        self.commit_count += 1;
        if self.commit_count % COMMIT_INTERVAL == 0 {
            self.commit()?;
        }
        Ok(())
    }

    /// Commits pending inserts and keeps the write transaction open.
    pub fn commit(&mut self) -> Result<(), GexError> {
        let conn = self.handle.connection();
        if !conn.is_autocommit() {
            conn.execute_batch("COMMIT; BEGIN").map_err(GexError::query)?;
        }
        Ok(())
    }

    /// Builds the secondary indices. Run once, after the bulk load.
    pub fn create_indices(&self) -> Result<(), GexError> {
        let conn = self.handle.connection();
        for statement in CREATE_INDICES {
            conn.execute(statement, []).map_err(GexError::schema)?;
        }
        Ok(())
    }

    /// Commits, compacts, indexes and closes the store.
    ///
    /// The backend may move the store while finalizing; the returned location
    /// is the one to open afterwards.
    pub fn finalize(self) -> Result<Utf8PathBuf, GexError> {
        {
            let conn = self.handle.connection();
            if !conn.is_autocommit() {
                conn.execute_batch("COMMIT").map_err(GexError::query)?;
            }
        }
        self.connector.compact(self.handle.connection())?;
        self.create_indices()?;
        let Self {
            location,
            connector,
            handle,
            ..
        } = self;
        let finalized = connector.close_and_finalize(handle, &location)?;
        info!(from = %location, to = %finalized, "finalized expression store");
        Ok(finalized)
    }

    /// The sample registry, read from the store on first call.
    pub fn samples(&self) -> Result<&Samples, GexError> {
        if let Some(samples) = self.samples.get() {
            return Ok(samples);
        }
        let loaded = self.load_samples()?;
        Ok(self.samples.get_or_init(|| loaded))
    }

    fn load_samples(&self) -> Result<Samples, GexError> {
        let mut stmt = self
            .handle
            .connection()
            .prepare("SELECT idSample, name, dataType FROM samples")
            .map_err(GexError::query)?;
        let raw = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i32>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })
            .map_err(GexError::query)?;
        let mut samples = Vec::new();
        for item in raw {
            let (id, name, code) = item.map_err(GexError::query)?;
            samples.push(Sample::new(id, name, SampleType::from_code(code)?));
        }
        debug!(count = samples.len(), "loaded sample registry");
        Ok(Samples::new(samples))
    }

    pub fn sample(&self, id: i32) -> Result<Option<&Sample>, GexError> {
        Ok(self.samples()?.get(id))
    }

    pub fn find_sample(&self, name: &str) -> Result<Option<&Sample>, GexError> {
        Ok(self.samples()?.find(name))
    }

    pub fn ordered_samples(&self) -> Result<Vec<&Sample>, GexError> {
        Ok(self.samples()?.ordered())
    }

    /// Datasource codes present in the expression rows, scanned on first call.
    pub fn used_datasources(&self) -> Result<&DatasourceFilter, GexError> {
        if let Some(filter) = self.used_datasources.get() {
            return Ok(filter);
        }
        let mut stmt = self
            .handle
            .connection()
            .prepare("SELECT code FROM expression GROUP BY code")
            .map_err(GexError::query)?;
        let codes = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(GexError::query)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(GexError::query)?;
        let filter = DatasourceFilter::new(codes);
        Ok(self.used_datasources.get_or_init(|| filter))
    }

    /// All rows for the given reporters, merged into one record per group id
    /// and ordered by group id.
    pub fn data<'a>(
        &self,
        dest_refs: impl IntoIterator<Item = &'a Xref>,
    ) -> Result<Vec<ReporterData>, GexError> {
        let mut stmt = self
            .handle
            .connection()
            .prepare_cached(&format!("{SELECT_ROWS} WHERE id = ?1 AND code = ?2"))
            .map_err(GexError::query)?;
        let mut groups = BTreeMap::<i64, ReporterData>::new();
        for dest in dest_refs {
            let rows = stmt
                .query_map(params![dest.id(), dest.code()], read_row)
                .map_err(GexError::query)?;
            for row in rows {
                let row = row.map_err(GexError::query)?;
                groups
                    .entry(row.group_id)
                    .or_insert_with(|| ReporterData::new(Some(row.xref.clone()), row.group_id))
                    .set_sample_data(row.sample_id, &row.data);
            }
        }
        Ok(groups.into_values().collect())
    }

    /// The record for one group id. Empty when no row has that group.
    pub fn row(&self, group_id: i64) -> Result<ReporterData, GexError> {
        let mut stmt = self
            .handle
            .connection()
            .prepare_cached(&format!("{SELECT_ROWS} WHERE groupId = ?1"))
            .map_err(GexError::query)?;
        let rows = stmt
            .query_map(params![group_id], read_row)
            .map_err(GexError::query)?;
        let mut result = ReporterData::new(None, group_id);
        for row in rows {
            let row = row.map_err(GexError::query)?;
            if result.xref().is_none() {
                result.set_xref(row.xref);
            }
            result.set_sample_data(row.sample_id, &row.data);
        }
        Ok(result)
    }

    /// Highest group id plus one; zero for an empty store.
    pub fn row_count(&self) -> Result<i64, GexError> {
        let max: Option<i64> = self
            .handle
            .connection()
            .query_row("SELECT MAX(groupId) FROM expression", [], |row| row.get(0))
            .map_err(GexError::query)?;
        Ok(max.map_or(0, |max| max + 1))
    }

    /// Prepares a full scan ordered by group id.
    pub fn scan(&self) -> Result<GroupScan<'_>, GexError> {
        let stmt = self
            .handle
            .connection()
            .prepare(&format!("{SELECT_ROWS} ORDER BY groupId"))
            .map_err(GexError::query)?;
        Ok(GroupScan { stmt })
    }
}

/// A prepared full scan. Each call to [`GroupScan::groups`] restarts it.
pub struct GroupScan<'conn> {
    stmt: Statement<'conn>,
}

impl GroupScan<'_> {
    pub fn groups(&mut self) -> Result<impl Iterator<Item = ReporterData> + '_, GexError> {
        let rows = self
            .stmt
            .query_map([], read_row as RowReader)
            .map_err(GexError::query)?;
        Ok(GroupedRows::new(rows))
    }
}

type RowReader = fn(&Row<'_>) -> rusqlite::Result<ExpressionRow>;

fn read_row(row: &Row<'_>) -> rusqlite::Result<ExpressionRow> {
    Ok(ExpressionRow {
        xref: Xref::new(row.get::<_, String>(0)?, row.get::<_, String>(1)?),
        sample_id: row.get(2)?,
        data: row.get(3)?,
        group_id: row.get(4)?,
    })
}
