use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use rusqlite::{Connection, OpenFlags};
use tempfile::TempDir;
use tracing::debug;

use crate::error::GexError;
use crate::fs_util::{pack_dir, unpack_store};

/// File name of the database inside an archive store.
pub const ARCHIVE_DB_NAME: &str = "expression.sqlite";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectMode {
    /// Open an existing, finalized store read-only.
    Open,
    /// Remove whatever is at the location and start an empty store.
    Recreate,
}

/// A live connection plus whatever scratch space the backend needed to open it.
pub struct StoreConnection {
    conn: Connection,
    // Declared after `conn` so the connection closes before the directory goes.
    _scratch: Option<TempDir>,
}

impl StoreConnection {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn,
            _scratch: None,
        }
    }

    pub fn with_scratch(conn: Connection, scratch: TempDir) -> Self {
        Self {
            conn,
            _scratch: Some(scratch),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn close(self) -> Result<(), GexError> {
        self.conn
            .close()
            .map_err(|(_, err)| GexError::StoreQuery(err.to_string()))
    }
}

/// Backend hooks of an expression store.
///
/// Finalizing may move the store; the returned location replaces the old one.
pub trait StoreConnector: Send + Sync {
    fn create_connection(
        &self,
        location: &Utf8Path,
        mode: ConnectMode,
    ) -> Result<StoreConnection, GexError>;

    fn compact(&self, conn: &Connection) -> Result<(), GexError>;

    fn close_and_finalize(
        &self,
        conn: StoreConnection,
        location: &Utf8Path,
    ) -> Result<Utf8PathBuf, GexError>;
}

/// Single-file SQLite store. Finalizing keeps the location.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteConnector;

impl StoreConnector for SqliteConnector {
    fn create_connection(
        &self,
        location: &Utf8Path,
        mode: ConnectMode,
    ) -> Result<StoreConnection, GexError> {
        let conn = match mode {
            ConnectMode::Recreate => {
                if location.as_std_path().exists() {
                    fs::remove_file(location.as_std_path())
                        .map_err(|err| GexError::Schema(err.to_string()))?;
                }
                if let Some(parent) = location.parent() {
                    fs::create_dir_all(parent.as_std_path())
                        .map_err(|err| GexError::Schema(err.to_string()))?;
                }
                Connection::open(location.as_std_path()).map_err(GexError::schema)?
            }
            ConnectMode::Open => open_read_only(location)?,
        };
        Ok(StoreConnection::new(conn))
    }

    fn compact(&self, conn: &Connection) -> Result<(), GexError> {
        conn.execute_batch("VACUUM").map_err(GexError::query)
    }

    fn close_and_finalize(
        &self,
        conn: StoreConnection,
        location: &Utf8Path,
    ) -> Result<Utf8PathBuf, GexError> {
        conn.close()?;
        Ok(location.to_owned())
    }
}

/// Store built inside a working directory and shipped as a zip archive.
///
/// While loading, `location` is a directory holding [`ARCHIVE_DB_NAME`].
/// Finalizing packs it into `<location>.zip` and removes the directory.
/// Opening an archive unpacks it into a scratch directory for the lifetime of
/// the connection.
#[derive(Debug, Clone, Copy, Default)]
pub struct ArchiveConnector;

impl ArchiveConnector {
    pub fn archive_path(location: &Utf8Path) -> Utf8PathBuf {
        Utf8PathBuf::from(format!("{location}.zip"))
    }
}

impl StoreConnector for ArchiveConnector {
    fn create_connection(
        &self,
        location: &Utf8Path,
        mode: ConnectMode,
    ) -> Result<StoreConnection, GexError> {
        match mode {
            ConnectMode::Recreate => {
                if location.as_std_path().exists() {
                    fs::remove_dir_all(location.as_std_path())
                        .map_err(|err| GexError::Schema(err.to_string()))?;
                }
                fs::create_dir_all(location.as_std_path())
                    .map_err(|err| GexError::Schema(err.to_string()))?;
                let conn = Connection::open(location.join(ARCHIVE_DB_NAME).as_std_path())
                    .map_err(GexError::schema)?;
                Ok(StoreConnection::new(conn))
            }
            ConnectMode::Open if location.as_std_path().is_dir() => {
                let conn = open_read_only(&location.join(ARCHIVE_DB_NAME))?;
                Ok(StoreConnection::new(conn))
            }
            ConnectMode::Open => {
                let scratch = tempfile::Builder::new()
                    .prefix("kira-gex-open")
                    .tempdir()
                    .map_err(|err| GexError::Filesystem(err.to_string()))?;
                let db_path =
                    unpack_store(location.as_std_path(), ARCHIVE_DB_NAME, scratch.path())?;
                let db_path = Utf8PathBuf::from_path_buf(db_path)
                    .map_err(|_| GexError::Filesystem("invalid scratch path".to_string()))?;
                debug!(archive = %location, scratch = %db_path, "unpacked store archive");
                let conn = open_read_only(&db_path)?;
                Ok(StoreConnection::with_scratch(conn, scratch))
            }
        }
    }

    fn compact(&self, conn: &Connection) -> Result<(), GexError> {
        conn.execute_batch("VACUUM").map_err(GexError::query)
    }

    fn close_and_finalize(
        &self,
        conn: StoreConnection,
        location: &Utf8Path,
    ) -> Result<Utf8PathBuf, GexError> {
        conn.close()?;
        let archive = Self::archive_path(location);
        pack_dir(location.as_std_path(), archive.as_std_path())?;
        fs::remove_dir_all(location.as_std_path())
            .map_err(|err| GexError::Filesystem(err.to_string()))?;
        debug!(from = %location, to = %archive, "packed store into archive");
        Ok(archive)
    }
}

fn open_read_only(path: &Utf8Path) -> Result<Connection, GexError> {
    if !path.as_std_path().is_file() {
        return Err(GexError::StoreQuery(format!("no expression store at {path}")));
    }
    Connection::open_with_flags(
        path.as_std_path(),
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(GexError::query)
}
