use std::path::{Path, PathBuf};
use std::time::Duration;

use rusqlite::Connection;
use tracing::debug;

use crate::database::repo::CatalogRepository;
use crate::database::schema;
use crate::error::{CatalogError, Result};
use crate::utils::config::CatalogConfig;

/// Handle to the catalog's backing SQLite file.
///
/// Constructed once at startup and handed to whatever needs a connection;
/// every connection it opens carries the same pragmas.
#[derive(Debug, Clone)]
pub struct Store {
    path: PathBuf,
    busy_timeout: Duration,
}

impl Store {
    pub fn new(path: impl Into<PathBuf>, busy_timeout: Duration) -> Self {
        Self {
            path: path.into(),
            busy_timeout,
        }
    }

    pub fn from_config(config: &CatalogConfig) -> Self {
        Self::new(&config.db_path, config.busy_timeout)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open a fresh connection with foreign keys enforced and a bounded wait
    /// on locks held by other connections.
    pub fn open(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(|e| {
            CatalogError::StorageUnavailable(format!("{}: {}", self.path.display(), e))
        })?;
        conn.busy_timeout(self.busy_timeout)
            .map_err(CatalogError::from_read)?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(CatalogError::from_read)?;
        // WAL lets readers proceed while the writer holds its transaction.
        conn.query_row("PRAGMA journal_mode = WAL", [], |_| Ok(()))
            .map_err(CatalogError::from_read)?;
        debug!(path = %self.path.display(), "Opened catalog connection");
        Ok(conn)
    }

    /// Provision the schema and return a repository over the new connection.
    /// Errors here are fatal: the catalog must not be served half-ready.
    pub fn initialize(&self) -> Result<CatalogRepository> {
        let mut conn = self.open()?;
        schema::initialize(&mut conn)?;
        Ok(CatalogRepository::new(conn))
    }

    /// Open an additional repository over an already provisioned store.
    pub fn repository(&self) -> Result<CatalogRepository> {
        let conn = self.open()?;
        schema::verify(&conn)?;
        Ok(CatalogRepository::new(conn))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn store_in(dir: &TempDir) -> Store {
        Store::new(dir.path().join("portfolio.db"), Duration::from_millis(200))
    }

    #[test]
    fn test_open_enables_foreign_keys() {
        let dir = TempDir::new().unwrap();
        let conn = store_in(&dir).open().unwrap();

        let enabled: i32 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[test]
    fn test_repository_requires_initialization() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);

        assert!(matches!(
            store.repository().unwrap_err(),
            CatalogError::SchemaConflict(_)
        ));

        store.initialize().unwrap();
        assert!(store.repository().is_ok());
    }

    #[test]
    fn test_garbage_file_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = store_in(&dir);
        fs::write(store.path(), vec![b'x'; 4096]).unwrap();

        let err = store.initialize().unwrap_err();
        assert!(matches!(err, CatalogError::StorageUnavailable(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_directory_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(
            dir.path().join("no-such-dir").join("portfolio.db"),
            Duration::from_millis(200),
        );

        assert!(matches!(
            store.initialize().unwrap_err(),
            CatalogError::StorageUnavailable(_)
        ));
    }
}
