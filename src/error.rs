use rusqlite::ErrorCode;
use thiserror::Error;

/// Failures surfaced by the catalog store.
///
/// `StorageUnavailable` and `SchemaConflict` are fatal at startup; the rest
/// fail only the request that hit them.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("schema conflict: {0}")]
    SchemaConflict(String),

    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("storage operation timed out: {0}")]
    StorageTimeout(String),
}

pub type Result<T> = std::result::Result<T, CatalogError>;

impl CatalogError {
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Whether the process should refuse to serve with this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_) | Self::SchemaConflict(_))
    }

    /// Classify a backend error raised while writing.
    pub(crate) fn from_write(err: rusqlite::Error) -> Self {
        match sqlite_code(&err) {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::StorageTimeout(err.to_string())
            }
            Some(code) if is_unavailable(code) => Self::StorageUnavailable(err.to_string()),
            _ => Self::StorageWrite(err.to_string()),
        }
    }

    /// Classify a backend error raised while reading or opening.
    pub(crate) fn from_read(err: rusqlite::Error) -> Self {
        match sqlite_code(&err) {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::StorageTimeout(err.to_string())
            }
            _ => Self::StorageUnavailable(err.to_string()),
        }
    }

    /// Classify a backend error raised while provisioning the schema.
    pub(crate) fn from_schema(err: rusqlite::Error) -> Self {
        match sqlite_code(&err) {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => {
                Self::StorageTimeout(err.to_string())
            }
            Some(code) if is_unavailable(code) => Self::StorageUnavailable(err.to_string()),
            _ => Self::SchemaConflict(err.to_string()),
        }
    }
}

fn sqlite_code(err: &rusqlite::Error) -> Option<ErrorCode> {
    match err {
        rusqlite::Error::SqliteFailure(inner, _) => Some(inner.code),
        _ => None,
    }
}

fn is_unavailable(code: ErrorCode) -> bool {
    matches!(
        code,
        ErrorCode::CannotOpen
            | ErrorCode::NotADatabase
            | ErrorCode::SystemIoFailure
            | ErrorCode::PermissionDenied
            | ErrorCode::DatabaseCorrupt
            | ErrorCode::ReadOnly
    )
}
