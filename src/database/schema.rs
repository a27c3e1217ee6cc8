use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{CatalogError, Result};

pub const SCHEMA_VERSION: i64 = 1;

pub const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS projects (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        src TEXT NOT NULL,
        name TEXT NOT NULL,
        logo TEXT NOT NULL DEFAULT '',
        description TEXT NOT NULL DEFAULT '',
        class_name TEXT NOT NULL DEFAULT '',
        info_description TEXT NOT NULL DEFAULT '',
        about_description TEXT NOT NULL DEFAULT ''
    );

    CREATE TABLE IF NOT EXISTS tags (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        category TEXT UNIQUE NOT NULL
    );

    CREATE TABLE IF NOT EXISTS project_tags (
        project_id INTEGER NOT NULL,
        tag_id INTEGER NOT NULL,
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE,
        FOREIGN KEY(tag_id) REFERENCES tags(id),
        PRIMARY KEY(project_id, tag_id)
    );

    CREATE TABLE IF NOT EXISTS project_images (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        project_id INTEGER NOT NULL,
        src TEXT NOT NULL,
        alt TEXT NOT NULL DEFAULT '',
        hover_title TEXT NOT NULL DEFAULT '',
        hover_subtitle TEXT NOT NULL DEFAULT '',
        FOREIGN KEY(project_id) REFERENCES projects(id) ON DELETE CASCADE
    );

    CREATE INDEX IF NOT EXISTS idx_project_images_project ON project_images(project_id);

    CREATE TABLE IF NOT EXISTS seed_imports (
        digest TEXT PRIMARY KEY,
        source TEXT NOT NULL,
        project_count INTEGER NOT NULL,
        imported_at TEXT NOT NULL DEFAULT (datetime('now'))
    );
";

/// Columns the repository reads and writes, per table.
const EXPECTED_COLUMNS: &[(&str, &[&str])] = &[
    (
        "projects",
        &[
            "id",
            "src",
            "name",
            "logo",
            "description",
            "class_name",
            "info_description",
            "about_description",
        ],
    ),
    ("tags", &["id", "category"]),
    ("project_tags", &["project_id", "tag_id"]),
    (
        "project_images",
        &["id", "project_id", "src", "alt", "hover_title", "hover_subtitle"],
    ),
    (
        "seed_imports",
        &["digest", "source", "project_count", "imported_at"],
    ),
];

/// Provision the catalog tables. Safe to call on every startup.
///
/// Tables left behind by an incompatible layout are not altered; they are
/// reported as [`CatalogError::SchemaConflict`].
pub fn initialize(conn: &mut Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(CatalogError::SchemaConflict(format!(
            "store is at schema version {}, this build understands up to {}",
            found, SCHEMA_VERSION
        )));
    }

    let tx = conn.transaction().map_err(CatalogError::from_schema)?;
    tx.execute_batch(SCHEMA).map_err(CatalogError::from_schema)?;
    verify_layout(&tx)?;
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(CatalogError::from_schema)?;
    tx.commit().map_err(CatalogError::from_schema)?;

    if found == 0 {
        info!(version = SCHEMA_VERSION, "Provisioned catalog schema");
    } else {
        debug!(version = found, "Catalog schema already present");
    }
    Ok(())
}

/// Check that an existing store matches the layout this build expects,
/// without creating anything.
pub fn verify(conn: &Connection) -> Result<()> {
    let found = user_version(conn)?;
    if found != SCHEMA_VERSION {
        return Err(CatalogError::SchemaConflict(format!(
            "expected schema version {}, found {}",
            SCHEMA_VERSION, found
        )));
    }
    verify_layout(conn)
}

fn verify_layout(conn: &Connection) -> Result<()> {
    for (table, columns) in EXPECTED_COLUMNS {
        let present = table_columns(conn, table)?;
        if present.is_empty() {
            return Err(CatalogError::SchemaConflict(format!(
                "table {} is missing",
                table
            )));
        }
        if let Some(missing) = columns.iter().find(|c| !present.iter().any(|p| p == *c)) {
            return Err(CatalogError::SchemaConflict(format!(
                "table {} has no column {}",
                table, missing
            )));
        }
    }

    // Tag reuse relies on the conflict target.
    if !has_unique_index(conn, "tags", "category")? {
        return Err(CatalogError::SchemaConflict(
            "tags.category is not unique".to_string(),
        ));
    }
    Ok(())
}

fn user_version(conn: &Connection) -> Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(CatalogError::from_schema)
}

fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info(\"{}\")", table))
        .map_err(CatalogError::from_schema)?;
    let columns = stmt
        .query_map([], |row| row.get::<_, String>("name"))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(CatalogError::from_schema)?;
    Ok(columns)
}

fn has_unique_index(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn
        .prepare(&format!("PRAGMA index_list(\"{}\")", table))
        .map_err(CatalogError::from_schema)?;
    let indexes = stmt
        .query_map([], |row| {
            Ok((row.get::<_, String>("name")?, row.get::<_, i64>("unique")?))
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(CatalogError::from_schema)?;

    for (index, unique) in indexes {
        if unique != 1 {
            continue;
        }
        let mut stmt = conn
            .prepare(&format!("PRAGMA index_info(\"{}\")", index))
            .map_err(CatalogError::from_schema)?;
        let columns = stmt
            .query_map([], |row| row.get::<_, String>("name"))
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(CatalogError::from_schema)?;
        if columns.len() == 1 && columns[0] == column {
            return Ok(true);
        }
    }
    Ok(false)
}
