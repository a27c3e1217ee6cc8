use rusqlite::{params, Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, info};

use crate::error::{CatalogError, Result};
use crate::model::{
    ImageInput, ProjectAggregate, ProjectId, ProjectInfo, ProjectPage, StoredProject, Tag,
    TagInput,
};

/// Create and read operations over the catalog tables.
///
/// The catalog is append-only: there is no update or delete.
#[derive(Debug)]
pub struct CatalogRepository {
    conn: Connection,
}

impl CatalogRepository {
    /// Wrap a connection whose schema has already been provisioned.
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Persist a project with its tags and images; returns the new id.
    ///
    /// All four tables are written in one transaction, so a failure leaves
    /// no partial project behind.
    pub fn insert_project(&mut self, project: &ProjectAggregate) -> Result<ProjectId> {
        project.validate()?;

        let tx = self.begin_write()?;
        let id = insert_aggregate(&tx, project)?;
        tx.commit().map_err(CatalogError::from_write)?;

        info!(
            project_id = %id,
            tags = project.info.tags.len(),
            images = project.page.images.len(),
            "Inserted project"
        );
        Ok(id)
    }

    /// Persist several projects atomically. Every project is validated
    /// before the first write.
    pub fn insert_projects(&mut self, projects: &[ProjectAggregate]) -> Result<Vec<ProjectId>> {
        for project in projects {
            project.validate()?;
        }

        let tx = self.begin_write()?;
        let ids = projects
            .iter()
            .map(|p| insert_aggregate(&tx, p))
            .collect::<Result<Vec<_>>>()?;
        tx.commit().map_err(CatalogError::from_write)?;

        info!(count = ids.len(), "Inserted project batch");
        Ok(ids)
    }

    /// Insert the projects parsed from one seed file and record its digest,
    /// unless a file with the same digest was imported before.
    ///
    /// Returns `None` when the file was already imported.
    pub fn import_seed(
        &mut self,
        digest: &str,
        source: &str,
        projects: &[ProjectAggregate],
    ) -> Result<Option<Vec<ProjectId>>> {
        for project in projects {
            project.validate()?;
        }

        let tx = self.begin_write()?;
        let seen: Option<String> = tx
            .query_row(
                "SELECT source FROM seed_imports WHERE digest = ?1",
                params![digest],
                |row| row.get(0),
            )
            .optional()
            .map_err(CatalogError::from_write)?;
        if let Some(previous) = seen {
            debug!(digest, previous = %previous, "Seed file already imported");
            return Ok(None);
        }

        let ids = projects
            .iter()
            .map(|p| insert_aggregate(&tx, p))
            .collect::<Result<Vec<_>>>()?;
        tx.execute(
            "INSERT INTO seed_imports (digest, source, project_count) VALUES (?1, ?2, ?3)",
            params![digest, source, ids.len() as i64],
        )
        .map_err(CatalogError::from_write)?;
        tx.commit().map_err(CatalogError::from_write)?;

        info!(source, count = ids.len(), "Imported seed file");
        Ok(Some(ids))
    }

    /// Reassemble one project, or `None` if no project has this id.
    pub fn get_project(&self, id: ProjectId) -> Result<Option<StoredProject>> {
        load_project(&self.conn, id)
    }

    /// Every project, ordered by id.
    pub fn get_all_projects(&self) -> Result<Vec<StoredProject>> {
        // One read transaction so the listing is a single snapshot.
        let tx = self
            .conn
            .unchecked_transaction()
            .map_err(CatalogError::from_read)?;

        let ids = project_ids(&tx)?;

        let mut projects = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(project) = load_project(&tx, id)? {
                projects.push(project);
            }
        }
        Ok(projects)
    }

    /// All tags in the catalog, ordered by id.
    pub fn list_tags(&self) -> Result<Vec<Tag>> {
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, category FROM tags ORDER BY id")
            .map_err(CatalogError::from_read)?;
        let tags = stmt
            .query_map([], |row| {
                Ok(Tag {
                    id: row.get(0)?,
                    category: row.get(1)?,
                })
            })
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(CatalogError::from_read)?;
        Ok(tags)
    }

    pub fn count_projects(&self) -> Result<u64> {
        self.conn
            .query_row("SELECT COUNT(*) FROM projects", [], |row| row.get::<_, i64>(0))
            .map(|n| n as u64)
            .map_err(CatalogError::from_read)
    }

    fn begin_write(&mut self) -> Result<Transaction<'_>> {
        self.conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(CatalogError::from_write)
    }
}

fn insert_aggregate(tx: &Transaction<'_>, project: &ProjectAggregate) -> Result<ProjectId> {
    let mut stmt_project = tx
        .prepare_cached(
            "INSERT INTO projects (
                src, name, logo, description, class_name, info_description, about_description
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             RETURNING id",
        )
        .map_err(CatalogError::from_write)?;

    // The no-op update makes RETURNING yield the existing row on conflict.
    let mut stmt_tag = tx
        .prepare_cached(
            "INSERT INTO tags (category) VALUES (?1)
             ON CONFLICT(category) DO UPDATE SET category = excluded.category
             RETURNING id",
        )
        .map_err(CatalogError::from_write)?;

    let mut stmt_project_tag = tx
        .prepare_cached("INSERT OR IGNORE INTO project_tags (project_id, tag_id) VALUES (?1, ?2)")
        .map_err(CatalogError::from_write)?;

    let mut stmt_image = tx
        .prepare_cached(
            "INSERT INTO project_images (project_id, src, alt, hover_title, hover_subtitle)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .map_err(CatalogError::from_write)?;

    let project_id: i64 = stmt_project
        .query_row(
            params![
                project.src,
                project.name,
                project.logo,
                project.description,
                project.class_name,
                project.info.description,
                project.page.about,
            ],
            |row| row.get(0),
        )
        .map_err(CatalogError::from_write)?;

    for tag in &project.info.tags {
        let tag_id: i64 = stmt_tag
            .query_row(params![tag.category], |row| row.get(0))
            .map_err(CatalogError::from_write)?;
        stmt_project_tag
            .execute(params![project_id, tag_id])
            .map_err(CatalogError::from_write)?;
    }

    for image in &project.page.images {
        stmt_image
            .execute(params![
                project_id,
                image.src,
                image.alt,
                image.hover_title,
                image.hover_subtitle,
            ])
            .map_err(CatalogError::from_write)?;
    }

    Ok(ProjectId(project_id))
}

fn project_ids(conn: &Connection) -> Result<Vec<ProjectId>> {
    let mut stmt = conn
        .prepare_cached("SELECT id FROM projects ORDER BY id")
        .map_err(CatalogError::from_read)?;
    let ids = stmt
        .query_map([], |row| row.get::<_, i64>(0).map(ProjectId))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(CatalogError::from_read)?;
    Ok(ids)
}

fn load_project(conn: &Connection, id: ProjectId) -> Result<Option<StoredProject>> {
    let row = conn
        .query_row(
            "SELECT src, name, logo, description, class_name, info_description, about_description
             FROM projects WHERE id = ?1",
            params![id.0],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()
        .map_err(CatalogError::from_read)?;

    let Some((src, name, logo, description, class_name, info_description, about)) = row else {
        return Ok(None);
    };

    // Junction rowid order is the order the tags were given in.
    let mut stmt_tags = conn
        .prepare_cached(
            "SELECT t.category
             FROM project_tags pt
             JOIN tags t ON t.id = pt.tag_id
             WHERE pt.project_id = ?1
             ORDER BY pt.rowid",
        )
        .map_err(CatalogError::from_read)?;
    let tags = stmt_tags
        .query_map(params![id.0], |row| Ok(TagInput::new(row.get::<_, String>(0)?)))
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(CatalogError::from_read)?;

    let mut stmt_images = conn
        .prepare_cached(
            "SELECT src, alt, hover_title, hover_subtitle
             FROM project_images
             WHERE project_id = ?1
             ORDER BY id",
        )
        .map_err(CatalogError::from_read)?;
    let images = stmt_images
        .query_map(params![id.0], |row| {
            Ok(ImageInput {
                src: row.get(0)?,
                alt: row.get(1)?,
                hover_title: row.get(2)?,
                hover_subtitle: row.get(3)?,
            })
        })
        .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
        .map_err(CatalogError::from_read)?;

    Ok(Some(StoredProject {
        id,
        project: ProjectAggregate {
            src,
            name,
            logo,
            description,
            class_name,
            info: ProjectInfo {
                description: info_description,
                tags,
            },
            page: ProjectPage { about, images },
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::Store;
    use std::time::Duration;
    use tempfile::TempDir;

    fn setup() -> (TempDir, Store, CatalogRepository) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("portfolio.db"), Duration::from_millis(200));
        let repo = store.initialize().unwrap();
        (dir, store, repo)
    }

    fn kitchen_remodel() -> ProjectAggregate {
        let mut project = ProjectAggregate::new("/a.jpg", "Kitchen Remodel")
            .with_tag("Kitchen")
            .with_tag("Remodel")
            .with_image(ImageInput::new("/b.jpg").with_alt("before"));
        project.page.about = "Full gut and rebuild".to_string();
        project
    }

    fn tag_row_count(repo: &CatalogRepository, category: &str) -> i64 {
        repo.conn
            .query_row(
                "SELECT COUNT(*) FROM tags WHERE category = ?1",
                params![category],
                |row| row.get(0),
            )
            .unwrap()
    }

    #[test]
    fn test_insert_then_get() {
        let (_dir, _store, mut repo) = setup();

        let id = repo.insert_project(&kitchen_remodel()).unwrap();
        assert_eq!(id, ProjectId(1));

        let stored = repo.get_project(id).unwrap().unwrap();
        let categories: Vec<_> = stored
            .project
            .info
            .tags
            .iter()
            .map(|t| t.category.as_str())
            .collect();
        assert_eq!(categories, vec!["Kitchen", "Remodel"]);

        let images = &stored.project.page.images;
        assert_eq!(images.len(), 1);
        assert_eq!(images[0].src, "/b.jpg");
        assert_eq!(images[0].alt, "before");
        assert_eq!(images[0].hover_title, "");
        assert_eq!(images[0].hover_subtitle, "");
    }

    #[test]
    fn test_round_trip_preserves_every_field() {
        let (_dir, _store, mut repo) = setup();

        let mut project = ProjectAggregate::new("/deck.jpg", "Cedar Deck")
            .with_tag("Outdoor")
            .with_tag("Carpentry")
            .with_tag("Deck")
            .with_image(ImageInput::new("/1.jpg").with_alt("framing"))
            .with_image(ImageInput::new("/2.jpg").with_hover("Finished", "Stained cedar"))
            .with_image(ImageInput::new("/3.jpg"));
        project.logo = "/logo.png".to_string();
        project.description = "A backyard deck".to_string();
        project.class_name = "col-span-2".to_string();
        project.info.description = "Detailed build notes".to_string();
        project.page.about = "About the deck".to_string();

        let id = repo.insert_project(&project).unwrap();
        let stored = repo.get_project(id).unwrap().unwrap();

        assert_eq!(stored.id, id);
        assert_eq!(stored.project, project);
    }

    #[test]
    fn test_shared_category_reuses_tag_row() {
        let (_dir, _store, mut repo) = setup();

        let first = repo
            .insert_project(&ProjectAggregate::new("/a.jpg", "Galley").with_tag("Kitchen"))
            .unwrap();
        let second = repo
            .insert_project(
                &ProjectAggregate::new("/b.jpg", "Island")
                    .with_tag("Kitchen")
                    .with_tag("Custom"),
            )
            .unwrap();

        assert_eq!(tag_row_count(&repo, "Kitchen"), 1);
        for id in [first, second] {
            let stored = repo.get_project(id).unwrap().unwrap();
            assert!(stored
                .project
                .info
                .tags
                .iter()
                .any(|t| t.category == "Kitchen"));
        }
        assert_eq!(repo.list_tags().unwrap().len(), 2);
    }

    #[test]
    fn test_duplicate_category_within_project_is_rejected() {
        let (_dir, _store, mut repo) = setup();

        let err = repo
            .insert_project(
                &ProjectAggregate::new("/a.jpg", "Bath")
                    .with_tag("Bathroom")
                    .with_tag("Bathroom"),
            )
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(repo.count_projects().unwrap(), 0);
        assert!(repo.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_missing_project_is_none() {
        let (_dir, _store, repo) = setup();
        assert!(repo.get_project(ProjectId(42)).unwrap().is_none());
    }

    #[test]
    fn test_empty_catalog_lists_nothing() {
        let (_dir, _store, repo) = setup();
        assert!(repo.get_all_projects().unwrap().is_empty());
        assert_eq!(repo.count_projects().unwrap(), 0);
    }

    #[test]
    fn test_get_all_projects_orders_by_id() {
        let (_dir, _store, mut repo) = setup();

        for name in ["Roof", "Siding", "Windows"] {
            repo.insert_project(&ProjectAggregate::new("/x.jpg", name))
                .unwrap();
        }

        let all = repo.get_all_projects().unwrap();
        let names: Vec<_> = all.iter().map(|p| p.project.name.as_str()).collect();
        assert_eq!(names, vec!["Roof", "Siding", "Windows"]);
        assert!(all.windows(2).all(|w| w[0].id < w[1].id));
    }

    #[test]
    fn test_invalid_project_writes_nothing() {
        let (_dir, _store, mut repo) = setup();

        let err = repo
            .insert_project(&ProjectAggregate::new("/a.jpg", "").with_tag("Kitchen"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::Validation(_)));
        assert_eq!(repo.count_projects().unwrap(), 0);
        assert!(repo.list_tags().unwrap().is_empty());
    }

    #[test]
    fn test_batch_is_all_or_nothing() {
        let (_dir, _store, mut repo) = setup();

        let batch = vec![
            ProjectAggregate::new("/a.jpg", "Porch").with_tag("Outdoor"),
            ProjectAggregate::new("/b.jpg", "Basement")
                .with_image(ImageInput::new("").with_alt("no source")),
        ];
        assert!(repo.insert_projects(&batch).is_err());
        assert_eq!(repo.count_projects().unwrap(), 0);

        let ids = repo.insert_projects(&batch[..1]).unwrap();
        assert_eq!(ids, vec![ProjectId(1)]);
    }

    #[test]
    fn test_failed_write_leaves_no_orphans() {
        let (_dir, _store, mut repo) = setup();
        repo.conn
            .execute_batch(
                "CREATE TRIGGER reject_images BEFORE INSERT ON project_images
                 BEGIN SELECT RAISE(ABORT, 'image rejected'); END;",
            )
            .unwrap();

        let err = repo.insert_project(&kitchen_remodel()).unwrap_err();
        assert!(matches!(err, CatalogError::StorageWrite(_)));

        assert_eq!(repo.count_projects().unwrap(), 0);
        let links: i64 = repo
            .conn
            .query_row("SELECT COUNT(*) FROM project_tags", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 0);
    }

    #[test]
    fn test_ids_are_not_reused() {
        let (_dir, _store, mut repo) = setup();

        let first = repo
            .insert_project(&ProjectAggregate::new("/a.jpg", "Fence"))
            .unwrap();
        repo.conn
            .execute("DELETE FROM projects WHERE id = ?1", params![first.0])
            .unwrap();
        let second = repo
            .insert_project(&ProjectAggregate::new("/b.jpg", "Gate"))
            .unwrap();

        assert!(second > first);
    }

    #[test]
    fn test_seed_digest_imports_once() {
        let (_dir, _store, mut repo) = setup();
        let projects = vec![kitchen_remodel()];

        let ids = repo.import_seed("abc123", "seed/kitchen.json", &projects).unwrap();
        assert_eq!(ids, Some(vec![ProjectId(1)]));

        let again = repo.import_seed("abc123", "seed/copy.json", &projects).unwrap();
        assert!(again.is_none());
        assert_eq!(repo.count_projects().unwrap(), 1);
    }

    #[test]
    fn test_locked_store_times_out() {
        let (_dir, store, mut repo) = setup();

        let blocker = store.open().unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE;").unwrap();

        let err = repo
            .insert_project(&ProjectAggregate::new("/a.jpg", "Patio"))
            .unwrap_err();
        assert!(matches!(err, CatalogError::StorageTimeout(_)));
        assert!(!err.is_fatal());

        blocker.execute_batch("ROLLBACK;").unwrap();
        assert!(repo
            .insert_project(&ProjectAggregate::new("/a.jpg", "Patio"))
            .is_ok());
    }

    #[test]
    fn test_reader_sees_writer_commits() {
        let (_dir, store, mut repo) = setup();
        let reader = store.repository().unwrap();

        let id = repo.insert_project(&kitchen_remodel()).unwrap();
        assert_eq!(reader.get_project(id).unwrap().unwrap().project.name, "Kitchen Remodel");
    }
}
