//! Local project catalog for the company portfolio site.
//!
//! Projects are stored in SQLite across four tables (projects, tags, the
//! project-tag junction and project images) and exchanged with the site as
//! nested [`ProjectAggregate`] records.
//!
//! ```no_run
//! use std::time::Duration;
//! use portfolio_catalog::{ProjectAggregate, Store};
//!
//! let store = Store::new("portfolio.db", Duration::from_secs(5));
//! let mut repo = store.initialize()?;
//! let id = repo.insert_project(&ProjectAggregate::new("/a.jpg", "Kitchen Remodel").with_tag("Kitchen"))?;
//! let project = repo.get_project(id)?;
//! # Ok::<(), portfolio_catalog::CatalogError>(())
//! ```

pub mod database;
pub mod error;
pub mod ingest;
pub mod model;
pub mod utils;

pub use database::repo::CatalogRepository;
pub use database::store::Store;
pub use database::writer::{CatalogWriter, WriterHandle};
pub use error::{CatalogError, Result};
pub use model::{
    ImageInput, ProjectAggregate, ProjectId, ProjectInfo, ProjectPage, StoredProject, Tag,
    TagInput,
};
pub use utils::config::CatalogConfig;
