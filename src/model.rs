use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{CatalogError, Result};

/// Identifier assigned to a project when it is first stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub i64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A project together with its tags and gallery images, in the nested shape
/// exchanged with the website.
///
/// Optional text fields are plain strings: absent or `null` values become `""`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAggregate {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub src: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub name: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub logo: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub description: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub class_name: String,
    #[serde(default)]
    pub info: ProjectInfo,
    #[serde(default)]
    pub page: ProjectPage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<TagInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectPage {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub about: String,
    #[serde(default)]
    pub images: Vec<ImageInput>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagInput {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub category: String,
}

impl TagInput {
    pub fn new(category: impl Into<String>) -> Self {
        Self {
            category: category.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageInput {
    #[serde(default, deserialize_with = "empty_if_null")]
    pub src: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub alt: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub hover_title: String,
    #[serde(default, deserialize_with = "empty_if_null")]
    pub hover_subtitle: String,
}

impl ImageInput {
    pub fn new(src: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            ..Default::default()
        }
    }

    pub fn with_alt(mut self, alt: impl Into<String>) -> Self {
        self.alt = alt.into();
        self
    }

    pub fn with_hover(mut self, title: impl Into<String>, subtitle: impl Into<String>) -> Self {
        self.hover_title = title.into();
        self.hover_subtitle = subtitle.into();
        self
    }
}

/// A project read back from the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredProject {
    pub id: ProjectId,
    #[serde(flatten)]
    pub project: ProjectAggregate,
}

/// A deduplicated tag row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub category: String,
}

impl ProjectAggregate {
    pub fn new(src: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_tag(mut self, category: impl Into<String>) -> Self {
        self.info.tags.push(TagInput::new(category));
        self
    }

    pub fn with_image(mut self, image: ImageInput) -> Self {
        self.page.images.push(image);
        self
    }

    /// Check the required fields before anything touches storage.
    pub fn validate(&self) -> Result<()> {
        if self.src.trim().is_empty() {
            return Err(CatalogError::validation("src is required"));
        }
        if self.name.trim().is_empty() {
            return Err(CatalogError::validation("name is required"));
        }
        let mut categories = HashSet::new();
        for (i, tag) in self.info.tags.iter().enumerate() {
            if tag.category.trim().is_empty() {
                return Err(CatalogError::validation(format!(
                    "info.tags[{}].category is required",
                    i
                )));
            }
            // A project links each tag once.
            if !categories.insert(tag.category.as_str()) {
                return Err(CatalogError::validation(format!(
                    "info.tags[{}].category {:?} is listed twice",
                    i, tag.category
                )));
            }
        }
        for (i, image) in self.page.images.iter().enumerate() {
            if image.src.trim().is_empty() {
                return Err(CatalogError::validation(format!(
                    "page.images[{}].src is required",
                    i
                )));
            }
        }
        Ok(())
    }
}

fn empty_if_null<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
