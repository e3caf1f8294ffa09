//! Container entities.
//!
//! A container (e.g. a room) is referenced by member versions. Containers are
//! never versioned: an update overwrites the name in place.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::{self, EntityKind};
use crate::error::ValidationError;

/// Stable container identifier, assigned by the source feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(i64);

impl ContainerId {
    /// Wraps a raw id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ContainerId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A stored container.
///
/// # Examples
///
/// ```
/// use rosterdb::Container;
///
/// let room = Container::new(10, "Red");
/// assert_eq!(room.id.get(), 10);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Container {
    /// Unique, stable identifier.
    pub id: ContainerId,
    /// Display name.
    pub name: String,
}

impl Container {
    /// Creates a container.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: ContainerId::new(id),
            name: name.into(),
        }
    }
}

/// A container as observed in an incoming feed; every field may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Container id.
    #[serde(default)]
    pub id: Option<i64>,
    /// Container name.
    #[serde(default)]
    pub name: Option<String>,
}

impl ContainerRecord {
    /// Creates a complete record.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
        }
    }

    /// Checks required fields and produces the container to store.
    ///
    /// # Errors
    /// `MissingField` when `id` is absent, `MissingField`/`EmptyField` for the name.
    pub fn validate(&self) -> Result<Container, ValidationError> {
        let id = self
            .id
            .ok_or_else(|| ValidationError::missing(catalog::FIELD_ID))?;
        let name = catalog::required_name(EntityKind::Container, self.name.as_deref())?;
        Ok(Container::new(id, name))
    }
}

impl From<Container> for ContainerRecord {
    fn from(container: Container) -> Self {
        Self {
            id: Some(container.id.get()),
            name: Some(container.name),
        }
    }
}
