//! Member entities and their version rows.
//!
//! A member has a stable logical id assigned by the source feed. Storage keys
//! are version ids: every identity-relevant change appends a new
//! [`MemberVersion`] and retires the previous one as immutable history.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::catalog::{self, EntityKind, FIELD_CONTAINER_ID, FIELD_NAME};
use crate::container::ContainerId;
use crate::error::ValidationError;

/// Logical member identity, stable across the member's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(i64);

impl MemberId {
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

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MemberId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// Storage key of a single member version.
///
/// Issued from a store-wide counter; strictly increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionId(u64);

impl VersionId {
    /// Wraps a raw version id.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw version id.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Two-valued member category, as the feed's `M`/`F` letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Category {
    /// `M`
    M,
    /// `F`
    F,
}

impl Category {
    /// The single-letter code.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::M => "M",
            Self::F => "F",
        }
    }
}

impl TryFrom<String> for Category {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("m") {
            Ok(Self::M)
        } else if s.eq_ignore_ascii_case("f") {
            Ok(Self::F)
        } else {
            Err(format!("unknown category: '{s}' (expected M or F)"))
        }
    }
}

impl From<Category> for String {
    fn from(value: Category) -> Self {
        value.as_str().to_string()
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A member as observed in an incoming feed or update request.
///
/// Every field is optional so that a record lacking a required field is
/// reported as malformed instead of failing deserialization. The aliases are
/// the field names used by the source feed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberUpdate {
    /// Logical id (required).
    #[serde(default)]
    pub id: Option<i64>,
    /// Birth date.
    #[serde(
        default,
        alias = "birthday",
        deserialize_with = "catalog::deserialize_feed_date"
    )]
    pub birth_date: Option<NaiveDate>,
    /// Display name (required, identity-relevant).
    #[serde(default)]
    pub name: Option<String>,
    /// Referenced container (identity-relevant).
    #[serde(default, alias = "room")]
    pub container_id: Option<i64>,
    /// Category.
    #[serde(default, alias = "sex")]
    pub category: Option<Category>,
}

impl MemberUpdate {
    /// Creates an update with the required fields set.
    #[must_use]
    pub fn new(id: i64, name: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the container reference.
    #[must_use]
    pub fn container(mut self, container_id: i64) -> Self {
        self.container_id = Some(container_id);
        self
    }

    /// Sets the birth date.
    #[must_use]
    pub fn birth_date(mut self, date: NaiveDate) -> Self {
        self.birth_date = Some(date);
        self
    }

    /// Sets the category.
    #[must_use]
    pub fn category(mut self, category: Category) -> Self {
        self.category = Some(category);
        self
    }

    /// Checks required fields and produces the field set to store.
    ///
    /// # Errors
    /// `MissingField` when `id` or `name` is absent, `EmptyField` for a blank name.
    pub fn validate(&self) -> Result<MemberFields, ValidationError> {
        let id = self
            .id
            .ok_or_else(|| ValidationError::missing(catalog::FIELD_ID))?;
        let name = catalog::required_name(EntityKind::Member, self.name.as_deref())?;
        Ok(MemberFields {
            id: MemberId::new(id),
            birth_date: self.birth_date,
            name,
            container_id: self.container_id.map(ContainerId::new),
            category: self.category,
        })
    }
}

/// Validated member fields: a full snapshot, not a diff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFields {
    /// Logical id.
    pub id: MemberId,
    /// Birth date.
    pub birth_date: Option<NaiveDate>,
    /// Display name.
    pub name: String,
    /// Referenced container.
    pub container_id: Option<ContainerId>,
    /// Category.
    pub category: Option<Category>,
}

/// A stored member version row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberVersion {
    /// Unique storage key.
    pub version_id: VersionId,
    /// Logical identity.
    pub id: MemberId,
    /// Birth date.
    pub birth_date: Option<NaiveDate>,
    /// Display name.
    pub name: String,
    /// Referenced container; nulled when the container is removed.
    pub container_id: Option<ContainerId>,
    /// Category.
    pub category: Option<Category>,
    /// Whether this is the logical member's active version.
    pub is_current: bool,
}

impl MemberVersion {
    /// Builds a current version row from validated fields.
    #[must_use]
    pub fn current(version_id: VersionId, fields: MemberFields) -> Self {
        Self {
            version_id,
            id: fields.id,
            birth_date: fields.birth_date,
            name: fields.name,
            container_id: fields.container_id,
            category: fields.category,
            is_current: true,
        }
    }

    /// Names of identity-relevant fields whose incoming value differs from this row.
    ///
    /// An empty result means the update does not create a new version.
    #[must_use]
    pub fn changed_identity_fields(&self, fields: &MemberFields) -> Vec<&'static str> {
        EntityKind::Member
            .identity_relevant_fields()
            .filter(|def| match def.name {
                FIELD_NAME => self.name != fields.name,
                FIELD_CONTAINER_ID => self.container_id != fields.container_id,
                _ => false,
            })
            .map(|def| def.name)
            .collect()
    }

    /// Age in whole years on `as_of`, if the birth date is known.
    #[must_use]
    pub fn age_on(&self, as_of: NaiveDate) -> Option<i32> {
        self.birth_date.map(|born| whole_years_between(born, as_of))
    }
}

/// Completed years from `born` to `as_of`.
///
/// The year difference, less one when the anniversary has not been reached
/// yet. Negative when `as_of` precedes `born`.
#[must_use]
pub fn whole_years_between(born: NaiveDate, as_of: NaiveDate) -> i32 {
    let mut years = as_of.year() - born.year();
    if (as_of.month(), as_of.day()) < (born.month(), born.day()) {
        years -= 1;
    }
    years
}

/// Outcome of [`MemberStore::apply`](crate::MemberStore::apply).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// First sighting of the logical id; a first version was created.
    Inserted(VersionId),
    /// An identity-relevant field changed; the previous version was retired.
    Superseded {
        /// Version that is now historical.
        previous: VersionId,
        /// Newly created current version.
        current: VersionId,
    },
    /// No identity-relevant field changed; nothing was written.
    Unchanged {
        /// The untouched current version.
        current: VersionId,
    },
}

impl ApplyOutcome {
    /// The newly created version, if any.
    #[must_use]
    pub const fn new_version(&self) -> Option<VersionId> {
        match self {
            Self::Inserted(v) | Self::Superseded { current: v, .. } => Some(*v),
            Self::Unchanged { .. } => None,
        }
    }

    /// The current version after the call.
    #[must_use]
    pub const fn current_version(&self) -> VersionId {
        match self {
            Self::Inserted(v) | Self::Superseded { current: v, .. } | Self::Unchanged { current: v } => *v,
        }
    }

    /// Returns true if nothing was written.
    #[must_use]
    pub const fn is_unchanged(&self) -> bool {
        matches!(self, Self::Unchanged { .. })
    }
}
