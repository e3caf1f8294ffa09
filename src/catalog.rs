//! Entity catalog.
//!
//! Describes the two entity kinds and their fields: which are required,
//! which are identity-relevant for member versioning, and the alternative
//! names the source feed uses for them.

use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Deserializer};

use crate::error::ValidationError;

/// Field name of the logical/stable id.
pub const FIELD_ID: &str = "id";
/// Field name of the display name.
pub const FIELD_NAME: &str = "name";
/// Field name of a member's birth date.
pub const FIELD_BIRTH_DATE: &str = "birth_date";
/// Field name of a member's container reference.
pub const FIELD_CONTAINER_ID: &str = "container_id";
/// Field name of a member's category.
pub const FIELD_CATEGORY: &str = "category";

/// Definition of a single field of an entity kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDef {
    /// Canonical field name.
    pub name: &'static str,
    /// Whether a record without this field is malformed.
    pub required: bool,
    /// Whether a change of this field creates a new member version.
    pub identity_relevant: bool,
    /// Alternative names accepted from the source feed.
    pub aliases: &'static [&'static str],
}

const CONTAINER_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: FIELD_ID,
        required: true,
        identity_relevant: false,
        aliases: &[],
    },
    FieldDef {
        name: FIELD_NAME,
        required: true,
        identity_relevant: false,
        aliases: &[],
    },
];

const MEMBER_FIELDS: &[FieldDef] = &[
    FieldDef {
        name: FIELD_ID,
        required: true,
        identity_relevant: false,
        aliases: &[],
    },
    FieldDef {
        name: FIELD_BIRTH_DATE,
        required: false,
        identity_relevant: false,
        aliases: &["birthday"],
    },
    FieldDef {
        name: FIELD_NAME,
        required: true,
        identity_relevant: true,
        aliases: &[],
    },
    FieldDef {
        name: FIELD_CONTAINER_ID,
        required: false,
        identity_relevant: true,
        aliases: &["room"],
    },
    FieldDef {
        name: FIELD_CATEGORY,
        required: false,
        identity_relevant: false,
        aliases: &["sex"],
    },
];

/// The entity kinds known to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    /// Unversioned entity referenced by members (e.g. a room).
    Container,
    /// Versioned entity (e.g. a student).
    Member,
}

impl EntityKind {
    /// Fields of this kind, in feed order.
    #[must_use]
    pub const fn fields(self) -> &'static [FieldDef] {
        match self {
            Self::Container => CONTAINER_FIELDS,
            Self::Member => MEMBER_FIELDS,
        }
    }

    /// Looks up a field by canonical name or alias.
    #[must_use]
    pub fn field(self, key: &str) -> Option<&'static FieldDef> {
        self.fields()
            .iter()
            .find(|f| f.name == key || f.aliases.contains(&key))
    }

    /// Fields whose change supersedes the current member version.
    pub fn identity_relevant_fields(self) -> impl Iterator<Item = &'static FieldDef> {
        self.fields().iter().filter(|f| f.identity_relevant)
    }

    /// Rejects any key that is neither a field name nor an alias.
    ///
    /// # Errors
    /// `UnknownField` for the first unrecognized key.
    pub fn check_keys<'a>(
        self,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> Result<(), ValidationError> {
        for key in keys {
            if self.field(key).is_none() {
                return Err(ValidationError::UnknownField {
                    kind: self.to_string(),
                    field: key.to_string(),
                });
            }
        }
        Ok(())
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "container"),
            Self::Member => write!(f, "member"),
        }
    }
}

/// Validates a required name: present and not blank.
pub(crate) fn required_name(kind: EntityKind, name: Option<&str>) -> Result<String, ValidationError> {
    debug_assert!(kind.field(FIELD_NAME).is_some_and(|f| f.required));
    let name = name.ok_or_else(|| ValidationError::missing(FIELD_NAME))?;
    if name.trim().is_empty() {
        return Err(ValidationError::EmptyField {
            field: FIELD_NAME.to_string(),
        });
    }
    Ok(name.to_string())
}

/// Parses a feed date: `YYYY-MM-DD` or an ISO datetime whose date part is kept.
///
/// # Errors
/// Returns `InvalidValue` for anything else.
pub fn parse_feed_date(raw: &str) -> Result<NaiveDate, ValidationError> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(date);
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f"))
        .map(|dt| dt.date())
        .map_err(|e| ValidationError::invalid(FIELD_BIRTH_DATE, format!("'{raw}': {e}")))
}

/// Serde adapter for optional feed dates.
pub(crate) fn deserialize_feed_date<'de, D>(deserializer: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(s) if s.trim().is_empty() => Ok(None),
        Some(s) => parse_feed_date(&s).map(Some).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_identity_fields() {
        let names: Vec<_> = EntityKind::Member
            .identity_relevant_fields()
            .map(|f| f.name)
            .collect();
        assert_eq!(names, vec![FIELD_NAME, FIELD_CONTAINER_ID]);
        assert_eq!(EntityKind::Container.identity_relevant_fields().count(), 0);
    }

    #[test]
    fn test_field_lookup_by_alias() {
        assert_eq!(EntityKind::Member.field("room").unwrap().name, FIELD_CONTAINER_ID);
        assert_eq!(EntityKind::Member.field("sex").unwrap().name, FIELD_CATEGORY);
        assert!(EntityKind::Container.field("room").is_none());
    }

    #[test]
    fn test_check_keys_rejects_unknown() {
        assert!(EntityKind::Member
            .check_keys(["id", "birthday", "name", "room", "sex"])
            .is_ok());
        let err = EntityKind::Container.check_keys(["id", "floor"]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownField {
                kind: "container".to_string(),
                field: "floor".to_string(),
            }
        );
    }

    #[test]
    fn test_parse_feed_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2004, 1, 7).unwrap();
        assert_eq!(parse_feed_date("2004-01-07").unwrap(), expected);
        assert_eq!(parse_feed_date("2004-01-07T00:00:00.000000").unwrap(), expected);
        assert_eq!(parse_feed_date("2004-01-07T10:30:00").unwrap(), expected);
        assert!(parse_feed_date("07/01/2004").is_err());
    }

    #[test]
    fn test_required_name() {
        assert_eq!(required_name(EntityKind::Member, Some("Ann")).unwrap(), "Ann");
        assert!(required_name(EntityKind::Member, None).is_err());
        assert!(required_name(EntityKind::Member, Some("")).is_err());
    }
}
