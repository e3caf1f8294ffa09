//! Read-only analytical queries over current member versions.
//!
//! Every template reads one [`Snapshot`](crate::Snapshot), so results only ever
//! see current versions joined to containers that exist. Ages are computed
//! against the caller's `as_of` date, never the wall clock.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use tracing::debug;

use crate::container::{Container, ContainerId};
use crate::database::{Database, Snapshot};
use crate::error::{RosterResult, ValidationError};
use crate::member::{Category, MemberVersion};

/// Parameters shared by all templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryParams {
    /// Date ages are computed against.
    pub as_of: NaiveDate,
    /// Maximum number of rows for ranked templates.
    pub limit: usize,
}

impl QueryParams {
    /// Creates parameters.
    #[must_use]
    pub const fn new(as_of: NaiveDate, limit: usize) -> Self {
        Self { as_of, limit }
    }
}

/// The fixed query templates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryTemplate {
    /// Containers ranked by the spread between oldest and youngest member.
    ExtremesBySpread,
    /// Containers ranked by the smallest average member age.
    SmallestAverageAge,
    /// Member count for every container.
    OccupancyCount,
    /// Containers whose members span more than one category.
    MixedCategory,
}

impl QueryTemplate {
    /// Every template, in catalogue order.
    pub const ALL: [Self; 4] = [
        Self::ExtremesBySpread,
        Self::SmallestAverageAge,
        Self::OccupancyCount,
        Self::MixedCategory,
    ];

    /// Stable name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::ExtremesBySpread => "extremes_by_spread",
            Self::SmallestAverageAge => "smallest_average_age",
            Self::OccupancyCount => "occupancy_count",
            Self::MixedCategory => "mixed_category",
        }
    }

    /// Column names, in row-tuple order.
    #[must_use]
    pub const fn columns(self) -> &'static [&'static str] {
        match self {
            Self::ExtremesBySpread => &["container_id", "name", "age_spread"],
            Self::SmallestAverageAge => &["container_id", "name", "avg_age"],
            Self::OccupancyCount => &["name", "member_count"],
            Self::MixedCategory => &["container_id"],
        }
    }
}

impl fmt::Display for QueryTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QueryTemplate {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ValidationError::invalid("template", format!("unknown query template '{s}'")))
    }
}

/// A single result cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cell {
    /// Integer value.
    Int(i64),
    /// Text value.
    Text(String),
    /// Absent value.
    Null,
}

impl From<i64> for Cell {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<String> for Cell {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl<T: Into<Cell>> From<Option<T>> for Cell {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// Tabular result: fixed columns, one tuple per row with matching arity.
///
/// Serializes as the list produced by [`QueryResult::to_json_records`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryResult {
    /// Column names.
    pub columns: Vec<&'static str>,
    /// Row tuples.
    pub rows: Vec<Vec<Cell>>,
}

impl QueryResult {
    fn new(template: QueryTemplate, rows: Vec<Vec<Cell>>) -> Self {
        let columns = template.columns().to_vec();
        debug_assert!(rows.iter().all(|r| r.len() == columns.len()));
        Self { columns, rows }
    }

    /// Returns true if there are no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// One JSON object per row keyed by column name; null cells are omitted.
    #[must_use]
    pub fn to_json_records(&self) -> Vec<serde_json::Map<String, serde_json::Value>> {
        self.rows
            .iter()
            .map(|row| {
                self.columns
                    .iter()
                    .zip(row)
                    .filter_map(|(column, cell)| {
                        let value = match cell {
                            Cell::Int(v) => serde_json::Value::from(*v),
                            Cell::Text(v) => serde_json::Value::from(v.clone()),
                            Cell::Null => return None,
                        };
                        Some(((*column).to_string(), value))
                    })
                    .collect()
            })
            .collect()
    }
}

impl Serialize for QueryResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.to_json_records())
    }
}

/// Row of [`QueryTemplate::ExtremesBySpread`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpreadRow {
    /// Container id.
    pub container_id: ContainerId,
    /// Container name.
    pub name: String,
    /// Oldest minus youngest age, in whole years.
    pub age_spread: i32,
}

/// Row of [`QueryTemplate::SmallestAverageAge`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AverageAgeRow {
    /// Container id.
    pub container_id: ContainerId,
    /// Container name.
    pub name: String,
    /// Mean age rounded to the nearest whole year.
    pub avg_age: i32,
}

/// Row of [`QueryTemplate::OccupancyCount`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OccupancyRow {
    /// Container id.
    pub container_id: ContainerId,
    /// Container name.
    pub name: String,
    /// Current members assigned to the container.
    pub member_count: usize,
}

/// Current members grouped under the containers they reference.
struct Grouped<'s> {
    containers: &'s [Container],
    by_container: BTreeMap<ContainerId, Vec<&'s MemberVersion>>,
}

impl<'s> Grouped<'s> {
    fn new(snapshot: &'s Snapshot) -> Self {
        let mut by_container: BTreeMap<ContainerId, Vec<&MemberVersion>> = snapshot
            .containers
            .iter()
            .map(|c| (c.id, Vec::new()))
            .collect();
        for member in snapshot.members.iter().filter(|m| m.is_current) {
            let Some(container_id) = member.container_id else {
                continue;
            };
            if let Some(members) = by_container.get_mut(&container_id) {
                members.push(member);
            }
        }
        Self {
            containers: &snapshot.containers,
            by_container,
        }
    }

    fn iter(&self) -> impl Iterator<Item = (&'s Container, &[&'s MemberVersion])> + '_ {
        self.containers.iter().map(move |c| {
            let members = self.by_container.get(&c.id).map_or(&[][..], Vec::as_slice);
            (c, members)
        })
    }

    fn ages(members: &[&MemberVersion], as_of: NaiveDate) -> Vec<i32> {
        members.iter().filter_map(|m| m.age_on(as_of)).collect()
    }
}

/// Executes the fixed templates against a [`Database`].
#[derive(Debug, Clone, Copy)]
pub struct QueryEngine<'a> {
    db: &'a Database,
}

impl<'a> QueryEngine<'a> {
    /// Borrows `db` for reading.
    #[must_use]
    pub const fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Parameters using the configured default limit.
    #[must_use]
    pub fn params(&self, as_of: NaiveDate) -> QueryParams {
        QueryParams::new(as_of, self.db.config().default_query_limit)
    }

    /// Top-N containers by descending age spread; ties by ascending container id.
    ///
    /// Only containers with at least two dated current members qualify.
    pub fn extremes_by_spread(&self, params: QueryParams) -> RosterResult<Vec<SpreadRow>> {
        let snapshot = self.db.snapshot()?;
        let grouped = Grouped::new(&snapshot);

        let mut rows: Vec<SpreadRow> = grouped
            .iter()
            .filter_map(|(container, members)| {
                let ages = Grouped::ages(members, params.as_of);
                if ages.len() < 2 {
                    return None;
                }
                let max = ages.iter().max()?;
                let min = ages.iter().min()?;
                Some(SpreadRow {
                    container_id: container.id,
                    name: container.name.clone(),
                    age_spread: max - min,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            b.age_spread
                .cmp(&a.age_spread)
                .then_with(|| a.container_id.cmp(&b.container_id))
        });
        rows.truncate(params.limit);
        Ok(rows)
    }

    /// Bottom-N containers by ascending average age; ties by ascending container id.
    ///
    /// Only containers with at least one dated current member qualify.
    pub fn smallest_average_age(&self, params: QueryParams) -> RosterResult<Vec<AverageAgeRow>> {
        let snapshot = self.db.snapshot()?;
        let grouped = Grouped::new(&snapshot);

        let mut rows: Vec<AverageAgeRow> = grouped
            .iter()
            .filter_map(|(container, members)| {
                let ages = Grouped::ages(members, params.as_of);
                if ages.is_empty() {
                    return None;
                }
                let sum: i64 = ages.iter().map(|&a| i64::from(a)).sum();
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
                let avg_age = (sum as f64 / ages.len() as f64).round() as i32;
                Some(AverageAgeRow {
                    container_id: container.id,
                    name: container.name.clone(),
                    avg_age,
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.avg_age
                .cmp(&b.avg_age)
                .then_with(|| a.container_id.cmp(&b.container_id))
        });
        rows.truncate(params.limit);
        Ok(rows)
    }

    /// Current member count for every container, empty ones included, by container id.
    pub fn occupancy_count(&self) -> RosterResult<Vec<OccupancyRow>> {
        let snapshot = self.db.snapshot()?;
        let grouped = Grouped::new(&snapshot);
        Ok(grouped
            .iter()
            .map(|(container, members)| OccupancyRow {
                container_id: container.id,
                name: container.name.clone(),
                member_count: members.len(),
            })
            .collect())
    }

    /// Containers whose current members carry at least two distinct categories, ascending.
    pub fn mixed_category(&self) -> RosterResult<Vec<ContainerId>> {
        let snapshot = self.db.snapshot()?;
        let grouped = Grouped::new(&snapshot);
        Ok(grouped
            .iter()
            .filter(|(_, members)| {
                let categories: BTreeSet<Category> =
                    members.iter().filter_map(|m| m.category).collect();
                categories.len() >= 2
            })
            .map(|(container, _)| container.id)
            .collect())
    }

    /// Run a template and return its tabular result.
    pub fn run(&self, template: QueryTemplate, params: QueryParams) -> RosterResult<QueryResult> {
        let rows: Vec<Vec<Cell>> = match template {
            QueryTemplate::ExtremesBySpread => self
                .extremes_by_spread(params)?
                .into_iter()
                .map(|r| {
                    vec![
                        Cell::from(r.container_id.get()),
                        Cell::from(r.name),
                        Cell::from(i64::from(r.age_spread)),
                    ]
                })
                .collect(),
            QueryTemplate::SmallestAverageAge => self
                .smallest_average_age(params)?
                .into_iter()
                .map(|r| {
                    vec![
                        Cell::from(r.container_id.get()),
                        Cell::from(r.name),
                        Cell::from(i64::from(r.avg_age)),
                    ]
                })
                .collect(),
            QueryTemplate::OccupancyCount => self
                .occupancy_count()?
                .into_iter()
                .map(|r| {
                    let count = i64::try_from(r.member_count).unwrap_or(i64::MAX);
                    vec![Cell::from(r.name), Cell::from(count)]
                })
                .collect(),
            QueryTemplate::MixedCategory => self
                .mixed_category()?
                .into_iter()
                .map(|id| vec![Cell::from(id.get())])
                .collect(),
        };

        debug!(template = %template, rows = rows.len(), "query executed");
        Ok(QueryResult::new(template, rows))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::member::MemberUpdate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn db() -> Database {
        let db = Database::in_memory();
        db.upsert_container(Container::new(10, "Red")).unwrap();
        db.upsert_container(Container::new(20, "Blue")).unwrap();
        db
    }

    #[test]
    fn test_template_names_roundtrip() {
        for template in QueryTemplate::ALL {
            assert_eq!(template.name().parse::<QueryTemplate>().unwrap(), template);
        }
        assert!("drop_tables".parse::<QueryTemplate>().is_err());
    }

    #[test]
    fn test_occupancy_includes_empty_containers() {
        let db = db();
        db.upsert_container(Container::new(30, "Green")).unwrap();
        db.apply_member(&MemberUpdate::new(1, "Ann").container(10)).unwrap();

        let rows = db.query().occupancy_count().unwrap();
        let counts: Vec<(&str, usize)> = rows.iter().map(|r| (r.name.as_str(), r.member_count)).collect();
        assert_eq!(counts, vec![("Red", 1), ("Blue", 0), ("Green", 0)]);
    }

    #[test]
    fn test_occupancy_counts_only_current_versions() {
        let db = db();
        db.apply_member(&MemberUpdate::new(1, "Ann").container(10)).unwrap();
        db.apply_member(&MemberUpdate::new(1, "Ann").container(20)).unwrap();

        let rows = db.query().occupancy_count().unwrap();
        assert_eq!(rows[0].member_count, 0);
        assert_eq!(rows[1].member_count, 1);
    }

    #[test]
    fn test_spread_requires_two_dated_members() {
        let db = db();
        db.apply_member(&MemberUpdate::new(1, "A").container(10).birth_date(date(2000, 1, 1)))
            .unwrap();
        db.apply_member(&MemberUpdate::new(2, "B").container(10)).unwrap();
        let rows = db
            .query()
            .extremes_by_spread(QueryParams::new(date(2020, 6, 1), 5))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn test_average_rounds_half_away_from_zero() {
        let db = db();
        // ages 20 and 21 on 2020-06-01 -> 20.5 -> 21
        db.apply_member(&MemberUpdate::new(1, "A").container(10).birth_date(date(2000, 1, 1)))
            .unwrap();
        db.apply_member(&MemberUpdate::new(2, "B").container(10).birth_date(date(1999, 1, 1)))
            .unwrap();
        let rows = db
            .query()
            .smallest_average_age(QueryParams::new(date(2020, 6, 1), 5))
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].avg_age, 21);
    }

    #[test]
    fn test_zero_limit_is_empty_success() {
        let db = db();
        db.apply_member(&MemberUpdate::new(1, "A").container(10).birth_date(date(2000, 1, 1)))
            .unwrap();
        let result = db
            .query()
            .run(QueryTemplate::SmallestAverageAge, QueryParams::new(date(2020, 1, 1), 0))
            .unwrap();
        assert!(result.is_empty());
        assert_eq!(result.columns, vec!["container_id", "name", "avg_age"]);
    }

    #[test]
    fn test_json_records_omit_nulls() {
        let result = QueryResult {
            columns: vec!["container_id", "name"],
            rows: vec![vec![Cell::Int(1), Cell::Null], vec![Cell::Int(2), "Blue".to_string().into()]],
        };
        let records = result.to_json_records();
        assert_eq!(records[0].len(), 1);
        assert!(!records[0].contains_key("name"));
        assert_eq!(records[1]["name"], serde_json::json!("Blue"));
    }

    #[test]
    fn test_serialized_result_has_no_nulls() {
        let result = QueryResult {
            columns: vec!["container_id", "name"],
            rows: vec![vec![Cell::Int(1), Cell::Null], vec![Cell::Null, Cell::Null]],
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value, serde_json::json!([{ "container_id": 1 }, {}]));
        assert!(!serde_json::to_string(&result).unwrap().contains("null"));
    }

    #[test]
    fn test_cell_from_option() {
        assert_eq!(Cell::from(None::<i64>), Cell::Null);
        assert_eq!(Cell::from(Some(3_i64)), Cell::Int(3));
    }
}
