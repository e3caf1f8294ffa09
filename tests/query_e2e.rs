use chrono::NaiveDate;
use rosterdb::{
    AverageAgeRow, Category, Cell, Container, ContainerId, Database, MemberUpdate, QueryParams,
    QueryTemplate,
};

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

fn as_of() -> NaiveDate {
    date(2024, 6, 1)
}

/// Four containers with known ages on 2024-06-01:
///
/// | container | ages   | categories |
/// |-----------|--------|------------|
/// | 1         | 24, 14 | M, F       |
/// | 2         | 34, 24 | M, M       |
/// | 3         | 24, 19 | F, -       |
/// | 4         | 19     | F          |
fn campus() -> Database {
    let db = Database::in_memory();
    for id in 1..=4 {
        db.upsert_container(Container::new(id, format!("Room #{id}"))).unwrap();
    }
    let members = [
        (1, "Ann", 1, date(2000, 1, 1), Some(Category::M)),
        (2, "Bea", 1, date(2010, 1, 1), Some(Category::F)),
        (3, "Cid", 2, date(1990, 1, 1), Some(Category::M)),
        (4, "Dan", 2, date(2000, 1, 1), Some(Category::M)),
        (5, "Eve", 3, date(2000, 1, 1), Some(Category::F)),
        (6, "Fay", 3, date(2005, 1, 1), None),
        (7, "Gus", 4, date(2004, 6, 2), Some(Category::F)),
    ];
    for (id, name, room, born, category) in members {
        let mut update = MemberUpdate::new(id, name).container(room).birth_date(born);
        update.category = category;
        db.apply_member(&update).unwrap();
    }
    // an unassigned member must not show up anywhere
    db.apply_member(&MemberUpdate::new(8, "Hal").birth_date(date(1950, 1, 1)))
        .unwrap();
    db
}

#[test]
fn occupancy_follows_moves() {
    let db = Database::in_memory();
    db.upsert_container(Container::new(10, "Red")).unwrap();
    db.upsert_container(Container::new(20, "Blue")).unwrap();
    db.apply_member(&MemberUpdate::new(1, "Ann").container(10)).unwrap();
    db.apply_member(&MemberUpdate::new(2, "Bob").container(10)).unwrap();
    db.apply_member(&MemberUpdate::new(3, "Cat").container(20)).unwrap();

    let rows = db.query().occupancy_count().unwrap();
    let counts: Vec<(&str, usize)> = rows.iter().map(|r| (r.name.as_str(), r.member_count)).collect();
    assert_eq!(counts, vec![("Red", 2), ("Blue", 1)]);

    db.apply_member(&MemberUpdate::new(2, "Bob").container(20)).unwrap();

    let rows = db.query().occupancy_count().unwrap();
    let counts: Vec<(&str, usize)> = rows.iter().map(|r| (r.name.as_str(), r.member_count)).collect();
    assert_eq!(counts, vec![("Red", 1), ("Blue", 2)]);
    // history is kept even though only current rows are counted
    assert_eq!(db.version_count().unwrap(), 4);
}

#[test]
fn occupancy_lists_empty_containers() {
    let db = campus();
    db.upsert_container(Container::new(5, "Room #5")).unwrap();
    let rows = db.query().occupancy_count().unwrap();
    assert_eq!(rows.len(), 5);
    assert_eq!(rows[4].member_count, 0);
    assert_eq!(rows.iter().map(|r| r.member_count).sum::<usize>(), 7);
}

#[test]
fn spread_ranks_descending_with_id_tiebreak() {
    let db = campus();
    let rows = db
        .query()
        .extremes_by_spread(QueryParams::new(as_of(), 5))
        .unwrap();
    let ranked: Vec<(i64, i32)> = rows.iter().map(|r| (r.container_id.get(), r.age_spread)).collect();
    assert_eq!(ranked, vec![(1, 10), (2, 10), (3, 5)]);

    let top = db
        .query()
        .extremes_by_spread(QueryParams::new(as_of(), 2))
        .unwrap();
    assert_eq!(top.len(), 2);
    assert_eq!(top[1].container_id, ContainerId::new(2));
}

#[test]
fn average_rounds_and_breaks_ties_by_id() {
    let db = campus();
    let rows = db
        .query()
        .smallest_average_age(QueryParams::new(as_of(), 5))
        .unwrap();
    assert_eq!(
        rows,
        vec![
            AverageAgeRow { container_id: ContainerId::new(1), name: "Room #1".into(), avg_age: 19 },
            AverageAgeRow { container_id: ContainerId::new(4), name: "Room #4".into(), avg_age: 19 },
            AverageAgeRow { container_id: ContainerId::new(3), name: "Room #3".into(), avg_age: 22 },
            AverageAgeRow { container_id: ContainerId::new(2), name: "Room #2".into(), avg_age: 29 },
        ]
    );
}

#[test]
fn birthday_not_yet_reached_counts_one_year_less() {
    let db = campus();
    let day_before = db
        .query()
        .smallest_average_age(QueryParams::new(date(2024, 6, 1), 5))
        .unwrap();
    let on_birthday = db
        .query()
        .smallest_average_age(QueryParams::new(date(2024, 6, 2), 5))
        .unwrap();
    let gus = |rows: &[AverageAgeRow]| {
        rows.iter()
            .find(|r| r.container_id == ContainerId::new(4))
            .map(|r| r.avg_age)
    };
    assert_eq!(gus(&day_before), Some(19));
    assert_eq!(gus(&on_birthday), Some(20));
}

#[test]
fn mixed_category_ignores_unknown_categories() {
    let db = campus();
    assert_eq!(db.query().mixed_category().unwrap(), vec![ContainerId::new(1)]);

    // moving Fay into container 2 gives it a second category
    db.apply_member(
        &MemberUpdate::new(6, "Fay")
            .container(2)
            .birth_date(date(2005, 1, 1))
            .category(Category::F),
    )
    .unwrap();
    assert_eq!(
        db.query().mixed_category().unwrap(),
        vec![ContainerId::new(1), ContainerId::new(2)]
    );
}

#[test]
fn removed_container_drops_out_of_every_template() {
    let db = campus();
    db.remove_container(ContainerId::new(1)).unwrap();
    let params = QueryParams::new(as_of(), 5);
    let query = db.query();

    assert!(query
        .extremes_by_spread(params)
        .unwrap()
        .iter()
        .all(|r| r.container_id != ContainerId::new(1)));
    assert!(query.mixed_category().unwrap().is_empty());
    assert_eq!(query.occupancy_count().unwrap().len(), 3);
}

#[test]
fn run_produces_tabular_results() {
    let db = campus();
    let query = db.query();
    let params = query.params(as_of());
    assert_eq!(params.limit, 5);

    for template in QueryTemplate::ALL {
        let result = query.run(template, params).unwrap();
        assert_eq!(result.columns, template.columns());
        assert!(result.rows.iter().all(|r| r.len() == result.columns.len()));
    }

    let template: QueryTemplate = "occupancy_count".parse().unwrap();
    let result = query.run(template, params).unwrap();
    assert_eq!(result.rows[0], vec![Cell::Text("Room #1".into()), Cell::Int(2)]);

    let records = query
        .run(QueryTemplate::MixedCategory, params)
        .unwrap()
        .to_json_records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["container_id"], serde_json::json!(1));

    assert!("most_crowded".parse::<QueryTemplate>().is_err());
}
