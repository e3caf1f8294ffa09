use std::hint::black_box;
use std::time::Instant;

use chrono::NaiveDate;
use criterion::{criterion_group, criterion_main, Criterion, Throughput};

use rosterdb::{Category, Container, Database, MemberUpdate, QueryTemplate};

const ROOMS: i64 = 64;
const MEMBERS: i64 = 4096;

fn seeded() -> Database {
    let db = Database::in_memory();
    for id in 0..ROOMS {
        db.upsert_container(Container::new(id, format!("Room #{id}"))).unwrap();
    }
    let born = NaiveDate::from_ymd_opt(2004, 1, 7).unwrap();
    for id in 0..MEMBERS {
        let category = if id % 2 == 0 { Category::M } else { Category::F };
        db.apply_member(
            &MemberUpdate::new(id, format!("member-{id}"))
                .container(id % ROOMS)
                .birth_date(born - chrono::Days::new(u64::try_from(id).unwrap() * 3))
                .category(category),
        )
        .unwrap();
    }
    db
}

fn bench_apply_supersede(c: &mut Criterion) {
    let mut group = c.benchmark_group("apply");
    group.throughput(Throughput::Elements(1));

    group.bench_function("supersede", |b| {
        b.iter_custom(|iters| {
            // Fresh state per sample so chains do not grow across samples.
            let db = seeded();
            let start = Instant::now();
            for i in 0..iters {
                let i = i64::try_from(i).unwrap();
                let id = i % MEMBERS;
                let update = MemberUpdate::new(id, format!("member-{id}")).container((i + 1) % ROOMS);
                black_box(db.apply_member(&update).unwrap());
            }
            start.elapsed()
        });
    });

    group.bench_function("unchanged", |b| {
        let db = seeded();
        let update = MemberUpdate::new(7, "member-7").container(7);
        b.iter(|| black_box(db.apply_member(&update).unwrap()));
    });

    group.finish();
}

fn bench_queries(c: &mut Criterion) {
    let db = seeded();
    let query = db.query();
    let params = query.params(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap());

    let mut group = c.benchmark_group("query");
    for template in QueryTemplate::ALL {
        group.bench_function(template.name(), |b| {
            b.iter(|| black_box(query.run(template, params).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_apply_supersede, bench_queries);
criterion_main!(benches);
