use rusqlite::Connection;
use serde_json::{Value, json};

use crate::source::RecordSet;

use super::db_setup::{count_rows, ensure_schema, reset_tables};
use super::extract::PersonDraft;
use super::loader::{BatchLoader, ChildRow, ChildTable, insert_person};
use super::run::{PipelineOutcome, run_pipeline};

fn connection() -> Connection {
    let connection = Connection::open_in_memory().unwrap();
    ensure_schema(&connection).unwrap();
    connection
}

fn run_records(connection: &mut Connection, records: Vec<Value>) -> PipelineOutcome {
    run_pipeline(connection, &RecordSet::from_records(records), 1000).unwrap()
}

fn count(connection: &Connection, table: &str) -> i64 {
    count_rows(connection, table).unwrap()
}

fn alice_record() -> Value {
    json!({
        "person": { "slug": "a", "name": "Alice" },
        "firm": { "slug": "f1", "name": "Acme" },
        "positions": [{ "title": "Partner", "company": { "name": "Acme" } }],
    })
}

#[test]
fn records_sharing_a_person_slug_produce_one_person_row() {
    let mut connection = connection();
    let record = json!({ "person": { "slug": "shared", "name": "Sam" }, "headline": "x" });

    let outcome = run_records(&mut connection, vec![record.clone(), record.clone(), record]);

    assert!(outcome.record_failures.is_empty());
    assert_eq!(count(&connection, "persons"), 1);
    assert_eq!(count(&connection, "investors"), 3);

    let distinct_links: i64 = connection
        .query_row(
            "SELECT COUNT(DISTINCT person_id) FROM investors WHERE person_id IS NOT NULL",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(distinct_links, 1);
}

#[test]
fn rerun_after_reset_produces_identical_counts() {
    let mut connection = connection();
    let records = vec![
        alice_record(),
        json!({ "person": { "slug": "b" }, "degrees": [{ "name": "BA", "school": { "name": "State" } }] }),
        json!({ "location": { "display_name": "Berlin" }, "areas_of_interest": [{ "kind": "sector", "display_name": "Fintech" }] }),
    ];

    run_records(&mut connection, records.clone());
    let first: Vec<i64> = table_counts(&connection);

    reset_tables(&connection).unwrap();
    run_records(&mut connection, records);
    let second: Vec<i64> = table_counts(&connection);

    assert_eq!(first, second);
}

fn table_counts(connection: &Connection) -> Vec<i64> {
    super::db_setup::ALL_TABLES
        .iter()
        .map(|table| count(connection, table))
        .collect()
}

#[test]
fn record_without_person_keeps_investor_but_drops_career_rows() {
    let mut connection = connection();
    let record = json!({
        "headline": "solo",
        "positions": [{ "title": "CEO", "company": { "name": "Initech" } }],
        "degrees": [{ "name": "BSc", "school": { "name": "Tech" } }],
    });

    let outcome = run_records(&mut connection, vec![record]);

    assert!(outcome.record_failures.is_empty());
    assert_eq!(count(&connection, "investors"), 1);
    assert_eq!(count(&connection, "positions"), 0);
    assert_eq!(count(&connection, "degrees"), 0);
    assert_eq!(count(&connection, "companies"), 0);
    assert_eq!(count(&connection, "schools"), 0);

    let person_id: Option<i64> = connection
        .query_row("SELECT person_id FROM investors WHERE id = 1", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert!(person_id.is_none());
}

#[test]
fn absent_null_and_empty_interest_arrays_are_equivalent() {
    let mut connection = connection();
    let records = vec![
        json!({ "headline": "absent" }),
        json!({ "headline": "null", "areas_of_interest": null }),
        json!({ "headline": "empty", "areas_of_interest": [] }),
    ];

    let outcome = run_records(&mut connection, records);

    assert!(outcome.record_failures.is_empty());
    assert_eq!(count(&connection, "investors"), 3);
    assert_eq!(count(&connection, "areas_of_interest"), 0);
}

#[test]
fn company_known_only_from_positions_is_created_once() {
    let mut connection = connection();
    let record = |slug: &str| {
        json!({
            "person": { "slug": slug },
            "positions": [{ "title": "Advisor", "company": { "name": "Initech" } }],
        })
    };

    run_records(&mut connection, vec![record("p1"), record("p2")]);

    assert_eq!(count(&connection, "companies"), 1);
    assert_eq!(count(&connection, "positions"), 2);

    let distinct_companies: i64 = connection
        .query_row("SELECT COUNT(DISTINCT company_id) FROM positions", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(distinct_companies, 1);
}

#[test]
fn shared_person_and_firm_scenario_links_all_rows() {
    let mut connection = connection();
    let records = vec![
        alice_record(),
        json!({ "person": { "slug": "a", "name": "Alice" }, "firm": null, "positions": [] }),
    ];

    let outcome = run_records(&mut connection, records);

    assert!(outcome.record_failures.is_empty());
    assert_eq!(count(&connection, "persons"), 1);
    assert_eq!(count(&connection, "firms"), 1);
    assert_eq!(count(&connection, "companies"), 1);
    assert_eq!(count(&connection, "investors"), 2);
    assert_eq!(count(&connection, "positions"), 1);

    let alice_id: i64 = connection
        .query_row("SELECT id FROM persons WHERE slug = 'a'", [], |row| {
            row.get(0)
        })
        .unwrap();

    let linked: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM investors WHERE person_id = ?1",
            [alice_id],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(linked, 2);

    let second_firm: Option<i64> = connection
        .query_row("SELECT firm_id FROM investors WHERE id = 2", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert!(second_firm.is_none());

    let (position_person, position_company): (i64, Option<i64>) = connection
        .query_row(
            "SELECT person_id, company_id FROM positions LIMIT 1",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap();
    assert_eq!(position_person, alice_id);
    let acme_id: i64 = connection
        .query_row("SELECT id FROM companies WHERE name = 'Acme'", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(position_company, Some(acme_id));
}

#[test]
fn malformed_record_is_reported_and_the_rest_still_load() {
    let mut connection = connection();
    let records = vec![json!(42), json!({ "person": { "slug": "ok" } })];

    let outcome = run_records(&mut connection, records);

    assert_eq!(count(&connection, "investors"), 1);
    assert_eq!(count(&connection, "persons"), 1);

    let failed_ordinals: Vec<usize> = outcome
        .record_failures
        .iter()
        .map(|failure| failure.ordinal)
        .collect();
    assert!(failed_ordinals.contains(&1));
    assert!(!failed_ordinals.contains(&2));

    let passes: Vec<&str> = outcome
        .record_failures
        .iter()
        .map(|failure| failure.pass.as_str())
        .collect();
    assert!(passes.contains(&"dimensions"));
    assert!(passes.contains(&"facts"));
}

#[test]
fn second_run_without_reset_reuses_seeded_dimensions() {
    let mut connection = connection();
    let records = vec![alice_record()];

    let first = run_records(&mut connection, records.clone());
    assert_eq!(first.seeded_keys, 0);
    assert_eq!(first.inserted.persons, 1);

    let second = run_records(&mut connection, records);
    assert!(second.seeded_keys > 0);
    assert_eq!(second.inserted.persons, 0);

    assert_eq!(count(&connection, "persons"), 1);
    assert_eq!(count(&connection, "firms"), 1);
    assert_eq!(count(&connection, "companies"), 1);
    assert_eq!(count(&connection, "investors"), 2);
}

#[test]
fn loader_flushes_automatically_at_the_batch_threshold() {
    let mut connection = connection();
    let mut loader = BatchLoader::new(2);

    let row = |name: &str| ChildRow::Interest {
        table: ChildTable::AreasOfInterest,
        investor_id: 1,
        kind: None,
        display_name: Some(name.to_string()),
    };

    loader.stage(&mut connection, row("first")).unwrap();
    assert_eq!(loader.buffered(ChildTable::AreasOfInterest), 1);
    assert_eq!(count(&connection, "areas_of_interest"), 0);

    loader.stage(&mut connection, row("second")).unwrap();
    assert_eq!(loader.buffered(ChildTable::AreasOfInterest), 0);
    assert_eq!(count(&connection, "areas_of_interest"), 2);

    loader.stage(&mut connection, row("third")).unwrap();
    loader.flush_all(&mut connection).unwrap();
    assert_eq!(count(&connection, "areas_of_interest"), 3);
    assert_eq!(loader.inserted(ChildTable::AreasOfInterest), 3);
    assert!(loader.batch_failures.is_empty());
}

#[test]
fn natural_key_collision_resolves_to_the_existing_row() {
    let connection = connection();
    connection
        .execute("INSERT INTO persons(slug) VALUES('alice')", [])
        .unwrap();
    let existing: i64 = connection
        .query_row("SELECT id FROM persons WHERE slug = 'alice'", [], |row| {
            row.get(0)
        })
        .unwrap();

    let draft = PersonDraft {
        slug: "alice".to_string(),
        first_name: None,
        last_name: None,
        name: Some("Alice".to_string()),
        linkedin_url: None,
        facebook_url: None,
        twitter_url: None,
        crunchbase_url: None,
        angellist_url: None,
        url: None,
        is_me: false,
        first_degree_count: None,
        is_on_target_list: false,
    };

    let resolved = insert_person(&connection, &draft).unwrap();
    assert_eq!(resolved, existing);
    assert_eq!(count(&connection, "persons"), 1);
}

#[test]
fn investments_and_images_land_with_their_investor() {
    let mut connection = connection();
    let record = json!({
        "image_urls": ["https://img.example/a.png"],
        "image_urls_edit_mode": ["https://img.example/b.png"],
        "media_links": [{ "url": "https://news.example", "title": "T", "image_url": null }],
        "investments_on_record": {
            "edges": [
                { "node": { "company_display_name": "Acme", "total_raised": ["$1M", { "currency": "USD" }] } },
            ],
        },
    });

    run_records(&mut connection, vec![record]);

    assert_eq!(count(&connection, "image_urls"), 2);
    assert_eq!(count(&connection, "media_links"), 1);
    assert_eq!(count(&connection, "investments"), 1);

    let edit_flags: i64 = connection
        .query_row(
            "SELECT COUNT(*) FROM image_urls WHERE is_edit_mode = 1",
            [],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(edit_flags, 1);

    let raised: Option<String> = connection
        .query_row("SELECT total_raised_json FROM investments", [], |row| {
            row.get(0)
        })
        .unwrap();
    assert_eq!(raised.as_deref(), Some("[\"$1M\",{\"currency\":\"USD\"}]"));
}
