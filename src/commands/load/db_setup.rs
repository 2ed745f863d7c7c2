use anyhow::{Context, Result};
use rusqlite::Connection;

use crate::util::now_utc_string;

pub const DB_SCHEMA_VERSION: &str = "0.2.0";

/// All target tables, children before parents, so iterating in order is a
/// valid truncation order.
pub const ALL_TABLES: &[&str] = &[
    "positions",
    "degrees",
    "investments",
    "media_links",
    "image_urls",
    "areas_of_interest",
    "investment_locations",
    "investor_stages",
    "investors",
    "companies",
    "schools",
    "firms",
    "locations",
    "persons",
];

pub fn configure_connection(connection: &Connection) -> Result<()> {
    connection
        .pragma_update(None, "journal_mode", "WAL")
        .context("failed to set journal_mode=WAL")?;
    connection
        .pragma_update(None, "synchronous", "NORMAL")
        .context("failed to set synchronous=NORMAL")?;
    Ok(())
}

pub fn ensure_schema(connection: &Connection) -> Result<()> {
    connection.execute_batch(
        "
        PRAGMA foreign_keys = OFF;

        CREATE TABLE IF NOT EXISTS metadata (
          key TEXT PRIMARY KEY,
          value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS persons (
          id INTEGER PRIMARY KEY,
          slug TEXT NOT NULL UNIQUE,
          first_name TEXT,
          last_name TEXT,
          name TEXT,
          linkedin_url TEXT,
          facebook_url TEXT,
          twitter_url TEXT,
          crunchbase_url TEXT,
          angellist_url TEXT,
          url TEXT,
          is_me INTEGER NOT NULL DEFAULT 0,
          first_degree_count INTEGER,
          is_on_target_list INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS firms (
          id INTEGER PRIMARY KEY,
          name TEXT,
          slug TEXT NOT NULL UNIQUE,
          current_fund_size TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS locations (
          id INTEGER PRIMARY KEY,
          display_name TEXT NOT NULL UNIQUE,
          kind TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS schools (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL UNIQUE,
          display_name TEXT,
          total_student_count INTEGER,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS companies (
          id INTEGER PRIMARY KEY,
          name TEXT NOT NULL UNIQUE,
          display_name TEXT,
          total_employee_count INTEGER,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS investors (
          id INTEGER PRIMARY KEY,
          person_id INTEGER REFERENCES persons(id),
          firm_id INTEGER REFERENCES firms(id),
          location_id INTEGER REFERENCES locations(id),
          position TEXT,
          headline TEXT,
          previous_position TEXT,
          previous_firm TEXT,
          min_investment TEXT,
          max_investment TEXT,
          target_investment TEXT,
          areas_of_interest_freeform TEXT,
          no_current_interest_freeform TEXT,
          vote_count INTEGER NOT NULL DEFAULT 0,
          leads_rounds TEXT,
          claimed INTEGER NOT NULL DEFAULT 0,
          can_edit INTEGER NOT NULL DEFAULT 0,
          include_in_list INTEGER NOT NULL DEFAULT 0,
          in_founder_investor_list INTEGER NOT NULL DEFAULT 0,
          in_diverse_investor_list INTEGER NOT NULL DEFAULT 0,
          in_female_investor_list INTEGER NOT NULL DEFAULT 0,
          in_invests_in_diverse_founders_investor_list INTEGER NOT NULL DEFAULT 0,
          in_invests_in_female_founders_investor_list INTEGER NOT NULL DEFAULT 0,
          has_profile_vote INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS areas_of_interest (
          id INTEGER PRIMARY KEY,
          investor_id INTEGER REFERENCES investors(id),
          kind TEXT,
          display_name TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS investment_locations (
          id INTEGER PRIMARY KEY,
          investor_id INTEGER REFERENCES investors(id),
          kind TEXT,
          display_name TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS investor_stages (
          id INTEGER PRIMARY KEY,
          investor_id INTEGER REFERENCES investors(id),
          kind TEXT,
          display_name TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS image_urls (
          id INTEGER PRIMARY KEY,
          investor_id INTEGER REFERENCES investors(id),
          url TEXT NOT NULL,
          is_edit_mode INTEGER NOT NULL DEFAULT 0,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS media_links (
          id INTEGER PRIMARY KEY,
          investor_id INTEGER REFERENCES investors(id),
          url TEXT,
          title TEXT,
          image_url TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS investments (
          id INTEGER PRIMARY KEY,
          investor_id INTEGER REFERENCES investors(id),
          company_display_name TEXT NOT NULL,
          total_raised_json TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS positions (
          id INTEGER PRIMARY KEY,
          person_id INTEGER NOT NULL REFERENCES persons(id),
          company_id INTEGER REFERENCES companies(id),
          title TEXT,
          start_month TEXT,
          start_year TEXT,
          end_month TEXT,
          end_year TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS degrees (
          id INTEGER PRIMARY KEY,
          person_id INTEGER NOT NULL REFERENCES persons(id),
          school_id INTEGER REFERENCES schools(id),
          degree_name TEXT,
          field_of_study TEXT,
          created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        );

        CREATE INDEX IF NOT EXISTS idx_investors_person ON investors(person_id);
        CREATE INDEX IF NOT EXISTS idx_investors_firm ON investors(firm_id);
        CREATE INDEX IF NOT EXISTS idx_positions_person ON positions(person_id);
        CREATE INDEX IF NOT EXISTS idx_degrees_person ON degrees(person_id);
        ",
    )?;

    let now = now_utc_string();
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [DB_SCHEMA_VERSION],
    )?;
    connection.execute(
        "INSERT INTO metadata(key, value) VALUES('db_updated_at', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [now],
    )?;

    Ok(())
}

/// Full reset in dependency order. Emptied tables restart surrogate ids at 1,
/// so a re-run from scratch reproduces identical links.
pub fn reset_tables(connection: &Connection) -> Result<usize> {
    for table in ALL_TABLES {
        let sql = format!("DELETE FROM {table}");
        connection
            .execute(&sql, [])
            .with_context(|| format!("failed to clear table {table}"))?;
    }

    Ok(ALL_TABLES.len())
}

pub fn count_rows(connection: &Connection, table: &str) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    let count = connection
        .query_row(&sql, [], |row| row.get(0))
        .with_context(|| format!("failed to count rows in {table}"))?;
    Ok(count)
}
