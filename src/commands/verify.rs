//! Post-run invariant checks over the loaded database.
//!
//! Each check is a named pass/fail row in the verification report: natural
//! keys stay unique, career rows always have an owning person, and no foreign
//! key dangles.

use anyhow::{Context, Result, bail};
use rusqlite::{Connection, OpenFlags};
use tracing::{info, warn};

use crate::cli::VerifyArgs;
use crate::model::{VerifyCheck, VerifyReport, VerifySummary};
use crate::util::{now_utc_string, write_json_pretty};

/// Dimension tables with the column their uniqueness rides on.
const NATURAL_KEYS: &[(&str, &str)] = &[
    ("persons", "slug"),
    ("firms", "slug"),
    ("locations", "display_name"),
    ("schools", "name"),
    ("companies", "name"),
];

/// `(child table, foreign key column, parent table)` links that must resolve
/// when set.
const FOREIGN_KEYS: &[(&str, &str, &str)] = &[
    ("investors", "person_id", "persons"),
    ("investors", "firm_id", "firms"),
    ("investors", "location_id", "locations"),
    ("areas_of_interest", "investor_id", "investors"),
    ("investment_locations", "investor_id", "investors"),
    ("investor_stages", "investor_id", "investors"),
    ("image_urls", "investor_id", "investors"),
    ("media_links", "investor_id", "investors"),
    ("investments", "investor_id", "investors"),
    ("positions", "person_id", "persons"),
    ("positions", "company_id", "companies"),
    ("degrees", "person_id", "persons"),
    ("degrees", "school_id", "schools"),
];

/// Career rows require an owning person; a null here means the load wrote an
/// orphan it should have dropped.
const REQUIRED_PARENTS: &[(&str, &str)] = &[("positions", "person_id"), ("degrees", "person_id")];

pub fn run(args: VerifyArgs) -> Result<()> {
    if !args.db_path.exists() {
        bail!("database file missing: {}", args.db_path.display());
    }

    let connection = Connection::open_with_flags(
        &args.db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database read-only: {}", args.db_path.display()))?;

    let checks = collect_checks(&connection)?;
    let summary = summarize(&checks);

    for check in &checks {
        if check.result == "pass" {
            info!(check = %check.name, detail = %check.detail, "check passed");
        } else {
            warn!(check = %check.name, detail = %check.detail, "check failed");
        }
    }

    let report = VerifyReport {
        manifest_version: 1,
        generated_at: now_utc_string(),
        db_path: args.db_path.display().to_string(),
        checks,
        summary: summary.clone(),
    };

    write_json_pretty(&args.report_path, &report)?;
    info!(
        path = %args.report_path.display(),
        passed = summary.passed,
        failed = summary.failed,
        "wrote verification report"
    );

    if summary.failed > 0 {
        bail!("{} of {} checks failed", summary.failed, summary.total_checks);
    }

    Ok(())
}

pub(crate) fn collect_checks(connection: &Connection) -> Result<Vec<VerifyCheck>> {
    let mut checks = Vec::new();

    for (table, column) in NATURAL_KEYS {
        let sql = format!(
            "SELECT COUNT(*) FROM (SELECT {column} FROM {table} GROUP BY {column} HAVING COUNT(*) > 1)"
        );
        checks.push(violation_check(
            connection,
            format!("{table}_natural_key_unique"),
            &sql,
            format!("duplicate {column} values in {table}"),
        )?);
    }

    for (table, column) in REQUIRED_PARENTS {
        let sql = format!("SELECT COUNT(*) FROM {table} WHERE {column} IS NULL");
        checks.push(violation_check(
            connection,
            format!("{table}_have_owning_person"),
            &sql,
            format!("{table} rows with null {column}"),
        )?);
    }

    for (table, column, parent) in FOREIGN_KEYS {
        let sql = format!(
            "SELECT COUNT(*)
             FROM {table} child
             LEFT JOIN {parent} parent ON parent.id = child.{column}
             WHERE child.{column} IS NOT NULL AND parent.id IS NULL"
        );
        checks.push(violation_check(
            connection,
            format!("{table}_{column}_resolves"),
            &sql,
            format!("{table}.{column} rows pointing at missing {parent}"),
        )?);
    }

    let investor_count: i64 = connection
        .query_row("SELECT COUNT(*) FROM investors", [], |row| row.get(0))
        .context("failed to count investors")?;
    checks.push(VerifyCheck {
        name: "investors_not_empty".to_string(),
        result: if investor_count > 0 { "pass" } else { "failed" }.to_string(),
        detail: format!("{investor_count} investor rows"),
    });

    Ok(checks)
}

fn violation_check(
    connection: &Connection,
    name: String,
    sql: &str,
    what: String,
) -> Result<VerifyCheck> {
    let violations: i64 = connection
        .query_row(sql, [], |row| row.get(0))
        .with_context(|| format!("failed to evaluate check {name}"))?;

    Ok(VerifyCheck {
        name,
        result: if violations == 0 { "pass" } else { "failed" }.to_string(),
        detail: format!("{violations} {what}"),
    })
}

fn summarize(checks: &[VerifyCheck]) -> VerifySummary {
    let passed = checks.iter().filter(|check| check.result == "pass").count();

    VerifySummary {
        total_checks: checks.len(),
        passed,
        failed: checks.len() - passed,
    }
}

#[cfg(test)]
mod tests {
    use rusqlite::Connection;

    use crate::commands::load::ensure_schema;

    use super::*;

    fn setup() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        ensure_schema(&connection).unwrap();
        connection
    }

    #[test]
    fn clean_database_fails_only_the_emptiness_check() {
        let connection = setup();
        let checks = collect_checks(&connection).unwrap();
        let summary = summarize(&checks);

        assert_eq!(summary.failed, 1);
        let failed: Vec<&str> = checks
            .iter()
            .filter(|check| check.result == "failed")
            .map(|check| check.name.as_str())
            .collect();
        assert_eq!(failed, vec!["investors_not_empty"]);
    }

    #[test]
    fn dangling_foreign_key_is_reported() {
        let connection = setup();
        connection
            .execute("INSERT INTO investors(person_id) VALUES(999)", [])
            .unwrap();

        let checks = collect_checks(&connection).unwrap();
        let dangling = checks
            .iter()
            .find(|check| check.name == "investors_person_id_resolves")
            .unwrap();

        assert_eq!(dangling.result, "failed");
    }
}
