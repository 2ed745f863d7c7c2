use std::fs;

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use tracing::{info, warn};

use crate::cli::StatusArgs;
use crate::commands::load::{ALL_TABLES, count_rows};
use crate::model::LoadRunReport;

pub fn run(args: StatusArgs) -> Result<()> {
    info!(db_path = %args.db_path.display(), "status requested");

    if args.report_path.exists() {
        let raw = fs::read(&args.report_path)
            .with_context(|| format!("failed to read {}", args.report_path.display()))?;
        let report: LoadRunReport = serde_json::from_slice(&raw)
            .with_context(|| format!("failed to parse {}", args.report_path.display()))?;

        info!(
            run_id = %report.run_id,
            status = %report.status,
            started_at = %report.started_at,
            updated_at = %report.updated_at,
            source = %report.source.path,
            source_records = report.source.record_count,
            record_failures = report.record_failures.len(),
            batch_failures = report.batch_failures.len(),
            "loaded run report"
        );
    } else {
        warn!(path = %args.report_path.display(), "load report missing");
    }

    if !args.db_path.exists() {
        warn!(path = %args.db_path.display(), "database file missing");
        return Ok(());
    }

    let connection = Connection::open_with_flags(
        &args.db_path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("failed to open database read-only: {}", args.db_path.display()))?;

    let schema_version: Option<String> = connection
        .query_row(
            "SELECT value FROM metadata WHERE key = 'db_schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .unwrap_or(None);

    info!(
        path = %args.db_path.display(),
        schema_version = %schema_version.unwrap_or_default(),
        "database status"
    );

    for &table in ALL_TABLES {
        let rows = count_rows(&connection, table).unwrap_or(0);
        info!(table, rows, "table status");
    }

    Ok(())
}
