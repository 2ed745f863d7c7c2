use std::collections::HashSet;

use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::Connection;
use serde_json::Value;
use tracing::{info, warn};

use crate::cli::LoadArgs;
use crate::model::{
    BatchFailure, LoadRunReport, RecordFailure, SourceSummary, TableCounts,
};
use crate::source::RecordSet;
use crate::util::{now_utc_string, utc_compact_string, write_json_pretty};

use super::db_setup::{
    DB_SCHEMA_VERSION, configure_connection, count_rows, ensure_schema, reset_tables,
};
use super::extract::{CompanyDraft, Extractor, SchoolDraft};
use super::loader::{
    BatchLoader, ChildRow, ChildTable, insert_company, insert_firm, insert_investor,
    insert_location, insert_person, insert_school, InvestorRow,
};
use super::registry::{EntityKind, KeyRegistry};

pub fn run(args: LoadArgs) -> Result<()> {
    let started_ts = Utc::now();
    let started_at = now_utc_string();
    let run_id = format!("run-{}", utc_compact_string(started_ts));

    info!(
        source = %args.source.display(),
        db_path = %args.db_path.display(),
        run_id = %run_id,
        "starting load"
    );

    let records = RecordSet::load(&args.source, args.max_records)?;
    info!(records = records.len(), "loaded source records");

    let mut connection = Connection::open(&args.db_path)
        .with_context(|| format!("failed to open {}", args.db_path.display()))?;
    configure_connection(&connection)?;
    ensure_schema(&connection)?;

    if args.reset {
        let cleared = reset_tables(&connection)?;
        info!(tables = cleared, "reset target tables");
    }

    let outcome = run_pipeline(&mut connection, &records, args.batch_size)?;
    let rows_total = table_totals(&connection)?;
    let updated_at = now_utc_string();

    let mut warnings = Vec::new();
    if records.malformed_line_count > 0 {
        warnings.push(format!(
            "{} malformed source lines kept as null records",
            records.malformed_line_count
        ));
    }
    if records.truncated {
        warnings.push("source truncated by --max-records".to_string());
    }

    let status = if outcome.record_failures.is_empty() && outcome.batch_failures.is_empty() {
        "completed"
    } else {
        "completed_with_failures"
    };

    let failed_ordinals: HashSet<usize> = outcome
        .record_failures
        .iter()
        .map(|failure| failure.ordinal)
        .collect();
    if failed_ordinals.len() == records.len() {
        warn!("every record failed; the target is unlikely to be usable");
    }

    let report = LoadRunReport {
        manifest_version: 1,
        run_id: run_id.clone(),
        db_schema_version: DB_SCHEMA_VERSION.to_string(),
        status: status.to_string(),
        started_at,
        updated_at,
        command: render_load_command(&args),
        db_path: args.db_path.display().to_string(),
        source: SourceSummary {
            path: records.path.clone(),
            sha256: records.sha256.clone(),
            record_count: records.len(),
            malformed_line_count: records.malformed_line_count,
        },
        registry_seeded_keys: outcome.seeded_keys,
        rows_inserted: outcome.inserted.clone(),
        rows_total,
        record_failures: outcome.record_failures,
        batch_failures: outcome.batch_failures,
        warnings,
        notes: vec![
            "Load is append-only; pass --reset for an idempotent from-scratch run.".to_string(),
        ],
    };

    write_json_pretty(&args.report_path, &report)?;

    info!(path = %args.report_path.display(), "wrote load report");
    info!(
        investors = report.rows_inserted.investors,
        persons = report.rows_inserted.persons,
        record_failures = report.record_failures.len(),
        batch_failures = report.batch_failures.len(),
        status = %report.status,
        "load completed"
    );

    Ok(())
}

#[derive(Debug)]
pub(crate) struct PipelineOutcome {
    pub inserted: TableCounts,
    pub record_failures: Vec<RecordFailure>,
    pub batch_failures: Vec<BatchFailure>,
    pub seeded_keys: usize,
}

/// Two linear passes over the same record sequence. Pass one creates the
/// record-level dimensions and fills the registry; pass two writes the fact
/// row and all children against the fully populated registry.
pub(crate) fn run_pipeline(
    connection: &mut Connection,
    records: &RecordSet,
    batch_size: usize,
) -> Result<PipelineOutcome> {
    let extractor = Extractor::new()?;
    let mut registry = KeyRegistry::new();
    let seeded_keys = registry.seed(connection)?;
    if seeded_keys > 0 {
        info!(keys = seeded_keys, "seeded registry from existing rows");
    }

    let mut inserted = TableCounts::default();
    let mut record_failures = Vec::new();

    for (ordinal, record) in records.iter() {
        if let Err(err) = load_dimensions(
            connection,
            &extractor,
            &mut registry,
            &mut inserted,
            record,
            ordinal,
        ) {
            record_failures.push(RecordFailure {
                ordinal,
                pass: "dimensions".to_string(),
                reason: format!("{err:#}"),
            });
        }
    }

    info!(
        persons = registry.len(EntityKind::Person),
        firms = registry.len(EntityKind::Firm),
        locations = registry.len(EntityKind::Location),
        "dimension pass completed"
    );

    let mut loader = BatchLoader::new(batch_size);

    for (ordinal, record) in records.iter() {
        if let Err(err) = load_record(
            connection,
            &extractor,
            &mut registry,
            &mut loader,
            &mut inserted,
            record,
            ordinal,
        ) {
            record_failures.push(RecordFailure {
                ordinal,
                pass: "facts".to_string(),
                reason: format!("{err:#}"),
            });
        }
    }

    loader.flush_all(connection)?;

    inserted.areas_of_interest = loader.inserted(ChildTable::AreasOfInterest);
    inserted.investment_locations = loader.inserted(ChildTable::InvestmentLocations);
    inserted.investor_stages = loader.inserted(ChildTable::InvestorStages);
    inserted.image_urls = loader.inserted(ChildTable::ImageUrls);
    inserted.media_links = loader.inserted(ChildTable::MediaLinks);
    inserted.investments = loader.inserted(ChildTable::Investments);
    inserted.positions = loader.inserted(ChildTable::Positions);
    inserted.degrees = loader.inserted(ChildTable::Degrees);

    Ok(PipelineOutcome {
        inserted,
        record_failures,
        batch_failures: loader.batch_failures,
        seeded_keys,
    })
}

fn load_dimensions(
    connection: &Connection,
    extractor: &Extractor,
    registry: &mut KeyRegistry,
    inserted: &mut TableCounts,
    record: &Value,
    ordinal: usize,
) -> Result<()> {
    let drafts = extractor.dimension_drafts(record, ordinal)?;

    if let Some(person) = &drafts.person {
        if registry.resolve(EntityKind::Person, &person.slug).is_none() {
            let id = insert_person(connection, person)?;
            registry.register(EntityKind::Person, &person.slug, id);
            inserted.persons += 1;
        }
    }

    if let Some(firm) = &drafts.firm {
        if registry.resolve(EntityKind::Firm, &firm.slug).is_none() {
            let id = insert_firm(connection, firm)?;
            registry.register(EntityKind::Firm, &firm.slug, id);
            inserted.firms += 1;
        }
    }

    if let Some(location) = &drafts.location {
        if registry
            .resolve(EntityKind::Location, &location.display_name)
            .is_none()
        {
            let id = insert_location(connection, location)?;
            registry.register(EntityKind::Location, &location.display_name, id);
            inserted.locations += 1;
        }
    }

    Ok(())
}

fn load_record(
    connection: &mut Connection,
    extractor: &Extractor,
    registry: &mut KeyRegistry,
    loader: &mut BatchLoader,
    inserted: &mut TableCounts,
    record: &Value,
    ordinal: usize,
) -> Result<()> {
    let dimensions = extractor.dimension_drafts(record, ordinal)?;
    let person_id = dimensions
        .person
        .as_ref()
        .and_then(|person| registry.resolve(EntityKind::Person, &person.slug));
    let firm_id = dimensions
        .firm
        .as_ref()
        .and_then(|firm| registry.resolve(EntityKind::Firm, &firm.slug));
    let location_id = dimensions
        .location
        .as_ref()
        .and_then(|location| registry.resolve(EntityKind::Location, &location.display_name));

    let investor = extractor.investor_draft(record)?;
    let investor_id = insert_investor(
        connection,
        &InvestorRow {
            person_id,
            firm_id,
            location_id,
            draft: investor,
        },
    )?;
    inserted.investors += 1;

    let children = extractor.child_drafts(record)?;

    for draft in children.areas_of_interest {
        loader.stage(
            connection,
            ChildRow::Interest {
                table: ChildTable::AreasOfInterest,
                investor_id,
                kind: draft.kind,
                display_name: draft.display_name,
            },
        )?;
    }

    for draft in children.investment_locations {
        loader.stage(
            connection,
            ChildRow::Interest {
                table: ChildTable::InvestmentLocations,
                investor_id,
                kind: draft.kind,
                display_name: draft.display_name,
            },
        )?;
    }

    for draft in children.stages {
        loader.stage(
            connection,
            ChildRow::Interest {
                table: ChildTable::InvestorStages,
                investor_id,
                kind: draft.kind,
                display_name: draft.display_name,
            },
        )?;
    }

    for draft in children.images {
        loader.stage(
            connection,
            ChildRow::ImageUrl {
                investor_id,
                url: draft.url,
                edit_mode: draft.edit_mode,
            },
        )?;
    }

    for draft in children.media_links {
        loader.stage(
            connection,
            ChildRow::MediaLink {
                investor_id,
                url: draft.url,
                title: draft.title,
                image_url: draft.image_url,
            },
        )?;
    }

    for draft in children.investments {
        loader.stage(
            connection,
            ChildRow::Investment {
                investor_id,
                company_display_name: draft.company_display_name,
                total_raised_json: draft.total_raised_json,
            },
        )?;
    }

    // Career rows are dropped when no person resolved; an investor row with a
    // null person_id still gets every investor-keyed child.
    let Some(person_id) = person_id else {
        return Ok(());
    };

    let career = extractor.career_drafts(record)?;

    for draft in career.positions {
        let company_id = match &draft.company {
            Some(company) => Some(resolve_or_insert_company(
                connection, registry, inserted, company,
            )?),
            None => None,
        };

        loader.stage(
            connection,
            ChildRow::Position {
                person_id,
                company_id,
                title: draft.title,
                start_month: draft.start_month,
                start_year: draft.start_year,
                end_month: draft.end_month,
                end_year: draft.end_year,
            },
        )?;
    }

    for draft in career.degrees {
        let school_id = match &draft.school {
            Some(school) => Some(resolve_or_insert_school(
                connection, registry, inserted, school,
            )?),
            None => None,
        };

        loader.stage(
            connection,
            ChildRow::Degree {
                person_id,
                school_id,
                degree_name: draft.degree_name,
                field_of_study: draft.field_of_study,
            },
        )?;
    }

    Ok(())
}

fn resolve_or_insert_company(
    connection: &Connection,
    registry: &mut KeyRegistry,
    inserted: &mut TableCounts,
    draft: &CompanyDraft,
) -> Result<i64> {
    if let Some(id) = registry.resolve(EntityKind::Company, &draft.name) {
        return Ok(id);
    }

    let id = insert_company(connection, draft)?;
    registry.register(EntityKind::Company, &draft.name, id);
    inserted.companies += 1;
    Ok(id)
}

fn resolve_or_insert_school(
    connection: &Connection,
    registry: &mut KeyRegistry,
    inserted: &mut TableCounts,
    draft: &SchoolDraft,
) -> Result<i64> {
    if let Some(id) = registry.resolve(EntityKind::School, &draft.name) {
        return Ok(id);
    }

    let id = insert_school(connection, draft)?;
    registry.register(EntityKind::School, &draft.name, id);
    inserted.schools += 1;
    Ok(id)
}

fn table_totals(connection: &Connection) -> Result<TableCounts> {
    Ok(TableCounts {
        persons: count_rows(connection, "persons")? as usize,
        firms: count_rows(connection, "firms")? as usize,
        locations: count_rows(connection, "locations")? as usize,
        schools: count_rows(connection, "schools")? as usize,
        companies: count_rows(connection, "companies")? as usize,
        investors: count_rows(connection, "investors")? as usize,
        areas_of_interest: count_rows(connection, "areas_of_interest")? as usize,
        investment_locations: count_rows(connection, "investment_locations")? as usize,
        investor_stages: count_rows(connection, "investor_stages")? as usize,
        image_urls: count_rows(connection, "image_urls")? as usize,
        media_links: count_rows(connection, "media_links")? as usize,
        investments: count_rows(connection, "investments")? as usize,
        positions: count_rows(connection, "positions")? as usize,
        degrees: count_rows(connection, "degrees")? as usize,
    })
}

fn render_load_command(args: &LoadArgs) -> String {
    let mut command = vec![
        "investordb".to_string(),
        "load".to_string(),
        "--source".to_string(),
        args.source.display().to_string(),
        "--db-path".to_string(),
        args.db_path.display().to_string(),
        "--batch-size".to_string(),
        args.batch_size.to_string(),
    ];

    if args.reset {
        command.push("--reset".to_string());
    }
    if let Some(max_records) = args.max_records {
        command.push("--max-records".to_string());
        command.push(max_records.to_string());
    }

    command.join(" ")
}
