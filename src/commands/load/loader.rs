//! Writes drafts to storage.
//!
//! Dimension and fact rows are written through immediately because the caller
//! needs the storage-assigned id before any dependent row. Child rows are
//! buffered per table and flushed as one transaction per batch; a failed
//! flush rolls back that batch only and is recorded, never aborting the run.

use std::collections::HashMap;

use anyhow::{Context, Result, anyhow};
use rusqlite::{Connection, ErrorCode, OptionalExtension, params};
use tracing::warn;

use crate::model::BatchFailure;

use super::extract::{
    CompanyDraft, FirmDraft, InvestorDraft, LocationDraft, PersonDraft, SchoolDraft,
};
use super::registry::EntityKind;

pub fn insert_person(connection: &Connection, draft: &PersonDraft) -> Result<i64> {
    insert_or_existing(connection, EntityKind::Person, &draft.slug, |conn| {
        conn.execute(
            "INSERT INTO persons(
               slug, first_name, last_name, name, linkedin_url, facebook_url,
               twitter_url, crunchbase_url, angellist_url, url, is_me,
               first_degree_count, is_on_target_list
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            params![
                draft.slug,
                draft.first_name,
                draft.last_name,
                draft.name,
                draft.linkedin_url,
                draft.facebook_url,
                draft.twitter_url,
                draft.crunchbase_url,
                draft.angellist_url,
                draft.url,
                draft.is_me,
                draft.first_degree_count,
                draft.is_on_target_list,
            ],
        )
    })
}

pub fn insert_firm(connection: &Connection, draft: &FirmDraft) -> Result<i64> {
    insert_or_existing(connection, EntityKind::Firm, &draft.slug, |conn| {
        conn.execute(
            "INSERT INTO firms(name, slug, current_fund_size) VALUES(?1, ?2, ?3)",
            params![draft.name, draft.slug, draft.current_fund_size],
        )
    })
}

pub fn insert_location(connection: &Connection, draft: &LocationDraft) -> Result<i64> {
    insert_or_existing(
        connection,
        EntityKind::Location,
        &draft.display_name,
        |conn| {
            conn.execute(
                "INSERT INTO locations(display_name, kind) VALUES(?1, ?2)",
                params![draft.display_name, draft.kind],
            )
        },
    )
}

pub fn insert_school(connection: &Connection, draft: &SchoolDraft) -> Result<i64> {
    insert_or_existing(connection, EntityKind::School, &draft.name, |conn| {
        conn.execute(
            "INSERT INTO schools(name, display_name, total_student_count) VALUES(?1, ?2, ?3)",
            params![draft.name, draft.display_name, draft.total_student_count],
        )
    })
}

pub fn insert_company(connection: &Connection, draft: &CompanyDraft) -> Result<i64> {
    insert_or_existing(connection, EntityKind::Company, &draft.name, |conn| {
        conn.execute(
            "INSERT INTO companies(name, display_name, total_employee_count) VALUES(?1, ?2, ?3)",
            params![draft.name, draft.display_name, draft.total_employee_count],
        )
    })
}

/// Fact row with its resolved dimension ids.
#[derive(Debug)]
pub struct InvestorRow {
    pub person_id: Option<i64>,
    pub firm_id: Option<i64>,
    pub location_id: Option<i64>,
    pub draft: InvestorDraft,
}

pub fn insert_investor(connection: &Connection, row: &InvestorRow) -> Result<i64> {
    connection
        .execute(
            "INSERT INTO investors(
               person_id, firm_id, location_id, position, headline,
               previous_position, previous_firm, min_investment, max_investment,
               target_investment, areas_of_interest_freeform,
               no_current_interest_freeform, vote_count, leads_rounds, claimed,
               can_edit, include_in_list, in_founder_investor_list,
               in_diverse_investor_list, in_female_investor_list,
               in_invests_in_diverse_founders_investor_list,
               in_invests_in_female_founders_investor_list, has_profile_vote
             )
             VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                    ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                row.person_id,
                row.firm_id,
                row.location_id,
                row.draft.position,
                row.draft.headline,
                row.draft.previous_position,
                row.draft.previous_firm,
                row.draft.min_investment,
                row.draft.max_investment,
                row.draft.target_investment,
                row.draft.areas_of_interest_freeform,
                row.draft.no_current_interest_freeform,
                row.draft.vote_count,
                row.draft.leads_rounds,
                row.draft.claimed,
                row.draft.can_edit,
                row.draft.include_in_list,
                row.draft.in_founder_investor_list,
                row.draft.in_diverse_investor_list,
                row.draft.in_female_investor_list,
                row.draft.in_invests_in_diverse_founders_investor_list,
                row.draft.in_invests_in_female_founders_investor_list,
                row.draft.has_profile_vote,
            ],
        )
        .context("failed to insert investor row")?;

    Ok(connection.last_insert_rowid())
}

/// Single-row dimension insert returning the assigned id. A natural-key
/// collision means another path already created the row; it resolves to a
/// fresh lookup instead of an error.
fn insert_or_existing(
    connection: &Connection,
    kind: EntityKind,
    key: &str,
    insert: impl FnOnce(&Connection) -> rusqlite::Result<usize>,
) -> Result<i64> {
    match insert(connection) {
        Ok(_) => Ok(connection.last_insert_rowid()),
        Err(err) if is_unique_violation(&err) => id_for_key(connection, kind, key)?
            .ok_or_else(|| {
                anyhow!(
                    "{} key {key:?} collided but is not present on lookup",
                    kind.table()
                )
            }),
        Err(err) => {
            Err(err).with_context(|| format!("failed to insert into {}", kind.table()))
        }
    }
}

fn id_for_key(connection: &Connection, kind: EntityKind, key: &str) -> Result<Option<i64>> {
    let sql = format!(
        "SELECT id FROM {} WHERE {} = ?1",
        kind.table(),
        kind.key_column()
    );

    connection
        .query_row(&sql, [key], |row| row.get(0))
        .optional()
        .with_context(|| format!("failed to look up {} by natural key", kind.table()))
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildTable {
    AreasOfInterest,
    InvestmentLocations,
    InvestorStages,
    ImageUrls,
    MediaLinks,
    Investments,
    Positions,
    Degrees,
}

impl ChildTable {
    pub const ALL: [ChildTable; 8] = [
        ChildTable::AreasOfInterest,
        ChildTable::InvestmentLocations,
        ChildTable::InvestorStages,
        ChildTable::ImageUrls,
        ChildTable::MediaLinks,
        ChildTable::Investments,
        ChildTable::Positions,
        ChildTable::Degrees,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            ChildTable::AreasOfInterest => "areas_of_interest",
            ChildTable::InvestmentLocations => "investment_locations",
            ChildTable::InvestorStages => "investor_stages",
            ChildTable::ImageUrls => "image_urls",
            ChildTable::MediaLinks => "media_links",
            ChildTable::Investments => "investments",
            ChildTable::Positions => "positions",
            ChildTable::Degrees => "degrees",
        }
    }

    fn insert_sql(self) -> &'static str {
        match self {
            ChildTable::AreasOfInterest => {
                "INSERT INTO areas_of_interest(investor_id, kind, display_name) VALUES(?1, ?2, ?3)"
            }
            ChildTable::InvestmentLocations => {
                "INSERT INTO investment_locations(investor_id, kind, display_name) VALUES(?1, ?2, ?3)"
            }
            ChildTable::InvestorStages => {
                "INSERT INTO investor_stages(investor_id, kind, display_name) VALUES(?1, ?2, ?3)"
            }
            ChildTable::ImageUrls => {
                "INSERT INTO image_urls(investor_id, url, is_edit_mode) VALUES(?1, ?2, ?3)"
            }
            ChildTable::MediaLinks => {
                "INSERT INTO media_links(investor_id, url, title, image_url) VALUES(?1, ?2, ?3, ?4)"
            }
            ChildTable::Investments => {
                "INSERT INTO investments(investor_id, company_display_name, total_raised_json) VALUES(?1, ?2, ?3)"
            }
            ChildTable::Positions => {
                "INSERT INTO positions(person_id, company_id, title, start_month, start_year, end_month, end_year)
                 VALUES(?1, ?2, ?3, ?4, ?5, ?6, ?7)"
            }
            ChildTable::Degrees => {
                "INSERT INTO degrees(person_id, school_id, degree_name, field_of_study) VALUES(?1, ?2, ?3, ?4)"
            }
        }
    }
}

#[derive(Debug)]
pub enum ChildRow {
    Interest {
        table: ChildTable,
        investor_id: i64,
        kind: Option<String>,
        display_name: Option<String>,
    },
    ImageUrl {
        investor_id: i64,
        url: String,
        edit_mode: bool,
    },
    MediaLink {
        investor_id: i64,
        url: Option<String>,
        title: Option<String>,
        image_url: Option<String>,
    },
    Investment {
        investor_id: i64,
        company_display_name: String,
        total_raised_json: Option<String>,
    },
    Position {
        person_id: i64,
        company_id: Option<i64>,
        title: Option<String>,
        start_month: Option<String>,
        start_year: Option<String>,
        end_month: Option<String>,
        end_year: Option<String>,
    },
    Degree {
        person_id: i64,
        school_id: Option<i64>,
        degree_name: Option<String>,
        field_of_study: Option<String>,
    },
}

impl ChildRow {
    fn table(&self) -> ChildTable {
        match self {
            ChildRow::Interest { table, .. } => *table,
            ChildRow::ImageUrl { .. } => ChildTable::ImageUrls,
            ChildRow::MediaLink { .. } => ChildTable::MediaLinks,
            ChildRow::Investment { .. } => ChildTable::Investments,
            ChildRow::Position { .. } => ChildTable::Positions,
            ChildRow::Degree { .. } => ChildTable::Degrees,
        }
    }

    fn bind(&self, statement: &mut rusqlite::Statement<'_>) -> rusqlite::Result<usize> {
        match self {
            ChildRow::Interest {
                investor_id,
                kind,
                display_name,
                ..
            } => statement.execute(params![investor_id, kind, display_name]),
            ChildRow::ImageUrl {
                investor_id,
                url,
                edit_mode,
            } => statement.execute(params![investor_id, url, edit_mode]),
            ChildRow::MediaLink {
                investor_id,
                url,
                title,
                image_url,
            } => statement.execute(params![investor_id, url, title, image_url]),
            ChildRow::Investment {
                investor_id,
                company_display_name,
                total_raised_json,
            } => statement.execute(params![investor_id, company_display_name, total_raised_json]),
            ChildRow::Position {
                person_id,
                company_id,
                title,
                start_month,
                start_year,
                end_month,
                end_year,
            } => statement.execute(params![
                person_id,
                company_id,
                title,
                start_month,
                start_year,
                end_month,
                end_year
            ]),
            ChildRow::Degree {
                person_id,
                school_id,
                degree_name,
                field_of_study,
            } => statement.execute(params![person_id, school_id, degree_name, field_of_study]),
        }
    }
}

/// Append-only buffered writer for child tables.
#[derive(Debug)]
pub struct BatchLoader {
    batch_size: usize,
    buffers: HashMap<ChildTable, Vec<ChildRow>>,
    inserted: HashMap<ChildTable, usize>,
    pub batch_failures: Vec<BatchFailure>,
}

impl BatchLoader {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            buffers: HashMap::new(),
            inserted: HashMap::new(),
            batch_failures: Vec::new(),
        }
    }

    pub fn stage(&mut self, connection: &mut Connection, row: ChildRow) -> Result<()> {
        let table = row.table();
        let buffer = self.buffers.entry(table).or_default();
        buffer.push(row);

        if buffer.len() >= self.batch_size {
            self.flush(connection, table)?;
        }

        Ok(())
    }

    pub fn flush(&mut self, connection: &mut Connection, table: ChildTable) -> Result<()> {
        let rows = match self.buffers.get_mut(&table) {
            Some(buffer) if !buffer.is_empty() => std::mem::take(buffer),
            _ => return Ok(()),
        };

        match write_batch(connection, table, &rows) {
            Ok(count) => {
                *self.inserted.entry(table).or_default() += count;
            }
            Err(err) => {
                warn!(
                    table = table.table_name(),
                    rows = rows.len(),
                    error = %err,
                    "batch write failed and was rolled back"
                );
                self.batch_failures.push(BatchFailure {
                    table: table.table_name().to_string(),
                    row_count: rows.len(),
                    reason: format!("{err:#}"),
                });
            }
        }

        Ok(())
    }

    pub fn flush_all(&mut self, connection: &mut Connection) -> Result<()> {
        for table in ChildTable::ALL {
            self.flush(connection, table)?;
        }
        Ok(())
    }

    pub fn inserted(&self, table: ChildTable) -> usize {
        self.inserted.get(&table).copied().unwrap_or(0)
    }

    #[cfg(test)]
    pub(crate) fn buffered(&self, table: ChildTable) -> usize {
        self.buffers.get(&table).map_or(0, Vec::len)
    }
}

fn write_batch(connection: &mut Connection, table: ChildTable, rows: &[ChildRow]) -> Result<usize> {
    let tx = connection
        .transaction()
        .context("failed to begin batch transaction")?;

    {
        let mut statement = tx
            .prepare(table.insert_sql())
            .with_context(|| format!("failed to prepare insert for {}", table.table_name()))?;

        for row in rows {
            row.bind(&mut statement)
                .with_context(|| format!("failed to insert into {}", table.table_name()))?;
        }
    }

    tx.commit().context("failed to commit batch")?;
    Ok(rows.len())
}
