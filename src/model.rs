use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSummary {
    pub path: String,
    pub sha256: String,
    pub record_count: usize,
    pub malformed_line_count: usize,
}

/// Rows written per target table during one load run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableCounts {
    pub persons: usize,
    pub firms: usize,
    pub locations: usize,
    pub schools: usize,
    pub companies: usize,
    pub investors: usize,
    pub areas_of_interest: usize,
    pub investment_locations: usize,
    pub investor_stages: usize,
    pub image_urls: usize,
    pub media_links: usize,
    pub investments: usize,
    pub positions: usize,
    pub degrees: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordFailure {
    pub ordinal: usize,
    pub pass: String,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub table: String,
    pub row_count: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadRunReport {
    pub manifest_version: u32,
    pub run_id: String,
    pub db_schema_version: String,
    pub status: String,
    pub started_at: String,
    pub updated_at: String,
    pub command: String,
    pub db_path: String,
    pub source: SourceSummary,
    pub registry_seeded_keys: usize,
    pub rows_inserted: TableCounts,
    pub rows_total: TableCounts,
    pub record_failures: Vec<RecordFailure>,
    pub batch_failures: Vec<BatchFailure>,
    pub warnings: Vec<String>,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyCheck {
    pub name: String,
    pub result: String,
    pub detail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifySummary {
    pub total_checks: usize,
    pub passed: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyReport {
    pub manifest_version: u32,
    pub generated_at: String,
    pub db_path: String,
    pub checks: Vec<VerifyCheck>,
    pub summary: VerifySummary,
}
