use std::collections::HashMap;

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Entity kinds deduplicated by natural key across the whole dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Person,
    Firm,
    Location,
    School,
    Company,
}

impl EntityKind {
    pub const ALL: [EntityKind; 5] = [
        EntityKind::Person,
        EntityKind::Firm,
        EntityKind::Location,
        EntityKind::School,
        EntityKind::Company,
    ];

    pub fn table(self) -> &'static str {
        match self {
            EntityKind::Person => "persons",
            EntityKind::Firm => "firms",
            EntityKind::Location => "locations",
            EntityKind::School => "schools",
            EntityKind::Company => "companies",
        }
    }

    pub fn key_column(self) -> &'static str {
        match self {
            EntityKind::Person | EntityKind::Firm => "slug",
            EntityKind::Location => "display_name",
            EntityKind::School | EntityKind::Company => "name",
        }
    }
}

/// In-memory map from `(entity kind, natural key)` to surrogate id.
///
/// Only presence matters; insertion order is irrelevant. Registration is
/// idempotent and never overwrites an existing id.
#[derive(Debug, Default)]
pub struct KeyRegistry {
    ids: HashMap<EntityKind, HashMap<String, i64>>,
}

impl KeyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolve(&self, kind: EntityKind, key: &str) -> Option<i64> {
        self.ids.get(&kind).and_then(|keys| keys.get(key)).copied()
    }

    /// Returns the id now associated with the key: the existing one if the
    /// key was already known, otherwise the one being registered.
    pub fn register(&mut self, kind: EntityKind, key: &str, id: i64) -> i64 {
        *self
            .ids
            .entry(kind)
            .or_default()
            .entry(key.to_string())
            .or_insert(id)
    }

    pub fn len(&self, kind: EntityKind) -> usize {
        self.ids.get(&kind).map_or(0, HashMap::len)
    }

    /// Pre-load every kind from rows a prior partial run may have persisted,
    /// so re-running does not duplicate dimension rows.
    pub fn seed(&mut self, connection: &Connection) -> Result<usize> {
        let mut seeded = 0;

        for kind in EntityKind::ALL {
            let sql = format!("SELECT {}, id FROM {}", kind.key_column(), kind.table());
            let mut statement = connection
                .prepare(&sql)
                .with_context(|| format!("failed to read existing {} rows", kind.table()))?;

            let mut rows = statement.query([])?;
            while let Some(row) = rows.next()? {
                let key: String = row.get(0)?;
                let id: i64 = row.get(1)?;
                self.register(kind, &key, id);
                seeded += 1;
            }
        }

        Ok(seeded)
    }
}
