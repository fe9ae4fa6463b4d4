//! Result types returned by write operations.

use bson::Bson;

/// Result of an update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateOutcome {
    /// Number of documents that matched the query.
    pub matched_count: u64,
    /// Number of documents actually changed. A match whose fields already held
    /// the new values is not counted.
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Result of a soft or hard delete.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOutcome {
    /// Documents flagged as deleted (soft) or physically removed (hard).
    pub count: u64,
    /// Whether the delete only flagged the documents.
    pub soft: bool,
}

impl DeleteOutcome {
    pub fn soft(count: u64) -> Self {
        Self { count, soft: true }
    }

    pub fn hard(count: u64) -> Self {
        Self { count, soft: false }
    }
}
