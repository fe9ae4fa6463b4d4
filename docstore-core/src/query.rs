//! Query shaping helpers: sorting, pagination, and the soft-delete policy.
//!
//! Queries themselves are plain BSON documents in the store's native filter
//! syntax. Caller-supplied queries are treated as immutable inputs; every helper
//! here returns a fresh document instead of editing the one it was handed.

use bson::{doc, Bson, Document};

/// System-managed flag marking a document as logically deleted.
pub const DELETED_FIELD: &str = "is_deleted";

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    /// The store's numeric encoding of the direction.
    pub fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// Sort key for query results.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    /// The field name to sort by. Dotted paths address nested fields.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Sorting and pagination applied by `find_many`.
///
/// Sort is applied before skip, and skip before limit. A `limit` or `skip` of
/// zero means "unbounded" and "no offset" respectively.
///
/// # Example
///
/// ```ignore
/// let options = FindOptions::new()
///     .sort("log_date", SortDirection::Desc)
///     .skip(10)
///     .limit(5);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FindOptions {
    pub sort: Vec<Sort>,
    pub skip: u64,
    pub limit: u64,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sort key. Earlier keys take precedence.
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.sort.push(Sort { field: field.into(), direction });
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    /// Renders the sort keys as an ordered sort document, or `None` when unsorted.
    pub fn sort_document(&self) -> Option<Document> {
        if self.sort.is_empty() {
            return None;
        }

        Some(Document::from_iter(
            self.sort
                .iter()
                .map(|sort| (sort.field.clone(), Bson::Int32(sort.direction.as_i32()))),
        ))
    }
}

/// Returns a copy of `query` restricted to documents not flagged as deleted.
///
/// Any existing `is_deleted` criterion in the query is replaced.
pub fn live_only(query: &Document) -> Document {
    let mut scoped = query.clone();
    scoped.insert(DELETED_FIELD, false);
    scoped
}

/// Applies the read-side soft-delete policy.
pub fn scoped_query(query: &Document, include_deleted: bool) -> Document {
    if include_deleted {
        query.clone()
    } else {
        live_only(query)
    }
}

/// Stamps a document as live, overwriting any caller-supplied flag.
pub fn mark_live(mut document: Document) -> Document {
    document.insert(DELETED_FIELD, false);
    document
}

/// Wraps named fields into a field-level merge update.
pub fn set_fields(fields: Document) -> Document {
    doc! { "$set": fields }
}

/// The update that soft deletes matching documents.
pub fn soft_delete_update() -> Document {
    set_fields(doc! { DELETED_FIELD: true })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_only_leaves_caller_query_untouched() {
        let query = doc! { "name": "Ann" };

        let scoped = live_only(&query);
        let again = live_only(&query);

        assert_eq!(query, doc! { "name": "Ann" });
        assert_eq!(scoped, doc! { "name": "Ann", "is_deleted": false });
        assert_eq!(scoped, again);
    }

    #[test]
    fn include_deleted_keeps_query_as_is() {
        let query = doc! { "name": "Ann" };

        assert_eq!(scoped_query(&query, true), query);
    }

    #[test]
    fn mark_live_overrides_caller_flag() {
        let stamped = mark_live(doc! { "name": "Ann", "is_deleted": true });

        assert_eq!(stamped.get_bool(DELETED_FIELD).ok(), Some(false));
    }

    #[test]
    fn sort_document_keeps_key_order() {
        let options = FindOptions::new()
            .sort("log_date", SortDirection::Desc)
            .sort("name", SortDirection::Asc);

        let sort = options.sort_document().unwrap();
        let keys = sort.keys().cloned().collect::<Vec<_>>();

        assert_eq!(keys, vec!["log_date".to_string(), "name".to_string()]);
        assert_eq!(sort.get_i32("log_date").ok(), Some(-1));
        assert!(FindOptions::new().sort_document().is_none());
    }
}
