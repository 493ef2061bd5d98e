use async_trait::async_trait;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

use crate::query_params::SortDirection;
use crate::search::SearchFilter;

pub mod memory;
pub mod postgres;

pub use memory::{MemoryStore, StoreCalls};
pub use postgres::PostgresStore;

/// Primary key type shared by every entity table.
pub type Id = u64;

/// A row (or a partial row) keyed by column name.
///
/// Entities cross the store boundary in this shape and are mapped to and from
/// Rust types by field name with `serde`.
pub type FieldMap = Map<String, Value>;

/// Column holding the soft-delete marker. A row is live while it is NULL.
pub const DELETED_AT: &str = "deleted_at";
/// Column holding the actor that soft-deleted the row.
pub const DELETED_BY: &str = "deleted_by";

/// StoreError
///
/// Failures raised by a concrete store. The repository layer surfaces these
/// as a generic store failure; nothing above the repository matches on them.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("row decode error: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("invalid identifier `{0}`")]
    InvalidIdentifier(String),
    #[error("malformed row data: {0}")]
    Malformed(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// A single condition inside a [`Filter`]. All predicates of a filter are ANDed.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Typed equality against a code-supplied value. `Null` matches NULL columns.
    Eq(String, Value),
    /// Equality of the column's text rendering against untrusted string input.
    TextEq(String, String),
    /// Case and diacritic insensitive "contains".
    Contains(SearchFilter),
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::Eq(column, _) | Predicate::TextEq(column, _) => column,
            Predicate::Contains(search) => search.column(),
        }
    }
}

/// Filter
///
/// The WHERE clause handed to a [`Store`]. Soft-deleted rows are excluded
/// unless the filter was built with [`Filter::with_deleted`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    predicates: Vec<Predicate>,
    with_deleted: bool,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by_id(id: Id) -> Self {
        Self::new().eq("id", id)
    }

    /// Builds an equality filter from a condition map (`{"status": "pending"}`).
    pub fn from_fields(condition: &FieldMap) -> Self {
        condition
            .iter()
            .fold(Self::new(), |filter, (column, value)| {
                filter.eq(column.clone(), value.clone())
            })
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.push(Predicate::Eq(column.into(), value.into()));
        self
    }

    pub fn text_eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.predicates
            .push(Predicate::TextEq(column.into(), value.into()));
        self
    }

    pub fn contains(mut self, search: SearchFilter) -> Self {
        self.predicates.push(Predicate::Contains(search));
        self
    }

    /// Includes soft-deleted rows. Only audit reads use this.
    pub fn with_deleted(mut self) -> Self {
        self.with_deleted = true;
        self
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn includes_deleted(&self) -> bool {
        self.with_deleted
    }

    /// Checks every referenced column name before it reaches SQL text.
    pub fn validate(&self) -> Result<(), StoreError> {
        self.predicates
            .iter()
            .try_for_each(|predicate| validate_identifier(predicate.column()))
    }
}

/// Ordering and window for a `select`.
#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub sort_by: String,
    pub direction: SortDirection,
    pub limit: i64,
    pub offset: i64,
}

/// Store
///
/// The relational store contract consumed by the generic repository. Every
/// operation is parameterized by table name and works on field maps, so one
/// implementation serves all entity types.
///
/// Implementations must be safe to share across concurrent requests.
#[async_trait]
pub trait Store: Send + Sync {
    /// Number of live rows matching `filter`.
    async fn count(&self, table: &str, filter: &Filter) -> Result<i64, StoreError>;

    /// Rows matching `filter`, ordered and windowed by `page` when given.
    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        page: Option<&Page>,
    ) -> Result<Vec<FieldMap>, StoreError>;

    /// Inserts every row in a single statement and returns the assigned ids
    /// in input order. Either all rows are written or none are.
    async fn insert(&self, table: &str, rows: Vec<FieldMap>) -> Result<Vec<Id>, StoreError>;

    /// Applies `fields` to every live row matching `filter`; returns rows affected.
    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        fields: FieldMap,
    ) -> Result<u64, StoreError>;

    /// Sets the deletion marker on a live row; returns rows affected.
    async fn soft_delete(&self, table: &str, id: Id) -> Result<u64, StoreError>;
}

/// StoreState
///
/// The shared, process-wide store handle injected into repositories.
pub type StoreState = Arc<dyn Store>;

/// Accepts `[a-z_][a-z0-9_]*` only. Table and column names are server
/// controlled, but they are spliced into SQL text, so they are checked anyway.
pub fn validate_identifier(name: &str) -> Result<(), StoreError> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first == '_' || first.is_ascii_lowercase() => {
            chars.all(|c| c == '_' || c.is_ascii_lowercase() || c.is_ascii_digit())
        }
        _ => false,
    };

    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidIdentifier(name.to_string()))
    }
}
