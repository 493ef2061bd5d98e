use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use tokio::sync::RwLock;

use super::{
    DELETED_AT, FieldMap, Filter, Id, Page, Predicate, Store, StoreError, validate_identifier,
};
use crate::query_params::SortDirection;

#[derive(Default)]
struct Table {
    last_id: Id,
    rows: BTreeMap<Id, FieldMap>,
}

#[derive(Default)]
struct Counters {
    counts: AtomicUsize,
    selects: AtomicUsize,
    inserts: AtomicUsize,
    updates: AtomicUsize,
    soft_deletes: AtomicUsize,
}

/// StoreCalls
///
/// Snapshot of how many statements a [`MemoryStore`] has executed, per kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreCalls {
    pub counts: usize,
    pub selects: usize,
    pub inserts: usize,
    pub updates: usize,
    pub soft_deletes: usize,
}

impl StoreCalls {
    pub fn writes(&self) -> usize {
        self.inserts + self.updates + self.soft_deletes
    }

    pub fn reads(&self) -> usize {
        self.counts + self.selects
    }
}

/// MemoryStore
///
/// An in-process [`Store`] with the same filtering, ordering and soft-delete
/// semantics as [`super::PostgresStore`]. It backs the test suites and local
/// experiments that do not need a database. Each statement is counted, and
/// writes can be made to fail after a budget to exercise partial failures.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    counters: Counters,
    write_budget: Mutex<Option<usize>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> StoreCalls {
        let c = &self.counters;
        StoreCalls {
            counts: c.counts.load(AtomicOrdering::SeqCst),
            selects: c.selects.load(AtomicOrdering::SeqCst),
            inserts: c.inserts.load(AtomicOrdering::SeqCst),
            updates: c.updates.load(AtomicOrdering::SeqCst),
            soft_deletes: c.soft_deletes.load(AtomicOrdering::SeqCst),
        }
    }

    /// Lets `writes` more write statements succeed; every later write fails
    /// with [`StoreError::Unavailable`].
    pub fn fail_writes_after(&self, writes: usize) {
        if let Ok(mut budget) = self.write_budget.lock() {
            *budget = Some(writes);
        }
    }

    /// Direct read of a stored row, soft-deleted or not.
    pub async fn raw_row(&self, table: &str, id: Id) -> Option<FieldMap> {
        let tables = self.tables.read().await;
        tables.get(table).and_then(|t| t.rows.get(&id)).cloned()
    }

    fn take_write_permit(&self) -> Result<(), StoreError> {
        let mut budget = self
            .write_budget
            .lock()
            .map_err(|_| StoreError::Unavailable("write budget lock poisoned".to_string()))?;
        match budget.as_mut() {
            Some(0) => Err(StoreError::Unavailable("injected write failure".to_string())),
            Some(remaining) => {
                *remaining -= 1;
                Ok(())
            }
            None => Ok(()),
        }
    }
}

fn is_live(row: &FieldMap) -> bool {
    row.get(DELETED_AT).is_none_or(Value::is_null)
}

/// Text rendering used by `TextEq` and `Contains`, mirroring `CAST(col AS TEXT)`.
fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => left == right,
    }
}

fn matches(row: &FieldMap, filter: &Filter) -> bool {
    if !filter.includes_deleted() && !is_live(row) {
        return false;
    }
    let null = Value::Null;
    filter.predicates().iter().all(|predicate| {
        let cell = row.get(predicate.column()).unwrap_or(&null);
        match predicate {
            Predicate::Eq(_, Value::Null) => cell.is_null(),
            Predicate::Eq(_, expected) => values_equal(cell, expected),
            Predicate::TextEq(_, expected) => as_text(cell).as_deref() == Some(expected.as_str()),
            Predicate::Contains(search) => as_text(cell).is_some_and(|text| search.matches(&text)),
        }
    })
}

/// NULL < bool < number < string, like a typed column would sort.
fn compare_values(left: Option<&Value>, right: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None | Some(Value::Null) => 0,
            Some(Value::Bool(_)) => 1,
            Some(Value::Number(_)) => 2,
            Some(Value::String(_)) => 3,
            Some(_) => 4,
        }
    }

    match (left, right) {
        (Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
        (Some(Value::Number(a)), Some(Value::Number(b))) => a
            .as_f64()
            .partial_cmp(&b.as_f64())
            .unwrap_or(Ordering::Equal),
        (Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
        _ => rank(left).cmp(&rank(right)),
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn count(&self, table: &str, filter: &Filter) -> Result<i64, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;
        self.counters.counts.fetch_add(1, AtomicOrdering::SeqCst);

        let tables = self.tables.read().await;
        let total = tables
            .get(table)
            .map(|t| t.rows.values().filter(|row| matches(row, filter)).count())
            .unwrap_or(0);
        Ok(total as i64)
    }

    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        page: Option<&Page>,
    ) -> Result<Vec<FieldMap>, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;
        self.counters.selects.fetch_add(1, AtomicOrdering::SeqCst);

        let tables = self.tables.read().await;
        let Some(t) = tables.get(table) else {
            return Ok(Vec::new());
        };

        // BTreeMap iteration is already ordered by id ascending.
        let mut rows: Vec<FieldMap> = t
            .rows
            .values()
            .filter(|row| matches(row, filter))
            .cloned()
            .collect();

        let Some(page) = page else {
            return Ok(rows);
        };
        validate_identifier(&page.sort_by)?;

        rows.sort_by(|a, b| {
            let primary = compare_values(a.get(&page.sort_by), b.get(&page.sort_by));
            let primary = match page.direction {
                SortDirection::Asc => primary,
                SortDirection::Desc => primary.reverse(),
            };
            primary.then_with(|| compare_values(a.get("id"), b.get("id")))
        });

        let offset = usize::try_from(page.offset.max(0)).unwrap_or(usize::MAX);
        let limit = usize::try_from(page.limit.max(0)).unwrap_or(usize::MAX);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn insert(&self, table: &str, rows: Vec<FieldMap>) -> Result<Vec<Id>, StoreError> {
        validate_identifier(table)?;
        for column in rows.iter().flat_map(|row| row.keys()) {
            validate_identifier(column)?;
        }
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.counters.inserts.fetch_add(1, AtomicOrdering::SeqCst);
        self.take_write_permit()?;

        let mut tables = self.tables.write().await;
        let t = tables.entry(table.to_string()).or_default();

        let mut ids = Vec::with_capacity(rows.len());
        for mut row in rows {
            t.last_id += 1;
            let id = t.last_id;
            row.insert("id".to_string(), Value::from(id));
            t.rows.insert(id, row);
            ids.push(id);
        }
        Ok(ids)
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        fields: FieldMap,
    ) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        filter.validate()?;
        for column in fields.keys() {
            validate_identifier(column)?;
        }
        self.counters.updates.fetch_add(1, AtomicOrdering::SeqCst);
        self.take_write_permit()?;

        let mut tables = self.tables.write().await;
        let Some(t) = tables.get_mut(table) else {
            return Ok(0);
        };

        let mut affected = 0;
        for row in t.rows.values_mut().filter(|row| matches(row, filter)) {
            for (column, value) in &fields {
                row.insert(column.clone(), value.clone());
            }
            affected += 1;
        }
        Ok(affected)
    }

    async fn soft_delete(&self, table: &str, id: Id) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        self.counters.soft_deletes.fetch_add(1, AtomicOrdering::SeqCst);
        self.take_write_permit()?;

        let mut tables = self.tables.write().await;
        let Some(row) = tables
            .get_mut(table)
            .and_then(|t| t.rows.get_mut(&id))
            .filter(|row| is_live(row))
        else {
            return Ok(0);
        };

        row.insert(DELETED_AT.to_string(), serde_json::to_value(Utc::now())?);
        Ok(1)
    }
}
