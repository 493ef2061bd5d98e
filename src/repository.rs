use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use std::collections::HashSet;
use std::marker::PhantomData;
use std::sync::Arc;
use thiserror::Error;

use crate::query_params::{ListParams, SortDirection};
use crate::scope::RequestScope;
use crate::search::SearchFilter;
use crate::store::{
    DELETED_AT, DELETED_BY, FieldMap, Filter, Id, Page, StoreError, StoreState,
    validate_identifier,
};

/// Columns owned by the repository itself. Callers may not write them through
/// a field map; the soft-delete protocol and the insert path manage them.
pub const PROTECTED_COLUMNS: [&str; 4] = ["id", "created_at", DELETED_AT, DELETED_BY];

const DEFAULT_SORT_COLUMNS: [&str; 2] = ["id", "created_at"];

/// RepoError
///
/// Everything a repository call can fail with. `NotFound` is the everyday case;
/// `MissingActor` is an integration bug in the caller.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("record not found")]
    NotFound,
    #[error("no valid actor id in request scope")]
    MissingActor,
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation deadline exceeded")]
    DeadlineExceeded,
    #[error("column `{0}` cannot be written through a field map")]
    ProtectedColumn(String),
    #[error("bulk operation requires a non-empty condition")]
    EmptyCondition,
    #[error("field data must be a JSON object")]
    InvalidFields,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// AuditFields
///
/// Timestamps and actor stamps shared by every entity. Flattened into the
/// entity so the columns sit beside its own fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFields {
    #[serde(default)]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub updated_by: Option<Id>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_by: Option<Id>,
}

impl AuditFields {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Entity
///
/// The capability set the generic repository needs from a record type: a
/// table, an identifier, and audit fields. Mapping to and from rows is by
/// field name through `serde`.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync + 'static {
    const TABLE: &'static str;

    fn id(&self) -> Id;
    fn set_id(&mut self, id: Id);
    fn audit(&self) -> &AuditFields;
    fn audit_mut(&mut self) -> &mut AuditFields;
}

/// Turns a `json!({...})` literal into a field map.
pub fn fields(value: Value) -> Result<FieldMap, RepoError> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(RepoError::InvalidFields),
    }
}

/// Repository Trait
///
/// The audited CRUD contract, generic over the entity type. Every call takes
/// the request scope so store I/O honours cancellation and deadlines; deletes
/// additionally require the scope to carry an actor.
#[async_trait]
pub trait Repository<T: Entity>: Send + Sync {
    /// Filtered, sorted, paginated listing plus the unpaginated total.
    async fn get_all(
        &self,
        scope: &RequestScope,
        params: &ListParams,
    ) -> Result<(Vec<T>, i64), RepoError>;

    async fn get_by_id(&self, scope: &RequestScope, id: Id) -> Result<T, RepoError>;

    /// First live row (lowest id) matching every `column = value` pair.
    async fn find_one(&self, scope: &RequestScope, condition: &FieldMap) -> Result<T, RepoError>;

    /// Audit read: includes soft-deleted rows.
    async fn find_with_deleted(&self, scope: &RequestScope, id: Id) -> Result<T, RepoError>;

    async fn create(&self, scope: &RequestScope, entity: &mut T) -> Result<(), RepoError>;

    /// One insert statement for the whole batch; all rows or none.
    async fn bulk_create(&self, scope: &RequestScope, entities: &mut [T]) -> Result<(), RepoError>;

    /// Partial update by field map. Stamps `updated_by` when `actor_id > 0`.
    async fn update(
        &self,
        scope: &RequestScope,
        id: Id,
        fields: FieldMap,
        actor_id: Id,
    ) -> Result<(), RepoError>;

    /// Same stamping as `update`, over every match. Zero matches is not an error.
    async fn bulk_update(
        &self,
        scope: &RequestScope,
        condition: &FieldMap,
        fields: FieldMap,
        actor_id: Id,
    ) -> Result<u64, RepoError>;

    /// Stamps `deleted_by` with the scope's actor, then soft-deletes.
    async fn delete(&self, scope: &RequestScope, id: Id) -> Result<(), RepoError>;

    /// Row-by-row stamp-then-delete over every match. Stops at the first error;
    /// rows handled before it stay deleted.
    async fn bulk_delete(&self, scope: &RequestScope, condition: &FieldMap)
    -> Result<usize, RepoError>;

    /// Total rows matching the same predicate as `get_all`, without paging.
    async fn get_count(&self, scope: &RequestScope, params: &ListParams) -> Result<i64, RepoError>;

    /// Total live rows.
    async fn count_all(&self, scope: &RequestScope) -> Result<i64, RepoError>;
}

/// RepositoryState
///
/// How a repository is shared through the application state.
pub type RepositoryState<T> = Arc<dyn Repository<T>>;

/// BaseRepository
///
/// The one implementation of [`Repository`], instantiated per entity type over
/// the shared store. Apart from the sort allow-list, which is fixed before the
/// repository is shared, it holds no state.
pub struct BaseRepository<T> {
    store: StoreState,
    allowed_sort_columns: HashSet<String>,
    _entity: PhantomData<fn() -> T>,
}

impl<T: Entity> BaseRepository<T> {
    pub fn new(store: StoreState) -> Self {
        Self {
            store,
            allowed_sort_columns: DEFAULT_SORT_COLUMNS.iter().map(|c| c.to_string()).collect(),
            _entity: PhantomData,
        }
    }

    /// Replaces the sortable-column allow-list wholesale. Takes `&mut self`, so
    /// it can only run before the repository is shared.
    pub fn set_allowed_sort_columns<I, S>(&mut self, columns: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_sort_columns = columns
            .into_iter()
            .map(Into::into)
            .filter(|column: &String| validate_identifier(column).is_ok())
            .collect();
    }

    pub fn with_sort_columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_allowed_sort_columns(columns);
        self
    }

    pub fn allowed_sort_columns(&self) -> &HashSet<String> {
        &self.allowed_sort_columns
    }

    fn list_filter(params: &ListParams) -> Filter {
        let mut filter = Filter::new();
        if let Some(search) = SearchFilter::new("name", &params.name) {
            filter = filter.contains(search);
        }
        if !params.status.is_empty() {
            filter = filter.text_eq("status", params.status.clone());
        }
        if !params.kind.is_empty() {
            filter = filter.text_eq("type", params.kind.clone());
        }
        filter
    }

    fn page(&self, params: &ListParams) -> Page {
        Page {
            sort_by: params.sort_column(&self.allowed_sort_columns).to_string(),
            direction: params.direction(),
            limit: params.per_page(),
            offset: params.offset(),
        }
    }

    async fn fetch(
        &self,
        scope: &RequestScope,
        filter: &Filter,
        page: Option<&Page>,
    ) -> Result<Vec<T>, RepoError> {
        let rows = scope.run(self.store.select(T::TABLE, filter, page)).await?;
        rows.into_iter().map(decode).collect()
    }

    /// Count first; an empty result never issues the select.
    async fn list(
        &self,
        scope: &RequestScope,
        params: &ListParams,
    ) -> Result<(Vec<T>, i64), RepoError> {
        let filter = Self::list_filter(params);
        let total = scope.run(self.store.count(T::TABLE, &filter)).await?;
        if total == 0 {
            return Ok((Vec::new(), 0));
        }
        let items = self.fetch(scope, &filter, Some(&self.page(params))).await?;
        Ok((items, total))
    }

    async fn first(&self, scope: &RequestScope, filter: &Filter) -> Result<T, RepoError> {
        let page = Page {
            sort_by: "id".to_string(),
            direction: SortDirection::Asc,
            limit: 1,
            offset: 0,
        };
        self.fetch(scope, filter, Some(&page))
            .await?
            .into_iter()
            .next()
            .ok_or(RepoError::NotFound)
    }

    /// The two dependent writes of a soft delete. The delete is only issued
    /// after the stamp succeeded.
    async fn stamp_and_soft_delete(
        &self,
        scope: &RequestScope,
        id: Id,
        actor_id: Id,
    ) -> Result<(), RepoError> {
        let mut stamp = FieldMap::new();
        stamp.insert(DELETED_BY.to_string(), Value::from(actor_id));

        let stamped = scope
            .run(self.store.update(T::TABLE, &Filter::by_id(id), stamp))
            .await?;
        if stamped == 0 {
            return Err(RepoError::NotFound);
        }

        let deleted = scope.run(self.store.soft_delete(T::TABLE, id)).await?;
        if deleted == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

fn decode<T: Entity>(row: FieldMap) -> Result<T, RepoError> {
    serde_json::from_value(Value::Object(row)).map_err(|e| RepoError::Store(e.into()))
}

/// Row payload for an insert: the store assigns `id`, and a new row is never
/// born deleted.
fn insert_fields<T: Entity>(entity: &T) -> Result<FieldMap, RepoError> {
    let value = serde_json::to_value(entity).map_err(|e| RepoError::Store(e.into()))?;
    let mut row = fields(value)?;
    row.remove("id");
    row.remove(DELETED_AT);
    row.remove(DELETED_BY);
    Ok(row)
}

fn stamp_created<T: Entity>(entity: &mut T, now: DateTime<Utc>) {
    let audit = entity.audit_mut();
    audit.created_at = now;
    audit.updated_at = now;
    audit.deleted_at = None;
    audit.deleted_by = None;
}

fn check_writable(fields: &FieldMap) -> Result<(), RepoError> {
    for column in fields.keys() {
        validate_identifier(column)?;
        if PROTECTED_COLUMNS.contains(&column.as_str()) {
            return Err(RepoError::ProtectedColumn(column.clone()));
        }
    }
    Ok(())
}

fn condition_filter(condition: &FieldMap) -> Result<Filter, RepoError> {
    if condition.is_empty() {
        return Err(RepoError::EmptyCondition);
    }
    let filter = Filter::from_fields(condition);
    filter.validate()?;
    Ok(filter)
}

fn stamp_update(fields: &mut FieldMap, actor_id: Id) -> Result<(), RepoError> {
    if actor_id > 0 {
        fields.insert("updated_by".to_string(), Value::from(actor_id));
    }
    let now = serde_json::to_value(Utc::now()).map_err(|e| RepoError::Store(e.into()))?;
    fields.insert("updated_at".to_string(), now);
    Ok(())
}

/// Store failures are logged here with the operation context; every other
/// error kind is left for the caller to report.
fn log_failure(err: &RepoError, operation: &str, table: &str, target: Option<Id>, actor: Option<Id>) {
    if let RepoError::Store(cause) = err {
        tracing::error!(
            operation,
            table,
            target_id = ?target,
            actor_id = ?actor,
            error = %cause,
            "store operation failed"
        );
    }
}

#[async_trait]
impl<T: Entity> Repository<T> for BaseRepository<T> {
    async fn get_all(
        &self,
        scope: &RequestScope,
        params: &ListParams,
    ) -> Result<(Vec<T>, i64), RepoError> {
        self.list(scope, params)
            .await
            .inspect_err(|e| log_failure(e, "get_all", T::TABLE, None, scope.actor_id()))
    }

    async fn get_by_id(&self, scope: &RequestScope, id: Id) -> Result<T, RepoError> {
        self.first(scope, &Filter::by_id(id))
            .await
            .inspect_err(|e| log_failure(e, "get_by_id", T::TABLE, Some(id), scope.actor_id()))
    }

    async fn find_one(&self, scope: &RequestScope, condition: &FieldMap) -> Result<T, RepoError> {
        let filter = condition_filter(condition)?;
        self.first(scope, &filter)
            .await
            .inspect_err(|e| log_failure(e, "find_one", T::TABLE, None, scope.actor_id()))
    }

    async fn find_with_deleted(&self, scope: &RequestScope, id: Id) -> Result<T, RepoError> {
        self.first(scope, &Filter::by_id(id).with_deleted())
            .await
            .inspect_err(|e| {
                log_failure(e, "find_with_deleted", T::TABLE, Some(id), scope.actor_id())
            })
    }

    async fn create(&self, scope: &RequestScope, entity: &mut T) -> Result<(), RepoError> {
        stamp_created(entity, Utc::now());
        let row = insert_fields(entity)?;

        let ids = scope
            .run(self.store.insert(T::TABLE, vec![row]))
            .await
            .inspect_err(|e| log_failure(e, "create", T::TABLE, None, scope.actor_id()))?;

        let id = ids
            .first()
            .copied()
            .ok_or_else(|| StoreError::Malformed("insert returned no id".to_string()))?;
        entity.set_id(id);
        tracing::debug!(table = T::TABLE, id, "record created");
        Ok(())
    }

    async fn bulk_create(&self, scope: &RequestScope, entities: &mut [T]) -> Result<(), RepoError> {
        if entities.is_empty() {
            return Ok(());
        }
        let now = Utc::now();
        let mut rows = Vec::with_capacity(entities.len());
        for entity in entities.iter_mut() {
            stamp_created(entity, now);
            rows.push(insert_fields(entity)?);
        }

        let ids = scope
            .run(self.store.insert(T::TABLE, rows))
            .await
            .inspect_err(|e| log_failure(e, "bulk_create", T::TABLE, None, scope.actor_id()))?;

        if ids.len() != entities.len() {
            return Err(StoreError::Malformed(format!(
                "bulk insert of {} rows returned {} ids",
                entities.len(),
                ids.len()
            ))
            .into());
        }
        for (entity, id) in entities.iter_mut().zip(ids) {
            entity.set_id(id);
        }
        tracing::debug!(table = T::TABLE, count = entities.len(), "records created");
        Ok(())
    }

    async fn update(
        &self,
        scope: &RequestScope,
        id: Id,
        fields: FieldMap,
        actor_id: Id,
    ) -> Result<(), RepoError> {
        check_writable(&fields)?;
        let mut fields = fields;
        stamp_update(&mut fields, actor_id)?;

        let affected = scope
            .run(self.store.update(T::TABLE, &Filter::by_id(id), fields))
            .await
            .inspect_err(|e| log_failure(e, "update", T::TABLE, Some(id), Some(actor_id)))?;

        if affected == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn bulk_update(
        &self,
        scope: &RequestScope,
        condition: &FieldMap,
        fields: FieldMap,
        actor_id: Id,
    ) -> Result<u64, RepoError> {
        let filter = condition_filter(condition)?;
        check_writable(&fields)?;
        let mut fields = fields;
        stamp_update(&mut fields, actor_id)?;

        let affected = scope
            .run(self.store.update(T::TABLE, &filter, fields))
            .await
            .inspect_err(|e| log_failure(e, "bulk_update", T::TABLE, None, Some(actor_id)))?;

        tracing::debug!(table = T::TABLE, affected, actor_id, "bulk update applied");
        Ok(affected)
    }

    async fn delete(&self, scope: &RequestScope, id: Id) -> Result<(), RepoError> {
        let actor_id = scope.actor()?;

        let entity = self.get_by_id(scope, id).await?;
        self.stamp_and_soft_delete(scope, entity.id(), actor_id)
            .await
            .inspect_err(|e| log_failure(e, "delete", T::TABLE, Some(id), Some(actor_id)))?;

        tracing::info!(table = T::TABLE, id, actor_id, "record soft-deleted");
        Ok(())
    }

    async fn bulk_delete(
        &self,
        scope: &RequestScope,
        condition: &FieldMap,
    ) -> Result<usize, RepoError> {
        let actor_id = scope.actor()?;
        let filter = condition_filter(condition)?;

        let targets = self
            .fetch(scope, &filter, None)
            .await
            .inspect_err(|e| log_failure(e, "bulk_delete", T::TABLE, None, Some(actor_id)))?;

        let mut deleted = 0;
        for entity in &targets {
            let id = entity.id();
            if let Err(e) = self.stamp_and_soft_delete(scope, id, actor_id).await {
                log_failure(&e, "bulk_delete", T::TABLE, Some(id), Some(actor_id));
                tracing::warn!(
                    table = T::TABLE,
                    deleted,
                    remaining = targets.len() - deleted,
                    actor_id,
                    "bulk delete stopped part way"
                );
                return Err(e);
            }
            deleted += 1;
        }

        tracing::info!(table = T::TABLE, deleted, actor_id, "records soft-deleted");
        Ok(deleted)
    }

    async fn get_count(&self, scope: &RequestScope, params: &ListParams) -> Result<i64, RepoError> {
        scope
            .run(self.store.count(T::TABLE, &Self::list_filter(params)))
            .await
            .inspect_err(|e| log_failure(e, "get_count", T::TABLE, None, scope.actor_id()))
    }

    async fn count_all(&self, scope: &RequestScope) -> Result<i64, RepoError> {
        scope
            .run(self.store.count(T::TABLE, &Filter::new()))
            .await
            .inspect_err(|e| log_failure(e, "count_all", T::TABLE, None, scope.actor_id()))
    }
}
