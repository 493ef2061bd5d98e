use async_trait::async_trait;
use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::{
    DELETED_AT, FieldMap, Filter, Id, Page, Predicate, Store, StoreError, validate_identifier,
};

/// PostgresStore
///
/// The concrete store backed by a shared `PgPool`.
///
/// Rows are read as `to_jsonb(t)` and written through
/// `jsonb_populate_record(set)`, so Postgres itself converts every JSON value to
/// the column type declared on the table. All user-influenced values are bound
/// parameters; identifiers are validated and quoted before they reach SQL text.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn sql_id(id: Id) -> Result<i64, StoreError> {
    i64::try_from(id).map_err(|_| StoreError::Malformed(format!("id {id} exceeds BIGINT")))
}

/// Appends ` AND ...` for every predicate plus the live-row guard.
///
/// Typed equality compares the column natively: the value is decoded through
/// the table's row type, so `t."account" = ...` can use the account index.
fn push_filter(
    builder: &mut QueryBuilder<'_, Postgres>,
    table: &str,
    filter: &Filter,
) -> Result<(), StoreError> {
    filter.validate()?;

    if !filter.includes_deleted() {
        builder.push(format!(" AND t.\"{DELETED_AT}\" IS NULL"));
    }

    for predicate in filter.predicates() {
        // Primary key lookups compare natively so the index is used.
        if let Predicate::Eq(column, value) = predicate {
            if let (true, Some(id)) = (column == "id", value.as_u64()) {
                builder.push(" AND t.\"id\" = ");
                builder.push_bind(sql_id(id)?);
                continue;
            }
        }

        match predicate {
            Predicate::Eq(column, Value::Null) => {
                builder.push(format!(" AND t.\"{column}\" IS NULL"));
            }
            Predicate::Eq(column, value) => {
                let mut operand = FieldMap::new();
                operand.insert(column.clone(), value.clone());
                builder.push(format!(
                    " AND t.\"{column}\" = (jsonb_populate_record(NULL::\"{table}\", "
                ));
                builder.push_bind(Value::Object(operand));
                builder.push(format!(")).\"{column}\""));
            }
            Predicate::TextEq(column, text) => {
                builder.push(format!(" AND CAST(t.\"{column}\" AS TEXT) = "));
                builder.push_bind(text.clone());
            }
            Predicate::Contains(search) => {
                builder.push(format!(" AND {} LIKE ", search.folded_column_sql("t")));
                builder.push_bind(search.like_pattern());
            }
        }
    }

    Ok(())
}

fn into_row(value: Value) -> Result<FieldMap, StoreError> {
    match value {
        Value::Object(row) => Ok(row),
        other => Err(StoreError::Malformed(format!("expected a row object, got {other}"))),
    }
}

/// Union of the keys of every row, in first-seen order.
fn column_list(rows: &[FieldMap]) -> Result<Vec<String>, StoreError> {
    let mut columns: Vec<String> = Vec::new();
    for key in rows.iter().flat_map(|row| row.keys()) {
        if !columns.contains(key) {
            validate_identifier(key)?;
            columns.push(key.clone());
        }
    }
    Ok(columns)
}

fn quoted(columns: &[String], qualifier: Option<&str>) -> String {
    columns
        .iter()
        .map(|column| match qualifier {
            Some(q) => format!("{q}.\"{column}\""),
            None => format!("\"{column}\""),
        })
        .collect::<Vec<_>>()
        .join(", ")
}

#[async_trait]
impl Store for PostgresStore {
    async fn count(&self, table: &str, filter: &Filter) -> Result<i64, StoreError> {
        validate_identifier(table)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT COUNT(*) FROM \"{table}\" AS t WHERE TRUE"));
        push_filter(&mut builder, table, filter)?;

        let total = builder
            .build_query_scalar::<i64>()
            .fetch_one(&self.pool)
            .await?;
        Ok(total)
    }

    async fn select(
        &self,
        table: &str,
        filter: &Filter,
        page: Option<&Page>,
    ) -> Result<Vec<FieldMap>, StoreError> {
        validate_identifier(table)?;
        let mut builder: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT to_jsonb(t) FROM \"{table}\" AS t WHERE TRUE"));
        push_filter(&mut builder, table, filter)?;

        match page {
            Some(page) => {
                validate_identifier(&page.sort_by)?;
                builder.push(format!(
                    " ORDER BY t.\"{}\" {}",
                    page.sort_by,
                    page.direction.as_sql()
                ));
                // Stable windows when the sort column has duplicates.
                if page.sort_by != "id" {
                    builder.push(", t.\"id\" ASC");
                }
                builder.push(" LIMIT ");
                builder.push_bind(page.limit);
                builder.push(" OFFSET ");
                builder.push_bind(page.offset);
            }
            None => {
                builder.push(" ORDER BY t.\"id\" ASC");
            }
        }

        let rows = builder
            .build_query_scalar::<Value>()
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(into_row).collect()
    }

    async fn insert(&self, table: &str, rows: Vec<FieldMap>) -> Result<Vec<Id>, StoreError> {
        validate_identifier(table)?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let columns = column_list(&rows)?;
        if columns.is_empty() {
            return Err(StoreError::Malformed("insert without columns".to_string()));
        }
        if columns.iter().any(|column| column == "id") {
            return Err(StoreError::Malformed("insert rows must not carry an id".to_string()));
        }
        let expected = rows.len();
        let payload = Value::Array(rows.into_iter().map(Value::Object).collect());

        // Ids are drawn up front and joined back on, so the result follows
        // input order whatever order RETURNING produces.
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "WITH input AS (SELECT r.*, nextval(pg_get_serial_sequence('\"{table}\"', 'id')) AS new_id \
             FROM jsonb_populate_recordset(NULL::\"{table}\", "
        ));
        builder.push_bind(payload);
        builder.push(format!(
            ") WITH ORDINALITY AS r), \
             inserted AS (INSERT INTO \"{table}\" (\"id\", {}) SELECT i.new_id, {} FROM input AS i RETURNING \"id\") \
             SELECT input.ordinality, inserted.\"id\" FROM inserted JOIN input ON input.new_id = inserted.\"id\" \
             ORDER BY input.ordinality",
            quoted(&columns, None),
            quoted(&columns, Some("i")),
        ));

        let rows = builder
            .build_query_as::<(i64, i64)>()
            .fetch_all(&self.pool)
            .await?;
        if rows.len() != expected {
            return Err(StoreError::Malformed(format!(
                "inserted {} of {expected} rows",
                rows.len()
            )));
        }

        rows.into_iter()
            .map(|(_, id)| {
                Id::try_from(id).map_err(|_| StoreError::Malformed(format!("negative id {id}")))
            })
            .collect()
    }

    async fn update(
        &self,
        table: &str,
        filter: &Filter,
        fields: FieldMap,
    ) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        let columns = column_list(std::slice::from_ref(&fields))?;
        if columns.is_empty() {
            return Ok(0);
        }

        let assignments = columns
            .iter()
            .map(|column| format!("\"{column}\" = r.\"{column}\""))
            .collect::<Vec<_>>()
            .join(", ");

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "UPDATE \"{table}\" AS t SET {assignments} FROM jsonb_populate_record(NULL::\"{table}\", "
        ));
        builder.push_bind(Value::Object(fields));
        builder.push(") AS r WHERE TRUE");
        push_filter(&mut builder, table, filter)?;

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn soft_delete(&self, table: &str, id: Id) -> Result<u64, StoreError> {
        validate_identifier(table)?;
        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "UPDATE \"{table}\" SET \"{DELETED_AT}\" = NOW() WHERE \"{DELETED_AT}\" IS NULL AND \"id\" = "
        ));
        builder.push_bind(sql_id(id)?);

        let result = builder.build().execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
