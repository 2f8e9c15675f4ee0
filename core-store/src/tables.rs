//! # Table Sync
//!
//! Creates one table per element type and writes pages into it.
//!
//! ## Column types
//!
//! | Declared type | Column |
//! |---------------|--------|
//! | `String`, `ISO8601DateTime` | `TEXT` |
//! | `ID`, `Boolean`, `Int` | `INTEGER` |
//! | `Float` | `REAL` |
//! | anything else | `TEXT` |
//!
//! A scalar field named `ts` is always `INTEGER`. Only scalar fields become
//! columns; `id` is the primary key.
//!
//! Item values are coerced on the way in: booleans to `0`/`1`, missing or
//! null values to `NULL`, lists and objects to their JSON text.

use crate::error::{Result, StoreError};
use crate::models::{Page, PageOutcome, Record};
use crate::sync_state::{renew_lease_on, update_cursor};
use core_schema::{CollectionDescriptor, FieldDescriptor};
use serde_json::Value;
use sqlx::sqlite::SqliteArguments;
use sqlx::query::Query;
use sqlx::{Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, instrument};

/// SQLite column type for a field.
pub fn column_type(field: &FieldDescriptor) -> &'static str {
    if !field.is_scalar {
        return "TEXT";
    }

    if field.name == "ts" {
        return "INTEGER";
    }

    match field.declared_type.as_str() {
        "String" | "ISO8601DateTime" => "TEXT",
        "ID" | "Boolean" | "Int" => "INTEGER",
        "Float" => "REAL",
        _ => "TEXT",
    }
}

/// Double-quotes a table or column name after checking its characters.
fn quote_ident(name: &str) -> Result<String> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("\"{}\"", name))
}

#[derive(Debug, Clone, PartialEq)]
enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
}

impl From<&Value> for SqlValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Integer(i),
                None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            Value::Array(_) | Value::Object(_) => SqlValue::Text(value.to_string()),
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: SqlValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Integer(i) => query.bind(i),
        SqlValue::Real(f) => query.bind(f),
        SqlValue::Text(s) => query.bind(s),
    }
}

/// Prepared SQL for one collection's table.
struct TableStatements {
    table: String,
    columns: Vec<String>,
    upsert: String,
    delete: String,
}

impl TableStatements {
    fn new(descriptor: &CollectionDescriptor) -> Result<Self> {
        if !descriptor.has_id() {
            return Err(StoreError::MissingPrimaryKey(
                descriptor.collection_name.clone(),
            ));
        }

        let table = quote_ident(&descriptor.element_type_name)?;
        let columns: Vec<String> = descriptor
            .column_fields()
            .map(|f| f.name.clone())
            .collect();
        let quoted = columns
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?;
        let placeholders = vec!["?"; columns.len()].join(", ");

        let upsert = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            table,
            quoted.join(", "),
            placeholders
        );
        let delete = format!("DELETE FROM {} WHERE \"id\" = ?", table);

        Ok(Self {
            table,
            columns,
            upsert,
            delete,
        })
    }

    fn create_table(descriptor: &CollectionDescriptor) -> Result<String> {
        let table = quote_ident(&descriptor.element_type_name)?;
        let columns = descriptor
            .column_fields()
            .map(|field| {
                let mut column = format!("{} {}", quote_ident(&field.name)?, column_type(field));
                if field.name == "id" {
                    column.push_str(" PRIMARY KEY");
                }
                Ok(column)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table,
            columns.join(", ")
        ))
    }

    async fn upsert(&self, conn: &mut SqliteConnection, items: &[Record]) -> Result<u64> {
        let mut written = 0;
        for item in items {
            let mut query = sqlx::query(&self.upsert);
            for column in &self.columns {
                let value = item.get(column).map(SqlValue::from).unwrap_or(SqlValue::Null);
                query = bind_value(query, value);
            }
            written += query.execute(&mut *conn).await?.rows_affected().min(1);
        }
        Ok(written)
    }

    async fn delete(&self, conn: &mut SqliteConnection, ids: &[Value]) -> Result<u64> {
        let mut deleted = 0;
        for id in ids {
            let query = bind_value(sqlx::query(&self.delete), SqlValue::from(id));
            deleted += query.execute(&mut *conn).await?.rows_affected();
        }
        Ok(deleted)
    }
}

/// Writes mirrored rows for collections.
#[derive(Clone)]
pub struct TableSync {
    pool: SqlitePool,
}

impl TableSync {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Creates the element table if it does not exist. Safe to call repeatedly.
    #[instrument(skip(self, descriptor), fields(table = %descriptor.element_type_name))]
    pub async fn ensure_table(&self, descriptor: &CollectionDescriptor) -> Result<()> {
        if !descriptor.has_id() {
            return Err(StoreError::MissingPrimaryKey(
                descriptor.collection_name.clone(),
            ));
        }

        let ddl = TableStatements::create_table(descriptor)?;
        sqlx::query(&ddl).execute(&self.pool).await?;

        debug!("Ensured table exists");
        Ok(())
    }

    /// Insert-or-replace each item keyed by `id`. No-op for an empty slice.
    pub async fn upsert_items(
        &self,
        descriptor: &CollectionDescriptor,
        items: &[Record],
    ) -> Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let statements = TableStatements::new(descriptor)?;
        let mut tx = self.pool.begin().await?;
        let written = statements.upsert(&mut *tx, items).await?;
        tx.commit().await?;
        Ok(written)
    }

    /// Applies a page in one transaction: renew `owner`'s lease, upsert
    /// items, delete `deletedIds`, then store the page cursor. A null page
    /// cursor leaves the stored cursor unchanged. On error nothing is written.
    ///
    /// Fails with [`StoreError::LeaseLost`] when `owner` no longer holds the
    /// collection's lease.
    #[instrument(skip(self, descriptor, page), fields(collection = %descriptor.collection_name))]
    pub async fn apply_page(
        &self,
        descriptor: &CollectionDescriptor,
        page: &Page,
        owner: &str,
        now: i64,
    ) -> Result<PageOutcome> {
        let statements = TableStatements::new(descriptor)?;
        let mut tx = self.pool.begin().await?;

        if !renew_lease_on(&mut *tx, &descriptor.collection_name, owner, now).await? {
            return Err(StoreError::LeaseLost {
                collection: descriptor.collection_name.clone(),
                owner: owner.to_string(),
            });
        }

        let upserted = statements.upsert(&mut *tx, &page.items).await?;
        let deleted = statements.delete(&mut *tx, &page.deleted_ids).await?;

        let cursor_advanced = match page.cursor.as_deref() {
            Some(cursor) => {
                update_cursor(&mut tx, &descriptor.collection_name, cursor).await?;
                true
            }
            None => false,
        };

        tx.commit().await?;

        debug!(
            table = %statements.table,
            upserted,
            deleted,
            cursor = ?page.cursor,
            "Page applied"
        );

        Ok(PageOutcome {
            upserted,
            deleted,
            cursor_advanced,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::create_test_pool;
    use crate::sync_state::{SqliteSyncStateRepository, SyncStateRepository};
    use serde_json::json;
    use sqlx::Row;

    fn widget() -> CollectionDescriptor {
        CollectionDescriptor::new(
            "WidgetCollection",
            "Widget",
            vec![
                FieldDescriptor::new("id", "ID"),
                FieldDescriptor::new("name", "String"),
                FieldDescriptor::new("price", "Float"),
                FieldDescriptor::new("active", "Boolean"),
                FieldDescriptor::new("ts", "String"),
                FieldDescriptor::new("owner", "User"),
            ],
        )
    }

    const OWNER: &str = "worker-a";
    const T0: i64 = 1_700_000_000;

    /// Table plus a lease on it held by [`OWNER`].
    async fn leased_widgets(pool: &SqlitePool) -> (TableSync, SqliteSyncStateRepository) {
        let tables = TableSync::new(pool.clone());
        let state = SqliteSyncStateRepository::new(pool.clone());
        tables.ensure_table(&widget()).await.unwrap();
        assert!(state
            .acquire_lease("WidgetCollection", OWNER, 30, T0)
            .await
            .unwrap());
        (tables, state)
    }

    fn record(value: serde_json::Value) -> Record {
        value.as_object().cloned().unwrap()
    }

    async fn count(pool: &SqlitePool) -> i64 {
        sqlx::query("SELECT COUNT(*) AS n FROM \"Widget\"")
            .fetch_one(pool)
            .await
            .unwrap()
            .get("n")
    }

    /// `(name, type, pk)` for each column of the Widget table.
    async fn table_info(pool: &SqlitePool) -> Vec<(String, String, i64)> {
        sqlx::query_as::<_, (String, String, i64)>(
            "SELECT name, type, pk FROM pragma_table_info('Widget') ORDER BY cid",
        )
        .fetch_all(pool)
        .await
        .unwrap()
    }

    #[test]
    fn test_column_types() {
        let t = |name: &str, ty: &str| column_type(&FieldDescriptor::new(name, ty));

        assert_eq!(t("name", "String"), "TEXT");
        assert_eq!(t("created", "ISO8601DateTime"), "TEXT");
        assert_eq!(t("id", "ID"), "INTEGER");
        assert_eq!(t("active", "Boolean"), "INTEGER");
        assert_eq!(t("count", "Int"), "INTEGER");
        assert_eq!(t("price", "Float"), "REAL");
        assert_eq!(t("ts", "String"), "INTEGER");
        assert_eq!(t("owner", "User"), "TEXT");
    }

    #[test]
    fn test_create_table_sql() {
        let ddl = TableStatements::create_table(&widget()).unwrap();
        assert_eq!(
            ddl,
            "CREATE TABLE IF NOT EXISTS \"Widget\" (\"id\" INTEGER PRIMARY KEY, \"name\" TEXT, \
             \"price\" REAL, \"active\" INTEGER, \"ts\" INTEGER)"
        );
    }

    #[test]
    fn test_invalid_identifier_rejected() {
        let descriptor = CollectionDescriptor::new(
            "BadCollection",
            "Bad\"; DROP TABLE sync_state; --",
            vec![FieldDescriptor::new("id", "ID")],
        );
        assert!(matches!(
            TableStatements::create_table(&descriptor),
            Err(StoreError::InvalidIdentifier(_))
        ));
    }

    #[core_async::test]
    async fn test_ensure_table_is_idempotent() {
        let pool = create_test_pool().await.unwrap();
        let tables = TableSync::new(pool.clone());

        tables.ensure_table(&widget()).await.unwrap();
        let before = table_info(&pool).await;

        tables.ensure_table(&widget()).await.unwrap();
        assert_eq!(table_info(&pool).await, before);
        assert_eq!(
            before,
            vec![
                ("id".to_string(), "INTEGER".to_string(), 1),
                ("name".to_string(), "TEXT".to_string(), 0),
                ("price".to_string(), "REAL".to_string(), 0),
                ("active".to_string(), "INTEGER".to_string(), 0),
                ("ts".to_string(), "INTEGER".to_string(), 0),
            ]
        );
        assert_eq!(count(&pool).await, 0);
    }

    #[core_async::test]
    async fn test_upsert_replaces_by_id_and_coerces() {
        let pool = create_test_pool().await.unwrap();
        let tables = TableSync::new(pool.clone());
        let descriptor = widget();
        tables.ensure_table(&descriptor).await.unwrap();

        let first = vec![record(json!({"id": 1, "name": "a", "active": true, "owner": {"id": 9}}))];
        assert_eq!(tables.upsert_items(&descriptor, &first).await.unwrap(), 1);

        let second = vec![record(json!({"id": 1, "name": "b", "active": false, "price": 2.5}))];
        tables.upsert_items(&descriptor, &second).await.unwrap();

        assert_eq!(count(&pool).await, 1);
        let row = sqlx::query("SELECT name, active, price, ts FROM \"Widget\" WHERE id = 1")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row.get::<String, _>("name"), "b");
        assert_eq!(row.get::<i64, _>("active"), 0);
        assert_eq!(row.get::<f64, _>("price"), 2.5);
        assert_eq!(row.get::<Option<i64>, _>("ts"), None);
    }

    #[core_async::test]
    async fn test_upsert_empty_is_noop() {
        let pool = create_test_pool().await.unwrap();
        let tables = TableSync::new(pool);

        // No table needed for an empty page
        assert_eq!(tables.upsert_items(&widget(), &[]).await.unwrap(), 0);
    }

    #[core_async::test]
    async fn test_apply_page_upserts_deletes_and_advances_cursor() {
        let pool = create_test_pool().await.unwrap();
        let (tables, state) = leased_widgets(&pool).await;
        let descriptor = widget();

        let page1 = Page {
            items: vec![
                record(json!({"id": 1, "name": "a"})),
                record(json!({"id": 2, "name": "b"})),
            ],
            cursor: Some("c1".to_string()),
            has_more: true,
            deleted_ids: vec![],
        };
        let outcome = tables.apply_page(&descriptor, &page1, OWNER, T0).await.unwrap();
        assert_eq!(outcome.upserted, 2);
        assert!(outcome.cursor_advanced);

        let page2 = Page {
            items: vec![record(json!({"id": 3, "name": "c"}))],
            cursor: Some("c2".to_string()),
            has_more: false,
            deleted_ids: vec![json!(1), json!("2")],
        };
        let outcome = tables.apply_page(&descriptor, &page2, OWNER, T0).await.unwrap();
        assert_eq!(outcome.deleted, 2);

        assert_eq!(count(&pool).await, 1);
        assert_eq!(
            state.get_cursor("WidgetCollection").await.unwrap().as_deref(),
            Some("c2")
        );
    }

    #[core_async::test]
    async fn test_null_cursor_keeps_stored_cursor() {
        let pool = create_test_pool().await.unwrap();
        let (tables, state) = leased_widgets(&pool).await;
        let descriptor = widget();

        let page = Page {
            cursor: Some("c1".to_string()),
            has_more: true,
            ..Page::default()
        };
        tables.apply_page(&descriptor, &page, OWNER, T0).await.unwrap();

        let empty = Page::default();
        let outcome = tables.apply_page(&descriptor, &empty, OWNER, T0).await.unwrap();
        assert!(!outcome.cursor_advanced);
        assert_eq!(
            state.get_cursor("WidgetCollection").await.unwrap().as_deref(),
            Some("c1")
        );
    }

    #[core_async::test]
    async fn test_failed_page_leaves_no_trace() {
        let pool = create_test_pool().await.unwrap();
        let (tables, state) = leased_widgets(&pool).await;
        let descriptor = widget();

        // A non-numeric id cannot be stored in the INTEGER PRIMARY KEY
        let page = Page {
            items: vec![
                record(json!({"id": 1, "name": "a"})),
                record(json!({"id": "not-a-number", "name": "b"})),
            ],
            cursor: Some("c1".to_string()),
            has_more: false,
            deleted_ids: vec![],
        };

        assert!(tables.apply_page(&descriptor, &page, OWNER, T0).await.is_err());
        assert_eq!(count(&pool).await, 0);
        assert_eq!(state.get_cursor("WidgetCollection").await.unwrap(), None);
    }

    #[core_async::test]
    async fn test_apply_page_after_lease_takeover_writes_nothing() {
        let pool = create_test_pool().await.unwrap();
        let (tables, state) = leased_widgets(&pool).await;
        let descriptor = widget();

        let page1 = Page {
            items: vec![record(json!({"id": 1, "name": "a"}))],
            cursor: Some("c1".to_string()),
            has_more: true,
            deleted_ids: vec![],
        };
        tables.apply_page(&descriptor, &page1, OWNER, T0 + 10).await.unwrap();

        // Applying renewed the lease, so it only goes stale 30s after that
        assert!(!state
            .acquire_lease("WidgetCollection", "worker-b", 30, T0 + 35)
            .await
            .unwrap());
        assert!(state
            .acquire_lease("WidgetCollection", "worker-b", 30, T0 + 41)
            .await
            .unwrap());

        let page2 = Page {
            items: vec![record(json!({"id": 2, "name": "b"}))],
            cursor: Some("c2".to_string()),
            has_more: false,
            deleted_ids: vec![json!(1)],
        };
        let err = tables
            .apply_page(&descriptor, &page2, OWNER, T0 + 42)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseLost { ref owner, .. } if owner == OWNER));

        assert_eq!(count(&pool).await, 1);
        let record = state.find("WidgetCollection").await.unwrap().unwrap();
        assert_eq!(record.cursor.as_deref(), Some("c1"));
        assert_eq!(record.lock_owner.as_deref(), Some("worker-b"));
        assert_eq!(record.lock_acquired_at, Some(T0 + 41));
    }
}
