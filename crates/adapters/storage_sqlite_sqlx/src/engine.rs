//! `SQLite` implementation of [`StorageEngine`].
//!
//! Every kind shares the single `records` table; the `kind` column keeps
//! their id sequences and global id spaces apart.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row, Sqlite, SqliteExecutor, SqlitePool};
use unitwork_app::ports::{Filter, Outcome, StorageEngine, StorageTransaction};
use unitwork_domain::audit::Audit;
use unitwork_domain::error::PersistenceError;
use unitwork_domain::id::{EntityKind, GlobalId, RecordId};
use unitwork_domain::record::{ParentRef, Record};
use unitwork_domain::time::Timestamp;

use crate::error::StorageError;

const SELECT_ALL: &str = "SELECT * FROM records WHERE kind = ? ORDER BY id";
const SELECT_BY_ID: &str = "SELECT * FROM records WHERE kind = ? AND id = ?";
const SELECT_BY_GLOBAL_ID: &str = "SELECT * FROM records WHERE kind = ? AND global_id = ?";
const SELECT_BY_PARENT: &str = "SELECT * FROM records WHERE kind = ? AND parent_kind = ? AND parent_global_id = ? ORDER BY id";

const NEXT_ID: &str = "INSERT INTO record_sequences (kind, last_id) VALUES (?, 1) ON CONFLICT (kind) DO UPDATE SET last_id = last_id + 1 RETURNING last_id";

const INSERT_RECORD: &str = "INSERT INTO records (kind, id, global_id, parent_kind, parent_global_id, created_by, created_at, modified_by, modified_at, version, fields) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?)";

const UPDATE_RECORD: &str = "UPDATE records SET parent_kind = ?, parent_global_id = ?, modified_by = ?, modified_at = ?, fields = ?, version = version + 1 WHERE kind = ? AND global_id = ?";

const DELETE_RECORD: &str = "DELETE FROM records WHERE kind = ? AND global_id = ?";

/// Kind names the engine can turn back into [`EntityKind`]s.
type Kinds = HashMap<&'static str, EntityKind>;

/// A `records` row with its columns still in their stored representation.
struct StoredRow {
    id: i64,
    global_id: String,
    parent_kind: Option<String>,
    parent_global_id: Option<String>,
    created_by: String,
    created_at: String,
    modified_by: String,
    modified_at: String,
    version: i64,
    fields: String,
}

impl<'r> FromRow<'r, SqliteRow> for StoredRow {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            global_id: row.try_get("global_id")?,
            parent_kind: row.try_get("parent_kind")?,
            parent_global_id: row.try_get("parent_global_id")?,
            created_by: row.try_get("created_by")?,
            created_at: row.try_get("created_at")?,
            modified_by: row.try_get("modified_by")?,
            modified_at: row.try_get("modified_at")?,
            version: row.try_get("version")?,
            fields: row.try_get("fields")?,
        })
    }
}

fn parse_global_id(value: &str) -> Result<GlobalId, StorageError> {
    value
        .parse()
        .map_err(|err| StorageError::Database(sqlx::Error::Decode(Box::new(err))))
}

fn parse_timestamp(value: &str) -> Result<Timestamp, StorageError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StorageError::Database(sqlx::Error::Decode(Box::new(err))))
}

impl StoredRow {
    fn into_record(self, kind: EntityKind, kinds: &Kinds) -> Result<Record, StorageError> {
        let parent = match (self.parent_kind, self.parent_global_id) {
            (Some(name), Some(global_id)) => {
                let Some(parent_kind) = kinds.get(name.as_str()).copied() else {
                    return Err(StorageError::UnknownKind(name));
                };
                Some(ParentRef::new(parent_kind, parse_global_id(&global_id)?))
            }
            _ => None,
        };
        Ok(Record {
            kind,
            id: RecordId::new(self.id),
            global_id: parse_global_id(&self.global_id)?,
            parent,
            audit: Audit {
                created_by: self.created_by,
                created_at: parse_timestamp(&self.created_at)?,
                modified_by: self.modified_by,
                modified_at: parse_timestamp(&self.modified_at)?,
            },
            version: self.version,
            fields: serde_json::from_str(&self.fields)?,
        })
    }
}

async fn select<'e, X>(
    executor: X,
    kinds: &Kinds,
    kind: EntityKind,
    filter: Filter,
) -> Result<Vec<Record>, StorageError>
where
    X: SqliteExecutor<'e>,
{
    let query = match filter {
        Filter::All => sqlx::query(SELECT_ALL).bind(kind.as_str()),
        Filter::ById(id) => sqlx::query(SELECT_BY_ID).bind(kind.as_str()).bind(id.get()),
        Filter::ByGlobalId(global_id) => sqlx::query(SELECT_BY_GLOBAL_ID)
            .bind(kind.as_str())
            .bind(global_id.to_string()),
        Filter::ByParent(parent) => sqlx::query(SELECT_BY_PARENT)
            .bind(kind.as_str())
            .bind(parent.kind.as_str())
            .bind(parent.global_id.to_string()),
    };
    let rows = query.fetch_all(executor).await?;
    rows.iter()
        .map(|row| StoredRow::from_row(row)?.into_record(kind, kinds))
        .collect()
}

/// Storage engine backed by a `SQLite` pool.
///
/// Integrity lives in the schema: `(kind, global_id)` is unique and a child
/// row's owner is a foreign key, so orphans and deletes of owners that still
/// have children are refused by the database.
#[derive(Clone)]
pub struct SqliteEngine {
    pool: SqlitePool,
    kinds: Arc<Kinds>,
}

impl SqliteEngine {
    /// Create an engine over `pool` able to read rows of the given kinds.
    #[must_use]
    pub fn new(pool: SqlitePool, kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        let kinds = kinds
            .into_iter()
            .map(|kind| (kind.as_str(), kind))
            .collect();
        Self {
            pool,
            kinds: Arc::new(kinds),
        }
    }
}

impl std::fmt::Debug for SqliteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteEngine")
            .field("kinds", &self.kinds.len())
            .finish_non_exhaustive()
    }
}

impl StorageEngine for SqliteEngine {
    type Transaction = SqliteTransaction;

    fn find(
        &self,
        kind: EntityKind,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Record>, PersistenceError>> + Send {
        let pool = self.pool.clone();
        let kinds = Arc::clone(&self.kinds);
        async move { Ok(select(&pool, &kinds, kind, filter).await?) }
    }

    fn begin(&self) -> impl Future<Output = Result<SqliteTransaction, PersistenceError>> + Send {
        let pool = self.pool.clone();
        let kinds = Arc::clone(&self.kinds);
        async move {
            let tx = pool.begin().await.map_err(StorageError::from)?;
            tracing::trace!("sqlite transaction started");
            Ok(SqliteTransaction { tx, kinds })
        }
    }
}

/// Write transaction over a [`SqliteEngine`].
///
/// Dropping it without committing rolls the database transaction back.
pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
    kinds: Arc<Kinds>,
}

impl StorageTransaction for SqliteTransaction {
    fn find(
        &mut self,
        kind: EntityKind,
        filter: Filter,
    ) -> impl Future<Output = Result<Vec<Record>, PersistenceError>> + Send {
        async move { Ok(select(&mut *self.tx, &self.kinds, kind, filter).await?) }
    }

    fn insert(
        &mut self,
        record: Record,
    ) -> impl Future<Output = Result<RecordId, PersistenceError>> + Send {
        async move {
            let Record {
                kind,
                global_id,
                parent,
                audit,
                fields,
                ..
            } = record;
            let fields = serde_json::to_string(&fields).map_err(StorageError::from)?;
            let id: i64 = sqlx::query_scalar(NEXT_ID)
                .bind(kind.as_str())
                .fetch_one(&mut *self.tx)
                .await
                .map_err(StorageError::from)?;
            sqlx::query(INSERT_RECORD)
                .bind(kind.as_str())
                .bind(id)
                .bind(global_id.to_string())
                .bind(parent.map(|parent| parent.kind.as_str()))
                .bind(parent.map(|parent| parent.global_id.to_string()))
                .bind(audit.created_by)
                .bind(audit.created_at.to_rfc3339())
                .bind(audit.modified_by)
                .bind(audit.modified_at.to_rfc3339())
                .bind(fields)
                .execute(&mut *self.tx)
                .await
                .map_err(|err| StorageError::on_insert(err, kind, global_id))?;
            tracing::trace!(%kind, id, %global_id, "row inserted");
            Ok(RecordId::new(id))
        }
    }

    fn update(
        &mut self,
        record: Record,
    ) -> impl Future<Output = Result<Outcome, PersistenceError>> + Send {
        async move {
            let fields = serde_json::to_string(&record.fields).map_err(StorageError::from)?;
            let result = sqlx::query(UPDATE_RECORD)
                .bind(record.parent.map(|parent| parent.kind.as_str()))
                .bind(record.parent.map(|parent| parent.global_id.to_string()))
                .bind(record.audit.modified_by)
                .bind(record.audit.modified_at.to_rfc3339())
                .bind(fields)
                .bind(record.kind.as_str())
                .bind(record.global_id.to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(StorageError::from)?;
            if result.rows_affected() == 0 {
                return Ok(Outcome::NotFound);
            }
            Ok(Outcome::Applied)
        }
    }

    fn delete(
        &mut self,
        kind: EntityKind,
        global_id: GlobalId,
    ) -> impl Future<Output = Result<Outcome, PersistenceError>> + Send {
        async move {
            let result = sqlx::query(DELETE_RECORD)
                .bind(kind.as_str())
                .bind(global_id.to_string())
                .execute(&mut *self.tx)
                .await
                .map_err(StorageError::from)?;
            if result.rows_affected() == 0 {
                return Ok(Outcome::NotFound);
            }
            Ok(Outcome::Applied)
        }
    }

    fn commit(self) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        async move {
            self.tx.commit().await.map_err(StorageError::from)?;
            tracing::trace!("sqlite transaction committed");
            Ok(())
        }
    }

    fn rollback(self) -> impl Future<Output = Result<(), PersistenceError>> + Send {
        async move {
            self.tx.rollback().await.map_err(StorageError::from)?;
            tracing::trace!("sqlite transaction rolled back");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use unitwork_domain::time;

    use super::*;
    use crate::pool::Config;

    const ORDER: EntityKind = EntityKind::new("order");
    const LINE: EntityKind = EntityKind::new("order_line");

    async fn engine() -> SqliteEngine {
        let db = Config::in_memory().build().await.unwrap();
        SqliteEngine::new(db.pool().clone(), [ORDER, LINE])
    }

    fn record(kind: EntityKind) -> Record {
        let mut record = Record::new(kind, GlobalId::new(), serde_json::json!({ "n": 1 }));
        record.audit.stamp_created("alice", time::now());
        record
    }

    async fn committed(engine: &SqliteEngine, records: Vec<Record>) {
        let mut tx = engine.begin().await.unwrap();
        for record in records {
            tx.insert(record).await.unwrap();
        }
        tx.commit().await.unwrap();
    }

    #[tokio::test]
    async fn should_assign_sequential_ids_per_kind() {
        let engine = engine().await;
        let mut tx = engine.begin().await.unwrap();

        assert_eq!(tx.insert(record(ORDER)).await.unwrap(), RecordId::new(1));
        assert_eq!(tx.insert(record(ORDER)).await.unwrap(), RecordId::new(2));
        assert_eq!(tx.insert(record(LINE)).await.unwrap(), RecordId::new(1));
    }

    #[tokio::test]
    async fn should_not_reuse_ids_of_deleted_rows() {
        let engine = engine().await;
        let first = record(ORDER);
        committed(&engine, vec![first.clone()]).await;

        let mut tx = engine.begin().await.unwrap();
        tx.delete(ORDER, first.global_id).await.unwrap();
        assert_eq!(tx.insert(record(ORDER)).await.unwrap(), RecordId::new(2));
    }

    #[tokio::test]
    async fn should_read_back_every_column() {
        let engine = engine().await;
        let order = record(ORDER);
        let line = record(LINE).with_parent(order.as_parent());
        committed(&engine, vec![order.clone(), line.clone()]).await;

        let stored = engine
            .find(LINE, Filter::ByGlobalId(line.global_id))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.id, RecordId::new(1));
        assert_eq!(stored.version, 1);
        assert_eq!(stored.parent, Some(order.as_parent()));
        assert_eq!(stored.audit, line.audit);
        assert!(stored.same_value(&line));
    }

    #[tokio::test]
    async fn should_discard_writes_when_rolled_back() {
        let engine = engine().await;
        let mut tx = engine.begin().await.unwrap();
        tx.insert(record(ORDER)).await.unwrap();
        assert_eq!(tx.find(ORDER, Filter::All).await.unwrap().len(), 1);
        tx.rollback().await.unwrap();

        assert!(engine.find(ORDER, Filter::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn should_reject_duplicate_global_id() {
        let engine = engine().await;
        let order = record(ORDER);
        committed(&engine, vec![order.clone()]).await;

        let mut tx = engine.begin().await.unwrap();
        let result = tx.insert(order).await;
        assert!(matches!(
            result,
            Err(PersistenceError::DuplicateIdentifier(_))
        ));
    }

    #[tokio::test]
    async fn should_reject_child_without_owner() {
        let engine = engine().await;
        let mut tx = engine.begin().await.unwrap();
        let orphan = record(LINE).with_parent(ParentRef::new(ORDER, GlobalId::new()));

        let result = tx.insert(orphan).await;
        assert!(matches!(result, Err(PersistenceError::Storage(_))));
    }

    #[tokio::test]
    async fn should_refuse_to_delete_owner_with_children() {
        let engine = engine().await;
        let order = record(ORDER);
        let line = record(LINE).with_parent(order.as_parent());
        committed(&engine, vec![order.clone(), line.clone()]).await;

        let mut tx = engine.begin().await.unwrap();
        assert!(tx.delete(ORDER, order.global_id).await.is_err());
        assert_eq!(
            tx.delete(LINE, line.global_id).await.unwrap(),
            Outcome::Applied
        );
        assert_eq!(
            tx.delete(ORDER, order.global_id).await.unwrap(),
            Outcome::Applied
        );
    }

    #[tokio::test]
    async fn should_keep_identity_and_creation_stamps_on_update() {
        let engine = engine().await;
        let mut order = record(ORDER);
        order.audit.stamp_created("alice", time::epoch());
        committed(&engine, vec![order.clone()]).await;

        let mut changed = order.clone();
        changed.fields = serde_json::json!({ "n": 2 });
        changed.audit = Audit::default();
        changed.audit.stamp_modified("bob", time::now());
        let mut tx = engine.begin().await.unwrap();
        assert_eq!(tx.update(changed).await.unwrap(), Outcome::Applied);
        tx.commit().await.unwrap();

        let stored = engine
            .find(ORDER, Filter::ById(RecordId::new(1)))
            .await
            .unwrap()
            .remove(0);
        assert_eq!(stored.version, 2);
        assert_eq!(stored.audit.created_by, "alice");
        assert_eq!(stored.audit.created_at, time::epoch());
        assert_eq!(stored.audit.modified_by, "bob");
        assert_eq!(stored.fields["n"], 2);
    }

    #[tokio::test]
    async fn should_report_missing_targets() {
        let engine = engine().await;
        let mut tx = engine.begin().await.unwrap();

        assert_eq!(tx.update(record(ORDER)).await.unwrap(), Outcome::NotFound);
        assert_eq!(
            tx.delete(ORDER, GlobalId::new()).await.unwrap(),
            Outcome::NotFound
        );
    }

    #[tokio::test]
    async fn should_select_children_by_parent() {
        let engine = engine().await;
        let order = record(ORDER);
        let mut all = vec![
            order.clone(),
            record(LINE).with_parent(order.as_parent()),
            record(LINE).with_parent(order.as_parent()),
        ];
        all.push(record(LINE));
        committed(&engine, all).await;

        let owned = engine
            .find(LINE, Filter::ByParent(order.as_parent()))
            .await
            .unwrap();
        assert_eq!(owned.len(), 2);
        assert!(owned[0].id < owned[1].id);
    }

    #[tokio::test]
    async fn should_fail_decoding_rows_of_unconfigured_owner_kind() {
        let db = Config::in_memory().build().await.unwrap();
        let full = SqliteEngine::new(db.pool().clone(), [ORDER, LINE]);
        let order = record(ORDER);
        committed(&full, vec![order.clone(), record(LINE).with_parent(order.as_parent())]).await;

        let partial = SqliteEngine::new(db.pool().clone(), [LINE]);
        let result = partial.find(LINE, Filter::All).await;
        assert!(matches!(result, Err(PersistenceError::Storage(_))));
    }
}
