//! Durable, `sqlx`-backed `Store` implementation.
//!
//! Follows the teacher's `SQLiteCheckpointer`: the pool is behind an `Arc`,
//! migrations run once at `connect()` time (idempotent, gated by the
//! `sqlite-migrations` feature), and every record is stored as a JSON blob
//! alongside queryable scalar columns used for the secondary indices §4.1
//! requires.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool, sqlite::SqliteRow};
use tracing::instrument;

use super::{CheckpointRecord, Store, SyncMetadata};
use crate::error::StoreError;
use crate::model::{Checkpoint, DeltaState, Manifest, Source};

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish()
    }
}

fn source_to_str(source: Source) -> &'static str {
    match source {
        Source::Library => "library",
        Source::Server => "server",
        Source::File => "file",
    }
}

fn io_err(op: &str, e: sqlx::Error) -> StoreError {
    // SQLite surfaces lock contention as a distinct error code; the spec
    // requires that a second opener at a newer schema version see `Blocked`
    // rather than a generic I/O failure.
    if let sqlx::Error::Database(db_err) = &e {
        if db_err.message().contains("database is locked") {
            return StoreError::Blocked;
        }
    }
    StoreError::Io(format!("{op}: {e}"))
}

fn corrupt(key: impl Into<String>, e: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        key: key.into(),
        message: e.to_string(),
    }
}

impl SqliteStore {
    /// Connect (or create) a SQLite database at `database_url`, e.g.
    /// `"sqlite://synccore.db"`. Runs embedded migrations before returning,
    /// so the schema-version hook in §4.1 always runs before any other
    /// operation can proceed.
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = SqlitePool::connect(database_url)
            .await
            .map_err(|e| io_err("connect", e))?;
        #[cfg(feature = "sqlite-migrations")]
        {
            sqlx::migrate!("./migrations")
                .run(&pool)
                .await
                .map_err(|e| StoreError::Io(format!("migration failure: {e}")))?;
        }
        Ok(Self { pool: Arc::new(pool) })
    }

    fn row_to_delta_state(row: &SqliteRow, key: &str) -> Result<DeltaState, StoreError> {
        let entity_type_str: String = row.try_get("entity_type").map_err(|e| io_err("read entity_type", e))?;
        let entity_type = serde_json::from_value(serde_json::Value::String(entity_type_str))
            .map_err(|e| corrupt(key, e))?;
        let last_modified: DateTime<Utc> = row
            .try_get::<String, _>("last_modified")
            .map_err(|e| io_err("read last_modified", e))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)).map_err(|e| corrupt(key, e)))?;
        let last_synced: DateTime<Utc> = row
            .try_get::<String, _>("last_synced")
            .map_err(|e| io_err("read last_synced", e))
            .and_then(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)).map_err(|e| corrupt(key, e)))?;
        let hash: Option<String> = row.try_get("hash").map_err(|e| io_err("read hash", e))?;
        let size: Option<i64> = row.try_get("size").map_err(|e| io_err("read size", e))?;
        Ok(DeltaState {
            hash,
            last_modified,
            last_synced,
            entity_type,
            size: size.map(|s| s as u64),
        })
    }
}

#[async_trait]
impl Store for SqliteStore {
    #[instrument(skip(self), err)]
    async fn get_delta_state(&self, source: Source, id: &str) -> super::Result<Option<DeltaState>> {
        let key = format!("{}/{}", source_to_str(source), id);
        let row = sqlx::query("SELECT entity_type, hash, last_modified, last_synced, size FROM delta_states WHERE source = ?1 AND id = ?2")
            .bind(source_to_str(source))
            .bind(id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| io_err("select delta_state", e))?;
        match row {
            Some(r) => Ok(Some(Self::row_to_delta_state(&r, &key)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, state), err)]
    async fn put_delta_state(&self, source: Source, id: &str, state: DeltaState) -> super::Result<()> {
        let entity_type_str = serde_json::to_value(state.entity_type)
            .ok()
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .unwrap_or_default();
        sqlx::query(
            r#"INSERT INTO delta_states (source, id, entity_type, hash, last_modified, last_synced, size)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
               ON CONFLICT(source, id) DO UPDATE SET
                 entity_type = excluded.entity_type,
                 hash = excluded.hash,
                 last_modified = excluded.last_modified,
                 last_synced = excluded.last_synced,
                 size = excluded.size"#,
        )
        .bind(source_to_str(source))
        .bind(id)
        .bind(entity_type_str)
        .bind(&state.hash)
        .bind(state.last_modified.to_rfc3339())
        .bind(state.last_synced.to_rfc3339())
        .bind(state.size.map(|s| s as i64))
        .execute(&*self.pool)
        .await
        .map_err(|e| io_err("upsert delta_state", e))?;
        Ok(())
    }

    #[instrument(skip(self, entries), err)]
    async fn put_delta_states_batch(
        &self,
        entries: Vec<(Source, String, DeltaState)>,
    ) -> super::Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| io_err("tx begin", e))?;
        for (source, id, state) in entries {
            let entity_type_str = serde_json::to_value(state.entity_type)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.to_string()))
                .unwrap_or_default();
            sqlx::query(
                r#"INSERT INTO delta_states (source, id, entity_type, hash, last_modified, last_synced, size)
                   VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                   ON CONFLICT(source, id) DO UPDATE SET
                     entity_type = excluded.entity_type,
                     hash = excluded.hash,
                     last_modified = excluded.last_modified,
                     last_synced = excluded.last_synced,
                     size = excluded.size"#,
            )
            .bind(source_to_str(source))
            .bind(&id)
            .bind(entity_type_str)
            .bind(&state.hash)
            .bind(state.last_modified.to_rfc3339())
            .bind(state.last_synced.to_rfc3339())
            .bind(state.size.map(|s| s as i64))
            .execute(&mut *tx)
            .await
            .map_err(|e| io_err("batch upsert delta_state", e))?;
        }
        tx.commit().await.map_err(|e| io_err("tx commit", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_delta_state(&self, source: Source, id: &str) -> super::Result<()> {
        sqlx::query("DELETE FROM delta_states WHERE source = ?1 AND id = ?2")
            .bind(source_to_str(source))
            .bind(id)
            .execute(&*self.pool)
            .await
            .map_err(|e| io_err("delete delta_state", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_all_delta_states(&self, source: Source) -> super::Result<Vec<(String, DeltaState)>> {
        let rows = sqlx::query("SELECT id, entity_type, hash, last_modified, last_synced, size FROM delta_states WHERE source = ?1")
            .bind(source_to_str(source))
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| io_err("select all delta_states", e))?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("id").map_err(|e| io_err("read id", e))?;
            let state = Self::row_to_delta_state(&row, &id)?;
            out.push((id, state));
        }
        Ok(out)
    }

    #[instrument(skip(self), err)]
    async fn get_sync_metadata(&self, source: Source) -> super::Result<SyncMetadata> {
        let row = sqlx::query("SELECT last_sync_time, last_manifest_hash, total_synced_items, last_error FROM sync_metadata WHERE source = ?1")
            .bind(source_to_str(source))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| io_err("select sync_metadata", e))?;
        let Some(row) = row else {
            return Ok(SyncMetadata::default());
        };
        let last_sync_time: Option<String> = row.try_get("last_sync_time").map_err(|e| io_err("read last_sync_time", e))?;
        let last_sync_time = last_sync_time
            .map(|s| DateTime::parse_from_rfc3339(&s).map(|d| d.with_timezone(&Utc)))
            .transpose()
            .map_err(|e| corrupt(source_to_str(source), e))?;
        let total_synced_items: i64 = row.try_get("total_synced_items").map_err(|e| io_err("read total_synced_items", e))?;
        Ok(SyncMetadata {
            last_sync_time,
            last_manifest_hash: row.try_get("last_manifest_hash").map_err(|e| io_err("read last_manifest_hash", e))?,
            total_synced_items: total_synced_items as u64,
            last_error: row.try_get("last_error").map_err(|e| io_err("read last_error", e))?,
        })
    }

    #[instrument(skip(self, metadata), err)]
    async fn put_sync_metadata(&self, source: Source, metadata: SyncMetadata) -> super::Result<()> {
        sqlx::query(
            r#"INSERT INTO sync_metadata (source, last_sync_time, last_manifest_hash, total_synced_items, last_error)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(source) DO UPDATE SET
                 last_sync_time = excluded.last_sync_time,
                 last_manifest_hash = excluded.last_manifest_hash,
                 total_synced_items = excluded.total_synced_items,
                 last_error = excluded.last_error"#,
        )
        .bind(source_to_str(source))
        .bind(metadata.last_sync_time.map(|t| t.to_rfc3339()))
        .bind(&metadata.last_manifest_hash)
        .bind(metadata.total_synced_items as i64)
        .bind(&metadata.last_error)
        .execute(&*self.pool)
        .await
        .map_err(|e| io_err("upsert sync_metadata", e))?;
        Ok(())
    }

    async fn get_last_sync_time(&self, source: Source) -> super::Result<Option<DateTime<Utc>>> {
        Ok(self.get_sync_metadata(source).await?.last_sync_time)
    }

    async fn set_last_sync_time(&self, source: Source, time: DateTime<Utc>) -> super::Result<()> {
        let mut metadata = self.get_sync_metadata(source).await?;
        metadata.last_sync_time = Some(time);
        self.put_sync_metadata(source, metadata).await
    }

    #[instrument(skip(self, record), err)]
    async fn put_checkpoint(&self, record: CheckpointRecord) -> super::Result<()> {
        let json = serde_json::to_string(&record.checkpoint)
            .map_err(|e| corrupt(&record.checkpoint.session_id, e))?;
        sqlx::query(
            r#"INSERT INTO checkpoints (session_id, checkpoint_json, created_at, updated_at, complete)
               VALUES (?1, ?2, ?3, ?4, ?5)
               ON CONFLICT(session_id) DO UPDATE SET
                 checkpoint_json = excluded.checkpoint_json,
                 updated_at = excluded.updated_at,
                 complete = excluded.complete"#,
        )
        .bind(&record.checkpoint.session_id)
        .bind(json)
        .bind(record.created_at.to_rfc3339())
        .bind(record.updated_at.to_rfc3339())
        .bind(record.complete as i64)
        .execute(&*self.pool)
        .await
        .map_err(|e| io_err("upsert checkpoint", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_checkpoint(&self, session_id: &str) -> super::Result<Option<CheckpointRecord>> {
        let row = sqlx::query("SELECT checkpoint_json, created_at, updated_at, complete FROM checkpoints WHERE session_id = ?1")
            .bind(session_id)
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| io_err("select checkpoint", e))?;
        let Some(row) = row else { return Ok(None) };
        Ok(Some(row_to_checkpoint_record(&row, session_id)?))
    }

    #[instrument(skip(self), err)]
    async fn list_incomplete_checkpoints(&self) -> super::Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query("SELECT session_id, checkpoint_json, created_at, updated_at, complete FROM checkpoints WHERE complete = 0 ORDER BY updated_at DESC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| io_err("select incomplete checkpoints", e))?;
        rows.iter()
            .map(|r| {
                let session_id: String = r.try_get("session_id").map_err(|e| io_err("read session_id", e))?;
                row_to_checkpoint_record(r, &session_id)
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn list_complete_checkpoints(&self) -> super::Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query("SELECT session_id, checkpoint_json, created_at, updated_at, complete FROM checkpoints WHERE complete = 1 ORDER BY updated_at DESC")
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| io_err("select complete checkpoints", e))?;
        rows.iter()
            .map(|r| {
                let session_id: String = r.try_get("session_id").map_err(|e| io_err("read session_id", e))?;
                row_to_checkpoint_record(r, &session_id)
            })
            .collect()
    }

    #[instrument(skip(self), err)]
    async fn mark_checkpoint_complete(&self, session_id: &str, at: DateTime<Utc>) -> super::Result<()> {
        let result = sqlx::query("UPDATE checkpoints SET complete = 1, updated_at = ?1 WHERE session_id = ?2")
            .bind(at.to_rfc3339())
            .bind(session_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| io_err("mark checkpoint complete", e))?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                key: session_id.to_string(),
            });
        }
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn delete_checkpoint(&self, session_id: &str) -> super::Result<()> {
        sqlx::query("DELETE FROM checkpoints WHERE session_id = ?1")
            .bind(session_id)
            .execute(&*self.pool)
            .await
            .map_err(|e| io_err("delete checkpoint", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn get_cached_manifest(&self, source: Source) -> super::Result<Option<Manifest>> {
        let row = sqlx::query("SELECT manifest_json FROM manifests WHERE source = ?1")
            .bind(source_to_str(source))
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| io_err("select manifest", e))?;
        let Some(row) = row else { return Ok(None) };
        let json: String = row.try_get("manifest_json").map_err(|e| io_err("read manifest_json", e))?;
        let manifest = serde_json::from_str(&json).map_err(|e| corrupt(source_to_str(source), e))?;
        Ok(Some(manifest))
    }

    #[instrument(skip(self, manifest), err)]
    async fn put_cached_manifest(&self, source: Source, manifest: Manifest) -> super::Result<()> {
        let json = serde_json::to_string(&manifest).map_err(|e| corrupt(source_to_str(source), e))?;
        sqlx::query(
            r#"INSERT INTO manifests (source, manifest_json) VALUES (?1, ?2)
               ON CONFLICT(source) DO UPDATE SET manifest_json = excluded.manifest_json"#,
        )
        .bind(source_to_str(source))
        .bind(json)
        .execute(&*self.pool)
        .await
        .map_err(|e| io_err("upsert manifest", e))?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn clear(&self, source: Option<Source>) -> super::Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| io_err("tx begin", e))?;
        match source {
            Some(s) => {
                let s = source_to_str(s);
                sqlx::query("DELETE FROM delta_states WHERE source = ?1").bind(s).execute(&mut *tx).await.map_err(|e| io_err("clear delta_states", e))?;
                sqlx::query("DELETE FROM sync_metadata WHERE source = ?1").bind(s).execute(&mut *tx).await.map_err(|e| io_err("clear sync_metadata", e))?;
                sqlx::query("DELETE FROM manifests WHERE source = ?1").bind(s).execute(&mut *tx).await.map_err(|e| io_err("clear manifests", e))?;
            }
            None => {
                sqlx::query("DELETE FROM delta_states").execute(&mut *tx).await.map_err(|e| io_err("clear delta_states", e))?;
                sqlx::query("DELETE FROM sync_metadata").execute(&mut *tx).await.map_err(|e| io_err("clear sync_metadata", e))?;
                sqlx::query("DELETE FROM manifests").execute(&mut *tx).await.map_err(|e| io_err("clear manifests", e))?;
                sqlx::query("DELETE FROM checkpoints").execute(&mut *tx).await.map_err(|e| io_err("clear checkpoints", e))?;
            }
        }
        tx.commit().await.map_err(|e| io_err("tx commit", e))?;
        Ok(())
    }
}

fn row_to_checkpoint_record(row: &SqliteRow, key: &str) -> Result<CheckpointRecord, StoreError> {
    let json: String = row.try_get("checkpoint_json").map_err(|e| io_err("read checkpoint_json", e))?;
    let checkpoint: Checkpoint = serde_json::from_str(&json).map_err(|e| corrupt(key, e))?;
    let created_at: String = row.try_get("created_at").map_err(|e| io_err("read created_at", e))?;
    let updated_at: String = row.try_get("updated_at").map_err(|e| io_err("read updated_at", e))?;
    let complete: i64 = row.try_get("complete").map_err(|e| io_err("read complete", e))?;
    Ok(CheckpointRecord {
        checkpoint,
        created_at: DateTime::parse_from_rfc3339(&created_at).map_err(|e| corrupt(key, e))?.with_timezone(&Utc),
        updated_at: DateTime::parse_from_rfc3339(&updated_at).map_err(|e| corrupt(key, e))?.with_timezone(&Utc),
        complete: complete != 0,
    })
}
