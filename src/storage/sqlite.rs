use crate::hll;
use crate::models::{Event, LegacyCounts, ObjectSnapshot};
use crate::storage::{CounterStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::sync::Arc;

pub struct SqliteStore {
    pool: Arc<SqlitePool>,
}

impl SqliteStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

/// `WITH requested(object_id) AS (VALUES (?), (?), ...)`, one row per id,
/// duplicates included.
fn push_requested<'a>(builder: &mut QueryBuilder<'a, Sqlite>, object_ids: &'a [String]) {
    builder.push("WITH requested(object_id) AS (VALUES ");
    let mut separated = builder.separated(", ");
    for object_id in object_ids {
        separated.push("(");
        separated.push_bind_unseparated(object_id.as_str());
        separated.push_unseparated(")");
    }
    builder.push(") ");
}

#[async_trait]
impl CounterStore for SqliteStore {
    async fn init(&self) -> Result<()> {
        // Exact visit counts, current key scheme
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS object_counters (
                object_id TEXT PRIMARY KEY,
                visits INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // Sparse HyperLogLog registers, one row per touched bucket
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unique_registers (
                object_id TEXT NOT NULL,
                bucket INTEGER NOT NULL,
                run_length INTEGER NOT NULL,
                PRIMARY KEY (object_id, bucket)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        // Frozen counters from the earlier key scheme
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS legacy_counters (
                object_id TEXT PRIMARY KEY,
                visits INTEGER NOT NULL DEFAULT 0,
                uniques INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }

    async fn record(&self, event: &Event) -> StorageResult<()> {
        let obs = hll::observe(&event.visitor_id);
        let mut tx = self.pool.begin().await?;

        // Same table order as the reads: counters, then registers.
        sqlx::query(
            r#"
            INSERT INTO object_counters (object_id, visits)
            VALUES (?, 1)
            ON CONFLICT(object_id) DO UPDATE SET visits = visits + 1
            "#,
        )
        .bind(&event.object_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO unique_registers (object_id, bucket, run_length)
            VALUES (?, ?, ?)
            ON CONFLICT(object_id, bucket) DO UPDATE SET
                run_length = MAX(run_length, excluded.run_length)
            "#,
        )
        .bind(&event.object_id)
        .bind(obs.register as i64)
        .bind(obs.rank as i64)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn snapshot(&self, object_id: &str) -> StorageResult<ObjectSnapshot> {
        let mut tx = self.pool.begin().await?;

        let visits = sqlx::query_scalar::<_, i64>(
            "SELECT visits FROM object_counters WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);

        let legacy = sqlx::query_as::<_, (i64, i64)>(
            "SELECT visits, uniques FROM legacy_counters WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|(visits, uniques)| LegacyCounts { visits, uniques })
        .unwrap_or_default();

        let ranks = sqlx::query_scalar::<_, i64>(
            "SELECT run_length FROM unique_registers WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_all(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(ObjectSnapshot {
            visits,
            uniques: hll::estimate(ranks.into_iter().map(|r| r as u8)) as i64,
            legacy,
        })
    }

    async fn snapshot_many(&self, object_ids: &[String]) -> StorageResult<ObjectSnapshot> {
        if object_ids.is_empty() {
            return Ok(ObjectSnapshot::default());
        }

        let mut tx = self.pool.begin().await?;

        let mut totals = QueryBuilder::<Sqlite>::new("");
        push_requested(&mut totals, object_ids);
        totals.push(
            r#"
            SELECT
                CAST(COALESCE(SUM(c.visits), 0) AS INTEGER),
                CAST(COALESCE(SUM(l.visits), 0) AS INTEGER),
                CAST(COALESCE(SUM(l.uniques), 0) AS INTEGER)
            FROM requested r
            LEFT JOIN object_counters c ON c.object_id = r.object_id
            LEFT JOIN legacy_counters l ON l.object_id = r.object_id
            "#,
        );
        let (visits, legacy_visits, legacy_uniques) = totals
            .build_query_as::<(i64, i64, i64)>()
            .fetch_one(&mut *tx)
            .await?;

        // Register-wise max across all requested objects is the HLL union.
        let mut union = QueryBuilder::<Sqlite>::new("");
        push_requested(&mut union, object_ids);
        union.push(
            r#"
            SELECT MAX(u.run_length)
            FROM unique_registers u
            WHERE u.object_id IN (SELECT object_id FROM requested)
            GROUP BY u.bucket
            "#,
        );
        let ranks = union
            .build_query_scalar::<i64>()
            .fetch_all(&mut *tx)
            .await?;

        tx.commit().await?;

        Ok(ObjectSnapshot {
            visits,
            uniques: hll::estimate(ranks.into_iter().map(|r| r as u8)) as i64,
            legacy: LegacyCounts {
                visits: legacy_visits,
                uniques: legacy_uniques,
            },
        })
    }

    async fn backfill(&self, object_id: &str, counts: LegacyCounts) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO legacy_counters (object_id, visits, uniques)
            VALUES (?, ?, ?)
            ON CONFLICT(object_id) DO UPDATE SET
                visits = excluded.visits,
                uniques = excluded.uniques
            "#,
        )
        .bind(object_id)
        .bind(counts.visits)
        .bind(counts.uniques)
        .execute(self.pool.as_ref())
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn setup_sqlite() -> SqliteStore {
        let store = SqliteStore::new("sqlite::memory:", 5).await.unwrap();
        store.init().await.unwrap();
        store
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let store = setup_sqlite().await;
        store.init().await.unwrap();
    }

    #[tokio::test]
    async fn test_record_updates_both_counters() {
        let store = setup_sqlite().await;

        store.record(&Event::new("page", "alice")).await.unwrap();
        store.record(&Event::new("page", "alice")).await.unwrap();
        store.record(&Event::new("page", "bob")).await.unwrap();

        let snap = store.snapshot("page").await.unwrap();
        assert_eq!(snap.visits, 3);
        assert_eq!(snap.uniques, 2);
        assert_eq!(snap.legacy, LegacyCounts::default());
    }

    #[tokio::test]
    async fn test_backfill_overwrites_legacy_only() {
        let store = setup_sqlite().await;

        store.record(&Event::new("page", "alice")).await.unwrap();
        store
            .backfill("page", LegacyCounts { visits: 5, uniques: 2 })
            .await
            .unwrap();
        store
            .backfill("page", LegacyCounts { visits: 7, uniques: 3 })
            .await
            .unwrap();

        let snap = store.snapshot("page").await.unwrap();
        assert_eq!(snap.visits, 1);
        assert_eq!(snap.legacy, LegacyCounts { visits: 7, uniques: 3 });
    }

    #[tokio::test]
    async fn test_snapshot_many_weights_duplicates() {
        let store = setup_sqlite().await;

        for _ in 0..3 {
            store.record(&Event::new("foo", "alice")).await.unwrap();
        }
        store
            .backfill("foo", LegacyCounts { visits: 1, uniques: 1 })
            .await
            .unwrap();

        let ids = vec!["foo".to_string(), "foo".to_string(), "missing".to_string()];
        let snap = store.snapshot_many(&ids).await.unwrap();
        assert_eq!(snap.visits, 6);
        assert_eq!(snap.legacy.visits, 2);
        assert_eq!(snap.uniques, 1);
    }
}
