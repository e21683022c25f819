use crate::hll;
use crate::models::{Event, LegacyCounts, ObjectSnapshot};
use crate::storage::{CounterStore, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, QueryBuilder};
use std::sync::Arc;

pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self {
            pool: Arc::new(pool),
        })
    }
}

fn push_requested<'a>(builder: &mut QueryBuilder<'a, Postgres>, object_ids: &'a [String]) {
    builder.push("WITH requested(object_id) AS (VALUES ");
    let mut separated = builder.separated(", ");
    for object_id in object_ids {
        separated.push("(");
        separated.push_bind_unseparated(object_id.as_str());
        separated.push_unseparated("::TEXT)");
    }
    builder.push(") ");
}

#[async_trait]
impl CounterStore for PostgresStore {
    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS object_counters (
                object_id TEXT PRIMARY KEY,
                visits BIGINT NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS unique_registers (
                object_id TEXT NOT NULL,
                bucket BIGINT NOT NULL,
                run_length BIGINT NOT NULL,
                PRIMARY KEY (object_id, bucket)
            )
            "#,
        )
        .execute(self.pool.as_ref())
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS legacy_counters (
                object_id TEXT PRIMARY KEY,
                visits BIGINT NOT NULL DEFAULT 0,
                uniques BIGINT NOT NULL DEFAULT 0
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
            VALUES ($1, 1)
            ON CONFLICT (object_id) DO UPDATE SET visits = object_counters.visits + 1
            "#,
        )
        .bind(&event.object_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO unique_registers (object_id, bucket, run_length)
            VALUES ($1, $2, $3)
            ON CONFLICT (object_id, bucket) DO UPDATE SET
                run_length = GREATEST(unique_registers.run_length, EXCLUDED.run_length)
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

        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let visits = sqlx::query_scalar::<_, i64>(
            "SELECT visits FROM object_counters WHERE object_id = $1",
        )
        .bind(object_id)
        .fetch_optional(&mut *tx)
        .await?
        .unwrap_or(0);

        let legacy = sqlx::query_as::<_, (i64, i64)>(
            "SELECT visits, uniques FROM legacy_counters WHERE object_id = $1",
        )
        .bind(object_id)
        .fetch_optional(&mut *tx)
        .await?
        .map(|(visits, uniques)| LegacyCounts { visits, uniques })
        .unwrap_or_default();

        let ranks = sqlx::query_scalar::<_, i64>(
            "SELECT run_length FROM unique_registers WHERE object_id = $1",
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

        // Both statements must see the same snapshot.
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await?;

        let mut totals = QueryBuilder::<Postgres>::new("");
        push_requested(&mut totals, object_ids);
        totals.push(
            r#"
            SELECT
                COALESCE(SUM(c.visits), 0)::BIGINT,
                COALESCE(SUM(l.visits), 0)::BIGINT,
                COALESCE(SUM(l.uniques), 0)::BIGINT
            FROM requested r
            LEFT JOIN object_counters c ON c.object_id = r.object_id
            LEFT JOIN legacy_counters l ON l.object_id = r.object_id
            "#,
        );
        let (visits, legacy_visits, legacy_uniques) = totals
            .build_query_as::<(i64, i64, i64)>()
            .fetch_one(&mut *tx)
            .await?;

        let mut union = QueryBuilder::<Postgres>::new("");
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
            VALUES ($1, $2, $3)
            ON CONFLICT (object_id) DO UPDATE SET
                visits = EXCLUDED.visits,
                uniques = EXCLUDED.uniques
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
