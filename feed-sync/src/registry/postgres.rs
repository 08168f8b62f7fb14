use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use interfaces::{FeedItem, NewSource, Source, SourceId, SourceKind, SourceRegistry};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

pub struct PgSourceRegistry {
    db: PgPool,
}

impl PgSourceRegistry {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let db = PgPool::connect(database_url).await?;
        Ok(Self { db })
    }

    pub fn from_pool(db: PgPool) -> Self {
        Self { db }
    }

    pub async fn setup_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                id UUID PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                group_name TEXT,
                name TEXT,
                description TEXT,
                icon TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS feed_items (
                id UUID PRIMARY KEY,
                source_id UUID NOT NULL REFERENCES sources (id) ON DELETE CASCADE,
                external_id TEXT,
                title TEXT NOT NULL,
                url TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                synced_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_feed_items_source_url
            ON feed_items (source_id, url)
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_feed_items_source_created
            ON feed_items (source_id, created_at DESC)
            "#,
        )
        .execute(&self.db)
        .await?;

        info!("Database schema is ready");
        Ok(())
    }
}

fn source_from_row(row: &PgRow) -> Result<Source> {
    let kind: String = row.try_get("kind")?;
    Ok(Source {
        id: row.try_get("id")?,
        url: row.try_get("url")?,
        kind: SourceKind::parse(&kind).ok_or_else(|| anyhow!("unknown source kind {:?}", kind))?,
        group: row.try_get("group_name")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        icon: row.try_get("icon")?,
    })
}

#[async_trait]
impl SourceRegistry for PgSourceRegistry {
    async fn list_sources(&self) -> Result<Vec<Source>> {
        let rows = sqlx::query(
            r#"
            SELECT id, url, kind, group_name, name, description, icon
            FROM sources
            ORDER BY created_at
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        rows.iter().map(source_from_row).collect()
    }

    async fn find_source_by_url(&self, url: &str) -> Result<Option<Source>> {
        let row = sqlx::query(
            "SELECT id, url, kind, group_name, name, description, icon FROM sources WHERE url = $1",
        )
        .bind(url)
        .fetch_optional(&self.db)
        .await?;

        row.as_ref().map(source_from_row).transpose()
    }

    async fn create_source(&self, source: NewSource) -> Result<Source> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO sources (id, url, kind, group_name, name, description, icon)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(&source.url)
        .bind(source.kind.as_str())
        .bind(&source.group)
        .bind(&source.name)
        .bind(&source.description)
        .bind(&source.icon)
        .execute(&self.db)
        .await?;

        info!("Added new source: {} with ID: {}", source.url, id);
        Ok(Source {
            id,
            url: source.url,
            kind: source.kind,
            group: source.group,
            name: source.name,
            description: source.description,
            icon: source.icon,
        })
    }

    async fn recent_items(&self, source_id: SourceId, limit: usize) -> Result<Vec<FeedItem>> {
        let rows = sqlx::query(
            r#"
            SELECT external_id, title, url, created_at
            FROM feed_items
            WHERE source_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(source_id)
        .bind(limit as i64)
        .fetch_all(&self.db)
        .await?;

        let mut items = Vec::with_capacity(rows.len());
        for row in rows {
            items.push(FeedItem {
                external_id: row.try_get("external_id")?,
                title: row.try_get("title")?,
                link: row.try_get("url")?,
                created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
            });
        }
        Ok(items)
    }

    /// One transaction per batch. A link stored by an overlapping pass in
    /// the meantime is skipped rather than failing the batch.
    async fn insert_items(&self, source_id: SourceId, items: &[FeedItem]) -> Result<usize> {
        let mut tx = self.db.begin().await?;
        let mut inserted = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT INTO feed_items (id, source_id, external_id, title, url, created_at)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (source_id, url) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(source_id)
            .bind(&item.external_id)
            .bind(&item.title)
            .bind(&item.link)
            .bind(item.created_at)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected() as usize;
        }

        tx.commit().await?;
        debug!("Stored {} of {} items for source {}", inserted, items.len(), source_id);
        Ok(inserted)
    }
}
