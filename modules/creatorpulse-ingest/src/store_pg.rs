//! Postgres-backed stores. Runtime-checked queries against the
//! `webhook_events`, `creators`, and `creator_sync_states` tables (see the
//! server's migrations directory).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use creatorpulse_common::{PlatformIdentifiers, UnifiedCreator};
use creatorpulse_pipeline::CreatorLookup;
use sqlx::PgPool;

use crate::creators::{CreatorStore, UpsertOutcome};
use crate::event::{WebhookEvent, WebhookEventStatus, WebhookEventStore};

type EventRow = (
    String,                       // id
    String,                       // provider
    String,                       // event_type
    serde_json::Value,            // payload
    Option<String>,               // signature
    String,                       // status
    i32,                          // attempts
    i32,                          // max_attempts
    Option<DateTime<Utc>>,        // next_retry_at
    DateTime<Utc>,                // created_at
    Option<DateTime<Utc>>,        // processed_at
    Option<String>,               // error
);

fn event_from_row(row: EventRow) -> anyhow::Result<WebhookEvent> {
    let status: WebhookEventStatus = row
        .5
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;
    Ok(WebhookEvent {
        id: row.0,
        provider: row.1,
        event_type: row.2,
        payload: row.3,
        signature: row.4,
        status,
        attempts: row.6 as u32,
        max_attempts: row.7 as u32,
        next_retry_at: row.8,
        created_at: row.9,
        processed_at: row.10,
        error: row.11,
    })
}

const EVENT_COLUMNS: &str = "id, provider, event_type, payload, signature, status, attempts, \
     max_attempts, next_retry_at, created_at, processed_at, error";

#[derive(Clone)]
pub struct PgWebhookEventStore {
    pool: PgPool,
}

impl PgWebhookEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookEventStore for PgWebhookEventStore {
    async fn insert(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events
                (id, provider, event_type, payload, signature, status, attempts,
                 max_attempts, next_retry_at, created_at, processed_at, error)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&event.id)
        .bind(&event.provider)
        .bind(&event.event_type)
        .bind(&event.payload)
        .bind(&event.signature)
        .bind(event.status.as_str())
        .bind(event.attempts as i32)
        .bind(event.max_attempts as i32)
        .bind(event.next_retry_at)
        .bind(event.created_at)
        .bind(event.processed_at)
        .bind(&event.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<WebhookEvent>> {
        let row = sqlx::query_as::<_, EventRow>(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(event_from_row).transpose()
    }

    async fn update(&self, event: &WebhookEvent) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2, attempts = $3, next_retry_at = $4,
                processed_at = $5, error = $6
            WHERE id = $1
            "#,
        )
        .bind(&event.id)
        .bind(event.status.as_str())
        .bind(event.attempts as i32)
        .bind(event.next_retry_at)
        .bind(event.processed_at)
        .bind(&event.error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn due_pending(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<WebhookEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM webhook_events
            WHERE status = 'pending' AND next_retry_at IS NOT NULL AND next_retry_at <= $1
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }

    async fn dead_letter_count(&self) -> anyhow::Result<u64> {
        let row = sqlx::query_as::<_, (i64,)>(
            "SELECT COUNT(*) FROM webhook_events WHERE status = 'dead_letter'",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0 as u64)
    }

    async fn dead_letters(&self, limit: usize) -> anyhow::Result<Vec<WebhookEvent>> {
        let rows = sqlx::query_as::<_, EventRow>(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM webhook_events
            WHERE status = 'dead_letter'
            ORDER BY created_at ASC
            LIMIT $1
            "#
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(event_from_row).collect()
    }
}

#[derive(Clone)]
pub struct PgCreatorStore {
    pool: PgPool,
}

impl PgCreatorStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_record(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<(i64, serde_json::Value)>> {
        let row = sqlx::query_as::<_, (i64, serde_json::Value)>(
            r#"
            SELECT id, record FROM creators
            WHERE (instagram_username = $1 AND $1 IS NOT NULL)
               OR (tiktok_username = $2 AND $2 IS NOT NULL)
               OR (youtube_channel_id = $3 AND $3 IS NOT NULL)
               OR (twitter_handle = $4 AND $4 IS NOT NULL)
               OR (linkedin_slug = $5 AND $5 IS NOT NULL)
            LIMIT 1
            "#,
        )
        .bind(&ids.instagram_username)
        .bind(&ids.tiktok_username)
        .bind(&ids.youtube_channel_id)
        .bind(&ids.twitter_handle)
        .bind(&ids.linkedin_slug)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

#[async_trait]
impl CreatorStore for PgCreatorStore {
    async fn upsert(&self, creator: &UnifiedCreator) -> anyhow::Result<UpsertOutcome> {
        let record = serde_json::to_value(creator)?;
        let ids = &creator.platform_identifiers;

        if let Some((id, _)) = self.find_record(ids).await? {
            sqlx::query(
                r#"
                UPDATE creators
                SET name = $2, record = $3,
                    instagram_username = COALESCE($4, instagram_username),
                    tiktok_username = COALESCE($5, tiktok_username),
                    youtube_channel_id = COALESCE($6, youtube_channel_id),
                    twitter_handle = COALESCE($7, twitter_handle),
                    linkedin_slug = COALESCE($8, linkedin_slug),
                    updated_at = NOW()
                WHERE id = $1
                "#,
            )
            .bind(id)
            .bind(&creator.name)
            .bind(&record)
            .bind(&ids.instagram_username)
            .bind(&ids.tiktok_username)
            .bind(&ids.youtube_channel_id)
            .bind(&ids.twitter_handle)
            .bind(&ids.linkedin_slug)
            .execute(&self.pool)
            .await?;
            Ok(UpsertOutcome::Updated)
        } else {
            sqlx::query(
                r#"
                INSERT INTO creators
                    (name, record, instagram_username, tiktok_username,
                     youtube_channel_id, twitter_handle, linkedin_slug, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, NOW())
                "#,
            )
            .bind(&creator.name)
            .bind(&record)
            .bind(&ids.instagram_username)
            .bind(&ids.tiktok_username)
            .bind(&ids.youtube_channel_id)
            .bind(&ids.twitter_handle)
            .bind(&ids.linkedin_slug)
            .execute(&self.pool)
            .await?;
            Ok(UpsertOutcome::Created)
        }
    }

    async fn find_by_identifiers(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<UnifiedCreator>> {
        match self.find_record(ids).await? {
            Some((_, record)) => Ok(Some(serde_json::from_value(record)?)),
            None => Ok(None),
        }
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>> {
        let row = sqlx::query_as::<_, (serde_json::Value,)>(
            "SELECT record FROM creators WHERE LOWER(name) = LOWER($1) LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|(record,)| Ok(serde_json::from_value(record)?))
            .transpose()
    }

    async fn set_sync_state(&self, run_id: &str, state: &str) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO creator_sync_states (run_id, state, updated_at)
            VALUES ($1, $2, NOW())
            ON CONFLICT (run_id) DO UPDATE SET state = $2, updated_at = NOW()
            "#,
        )
        .bind(run_id)
        .bind(state)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CreatorLookup for PgCreatorStore {
    async fn find_by_identifiers(
        &self,
        ids: &PlatformIdentifiers,
    ) -> anyhow::Result<Option<UnifiedCreator>> {
        CreatorStore::find_by_identifiers(self, ids).await
    }

    async fn find_by_name(&self, name: &str) -> anyhow::Result<Option<UnifiedCreator>> {
        CreatorStore::find_by_name(self, name).await
    }
}
