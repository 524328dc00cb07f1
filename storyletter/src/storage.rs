use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::{Error, Result};

/// Lifecycle states a story passes through.
///
/// The externally visible progression is DRAFT -> APPROVED -> SENT and is
/// monotonic. SENDING is a short-lived broadcast lease held by at most one
/// distribution run. REJECTED is reserved but currently unused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StoryStatus {
    Draft,
    Approved,
    Sending,
    Sent,
    Rejected,
}

impl StoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoryStatus::Draft => "DRAFT",
            StoryStatus::Approved => "APPROVED",
            StoryStatus::Sending => "SENDING",
            StoryStatus::Sent => "SENT",
            StoryStatus::Rejected => "REJECTED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "DRAFT" => Some(StoryStatus::Draft),
            "APPROVED" => Some(StoryStatus::Approved),
            "SENDING" => Some(StoryStatus::Sending),
            "SENT" => Some(StoryStatus::Sent),
            "REJECTED" => Some(StoryStatus::Rejected),
            _ => None,
        }
    }
}

/// One candidate or published daily story.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Story {
    pub id: i64,
    pub date: NaiveDate,
    pub status: StoryStatus,
    pub title: String,
    pub summary_bullets: Vec<String>,
    pub content: String,
    pub tags: Vec<String>,
    pub slug: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One newsletter recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscriber {
    pub id: i64,
    pub email: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Fields the Approval Gate may rewrite on a story.
/// Full-record, last-writer-wins update keyed by id.
#[derive(Debug, Clone, Deserialize)]
pub struct StoryUpdate {
    pub title: String,
    pub summary_bullets: Vec<String>,
    pub content: String,
    pub status: StoryStatus,
}

fn story_from_row(row: &SqliteRow) -> Result<Story> {
    let status_raw: String = row.get("status");
    let status = StoryStatus::parse(&status_raw)
        .ok_or_else(|| Error::Validation(format!("unknown story status in DB: {}", status_raw)))?;

    let bullets_json: String = row.get("summary_bullets");
    let summary_bullets: Vec<String> = serde_json::from_str(&bullets_json)
        .map_err(|e| Error::Validation(format!("malformed summary_bullets JSON: {}", e)))?;

    let tags_json: String = row.get("tags");
    let tags: Vec<String> = serde_json::from_str(&tags_json)
        .map_err(|e| Error::Validation(format!("malformed tags JSON: {}", e)))?;

    Ok(Story {
        id: row.get("id"),
        date: row.get("date"),
        status,
        title: row.get("title"),
        summary_bullets,
        content: row.get("content"),
        tags,
        slug: row.get("slug"),
        created_at: row.get("created_at"),
    })
}

/// Insert a new DRAFT story for the given date.
///
/// Uniqueness per date is check-then-insert (the generator looks up the date
/// first); the repository itself does not hard-enforce it.
pub async fn insert_story(
    pool: &SqlitePool,
    date: NaiveDate,
    title: &str,
    summary_bullets: &[String],
    content: &str,
    tags: &[String],
    slug: &str,
) -> Result<Story> {
    let bullets_json = serde_json::to_string(summary_bullets)
        .map_err(|e| Error::Validation(format!("failed to serialize bullets: {}", e)))?;
    let tags_json = serde_json::to_string(tags)
        .map_err(|e| Error::Validation(format!("failed to serialize tags: {}", e)))?;

    let id = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO stories (date, status, title, summary_bullets, content, tags, slug, created_at)
        VALUES (?, 'DRAFT', ?, ?, ?, ?, ?, ?)
        RETURNING id
        "#,
    )
    .bind(date)
    .bind(title)
    .bind(&bullets_json)
    .bind(content)
    .bind(&tags_json)
    .bind(slug)
    .bind(Utc::now())
    .fetch_one(pool)
    .await?;

    info!("Inserted DRAFT story {} for {}", id, date);

    find_story_by_id(pool, id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("story {} vanished after insert", id)))
}

pub async fn find_story_by_date(pool: &SqlitePool, date: NaiveDate) -> Result<Option<Story>> {
    let row = sqlx::query("SELECT * FROM stories WHERE date = ?")
        .bind(date)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(story_from_row).transpose()
}

pub async fn find_story_by_id(pool: &SqlitePool, id: i64) -> Result<Option<Story>> {
    let row = sqlx::query("SELECT * FROM stories WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(story_from_row).transpose()
}

/// Most recent DRAFT story, used by the resend-approval path.
pub async fn latest_draft(pool: &SqlitePool) -> Result<Option<Story>> {
    let row = sqlx::query("SELECT * FROM stories WHERE status = 'DRAFT' ORDER BY date DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;
    row.as_ref().map(story_from_row).transpose()
}

/// Approval Gate write path: rewrite the core fields of a story.
///
/// Last-writer-wins; there is no optimistic concurrency token. Concurrent
/// operator edits clobber each other, which is an accepted simplification.
pub async fn update_story(
    pool: &SqlitePool,
    id: i64,
    update: &StoryUpdate,
) -> Result<Option<Story>> {
    let bullets_json = serde_json::to_string(&update.summary_bullets)
        .map_err(|e| Error::Validation(format!("failed to serialize bullets: {}", e)))?;

    let res = sqlx::query(
        "UPDATE stories SET title = ?, summary_bullets = ?, content = ?, status = ? WHERE id = ?",
    )
    .bind(&update.title)
    .bind(&bullets_json)
    .bind(&update.content)
    .bind(update.status.as_str())
    .bind(id)
    .execute(pool)
    .await?;

    if res.rows_affected() == 0 {
        return Ok(None);
    }

    find_story_by_id(pool, id).await
}

pub async fn set_story_status(pool: &SqlitePool, id: i64, status: StoryStatus) -> Result<()> {
    sqlx::query("UPDATE stories SET status = ? WHERE id = ?")
        .bind(status.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Acquire the broadcast lease: a status-guarded conditional update from
/// `from` to SENDING. Returns false if another run already holds the lease
/// (or the status moved underneath us), in which case the caller exits early.
pub async fn try_begin_sending(pool: &SqlitePool, id: i64, from: StoryStatus) -> Result<bool> {
    let res = sqlx::query("UPDATE stories SET status = 'SENDING' WHERE id = ? AND status = ?")
        .bind(id)
        .bind(from.as_str())
        .execute(pool)
        .await?;
    Ok(res.rows_affected() == 1)
}

/// Upsert-by-email subscribe: reactivates an existing row, never duplicates.
/// Returns true if a new subscriber row was created.
pub async fn upsert_subscriber(pool: &SqlitePool, email: &str) -> Result<bool> {
    let existing = sqlx::query_scalar::<_, i64>("SELECT id FROM subscribers WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;

    if let Some(id) = existing {
        sqlx::query("UPDATE subscribers SET is_active = 1 WHERE id = ?")
            .bind(id)
            .execute(pool)
            .await?;
        debug!("Reactivated subscriber {}", email);
        return Ok(false);
    }

    sqlx::query("INSERT INTO subscribers (email, is_active, created_at) VALUES (?, 1, ?)")
        .bind(email)
        .bind(Utc::now())
        .execute(pool)
        .await?;
    info!("New subscriber {}", email);
    Ok(true)
}

/// Idempotently deactivate a subscriber. Unknown addresses are a no-op.
pub async fn deactivate_subscriber(pool: &SqlitePool, email: &str) -> Result<()> {
    sqlx::query("UPDATE subscribers SET is_active = 0 WHERE email = ?")
        .bind(email)
        .execute(pool)
        .await?;
    Ok(())
}

/// Emails of all active subscribers, in stable enumeration order.
pub async fn active_subscribers(pool: &SqlitePool) -> Result<Vec<String>> {
    let rows = sqlx::query("SELECT email FROM subscribers WHERE is_active = 1 ORDER BY id")
        .fetch_all(pool)
        .await?;
    Ok(rows.iter().map(|r| r.get::<String, _>("email")).collect())
}

pub async fn find_subscriber(pool: &SqlitePool, email: &str) -> Result<Option<Subscriber>> {
    let row = sqlx::query("SELECT * FROM subscribers WHERE email = ?")
        .bind(email)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| Subscriber {
        id: r.get("id"),
        email: r.get("email"),
        is_active: r.get("is_active"),
        created_at: r.get("created_at"),
    }))
}

/// Fill NULL slugs from titles. Returns the number of stories updated.
pub async fn backfill_slugs(pool: &SqlitePool) -> Result<usize> {
    let rows = sqlx::query("SELECT id, title FROM stories WHERE slug IS NULL")
        .fetch_all(pool)
        .await?;

    let mut updated = 0usize;
    for row in rows {
        let id: i64 = row.get("id");
        let title: String = row.get("title");
        if title.is_empty() {
            continue;
        }
        let slug = crate::generator::slugify(&title);
        sqlx::query("UPDATE stories SET slug = ? WHERE id = ?")
            .bind(&slug)
            .bind(id)
            .execute(pool)
            .await?;
        info!("Backfilled slug for story {}: {}", id, slug);
        updated += 1;
    }

    Ok(updated)
}
