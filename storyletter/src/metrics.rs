use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::error::Result;

/// Whitelisted delivery-provider event kinds. Events outside this set are
/// acknowledged and discarded so new provider event types never break the
/// receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Sent,
    Delivered,
    Opened,
    Failed,
    Bounced,
    Clicked,
    Received,
}

impl EventKind {
    /// Map a namespaced provider event type to a kind.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "email.sent" => Some(EventKind::Sent),
            "email.delivered" => Some(EventKind::Delivered),
            "email.opened" => Some(EventKind::Opened),
            "email.failed" => Some(EventKind::Failed),
            "email.bounced" => Some(EventKind::Bounced),
            "email.clicked" => Some(EventKind::Clicked),
            "email.received" => Some(EventKind::Received),
            _ => None,
        }
    }

    /// Target counter column for this kind. The fixed mapping keeps the SQL
    /// below safe to assemble by name.
    pub fn column(&self) -> &'static str {
        match self {
            EventKind::Sent => "sent_count",
            EventKind::Delivered => "delivered_count",
            EventKind::Opened => "opened_count",
            EventKind::Failed => "failed_count",
            EventKind::Bounced => "bounced_count",
            EventKind::Clicked => "clicked_count",
            EventKind::Received => "received_count",
        }
    }
}

/// Inbound webhook payload. The provider sends tags as an object like
/// `{ "type": "story" }`, not as an array.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventData {
    #[serde(default)]
    pub tags: Option<EventTags>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventTags {
    #[serde(rename = "type")]
    pub email_type: Option<String>,
}

/// One per-day-per-category aggregation bucket.
#[derive(Debug, Clone, Serialize)]
pub struct EmailMetric {
    pub date: NaiveDate,
    pub email_type: String,
    pub sent_count: i64,
    pub delivered_count: i64,
    pub opened_count: i64,
    pub clicked_count: i64,
    pub bounced_count: i64,
    pub failed_count: i64,
    pub received_count: i64,
    pub unsubscribe_count: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded {
        email_type: String,
        column: &'static str,
    },
    /// Recognized-but-ignored event type; acknowledged as success.
    Ignored,
}

/// Classify one provider event and increment its counter bucket.
///
/// The bucket is keyed by the *processing* date, not any date embedded in the
/// event, so provider delivery delay lands under the day the webhook arrived.
/// The increment is a single atomic insert-or-add, so concurrent deliveries
/// for the same (date, email_type) cannot lose an update.
pub async fn record_event(
    pool: &SqlitePool,
    event: &WebhookEvent,
    today: NaiveDate,
) -> Result<RecordOutcome> {
    let kind = match EventKind::from_event_type(&event.event_type) {
        Some(k) => k,
        None => {
            debug!("Event type '{}' ignored (not in valid events)", event.event_type);
            return Ok(RecordOutcome::Ignored);
        }
    };

    let email_type = event
        .data
        .tags
        .as_ref()
        .and_then(|t| t.email_type.clone())
        .unwrap_or_else(|| "unknown".to_string());

    let column = kind.column();
    // `column` comes from the fixed whitelist above, never from the payload.
    let sql = format!(
        "INSERT INTO email_metrics (date, email_type, {col}) VALUES (?, ?, 1) \
         ON CONFLICT(date, email_type) DO UPDATE SET {col} = {col} + 1",
        col = column
    );

    sqlx::query(&sql)
        .bind(today)
        .bind(&email_type)
        .execute(pool)
        .await?;

    info!(
        "Incremented {} for date {}, email_type {}",
        column, today, email_type
    );

    Ok(RecordOutcome::Recorded { email_type, column })
}

/// Fetch one metrics bucket, if it exists.
pub async fn metric_for(
    pool: &SqlitePool,
    date: NaiveDate,
    email_type: &str,
) -> Result<Option<EmailMetric>> {
    let row = sqlx::query("SELECT * FROM email_metrics WHERE date = ? AND email_type = ?")
        .bind(date)
        .bind(email_type)
        .fetch_optional(pool)
        .await?;

    Ok(row.map(|r| EmailMetric {
        date: r.get("date"),
        email_type: r.get("email_type"),
        sent_count: r.get("sent_count"),
        delivered_count: r.get("delivered_count"),
        opened_count: r.get("opened_count"),
        clicked_count: r.get("clicked_count"),
        bounced_count: r.get("bounced_count"),
        failed_count: r.get("failed_count"),
        received_count: r.get("received_count"),
        unsubscribe_count: r.get("unsubscribe_count"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitelist_maps_to_columns() {
        assert_eq!(
            EventKind::from_event_type("email.sent").unwrap().column(),
            "sent_count"
        );
        assert_eq!(
            EventKind::from_event_type("email.bounced").unwrap().column(),
            "bounced_count"
        );
        assert!(EventKind::from_event_type("email.complained").is_none());
        assert!(EventKind::from_event_type("sent").is_none());
    }

    #[test]
    fn webhook_event_parses_object_tags() {
        let payload = r#"{"type": "email.opened", "data": {"tags": {"type": "story"}}}"#;
        let event: WebhookEvent = serde_json::from_str(payload).unwrap();
        assert_eq!(event.event_type, "email.opened");
        assert_eq!(event.data.tags.unwrap().email_type.as_deref(), Some("story"));
    }

    #[test]
    fn webhook_event_tolerates_missing_tags() {
        let payload = r#"{"type": "email.sent", "data": {}}"#;
        let event: WebhookEvent = serde_json::from_str(payload).unwrap();
        assert!(event.data.tags.is_none());
    }
}
