use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::{error, info, warn};

use crate::email::{templates, unsubscribe_url, EmailKind, Mailer, OutboundEmail};
use crate::error::{Error, Result};
use crate::storage::{self, Story, StoryStatus};

/// Result summary of one broadcast run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DistributionReport {
    pub total: usize,
    pub sent: usize,
    pub failed: usize,
}

/// Outcome of one distribution invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DistributeOutcome {
    Completed(DistributionReport),
    /// The story was distributable but the active subscriber list was empty.
    NoRecipients,
    /// Another run holds the SENDING lease; this invocation exited early.
    AlreadyRunning,
}

#[derive(Debug, Clone)]
pub struct DistributeOptions {
    /// Explicit date override; defaults to the current UTC date.
    pub date: Option<NaiveDate>,
    /// Re-broadcast of an already-SENT story is an explicit, separately
    /// authorized action, never the default path.
    pub allow_resend: bool,
    /// Delay between consecutive sends, to stay under the transport's rate limit.
    pub delay_ms: u64,
    /// Whether precondition failures alert the operator (the scheduled path
    /// does; interactive admin calls see the error directly).
    pub notify_operator: bool,
}

impl DistributeOptions {
    pub fn scheduled(config: &common::Config) -> Self {
        Self {
            date: None,
            allow_resend: false,
            delay_ms: config.send_delay_ms(),
            notify_operator: true,
        }
    }

    pub fn admin(config: &common::Config, date: Option<NaiveDate>, allow_resend: bool) -> Self {
        Self {
            date,
            allow_resend,
            delay_ms: config.send_delay_ms(),
            notify_operator: false,
        }
    }
}

/// Deliver the story for the target date to all active subscribers.
///
/// The recipient loop is strictly sequential with a fixed inter-message delay:
/// the transport enforces a request-rate ceiling, so completing the batch is
/// prioritized over latency. Individual send failures are counted and the loop
/// continues; the story transitions to SENT once the loop finishes regardless
/// of per-recipient failures.
pub async fn distribute(
    pool: &SqlitePool,
    mailer: &dyn Mailer,
    config: &common::Config,
    opts: &DistributeOptions,
) -> Result<DistributeOutcome> {
    let date = opts.date.unwrap_or_else(|| Utc::now().date_naive());

    let story = match storage::find_story_by_date(pool, date).await? {
        Some(s) => s,
        None => {
            warn!("No story found for {}", date);
            if opts.notify_operator {
                alert_operator(
                    mailer,
                    config,
                    "⚠️ No Story for Today",
                    &format!("<p>No story was found for {}. Please check the system.</p>", date),
                )
                .await;
            }
            return Err(Error::NotFound(format!("no story found for {}", date)));
        }
    };

    // Preconditions: APPROVED is the normal path; SENT only with an explicit
    // resend authorization. Anything else blocks the broadcast.
    let lease_from = match story.status {
        StoryStatus::Approved => StoryStatus::Approved,
        StoryStatus::Sent if opts.allow_resend => StoryStatus::Sent,
        StoryStatus::Sent => {
            return Err(Error::Precondition(format!(
                "story for {} is already SENT; re-broadcast requires an explicit resend",
                date
            )));
        }
        StoryStatus::Sending => {
            info!("Story {} is already being distributed", story.id);
            return Ok(DistributeOutcome::AlreadyRunning);
        }
        other => {
            warn!("Story for {} is in {} status, not distributing", date, other.as_str());
            if opts.notify_operator {
                alert_operator(
                    mailer,
                    config,
                    "⚠️ Story Not Approved",
                    &format!(
                        "<p>The story for {} is still in {} status. It has not been sent to subscribers.</p>",
                        date,
                        other.as_str()
                    ),
                )
                .await;
            }
            return Err(Error::Precondition(format!(
                "story status is {}. Must be APPROVED.",
                other.as_str()
            )));
        }
    };

    // Broadcast lease: at most one active run per story. A concurrent trigger
    // observes the lease miss and exits early.
    if !storage::try_begin_sending(pool, story.id, lease_from).await? {
        info!("Story {} lease already held, skipping", story.id);
        return Ok(DistributeOutcome::AlreadyRunning);
    }

    let subscribers = match storage::active_subscribers(pool).await {
        Ok(s) => s,
        Err(e) => {
            // Release the lease so a later invocation can retry.
            storage::set_story_status(pool, story.id, lease_from).await?;
            return Err(e);
        }
    };

    if subscribers.is_empty() {
        info!("No active subscribers, nothing to distribute");
        storage::set_story_status(pool, story.id, lease_from).await?;
        return Ok(DistributeOutcome::NoRecipients);
    }

    info!(
        "Broadcasting '{}' to {} subscribers...",
        story.title,
        subscribers.len()
    );

    let report = send_to_all(mailer, config, &story, &subscribers, opts.delay_ms).await;

    // Best-effort broadcast: the terminal transition happens unconditionally
    // after the loop, even when individual sends failed.
    storage::set_story_status(pool, story.id, StoryStatus::Sent).await?;

    info!(
        "Broadcast completed for story {}: total={} sent={} failed={}",
        story.id, report.total, report.sent, report.failed
    );

    Ok(DistributeOutcome::Completed(report))
}

/// The sequential, delay-spaced send loop. One bad address must not block the
/// remaining list, so failures are logged and counted, never propagated.
async fn send_to_all(
    mailer: &dyn Mailer,
    config: &common::Config,
    story: &Story,
    subscribers: &[String],
    delay_ms: u64,
) -> DistributionReport {
    let mut sent = 0usize;
    let mut failed = 0usize;

    for (i, email) in subscribers.iter().enumerate() {
        let unsubscribe = unsubscribe_url(&config.admin.app_url, email);
        let message = OutboundEmail {
            to: email.clone(),
            subject: format!("🌙 Today's Bedtime Story: {}", story.title),
            html: templates::story_html(story, &unsubscribe),
            kind: EmailKind::Story,
        };

        match mailer.send(&message).await {
            Ok(()) => sent += 1,
            Err(e) => {
                error!("Failed to send to {}: {}", email, e);
                failed += 1;
            }
        }

        if delay_ms > 0 && i + 1 < subscribers.len() {
            common::sleep_millis(delay_ms).await;
        }
    }

    DistributionReport {
        total: subscribers.len(),
        sent,
        failed,
    }
}

/// Out-of-band operator alert. Failure to alert is logged but never masks the
/// primary error.
async fn alert_operator(mailer: &dyn Mailer, config: &common::Config, subject: &str, html: &str) {
    let alert = OutboundEmail {
        to: config.admin.email.clone(),
        subject: subject.to_string(),
        html: html.to_string(),
        kind: EmailKind::Alert,
    };
    if let Err(e) = mailer.send(&alert).await {
        warn!("Failed to send operator alert '{}': {}", subject, e);
    }
}

/// Send today's story to a single address (admin test path).
pub async fn send_story_to(
    pool: &SqlitePool,
    mailer: &dyn Mailer,
    config: &common::Config,
    email: &str,
    date: NaiveDate,
) -> Result<Story> {
    let story = storage::find_story_by_date(pool, date)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no story found for today ({})", date)))?;

    let unsubscribe = unsubscribe_url(&config.admin.app_url, email);
    mailer
        .send(&OutboundEmail {
            to: email.to_string(),
            subject: format!("🌙 Today's Bedtime Story: {} (Test)", story.title),
            html: templates::story_html(&story, &unsubscribe),
            kind: EmailKind::Story,
        })
        .await
        .map_err(Error::transport)?;

    Ok(story)
}
