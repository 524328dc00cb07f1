mod support;

use chrono::NaiveDate;
use sqlx::SqlitePool;
use storyletter::distribution::{self, DistributeOptions, DistributeOutcome};
use storyletter::email::EmailKind;
use storyletter::error::Error;
use storyletter::storage::{self, Story, StoryStatus};

use support::{setup_test_db, test_config, MockMailer};

async fn seed_story(pool: &SqlitePool, date: NaiveDate, status: StoryStatus) -> Story {
    let story = storage::insert_story(
        pool,
        date,
        "The Cloud Painter",
        &["🎨 one".into(), "☁️ two".into(), "🌈 three".into()],
        "<p>Up in the sky...</p>",
        &["Weather".into(), "Arts".into()],
        "the-cloud-painter",
    )
    .await
    .expect("insert story");
    if status != StoryStatus::Draft {
        storage::set_story_status(pool, story.id, status)
            .await
            .expect("set status");
    }
    story
}

async fn seed_subscribers(pool: &SqlitePool, emails: &[&str]) {
    for e in emails {
        storage::upsert_subscriber(pool, e).await.expect("subscribe");
    }
}

fn opts(date: NaiveDate, allow_resend: bool) -> DistributeOptions {
    DistributeOptions {
        date: Some(date),
        allow_resend,
        delay_ms: 0,
        notify_operator: false,
    }
}

#[tokio::test]
async fn broadcast_continues_past_individual_failures() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let story = seed_story(&pool, date, StoryStatus::Approved).await;
    seed_subscribers(
        &pool,
        &[
            "a@example.com",
            "b@example.com",
            "bad@example.com",
            "c@example.com",
            "d@example.com",
        ],
    )
    .await;

    let mailer = MockMailer::failing_for(&["bad@example.com"]);
    let outcome = distribution::distribute(&pool, &mailer, &config, &opts(date, false))
        .await
        .expect("distribute");

    match outcome {
        DistributeOutcome::Completed(report) => {
            assert_eq!(report.total, 5);
            assert_eq!(report.sent, 4);
            assert_eq!(report.failed, 1);
        }
        other => panic!("expected Completed, got {:?}", other),
    }

    // A failed recipient never blocks the terminal transition.
    let after = storage::find_story_by_id(&pool, story.id)
        .await
        .expect("lookup")
        .expect("story");
    assert_eq!(after.status, StoryStatus::Sent);

    // Each delivered message carries a personalized unsubscribe link.
    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 4);
    for email in sent.iter() {
        assert_eq!(email.kind, EmailKind::Story);
        assert_eq!(email.subject, "🌙 Today's Bedtime Story: The Cloud Painter");
        let encoded: String = url::form_urlencoded::byte_serialize(email.to.as_bytes()).collect();
        assert!(email.html.contains(&encoded), "missing unsubscribe link for {}", email.to);
    }
}

#[tokio::test]
async fn draft_story_blocks_the_broadcast() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let story = seed_story(&pool, date, StoryStatus::Draft).await;
    seed_subscribers(&pool, &["a@example.com"]).await;

    let mailer = MockMailer::new();
    let result = distribution::distribute(&pool, &mailer, &config, &opts(date, false)).await;

    assert!(matches!(result, Err(Error::Precondition(_))));
    assert_eq!(mailer.sent_count(), 0);
    let after = storage::find_story_by_id(&pool, story.id)
        .await
        .expect("lookup")
        .expect("story");
    assert_eq!(after.status, StoryStatus::Draft, "a blocked run must not mutate the story");
}

#[tokio::test]
async fn scheduled_precondition_failure_alerts_the_operator() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    seed_story(&pool, date, StoryStatus::Draft).await;

    let mailer = MockMailer::new();
    let scheduled = DistributeOptions {
        date: Some(date),
        allow_resend: false,
        delay_ms: 0,
        notify_operator: true,
    };
    let result = distribution::distribute(&pool, &mailer, &config, &scheduled).await;

    assert!(matches!(result, Err(Error::Precondition(_))));
    let sent = mailer.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "operator@example.com");
    assert_eq!(sent[0].kind, EmailKind::Alert);
}

#[tokio::test]
async fn sent_story_requires_explicit_resend() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    seed_story(&pool, date, StoryStatus::Sent).await;
    seed_subscribers(&pool, &["a@example.com", "b@example.com"]).await;

    let mailer = MockMailer::new();
    let result = distribution::distribute(&pool, &mailer, &config, &opts(date, false)).await;
    match result {
        Err(Error::Precondition(msg)) => assert!(msg.contains("resend"), "unexpected message: {}", msg),
        other => panic!("expected Precondition error, got {:?}", other),
    }
    assert_eq!(mailer.sent_count(), 0);

    // With the explicit flag the full list is re-broadcast.
    let outcome = distribution::distribute(&pool, &mailer, &config, &opts(date, true))
        .await
        .expect("resend");
    match outcome {
        DistributeOutcome::Completed(report) => {
            assert_eq!(report.sent, 2);
            assert_eq!(report.failed, 0);
        }
        other => panic!("expected Completed, got {:?}", other),
    }
}

#[tokio::test]
async fn empty_subscriber_list_releases_the_lease() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let story = seed_story(&pool, date, StoryStatus::Approved).await;

    let mailer = MockMailer::new();
    let outcome = distribution::distribute(&pool, &mailer, &config, &opts(date, false))
        .await
        .expect("distribute");
    assert_eq!(outcome, DistributeOutcome::NoRecipients);

    // The story stays distributable for a later run.
    let after = storage::find_story_by_id(&pool, story.id)
        .await
        .expect("lookup")
        .expect("story");
    assert_eq!(after.status, StoryStatus::Approved);
}

#[tokio::test]
async fn concurrent_run_observes_the_sending_lease() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let story = seed_story(&pool, date, StoryStatus::Approved).await;
    seed_subscribers(&pool, &["a@example.com"]).await;

    // Simulate another run holding the lease.
    storage::set_story_status(&pool, story.id, StoryStatus::Sending)
        .await
        .expect("take lease");

    let mailer = MockMailer::new();
    let outcome = distribution::distribute(&pool, &mailer, &config, &opts(date, false))
        .await
        .expect("distribute");
    assert_eq!(outcome, DistributeOutcome::AlreadyRunning);
    assert_eq!(mailer.sent_count(), 0);
}

#[tokio::test]
async fn missing_story_is_a_not_found_error() {
    let pool = setup_test_db().await;
    let config = test_config();
    let date = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();

    let mailer = MockMailer::new();
    let result = distribution::distribute(&pool, &mailer, &config, &opts(date, false)).await;
    assert!(matches!(result, Err(Error::NotFound(_))));
}
