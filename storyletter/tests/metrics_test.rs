mod support;

use chrono::NaiveDate;
use storyletter::metrics::{self, RecordOutcome, WebhookEvent};

use support::setup_test_db;

fn event(json: &str) -> WebhookEvent {
    serde_json::from_str(json).expect("parse event")
}

#[tokio::test]
async fn repeated_events_accumulate_in_one_bucket() {
    let pool = setup_test_db().await;
    let today = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let sent = event(r#"{"type": "email.sent", "data": {"tags": {"type": "story"}}}"#);

    for _ in 0..2 {
        let outcome = metrics::record_event(&pool, &sent, today).await.expect("record");
        assert!(matches!(outcome, RecordOutcome::Recorded { .. }));
    }

    let bucket = metrics::metric_for(&pool, today, "story")
        .await
        .expect("fetch")
        .expect("bucket exists");
    assert_eq!(bucket.sent_count, 2);
    assert_eq!(bucket.delivered_count, 0);
    assert_eq!(bucket.opened_count, 0);

    // A different counter lands in the same row.
    let opened = event(r#"{"type": "email.opened", "data": {"tags": {"type": "story"}}}"#);
    metrics::record_event(&pool, &opened, today).await.expect("record opened");

    let bucket = metrics::metric_for(&pool, today, "story")
        .await
        .expect("fetch")
        .expect("bucket exists");
    assert_eq!(bucket.sent_count, 2);
    assert_eq!(bucket.opened_count, 1);
}

#[tokio::test]
async fn untagged_events_land_in_the_unknown_bucket() {
    let pool = setup_test_db().await;
    let today = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let untagged = event(r#"{"type": "email.delivered", "data": {}}"#);

    let outcome = metrics::record_event(&pool, &untagged, today).await.expect("record");
    match outcome {
        RecordOutcome::Recorded { email_type, column } => {
            assert_eq!(email_type, "unknown");
            assert_eq!(column, "delivered_count");
        }
        RecordOutcome::Ignored => panic!("expected Recorded"),
    }

    let bucket = metrics::metric_for(&pool, today, "unknown")
        .await
        .expect("fetch")
        .expect("bucket exists");
    assert_eq!(bucket.delivered_count, 1);
}

#[tokio::test]
async fn unrecognized_event_types_are_acknowledged_but_not_stored() {
    let pool = setup_test_db().await;
    let today = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let unknown = event(r#"{"type": "email.complained", "data": {"tags": {"type": "story"}}}"#);

    let outcome = metrics::record_event(&pool, &unknown, today).await.expect("record");
    assert_eq!(outcome, RecordOutcome::Ignored);

    let bucket = metrics::metric_for(&pool, today, "story").await.expect("fetch");
    assert!(bucket.is_none(), "ignored events must not create buckets");
}

#[tokio::test]
async fn buckets_are_keyed_by_processing_date_and_type() {
    let pool = setup_test_db().await;
    let day1 = NaiveDate::from_ymd_opt(2026, 3, 11).unwrap();
    let day2 = NaiveDate::from_ymd_opt(2026, 3, 12).unwrap();
    let story = event(r#"{"type": "email.sent", "data": {"tags": {"type": "story"}}}"#);
    let welcome = event(r#"{"type": "email.sent", "data": {"tags": {"type": "welcome"}}}"#);

    metrics::record_event(&pool, &story, day1).await.expect("record");
    metrics::record_event(&pool, &story, day2).await.expect("record");
    metrics::record_event(&pool, &welcome, day1).await.expect("record");

    assert_eq!(
        metrics::metric_for(&pool, day1, "story").await.unwrap().unwrap().sent_count,
        1
    );
    assert_eq!(
        metrics::metric_for(&pool, day2, "story").await.unwrap().unwrap().sent_count,
        1
    );
    assert_eq!(
        metrics::metric_for(&pool, day1, "welcome").await.unwrap().unwrap().sent_count,
        1
    );
}
