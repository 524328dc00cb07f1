mod support;

use storyletter::storage;

use support::setup_test_db;

#[tokio::test]
async fn subscribe_unsubscribe_resubscribe_keeps_one_row() {
    let pool = setup_test_db().await;

    let created = storage::upsert_subscriber(&pool, "parent@example.com")
        .await
        .expect("subscribe");
    assert!(created);

    // Subscribing again is a no-op, not a duplicate.
    let created = storage::upsert_subscriber(&pool, "parent@example.com")
        .await
        .expect("re-subscribe");
    assert!(!created);

    storage::deactivate_subscriber(&pool, "parent@example.com")
        .await
        .expect("unsubscribe");
    let sub = storage::find_subscriber(&pool, "parent@example.com")
        .await
        .expect("lookup")
        .expect("row exists");
    assert!(!sub.is_active);
    assert!(storage::active_subscribers(&pool).await.expect("list").is_empty());

    // Re-subscribing reactivates the existing row.
    let created = storage::upsert_subscriber(&pool, "parent@example.com")
        .await
        .expect("reactivate");
    assert!(!created);
    let sub = storage::find_subscriber(&pool, "parent@example.com")
        .await
        .expect("lookup")
        .expect("row exists");
    assert!(sub.is_active);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscribers WHERE email = ?")
        .bind("parent@example.com")
        .fetch_one(&pool)
        .await
        .expect("count");
    assert_eq!(count, 1);
}

#[tokio::test]
async fn unsubscribe_of_unknown_address_is_a_noop() {
    let pool = setup_test_db().await;
    storage::deactivate_subscriber(&pool, "nobody@example.com")
        .await
        .expect("unsubscribe unknown");
    assert!(storage::find_subscriber(&pool, "nobody@example.com")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn active_subscribers_are_listed_in_signup_order() {
    let pool = setup_test_db().await;
    for e in ["first@example.com", "second@example.com", "third@example.com"] {
        storage::upsert_subscriber(&pool, e).await.expect("subscribe");
    }
    storage::deactivate_subscriber(&pool, "second@example.com")
        .await
        .expect("unsubscribe");

    let active = storage::active_subscribers(&pool).await.expect("list");
    assert_eq!(active, vec!["first@example.com", "third@example.com"]);
}
