//! End-to-end scenarios against the memory client.

use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use txscope_core::{on_success, ExecutionContext, IsolationLevel, TxError, TxOptions};
use txscope_memory::{BatchOp, MemoryError, RecordStore, SessionState};
use txscope_testkit::prelude::*;

#[tokio::test]
async fn concurrent_scenario() {
    let fx = memory_fixture();
    let report = run_concurrent(&fx, Timings::fast()).await.unwrap();
    assert_eq!(report.failures(), Vec::<String>::new());
    assert_eq!(fx.stats().rolled_back, 2);
}

#[tokio::test]
async fn isolated_scenario() {
    let fx = memory_fixture();
    let report = run_isolated(&fx, Duration::from_millis(5)).await.unwrap();
    assert_eq!(report.failures(), Vec::<String>::new());
    assert_eq!(report.error, "Test error");
}

#[tokio::test]
async fn nested_scenario() {
    let fx = memory_fixture();
    let report = run_nested(&fx).await.unwrap();
    assert_eq!(report.failures(), Vec::<String>::new());
    assert!(fx
        .logger
        .contains(LogLevel::Verbose, "continue nesting it"));
}

#[tokio::test]
async fn callbacks_scenario() {
    let fx = memory_fixture();
    let report = run_callbacks(&fx).await.unwrap();
    assert_eq!(report.failures(), Vec::<String>::new());
}

#[tokio::test]
async fn concurrent_sessions_do_not_see_each_other() {
    let fx = memory_fixture();
    let (a, b) = (fx.client.clone(), fx.client.clone());

    let (seen_by_a, seen_by_b) = tokio::join!(
        fx.tx.execute_with_isolation(IsolationLevel::Snapshot, move || async move {
            a.insert(POSTS, json!({ "title": "a" })).await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let titles: Vec<_> = a
                .list(POSTS)
                .await?
                .into_iter()
                .filter_map(|record| record.str_field("title").map(str::to_string))
                .collect();
            Ok::<_, MemoryError>(titles)
        }),
        fx.tx.execute_with_isolation(IsolationLevel::Snapshot, move || async move {
            b.insert(POSTS, json!({ "title": "b" })).await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            let titles: Vec<_> = b
                .list(POSTS)
                .await?
                .into_iter()
                .filter_map(|record| record.str_field("title").map(str::to_string))
                .collect();
            Ok::<_, MemoryError>(titles)
        }),
    );

    assert_eq!(seen_by_a.unwrap(), vec!["a"]);
    assert_eq!(seen_by_b.unwrap(), vec!["b"]);
    assert_eq!(fx.raw.count(POSTS).await.unwrap(), 2);
    assert_eq!(fx.stats().committed, 2);
}

#[tokio::test]
async fn proxy_transaction_outside_a_session_commits() {
    let fx = memory_fixture();
    let db = fx.client.clone();

    let session = fx
        .client
        .transaction(move |session| async move {
            assert!(db.target().is_session());
            session.insert(POSTS, json!({ "title": "direct" })).await?;
            db.insert(POSTS, json!({ "title": "routed" })).await?;
            Ok::<_, MemoryError>(session)
        })
        .await
        .unwrap();

    assert_eq!(session.state(), SessionState::Committed);
    assert_eq!(fx.raw.count(POSTS).await.unwrap(), 2);
    assert!(!fx.client.target().is_session());
}

#[tokio::test]
async fn on_success_without_session_runs_immediately() {
    let outcome = on_success(|| async { Ok::<_, MemoryError>("ran") }).await;
    assert!(!outcome.is_deferred());
    assert_eq!(outcome.into_completed().unwrap().unwrap(), "ran");
}

#[tokio::test]
async fn batch_inside_a_session_is_rejected() {
    let fx = memory_fixture();
    let db = fx.client.clone();

    let err = fx
        .tx
        .execute(move || async move {
            db.batch(vec![BatchOp::Insert {
                collection: POSTS.to_string(),
                data: json!({ "title": "batched" }),
            }])
            .await
        })
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        MemoryError::Tx(TxError::UnsupportedUsage { .. })
    ));
    assert!(fx.logger.contains(LogLevel::Warn, "Rejected batch"));
    assert_eq!(fx.raw.count(POSTS).await.unwrap(), 0);

    let outputs = fx
        .client
        .batch(vec![BatchOp::Insert {
            collection: POSTS.to_string(),
            data: json!({ "title": "batched" }),
        }])
        .await
        .unwrap();
    assert_eq!(outputs.len(), 1);
    assert_eq!(fx.raw.count(POSTS).await.unwrap(), 1);
}

#[tokio::test]
async fn serializable_sessions_wait_for_each_other() {
    let fx = memory_fixture();
    let options = TxOptions::new()
        .isolation_level(IsolationLevel::Serializable)
        .max_wait(Duration::from_millis(10));
    let (slow, fast) = (fx.client.clone(), fx.client.clone());

    let (held, refused) = tokio::join!(
        fx.tx.execute_with(options.clone(), move || async move {
            slow.insert(POSTS, json!({ "title": "slow" })).await?;
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok::<_, MemoryError>(())
        }),
        async {
            tokio::time::sleep(Duration::from_millis(5)).await;
            fx.tx
                .execute_with(options.clone(), move || async move {
                    fast.insert(POSTS, json!({ "title": "fast" })).await?;
                    Ok::<_, MemoryError>(())
                })
                .await
        },
    );

    held.unwrap();
    assert!(matches!(refused, Err(MemoryError::LockTimeout { .. })));
    assert_eq!(fx.raw.count(POSTS).await.unwrap(), 1);
}

#[tokio::test]
async fn expired_session_rolls_back_through_the_executor() {
    let fx = memory_fixture();
    let db = fx.client.clone();
    let options = TxOptions::new().timeout(Duration::from_millis(5));
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);

    let err = fx
        .tx
        .execute_with(options, move || async move {
            let deferred = on_success(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<_, MemoryError>(())
            })
            .await;
            assert!(deferred.is_deferred());
            db.insert(POSTS, json!({ "title": "late" })).await?;
            tokio::time::sleep(Duration::from_millis(20)).await;
            db.insert(POSTS, json!({ "title": "later" })).await?;
            Ok::<_, MemoryError>(())
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MemoryError::TransactionExpired { .. }));
    assert_eq!(fx.raw.count(POSTS).await.unwrap(), 0);
    assert!(!fx.tx.in_transaction());
    assert!(!ran.load(Ordering::SeqCst));
    assert_eq!(fx.stats().expired, 1);
}

#[tokio::test]
async fn failing_sibling_in_a_shared_context_keeps_no_writes() {
    let fx = memory_fixture();
    let (quick, failing) = (fx.client.clone(), fx.client.clone());
    let (tx, outer) = (fx.tx.clone(), fx.client.clone());

    let (left, right, parent_has_session) = ExecutionContext::run(async move {
        let (left, right) = tokio::join!(
            tx.execute(move || async move {
                tokio::task::yield_now().await;
                quick.insert(POSTS, json!({ "title": "quick" })).await?;
                Ok::<_, MemoryError>(())
            }),
            tx.execute(move || async move {
                failing.insert(POSTS, json!({ "title": "first" })).await?;
                tokio::time::sleep(Duration::from_millis(20)).await;
                assert!(failing.target().is_session());
                failing.insert(POSTS, json!({ "title": "second" })).await?;
                Err::<(), _>(MemoryError::not_found(POSTS, 0))
            }),
        );
        (left, right, outer.target().is_session())
    })
    .await;

    left.unwrap();
    assert!(right.unwrap_err().is_not_found());
    assert!(!parent_has_session);

    let titles: Vec<String> = fx
        .raw
        .list(POSTS)
        .await
        .unwrap()
        .into_iter()
        .filter_map(|record| record.str_field("title").map(str::to_string))
        .collect();
    assert_eq!(titles, vec!["quick"]);
    assert_eq!(fx.stats().committed, 1);
    assert_eq!(fx.stats().rolled_back, 1);
}
