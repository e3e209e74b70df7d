//! A committed session leaves the store exactly as the same calls made directly
//! on the client would; a rolled back one leaves it untouched.

use proptest::prelude::*;
use serde_json::json;
use txscope_core::{IsolationLevel, TransactionalClient, TxOptions};
use txscope_memory::{MemoryClient, MemoryResult, Record, RecordStore};

const POSTS: &str = "posts";

#[derive(Debug, Clone)]
enum Op {
    Insert(u8),
    Update(usize, u8),
    Delete(usize),
    DeleteAll,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => any::<u8>().prop_map(Op::Insert),
        2 => (any::<usize>(), any::<u8>()).prop_map(|(at, v)| Op::Update(at, v)),
        2 => any::<usize>().prop_map(Op::Delete),
        1 => Just(Op::DeleteAll),
    ]
}

fn isolation() -> impl Strategy<Value = Option<IsolationLevel>> {
    prop_oneof![
        Just(None),
        Just(Some(IsolationLevel::ReadCommitted)),
        Just(Some(IsolationLevel::Snapshot)),
        Just(Some(IsolationLevel::Serializable)),
    ]
}

/// Applies `ops` through `store`. Positions pick among the visible records.
async fn apply<S: RecordStore + ?Sized>(store: &S, ops: &[Op]) -> MemoryResult<()> {
    for op in ops {
        let ids: Vec<u64> = store.list(POSTS).await?.iter().map(|r| r.id).collect();
        match op {
            Op::Insert(value) => {
                store.insert(POSTS, json!({ "value": value })).await?;
            }
            Op::Update(at, value) if !ids.is_empty() => {
                store
                    .update(POSTS, ids[at % ids.len()], json!({ "edited": value }))
                    .await?;
            }
            Op::Delete(at) if !ids.is_empty() => {
                store.delete(POSTS, ids[at % ids.len()]).await?;
            }
            Op::DeleteAll => {
                store.delete_all(POSTS).await?;
            }
            Op::Update(..) | Op::Delete(_) => {}
        }
    }
    Ok(())
}

async fn seeded(seed: u8) -> MemoryClient {
    let client = MemoryClient::new();
    for value in 0..seed {
        client
            .insert(POSTS, json!({ "value": value, "seed": true }))
            .await
            .unwrap();
    }
    client
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn committed_session_matches_autocommit(
        seed in 0u8..4,
        ops in prop::collection::vec(op(), 0..24),
        level in isolation(),
    ) {
        let (through_session, direct): (Vec<Record>, Vec<Record>) = runtime().block_on(async {
            let client = seeded(seed).await;
            let mut options = TxOptions::new();
            options.isolation_level = level;
            let session = client.begin(&options).await.unwrap();
            apply(&session, &ops).await.unwrap();
            client.commit(session).await.unwrap();

            let reference = seeded(seed).await;
            apply(&reference, &ops).await.unwrap();

            (
                client.list(POSTS).await.unwrap(),
                reference.list(POSTS).await.unwrap(),
            )
        });
        prop_assert_eq!(through_session, direct);
    }

    #[test]
    fn rolled_back_session_changes_nothing(
        seed in 0u8..4,
        ops in prop::collection::vec(op(), 0..24),
    ) {
        let (before, after) = runtime().block_on(async {
            let client = seeded(seed).await;
            let before = client.list(POSTS).await.unwrap();

            let session = client.begin(&TxOptions::new()).await.unwrap();
            apply(&session, &ops).await.unwrap();
            client.rollback(session).await.unwrap();

            (before, client.list(POSTS).await.unwrap())
        });
        prop_assert_eq!(before, after);
    }
}
