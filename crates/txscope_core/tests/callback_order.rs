//! Success callback ordering across joined transactional calls.

use async_trait::async_trait;
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;
use txscope_core::{
    on_success, patch_client, Transactional, TransactionalClient, TxConfig, TxError, TxOptions,
    TxResult,
};

struct Sessions;

#[async_trait]
impl TransactionalClient for Sessions {
    type Session = ();
    type Error = TxError;

    async fn begin(&self, _options: &TxOptions) -> TxResult<()> {
        Ok(())
    }
    async fn commit(&self, _session: ()) -> TxResult<()> {
        Ok(())
    }
    async fn rollback(&self, _session: ()) -> TxResult<()> {
        Ok(())
    }
}

/// Registers one callback per entry of `depths`, each from a call nested that
/// many executor levels deep.
async fn register_nested(
    tx: Transactional<Sessions>,
    depths: Vec<u8>,
    log: Arc<Mutex<Vec<usize>>>,
) -> TxResult<()> {
    for (index, depth) in depths.into_iter().enumerate() {
        register_at(tx.clone(), depth, index, Arc::clone(&log)).await?;
    }
    Ok(())
}

fn register_at(
    tx: Transactional<Sessions>,
    depth: u8,
    index: usize,
    log: Arc<Mutex<Vec<usize>>>,
) -> futures::future::BoxFuture<'static, TxResult<()>> {
    Box::pin(async move {
        if depth == 0 {
            on_success(move || async move {
                log.lock().push(index);
                Ok::<_, TxError>(())
            })
            .await;
            return Ok(());
        }
        let inner = tx.clone();
        tx.execute(move || register_at(inner, depth - 1, index, log))
            .await
    })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn callbacks_run_once_in_registration_order(depths in prop::collection::vec(0u8..4, 0..12)) {
        let count = depths.len();
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = patch_client(Sessions, TxConfig::default());
        let tx = client.transactional();

        let outer = tx.clone();
        let registered = Arc::clone(&log);
        runtime()
            .block_on(tx.execute(move || register_nested(outer, depths, registered)))
            .unwrap();

        prop_assert_eq!(log.lock().clone(), (0..count).collect::<Vec<_>>());
    }

    #[test]
    fn no_callback_runs_after_rollback(depths in prop::collection::vec(0u8..4, 1..8)) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let client = patch_client(Sessions, TxConfig::default());
        let tx = client.transactional();

        let outer = tx.clone();
        let registered = Arc::clone(&log);
        let result = runtime().block_on(tx.execute(move || async move {
            register_nested(outer, depths, registered).await?;
            Err::<(), _>(TxError::unsupported("abort"))
        }));

        prop_assert!(result.is_err());
        prop_assert!(log.lock().is_empty());
    }
}
