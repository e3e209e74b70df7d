//! End-to-end scenarios over the post application.
//!
//! Each scenario runs against a fixture and returns a report; `failures()` lists
//! every expectation the report does not meet.

use crate::fixtures::MemoryFixture;
use crate::logger::LogLevel;
use crate::posts::{
    Post, PostError, PostRepository, PostService, DOOMED_TITLE, ISOLATED_TITLE, POSTS,
    RECREATED_TITLE,
};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use txscope_core::on_success;
use txscope_memory::RecordStore;

/// Delays of the concurrent scenario.
///
/// The summarizing transaction must still be waiting when the counting
/// transaction commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timings {
    /// Wait inside the summarizing transaction.
    pub summarize_wait: Duration,
    /// Wait before the failing transactions fail.
    pub throw_wait: Duration,
    /// Delay before the counting transaction starts.
    pub count_delay: Duration,
    /// Wait inside the counting transaction.
    pub count_wait: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            summarize_wait: Duration::from_millis(500),
            throw_wait: Duration::from_millis(100),
            count_delay: Duration::from_millis(20),
            count_wait: Duration::from_millis(250),
        }
    }
}

impl Timings {
    /// Shorter delays for tests.
    #[must_use]
    pub fn fast() -> Self {
        Self {
            summarize_wait: Duration::from_millis(200),
            throw_wait: Duration::from_millis(20),
            count_delay: Duration::from_millis(10),
            count_wait: Duration::from_millis(50),
        }
    }
}

fn service(fx: &MemoryFixture) -> PostService {
    PostService::new(PostRepository::new(fx.client.clone()), fx.tx.clone())
}

fn expect(failures: &mut Vec<String>, ok: bool, message: impl Into<String>) {
    if !ok {
        failures.push(message.into());
    }
}

/// Outcome of [`run_concurrent`].
#[derive(Debug, Clone)]
pub struct ConcurrentReport {
    /// Posts visible at the end of the summarizing transaction.
    pub summarized: Vec<Post>,
    /// Posts visible right after the 30-post transaction failed.
    pub after_rollback: Vec<Post>,
    /// Post created by the counting transaction.
    pub counted: Post,
    /// Post created after deleting everything.
    pub recreated: Post,
    /// Posts of the failing transaction with an isolated write.
    pub after_isolated: Vec<Post>,
    /// Methods whose success callbacks ran, in order.
    pub committed: Vec<&'static str>,
}

impl ConcurrentReport {
    /// Lists unmet expectations.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        expect(
            &mut failures,
            self.summarized.len() == 7,
            format!("summarized.len() == {}, expected 7", self.summarized.len()),
        );
        expect(
            &mut failures,
            self.counted.content.as_deref() == Some("Count: 0"),
            format!("counted.content == {:?}, expected Count: 0", self.counted.content),
        );
        expect(
            &mut failures,
            self.recreated.title == RECREATED_TITLE,
            "recreated post has the wrong title",
        );
        expect(
            &mut failures,
            self.after_rollback.is_empty(),
            format!("{} posts survived the rollback", self.after_rollback.len()),
        );
        expect(
            &mut failures,
            self.after_isolated.len() == 1,
            "isolated write was not kept alone",
        );
        expect(
            &mut failures,
            self.committed
                == [
                    "read_all_posts_and_create_one_with_count",
                    "tx_create_random_and_summarize",
                ],
            format!("unexpected success callbacks: {:?}", self.committed),
        );
        failures
    }
}

/// Runs the concurrent scenario.
///
/// A transaction creating 5 posts and summarising them after a wait runs while,
/// concurrently:
/// 1. a transaction creating 30 posts fails and rolls back,
/// 2. a transaction counts the committed posts (none) and commits a post,
///
/// then everything is deleted and one post created, and finally a failing
/// transaction writes one post inside its session and one isolated post.
pub async fn run_concurrent(
    fx: &MemoryFixture,
    timings: Timings,
) -> Result<ConcurrentReport, PostError> {
    let service = service(fx);
    let repo = service.repository();

    let (summarized, others) = tokio::join!(
        service.tx_create_random_and_summarize(timings.summarize_wait),
        async {
            if let Err(err) = service.tx_create_many_and_throw(timings.throw_wait).await {
                tracing::debug!(%err, "30-post transaction failed");
            }
            let after_rollback = repo.read_posts().await?;

            tokio::time::sleep(timings.count_delay).await;
            let counting = &service;
            let counted = fx
                .tx
                .execute(move || async move {
                    counting
                        .read_all_posts_and_create_one_with_count(timings.count_wait)
                        .await
                })
                .await?;
            Ok::<_, PostError>((after_rollback, counted))
        }
    );
    let summarized = summarized?;
    let (after_rollback, counted) = others?;

    let recreated = service.delete_all_and_create_one_post().await?;

    if let Err(err) = service
        .tx_create_with_isolated_and_throw(timings.throw_wait)
        .await
    {
        tracing::debug!(%err, "transaction with isolated write failed");
    }
    let after_isolated = repo.find_by_titles(&[DOOMED_TITLE, ISOLATED_TITLE]).await?;

    Ok(ConcurrentReport {
        summarized,
        after_rollback,
        counted,
        recreated,
        after_isolated,
        committed: service.committed(),
    })
}

/// Outcome of [`run_isolated`].
#[derive(Debug, Clone)]
pub struct IsolatedReport {
    /// Error returned by the failing transaction.
    pub error: String,
    /// Posts left behind by it.
    pub visible: Vec<Post>,
}

impl IsolatedReport {
    /// Lists unmet expectations.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        expect(
            &mut failures,
            self.visible.len() == 1 && self.visible[0].title == ISOLATED_TITLE,
            format!("expected only the isolated post, found {:?}", self.visible),
        );
        failures
    }
}

/// A transaction writes a post in its session and one through the isolated
/// escape, then fails. Only the isolated post survives.
pub async fn run_isolated(fx: &MemoryFixture, wait: Duration) -> Result<IsolatedReport, PostError> {
    let service = service(fx);
    let error = match service.tx_create_with_isolated_and_throw(wait).await {
        Ok(()) => String::new(),
        Err(err) => err.to_string(),
    };
    let visible = service
        .repository()
        .find_by_titles(&[DOOMED_TITLE, ISOLATED_TITLE])
        .await?;
    Ok(IsolatedReport { error, visible })
}

/// Outcome of [`run_nested`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NestedReport {
    /// The proxy's nested transaction received the ambient session.
    pub joined_same_session: bool,
    /// Posts visible to the outer transaction before it committed.
    pub visible_before_commit: usize,
    /// Sessions opened during the scenario.
    pub sessions_opened: u64,
    /// Posts left after a nested failure rolled back the outer transaction.
    pub kept_after_inner_failure: usize,
}

impl NestedReport {
    /// Lists unmet expectations.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        expect(
            &mut failures,
            self.joined_same_session,
            "nested transaction opened its own session",
        );
        expect(
            &mut failures,
            self.visible_before_commit == 2,
            format!("outer saw {} posts, expected 2", self.visible_before_commit),
        );
        expect(
            &mut failures,
            self.sessions_opened == 2,
            format!("{} sessions opened, expected 2", self.sessions_opened),
        );
        expect(
            &mut failures,
            self.kept_after_inner_failure == 2,
            format!(
                "{} posts after the failed transaction, expected 2",
                self.kept_after_inner_failure
            ),
        );
        failures
    }
}

/// Nested transactional calls join the outermost session.
///
/// First an outer transaction writes a post and opens a nested proxy transaction
/// that writes another one. Then a wrapped transactional function is called twice
/// inside one outer transaction, the second call fails, and both writes roll back.
pub async fn run_nested(fx: &MemoryFixture) -> Result<NestedReport, PostError> {
    let begun = fx.stats().begun;
    let client = fx.client.clone();

    let (joined_same_session, visible_before_commit) = fx
        .tx
        .execute(move || async move {
            let outer = client.session();
            client.insert(POSTS, json!({ "title": "outer" })).await?;

            let inner = client.clone();
            let nested = client
                .transaction(move |session| async move {
                    inner.insert(POSTS, json!({ "title": "inner" })).await?;
                    Ok::<_, PostError>(session)
                })
                .await?;

            let joined = outer.is_some_and(|outer| outer.same_session(&nested));
            let visible = client.count(POSTS).await?;
            Ok::<_, PostError>((joined, visible))
        })
        .await?;

    let repo = PostRepository::new(fx.client.clone());
    let create = fx.tx.wrap(None, move |title: String| {
        let repo = repo.clone();
        async move {
            if title.is_empty() {
                return Err(PostError::Simulated("empty title".to_string()));
            }
            repo.create_post(&title, None).await
        }
    });
    let failed = fx
        .tx
        .execute(move || async move {
            create("first".to_string()).await?;
            create(String::new()).await
        })
        .await;
    if let Err(err) = failed {
        tracing::debug!(%err, "outer transaction rolled back");
    }

    Ok(NestedReport {
        joined_same_session,
        visible_before_commit,
        sessions_opened: fx.stats().begun - begun,
        kept_after_inner_failure: fx.raw.count(POSTS).await?,
    })
}

/// Outcome of [`run_callbacks`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbacksReport {
    /// Result of a callback registered with no session active.
    pub immediate: Option<u32>,
    /// Values pushed by callbacks of a committed transaction, in run order.
    pub committed_order: Vec<u32>,
    /// Values pushed by callbacks of a rolled back transaction.
    pub rolled_back_order: Vec<u32>,
    /// Failing callbacks reported through the logger.
    pub errors_logged: usize,
    /// Posts stored after both transactions; only the committed one's post counts.
    pub persisted: usize,
}

impl CallbacksReport {
    /// Lists unmet expectations.
    pub fn failures(&self) -> Vec<String> {
        let mut failures = Vec::new();
        expect(
            &mut failures,
            self.immediate == Some(42),
            "callback without session did not run immediately",
        );
        expect(
            &mut failures,
            self.committed_order == [1, 2, 3],
            format!("callbacks ran as {:?}, expected [1, 2, 3]", self.committed_order),
        );
        expect(
            &mut failures,
            self.rolled_back_order.is_empty(),
            "callbacks ran after a rollback",
        );
        expect(
            &mut failures,
            self.errors_logged == 1,
            format!("{} callback errors logged, expected 1", self.errors_logged),
        );
        expect(
            &mut failures,
            self.persisted == 1,
            format!("{} posts stored, expected the committed one only", self.persisted),
        );
        failures
    }
}

fn push_on_success(
    log: &Arc<Mutex<Vec<u32>>>,
    value: u32,
) -> impl std::future::Future<Output = ()> + Send + 'static {
    let log = Arc::clone(log);
    async move {
        on_success(move || async move {
            log.lock().push(value);
            Ok::<_, PostError>(())
        })
        .await;
    }
}

/// Success callbacks: immediate without a session, ordered after commit,
/// dropped on rollback, failures logged and skipped without undoing the commit.
pub async fn run_callbacks(fx: &MemoryFixture) -> Result<CallbacksReport, PostError> {
    let immediate = on_success(|| async { Ok::<u32, PostError>(42) })
        .await
        .into_completed()
        .and_then(Result::ok);

    let errors_before = fx
        .logger
        .count(LogLevel::Error, "Error executing success callback");

    let before = fx.raw.count(POSTS).await?;
    let committed = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&committed);
    let db = fx.client.clone();
    fx.tx
        .execute(move || async move {
            db.insert(POSTS, json!({ "title": "with callbacks" })).await?;
            push_on_success(&log, 1).await;
            on_success(|| async {
                Err::<(), _>(PostError::Simulated("callback failure".to_string()))
            })
            .await;
            push_on_success(&log, 2).await;
            push_on_success(&log, 3).await;
            Ok::<_, PostError>(())
        })
        .await?;

    let rolled_back = Arc::new(Mutex::new(Vec::new()));
    let log = Arc::clone(&rolled_back);
    let db = fx.client.clone();
    let failed = fx
        .tx
        .execute(move || async move {
            db.insert(POSTS, json!({ "title": "rolled back" })).await?;
            push_on_success(&log, 9).await;
            Err::<(), _>(PostError::Simulated("abort".to_string()))
        })
        .await;
    if let Err(err) = failed {
        tracing::debug!(%err, "transaction rolled back");
    }

    let errors_logged = fx
        .logger
        .count(LogLevel::Error, "Error executing success callback")
        - errors_before;

    let committed_order = committed.lock().clone();
    let rolled_back_order = rolled_back.lock().clone();
    Ok(CallbacksReport {
        immediate,
        committed_order,
        rolled_back_order,
        errors_logged,
        persisted: fx.raw.count(POSTS).await? - before,
    })
}
