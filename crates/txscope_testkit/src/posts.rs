//! A small blog application written against the routing proxy.
//!
//! Neither the repository nor the service passes a transaction handle around. The
//! service's `tx_*` methods run through the executor; every repository call they
//! make, however deep, joins their session.

use futures::future::try_join_all;
use parking_lot::Mutex;
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use txscope_core::{on_success, Transactional, TxClient, TxError};
use txscope_memory::{MemoryClient, MemoryError, Record, RecordStore};

/// Collection holding posts.
pub const POSTS: &str = "posts";

/// Title of the post created after deleting everything.
pub const RECREATED_TITLE: &str = "New deleteAllAndCreateOnePost post";

/// Title of the post written inside a transaction that fails.
pub const DOOMED_TITLE: &str = "Not existing post";

/// Title of the post written outside of a transaction that fails.
pub const ISOLATED_TITLE: &str = "Isolated post";

/// Errors of the post application.
#[derive(Debug, Error)]
pub enum PostError {
    /// Storage failure.
    #[error(transparent)]
    Memory(#[from] MemoryError),

    /// Propagation layer failure.
    #[error(transparent)]
    Tx(#[from] TxError),

    /// A stored record is not a post.
    #[error("malformed post: {0}")]
    Decode(#[from] serde_json::Error),

    /// Failure raised on purpose.
    #[error("{0}")]
    Simulated(String),
}

/// A post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    /// Record id.
    pub id: u64,
    /// Title.
    pub title: String,
    /// Optional body.
    pub content: Option<String>,
}

#[derive(Serialize, Deserialize)]
struct PostData {
    title: String,
    #[serde(default)]
    content: Option<String>,
}

impl TryFrom<Record> for Post {
    type Error = PostError;

    fn try_from(record: Record) -> Result<Self, Self::Error> {
        let data: PostData = serde_json::from_value(record.data)?;
        Ok(Self {
            id: record.id,
            title: data.title,
            content: data.content,
        })
    }
}

/// Returns `length` random alphanumeric characters.
pub fn random_text(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Post storage.
#[derive(Debug, Clone)]
pub struct PostRepository {
    db: TxClient<MemoryClient>,
}

impl PostRepository {
    /// Creates a repository over the routing proxy.
    pub fn new(db: TxClient<MemoryClient>) -> Self {
        Self { db }
    }

    /// Creates a post.
    pub async fn create_post(&self, title: &str, content: Option<&str>) -> Result<Post, PostError> {
        let data = serde_json::to_value(PostData {
            title: title.to_string(),
            content: content.map(str::to_string),
        })?;
        self.db.insert(POSTS, data).await?.try_into()
    }

    /// Reads every post, ordered by id.
    pub async fn read_posts(&self) -> Result<Vec<Post>, PostError> {
        self.db
            .list(POSTS)
            .await?
            .into_iter()
            .map(Post::try_from)
            .collect()
    }

    /// Reads the posts whose title is one of `titles`.
    pub async fn find_by_titles(&self, titles: &[&str]) -> Result<Vec<Post>, PostError> {
        let posts = self.read_posts().await?;
        Ok(posts
            .into_iter()
            .filter(|post| titles.contains(&post.title.as_str()))
            .collect())
    }

    /// Deletes a post.
    pub async fn delete_post(&self, id: u64) -> Result<Post, PostError> {
        self.db.delete(POSTS, id).await?.try_into()
    }

    /// Deletes every post.
    pub async fn delete_all(&self) -> Result<usize, PostError> {
        Ok(self.db.delete_all(POSTS).await?)
    }

    /// Creates `count` posts with random titles, concurrently.
    pub async fn create_random_posts(&self, count: usize) -> Result<Vec<Post>, PostError> {
        try_join_all((0..count).map(|_| {
            let title = format!("Post {}", random_text(5));
            async move { self.create_post(&title, None).await }
        }))
        .await
    }

    /// Replaces the content of a post.
    pub async fn edit_post(&self, id: u64, content: &str) -> Result<Post, PostError> {
        self.db
            .update(POSTS, id, serde_json::json!({ "content": content }))
            .await?
            .try_into()
    }
}

/// Post use cases.
#[derive(Debug, Clone)]
pub struct PostService {
    repo: PostRepository,
    tx: Transactional<MemoryClient>,
    committed: Arc<Mutex<Vec<&'static str>>>,
}

impl PostService {
    /// Creates a service.
    pub fn new(repo: PostRepository, tx: Transactional<MemoryClient>) -> Self {
        Self {
            repo,
            tx,
            committed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the repository.
    pub fn repository(&self) -> &PostRepository {
        &self.repo
    }

    /// Names of the transactional methods whose success callback ran, in order.
    pub fn committed(&self) -> Vec<&'static str> {
        self.committed.lock().clone()
    }

    /// Always fails.
    pub fn throw_error(&self) -> Result<(), PostError> {
        Err(PostError::Simulated("Test error".to_string()))
    }

    /// Creates a post whose content lists every title currently visible.
    pub async fn read_all_posts_and_create_one_merged(&self) -> Result<Post, PostError> {
        let posts = self.repo.read_posts().await?;
        let summary: String = posts
            .iter()
            .map(|post| format!("{};\n", post.title))
            .collect();
        self.repo
            .create_post("New readAllPostsAndCreateOneMerged post", Some(&summary))
            .await
    }

    /// Deletes every post, then creates one.
    pub async fn delete_all_and_create_one_post(&self) -> Result<Post, PostError> {
        self.repo.delete_all().await?;
        self.repo.create_post(RECREATED_TITLE, None).await
    }

    /// Counts the visible posts after `wait` and records the count in a new post.
    ///
    /// Not transactional on its own; joins the caller's session if there is one.
    pub async fn read_all_posts_and_create_one_with_count(
        &self,
        wait: Duration,
    ) -> Result<Post, PostError> {
        self.on_commit("read_all_posts_and_create_one_with_count")
            .await;
        let posts = self.repo.read_posts().await?;
        tokio::time::sleep(wait).await;
        self.repo
            .create_post(
                "New txReadAllPostsAndCreateOneMerged post",
                Some(&format!("Count: {}", posts.len())),
            )
            .await
    }

    /// Creates 5 posts, waits, summarises, and returns every visible post.
    pub async fn tx_create_random_and_summarize(
        &self,
        wait: Duration,
    ) -> Result<Vec<Post>, PostError> {
        self.tx
            .execute(move || async move {
                self.on_commit("tx_create_random_and_summarize").await;
                self.repo.create_random_posts(5).await?;
                tokio::time::sleep(wait).await;
                self.read_all_posts_and_create_one_merged().await?;
                self.repo.read_posts().await
            })
            .await
    }

    /// Creates 30 posts, edits one, waits, and fails.
    pub async fn tx_create_many_and_throw(&self, wait: Duration) -> Result<(), PostError> {
        self.tx
            .execute(move || async move {
                self.on_commit("tx_create_many_and_throw").await;
                let posts = self.repo.create_random_posts(30).await?;
                if let Some(first) = posts.first() {
                    self.repo.edit_post(first.id, "edited").await?;
                }
                tokio::time::sleep(wait).await;
                self.throw_error()
            })
            .await
    }

    /// Creates one post in the session and one outside of it, then fails.
    ///
    /// Only the isolated post survives.
    pub async fn tx_create_with_isolated_and_throw(&self, wait: Duration) -> Result<(), PostError> {
        self.tx
            .execute(move || async move {
                self.on_commit("tx_create_with_isolated_and_throw").await;
                self.repo.create_post(DOOMED_TITLE, None).await?;
                self.tx
                    .execute_isolated(move |_root| async move {
                        self.repo.create_post(ISOLATED_TITLE, None).await
                    })
                    .await?;
                tokio::time::sleep(wait).await;
                self.throw_error()
            })
            .await
    }

    async fn on_commit(&self, name: &'static str) {
        let committed = Arc::clone(&self.committed);
        on_success(move || async move {
            tracing::info!(method = name, "transaction committed");
            committed.lock().push(name);
            Ok::<_, PostError>(())
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::memory_fixture;

    fn service() -> (PostService, crate::fixtures::MemoryFixture) {
        let fx = memory_fixture();
        let service = PostService::new(PostRepository::new(fx.client.clone()), fx.tx.clone());
        (service, fx)
    }

    #[test]
    fn random_text_has_requested_length() {
        assert_eq!(random_text(5).len(), 5);
        assert!(random_text(12).chars().all(|c| c.is_ascii_alphanumeric()));
    }

    #[tokio::test]
    async fn repository_round_trip() {
        let (service, _fx) = service();
        let repo = service.repository();
        let post = repo.create_post("hello", Some("body")).await.unwrap();
        assert_eq!(post.content.as_deref(), Some("body"));

        let edited = repo.edit_post(post.id, "new body").await.unwrap();
        assert_eq!(edited.title, "hello");
        assert_eq!(edited.content.as_deref(), Some("new body"));

        repo.create_random_posts(3).await.unwrap();
        assert_eq!(repo.read_posts().await.unwrap().len(), 4);
        assert_eq!(repo.find_by_titles(&["hello"]).await.unwrap().len(), 1);

        repo.delete_post(post.id).await.unwrap();
        assert_eq!(repo.delete_all().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn malformed_records_fail_to_decode() {
        let (service, fx) = service();
        fx.raw
            .insert(POSTS, serde_json::json!({"no_title": true}))
            .await
            .unwrap();
        let err = service.repository().read_posts().await.unwrap_err();
        assert!(matches!(err, PostError::Decode(_)));
    }

    #[tokio::test]
    async fn failing_method_leaves_nothing_behind() {
        let (service, fx) = service();
        let err = service
            .tx_create_many_and_throw(Duration::from_millis(1))
            .await
            .unwrap_err();

        assert_eq!(err.to_string(), "Test error");
        assert_eq!(fx.raw.count(POSTS).await.unwrap(), 0);
        assert!(service.committed().is_empty());
        assert_eq!(fx.stats().rolled_back, 1);
    }

    #[tokio::test]
    async fn isolated_post_survives_the_rollback() {
        let (service, _fx) = service();
        assert!(service
            .tx_create_with_isolated_and_throw(Duration::from_millis(1))
            .await
            .is_err());

        let visible = service
            .repository()
            .find_by_titles(&[DOOMED_TITLE, ISOLATED_TITLE])
            .await
            .unwrap();
        assert_eq!(visible.len(), 1);
        assert_eq!(visible[0].title, ISOLATED_TITLE);
    }

    #[tokio::test]
    async fn summary_lists_own_uncommitted_posts() {
        let (service, fx) = service();
        let posts = service
            .tx_create_random_and_summarize(Duration::from_millis(1))
            .await
            .unwrap();

        assert_eq!(posts.len(), 6);
        let summary = posts.last().unwrap().content.clone().unwrap();
        assert_eq!(summary.matches(";\n").count(), 5);
        assert_eq!(service.committed(), vec!["tx_create_random_and_summarize"]);
        assert_eq!(fx.stats().begun, 1);
    }
}
