use crate::models::{
    ArticleChanges, ArticleFilter, ArticlePage, ArticleView, Comment, FeedParams, NewArticle,
    NewUser, Profile, User, UserChanges,
};
use crate::schema::{self, Invariant, SchemaError};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod postgres;

pub use memory::MemoryRepository;
pub use postgres::PostgresRepository;

/// RepoError
///
/// Failure of a repository operation. Invariant violations are a rejected write, never a
/// crash, and stay distinguishable from plain storage failures.
#[derive(Debug, Error)]
pub enum RepoError {
    #[error("{0}")]
    InvariantViolation(Invariant),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("only the author may change this {0}")]
    Forbidden(&'static str),
    #[error("schema has not been ensured")]
    SchemaMissing,
    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl RepoError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, RepoError::InvariantViolation(_))
    }
}

impl From<sqlx::Error> for RepoError {
    /// Constraint violations are translated into the invariant they guard.
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &err {
            if let Some(invariant) = db.constraint().and_then(schema::invariant_for_constraint) {
                return RepoError::InvariantViolation(invariant);
            }
            if db.is_foreign_key_violation() {
                return RepoError::NotFound("referenced row");
            }
        }
        RepoError::Database(err)
    }
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Repository Trait
///
/// The contract between business handlers and storage. Every implementation enforces the
/// social-graph invariants (unique favorite/follow pairs, no self-follow, unique slugs,
/// referential integrity) atomically with the write that could break them.
///
/// **Send + Sync + async_trait** keep `Arc<dyn Repository>` usable across axum tasks.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Idempotently creates the tables and constraints. Safe on every start.
    async fn ensure_schema(&self) -> Result<(), SchemaError>;

    // --- Users ---
    async fn create_user(&self, user: NewUser) -> RepoResult<User>;
    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>>;
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<User>;

    // --- Profiles & Following ---
    async fn get_profile(&self, username: &str, viewer: Option<Uuid>) -> RepoResult<Profile>;
    // Rejects a second follow of the same pair and any self-follow.
    async fn follow(&self, follower: Uuid, followee: &str) -> RepoResult<Profile>;
    async fn unfollow(&self, follower: Uuid, followee: &str) -> RepoResult<Profile>;

    // --- Articles ---
    async fn create_article(&self, author: Uuid, article: NewArticle) -> RepoResult<ArticleView>;
    async fn get_article(&self, slug: &str, viewer: Option<Uuid>) -> RepoResult<ArticleView>;
    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        viewer: Option<Uuid>,
    ) -> RepoResult<ArticlePage>;
    // Articles whose authors `user` follows, newest first.
    async fn feed_articles(&self, user: Uuid, params: FeedParams) -> RepoResult<ArticlePage>;
    // Author-only.
    async fn update_article(
        &self,
        slug: &str,
        author: Uuid,
        changes: ArticleChanges,
    ) -> RepoResult<ArticleView>;
    // Author-only. Cascades to the article's comments and favorites.
    async fn delete_article(&self, slug: &str, author: Uuid) -> RepoResult<()>;

    // --- Favorites ---
    // Rejects a second favorite of the same (user, article) pair.
    async fn favorite_article(&self, user: Uuid, slug: &str) -> RepoResult<ArticleView>;
    async fn unfavorite_article(&self, user: Uuid, slug: &str) -> RepoResult<ArticleView>;
    // Stored rows for one (user, article) pair: 0 or 1 while the invariant holds.
    async fn favorite_pair_count(&self, user: Uuid, slug: &str) -> RepoResult<i64>;

    // --- Comments ---
    async fn add_comment(&self, slug: &str, author: Uuid, body: String) -> RepoResult<Comment>;
    async fn get_comments(&self, slug: &str) -> RepoResult<Vec<Comment>>;
    // Author-only.
    async fn delete_comment(&self, slug: &str, id: i64, author: Uuid) -> RepoResult<()>;

    // --- Tags ---
    async fn get_tags(&self) -> RepoResult<Vec<String>>;
}

/// RepositoryState
///
/// The shared handle to the persistence layer held in the application state.
pub type RepositoryState = Arc<dyn Repository>;
