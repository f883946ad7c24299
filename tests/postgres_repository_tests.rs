//! Runs against a live Postgres only when DATABASE_URL points at one; otherwise every test
//! returns early.

use conduit_gate::{
    models::{NewArticle, NewUser, User},
    repository::{PostgresRepository, RepoError, Repository},
    schema::{self, Invariant, SchemaError},
};
use sqlx::{
    PgPool,
    postgres::{PgConnectOptions, PgPoolOptions},
};
use uuid::Uuid;

// --- Test Context and Setup ---

struct DbTestContext {
    pool: PgPool,
}

impl DbTestContext {
    async fn setup() -> Option<Self> {
        dotenv::dotenv().ok();

        let db_url = std::env::var("DATABASE_URL").ok()?;
        if !db_url.starts_with("postgres") {
            return None;
        }

        let pool = PgPool::connect(&db_url)
            .await
            .expect("Failed to connect to database for integration tests.");
        schema::ensure_schema(&pool)
            .await
            .expect("Failed to ensure schema.");

        Some(DbTestContext { pool })
    }

    fn repository(&self) -> PostgresRepository {
        PostgresRepository::new(self.pool.clone())
    }
}

/// Pool whose connections resolve unqualified names in a fresh, empty schema.
async fn isolated_pool(ctx: &DbTestContext, schema_name: &str) -> PgPool {
    sqlx::query(&format!("CREATE SCHEMA {schema_name}"))
        .execute(&ctx.pool)
        .await
        .expect("Failed to create isolated schema");

    let db_url = std::env::var("DATABASE_URL").unwrap();
    let options = db_url
        .parse::<PgConnectOptions>()
        .unwrap()
        .options([("search_path", schema_name)]);

    PgPoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .expect("Failed to connect with isolated search_path")
}

// --- Test Data Helpers ---

/// Names are suffixed so tests can share one database.
async fn create_test_user(repo: &PostgresRepository, prefix: &str) -> User {
    let name = format!("{prefix}-{}", Uuid::new_v4().simple());
    repo.create_user(NewUser {
        username: name.clone(),
        email: format!("{name}@test.com"),
        password_hash: "not-a-real-hash".to_string(),
    })
    .await
    .expect("Failed to create test user")
}

fn unique_article() -> NewArticle {
    NewArticle {
        title: format!("Article {}", Uuid::new_v4().simple()),
        description: "d".into(),
        body: "b".into(),
        tag_list: vec!["pg".into()],
    }
}

// --- Tests ---

#[tokio::test]
async fn test_ensure_schema_is_idempotent() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let user = create_test_user(&repo, "idem").await;

    repo.ensure_schema().await.unwrap();
    repo.ensure_schema().await.unwrap();

    assert!(repo.get_user(user.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_ensure_schema_rejects_favorites_table_without_key() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let schema_name = format!("legacy_{}", Uuid::new_v4().simple());
    let legacy = isolated_pool(&ctx, &schema_name).await;

    // Right columns, no composite primary key.
    sqlx::query(
        "CREATE TABLE article_favorites (
            user_id UUID NOT NULL,
            article_id UUID NOT NULL,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
    )
    .execute(&legacy)
    .await
    .unwrap();

    let result = schema::ensure_schema(&legacy).await;

    legacy.close().await;
    sqlx::query(&format!("DROP SCHEMA {schema_name} CASCADE"))
        .execute(&ctx.pool)
        .await
        .unwrap();

    match result {
        Err(SchemaError::MissingConstraint { table, constraint }) => {
            assert_eq!(table, "article_favorites");
            assert_eq!(constraint, "article_favorites_pkey");
        }
        other => panic!("expected missing constraint, got {other:?}"),
    }
}

#[tokio::test]
async fn test_ensure_schema_accepts_fresh_schema() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let schema_name = format!("fresh_{}", Uuid::new_v4().simple());
    let fresh = isolated_pool(&ctx, &schema_name).await;

    let first = schema::ensure_schema(&fresh).await;
    let second = schema::ensure_schema(&fresh).await;

    fresh.close().await;
    sqlx::query(&format!("DROP SCHEMA {schema_name} CASCADE"))
        .execute(&ctx.pool)
        .await
        .unwrap();

    assert!(first.is_ok(), "{first:?}");
    assert!(second.is_ok(), "{second:?}");
}

#[tokio::test]
async fn test_concurrent_identical_favorites_store_one_row() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let user = create_test_user(&repo, "fav").await;
    let article = repo.create_article(user.id, unique_article()).await.unwrap();

    let (a, b) = tokio::join!(
        repo.favorite_article(user.id, &article.slug),
        repo.favorite_article(user.id, &article.slug),
    );

    let results = [a, b];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results.iter().any(|r| matches!(
        r,
        Err(RepoError::InvariantViolation(Invariant::DuplicateFavorite))
    )));
    assert_eq!(
        repo.favorite_pair_count(user.id, &article.slug).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn test_self_follow_is_rejected_by_storage() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let user = create_test_user(&repo, "self").await;

    assert!(matches!(
        repo.follow(user.id, &user.username).await,
        Err(RepoError::InvariantViolation(Invariant::SelfFollow))
    ));

    // Bypassing the repository hits the CHECK constraint.
    let raw = sqlx::query("INSERT INTO followings (follower_id, followee_id) VALUES ($1, $1)")
        .bind(user.id)
        .execute(&ctx.pool)
        .await
        .map_err(RepoError::from);
    assert!(matches!(
        raw,
        Err(RepoError::InvariantViolation(Invariant::SelfFollow))
    ));
}

#[tokio::test]
async fn test_duplicate_follow_and_slug_are_rejected() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let fan = create_test_user(&repo, "fan").await;
    let star = create_test_user(&repo, "star").await;

    repo.follow(fan.id, &star.username).await.unwrap();
    assert!(matches!(
        repo.follow(fan.id, &star.username).await,
        Err(RepoError::InvariantViolation(Invariant::DuplicateFollow))
    ));

    let article = unique_article();
    repo.create_article(star.id, article.clone()).await.unwrap();
    assert!(matches!(
        repo.create_article(fan.id, article).await,
        Err(RepoError::InvariantViolation(Invariant::DuplicateSlug))
    ));
}

#[tokio::test]
async fn test_delete_article_cascades() {
    let Some(ctx) = DbTestContext::setup().await else {
        return;
    };
    let repo = ctx.repository();
    let author = create_test_user(&repo, "author").await;
    let article = repo.create_article(author.id, unique_article()).await.unwrap();
    repo.add_comment(&article.slug, author.id, "hi".into()).await.unwrap();
    repo.favorite_article(author.id, &article.slug).await.unwrap();

    repo.delete_article(&article.slug, author.id).await.unwrap();

    let (comments,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM comments WHERE article_id = $1")
        .bind(article.id)
        .fetch_one(&ctx.pool)
        .await
        .unwrap();
    let (favorites,): (i64,) =
        sqlx::query_as("SELECT COUNT(*) FROM article_favorites WHERE article_id = $1")
            .bind(article.id)
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
    assert_eq!((comments, favorites), (0, 0));
}
