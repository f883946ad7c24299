use conduit_gate::{
    models::{ArticleChanges, ArticleFilter, FeedParams, NewArticle, NewUser, User, UserChanges},
    repository::{MemoryRepository, RepoError, Repository},
    schema::{Invariant, table_names},
};
use std::sync::Arc;
use uuid::Uuid;

// --- Test Data Helpers ---

async fn repo() -> Arc<MemoryRepository> {
    let repo = Arc::new(MemoryRepository::new());
    repo.ensure_schema().await.unwrap();
    repo
}

async fn create_test_user(repo: &MemoryRepository, name: &str) -> User {
    repo.create_user(NewUser {
        username: name.to_string(),
        email: format!("{name}@example.com"),
        password_hash: "not-a-real-hash".to_string(),
    })
    .await
    .unwrap()
}

fn article(title: &str, tags: &[&str]) -> NewArticle {
    NewArticle {
        title: title.to_string(),
        description: "desc".to_string(),
        body: "body".to_string(),
        tag_list: tags.iter().map(|t| t.to_string()).collect(),
    }
}

fn assert_invariant<T: std::fmt::Debug>(result: Result<T, RepoError>, expected: Invariant) {
    match result {
        Err(RepoError::InvariantViolation(found)) => assert_eq!(found, expected),
        other => panic!("expected {expected:?}, got {other:?}"),
    }
}

// --- Schema ---

#[tokio::test]
async fn test_operations_before_ensure_schema_fail() {
    let repo = MemoryRepository::new();

    assert!(repo.tables().is_empty());
    assert!(matches!(
        repo.get_tags().await,
        Err(RepoError::SchemaMissing)
    ));
}

#[tokio::test]
async fn test_ensure_schema_twice_keeps_data() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    repo.create_article(jake.id, article("How to train", &["dragons"]))
        .await
        .unwrap();

    repo.ensure_schema().await.unwrap();

    assert_eq!(repo.tables(), table_names());
    assert!(repo.get_user(jake.id).await.unwrap().is_some());
    assert_eq!(repo.get_tags().await.unwrap(), vec!["dragons".to_string()]);
}

// --- Users ---

#[tokio::test]
async fn test_duplicate_username_and_email_are_rejected() {
    let repo = repo().await;
    create_test_user(&repo, "jake").await;

    let same_name = repo
        .create_user(NewUser {
            username: "jake".into(),
            email: "other@example.com".into(),
            password_hash: "h".into(),
        })
        .await;
    assert_invariant(same_name, Invariant::DuplicateUsername);

    let same_email = repo
        .create_user(NewUser {
            username: "other".into(),
            email: "jake@example.com".into(),
            password_hash: "h".into(),
        })
        .await;
    assert_invariant(same_email, Invariant::DuplicateEmail);
}

#[tokio::test]
async fn test_update_user_changes_only_supplied_fields() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;

    let updated = repo
        .update_user(
            jake.id,
            UserChanges {
                bio: Some("I work at statefarm".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.username, "jake");
    assert_eq!(updated.email, "jake@example.com");
    assert_eq!(updated.bio.as_deref(), Some("I work at statefarm"));
    assert_eq!(
        repo.get_user_by_email("jake@example.com").await.unwrap().map(|u| u.id),
        Some(jake.id)
    );
}

// --- Following ---

#[tokio::test]
async fn test_self_follow_always_fails() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;

    assert_invariant(repo.follow(jake.id, "jake").await, Invariant::SelfFollow);
    // Still rejected on retry; nothing was stored.
    assert_invariant(repo.follow(jake.id, "jake").await, Invariant::SelfFollow);
    assert!(!repo.get_profile("jake", Some(jake.id)).await.unwrap().following);
}

#[tokio::test]
async fn test_follow_twice_is_duplicate_and_unfollow_clears() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    create_test_user(&repo, "celeb").await;

    let profile = repo.follow(jake.id, "celeb").await.unwrap();
    assert!(profile.following);
    assert_invariant(repo.follow(jake.id, "celeb").await, Invariant::DuplicateFollow);

    let profile = repo.unfollow(jake.id, "celeb").await.unwrap();
    assert!(!profile.following);
    assert!(!repo.get_profile("celeb", None).await.unwrap().following);
}

#[tokio::test]
async fn test_follow_unknown_user_is_not_found() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;

    assert!(matches!(
        repo.follow(jake.id, "nobody").await,
        Err(RepoError::NotFound(_))
    ));
}

// --- Articles ---

#[tokio::test]
async fn test_duplicate_slug_is_rejected() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;

    let first = repo
        .create_article(jake.id, article("How to Train Your Dragon", &[]))
        .await
        .unwrap();
    assert_eq!(first.slug, "how-to-train-your-dragon");
    assert_eq!(first.author_username, "jake");

    let second = repo
        .create_article(jake.id, article("How to train your dragon!", &[]))
        .await;
    assert_invariant(second, Invariant::DuplicateSlug);
}

#[tokio::test]
async fn test_article_for_unknown_author_is_not_found() {
    let repo = repo().await;

    let result = repo.create_article(Uuid::new_v4(), article("Orphan", &[])).await;
    assert!(matches!(result, Err(RepoError::NotFound(_))));
}

#[tokio::test]
async fn test_only_author_may_update_or_delete_article() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    let mallory = create_test_user(&repo, "mallory").await;
    repo.create_article(jake.id, article("Original", &[])).await.unwrap();

    let changes = ArticleChanges {
        title: Some("Renamed".into()),
        ..Default::default()
    };
    assert!(matches!(
        repo.update_article("original", mallory.id, changes.clone()).await,
        Err(RepoError::Forbidden(_))
    ));
    assert!(matches!(
        repo.delete_article("original", mallory.id).await,
        Err(RepoError::Forbidden(_))
    ));

    let renamed = repo.update_article("original", jake.id, changes).await.unwrap();
    assert_eq!(renamed.slug, "renamed");
    assert!(repo.get_article("original", None).await.is_err());

    repo.delete_article("renamed", jake.id).await.unwrap();
    assert!(matches!(
        repo.get_article("renamed", None).await,
        Err(RepoError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_list_articles_filters_and_pages_newest_first() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    let jane = create_test_user(&repo, "jane").await;
    repo.create_article(jake.id, article("First", &["rust"])).await.unwrap();
    repo.create_article(jane.id, article("Second", &["go"])).await.unwrap();
    repo.create_article(jake.id, article("Third", &["rust", "web"])).await.unwrap();
    repo.favorite_article(jane.id, "first").await.unwrap();

    let all = repo.list_articles(&ArticleFilter::default(), None).await.unwrap();
    let slugs: Vec<&str> = all.articles.iter().map(|a| a.slug.as_str()).collect();
    assert_eq!(slugs, ["third", "second", "first"]);
    assert_eq!(all.total, 3);

    let tagged = ArticleFilter {
        tag: Some("rust".into()),
        ..Default::default()
    };
    assert_eq!(repo.list_articles(&tagged, None).await.unwrap().total, 2);

    let by_author = ArticleFilter {
        author: Some("jane".into()),
        ..Default::default()
    };
    let page = repo.list_articles(&by_author, None).await.unwrap();
    assert_eq!(page.articles[0].slug, "second");

    let favorited = ArticleFilter {
        favorited: Some("jane".into()),
        ..Default::default()
    };
    let page = repo.list_articles(&favorited, Some(jane.id)).await.unwrap();
    assert_eq!(page.total, 1);
    assert!(page.articles[0].favorited);
    assert_eq!(page.articles[0].favorites_count, 1);

    let paged = ArticleFilter {
        limit: Some(1),
        offset: Some(1),
        ..Default::default()
    };
    let page = repo.list_articles(&paged, None).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.articles.len(), 1);
    assert_eq!(page.articles[0].slug, "second");

    let unknown_author = ArticleFilter {
        author: Some("nobody".into()),
        ..Default::default()
    };
    assert_eq!(repo.list_articles(&unknown_author, None).await.unwrap().total, 0);
}

#[tokio::test]
async fn test_feed_contains_only_followed_authors() {
    let repo = repo().await;
    let reader = create_test_user(&repo, "reader").await;
    let followed = create_test_user(&repo, "followed").await;
    let stranger = create_test_user(&repo, "stranger").await;
    repo.create_article(followed.id, article("Followed post", &[])).await.unwrap();
    repo.create_article(stranger.id, article("Stranger post", &[])).await.unwrap();

    assert_eq!(
        repo.feed_articles(reader.id, FeedParams::default()).await.unwrap().total,
        0
    );

    repo.follow(reader.id, "followed").await.unwrap();
    let feed = repo.feed_articles(reader.id, FeedParams::default()).await.unwrap();
    assert_eq!(feed.total, 1);
    assert_eq!(feed.articles[0].slug, "followed-post");
}

// --- Favorites ---

#[tokio::test]
async fn test_favorite_twice_is_duplicate() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    repo.create_article(jake.id, article("Fav", &[])).await.unwrap();

    let view = repo.favorite_article(jake.id, "fav").await.unwrap();
    assert!(view.favorited);
    assert_eq!(view.favorites_count, 1);

    assert_invariant(
        repo.favorite_article(jake.id, "fav").await,
        Invariant::DuplicateFavorite,
    );
    assert_eq!(repo.favorite_pair_count(jake.id, "fav").await.unwrap(), 1);

    let view = repo.unfavorite_article(jake.id, "fav").await.unwrap();
    assert!(!view.favorited);
    assert_eq!(repo.favorite_pair_count(jake.id, "fav").await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_identical_favorites_store_one_row() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    repo.create_article(jake.id, article("Race", &[])).await.unwrap();

    let user_id = jake.id;
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            tokio::spawn(async move { repo.favorite_article(user_id, "race").await })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(
                err,
                RepoError::InvariantViolation(Invariant::DuplicateFavorite)
            )),
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(repo.favorite_pair_count(user_id, "race").await.unwrap(), 1);
}

// --- Comments ---

#[tokio::test]
async fn test_comments_are_owned_and_cascade_with_article() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    let jane = create_test_user(&repo, "jane").await;
    repo.create_article(jake.id, article("Talk", &[])).await.unwrap();

    let first = repo.add_comment("talk", jane.id, "hello".into()).await.unwrap();
    repo.add_comment("talk", jake.id, "hi".into()).await.unwrap();
    assert_eq!(first.author_username.as_deref(), Some("jane"));

    let comments = repo.get_comments("talk").await.unwrap();
    assert_eq!(comments.len(), 2);
    assert_eq!(comments[0].body, "hello");

    assert!(matches!(
        repo.delete_comment("talk", first.id, jake.id).await,
        Err(RepoError::Forbidden(_))
    ));
    assert!(matches!(
        repo.delete_comment("talk", 9999, jane.id).await,
        Err(RepoError::NotFound(_))
    ));
    repo.delete_comment("talk", first.id, jane.id).await.unwrap();
    assert_eq!(repo.get_comments("talk").await.unwrap().len(), 1);

    repo.favorite_article(jane.id, "talk").await.unwrap();
    repo.delete_article("talk", jake.id).await.unwrap();

    // Re-creating the slug starts clean: no comments, no favorites.
    repo.create_article(jake.id, article("Talk", &[])).await.unwrap();
    assert!(repo.get_comments("talk").await.unwrap().is_empty());
    assert_eq!(repo.favorite_pair_count(jane.id, "talk").await.unwrap(), 0);
}

#[tokio::test]
async fn test_comment_on_missing_article_is_not_found() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;

    assert!(matches!(
        repo.add_comment("missing", jake.id, "x".into()).await,
        Err(RepoError::NotFound(_))
    ));
}

#[tokio::test]
async fn test_tags_are_distinct_and_sorted() {
    let repo = repo().await;
    let jake = create_test_user(&repo, "jake").await;
    repo.create_article(jake.id, article("A", &["web", "rust"])).await.unwrap();
    repo.create_article(jake.id, article("B", &["rust", "async"])).await.unwrap();

    assert_eq!(repo.get_tags().await.unwrap(), ["async", "rust", "web"]);
}
