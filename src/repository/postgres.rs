use super::{RepoError, RepoResult, Repository};
use crate::models::{
    ArticleChanges, ArticleFilter, ArticlePage, ArticleView, Comment, FeedParams, NewArticle,
    NewUser, Profile, User, UserChanges,
};
use crate::schema::{self, Invariant, SchemaError};
use async_trait::async_trait;
use sqlx::{FromRow, PgPool, Postgres, Transaction, query_builder::QueryBuilder};
use uuid::Uuid;

const USER_COLUMNS: &str =
    "id, username, email, password_hash, bio, image, created_at, updated_at";

// `$1` is always the viewer, bound as NULL for anonymous calls.
const ARTICLE_VIEW_SELECT: &str = r#"
    SELECT
        a.id, a.slug, a.title, a.description, a.body, a.tag_list, a.author_id,
        u.username AS author_username, a.created_at, a.updated_at,
        (SELECT COUNT(*) FROM article_favorites f WHERE f.article_id = a.id) AS favorites_count,
        EXISTS(
            SELECT 1 FROM article_favorites f WHERE f.article_id = a.id AND f.user_id = $1
        ) AS favorited
    FROM articles a
    JOIN users u ON u.id = a.author_id
"#;

const COMMENT_SELECT: &str = r#"
    SELECT c.id, c.body, c.article_id, c.author_id, c.created_at, c.updated_at,
           u.username AS author_username
    FROM comments c
    JOIN users u ON u.id = c.author_id
"#;

/// A listing row: the article plus the window count of all rows matching the filter.
#[derive(FromRow)]
struct ArticleRow {
    #[sqlx(flatten)]
    view: ArticleView,
    total_count: i64,
}

fn into_page(rows: Vec<ArticleRow>) -> ArticlePage {
    let total = rows.first().map(|r| r.total_count).unwrap_or(0);
    ArticlePage {
        articles: rows.into_iter().map(|r| r.view).collect(),
        total,
    }
}

/// Starts a listing query. Callers append `AND ...` predicates, then `finish_page`.
fn page_query(viewer: Option<Uuid>) -> QueryBuilder<'static, Postgres> {
    let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
        r#"
        SELECT
            a.id, a.slug, a.title, a.description, a.body, a.tag_list, a.author_id,
            u.username AS author_username, a.created_at, a.updated_at,
            (SELECT COUNT(*) FROM article_favorites f WHERE f.article_id = a.id) AS favorites_count,
            EXISTS(SELECT 1 FROM article_favorites f WHERE f.article_id = a.id AND f.user_id = "#,
    );
    builder.push_bind(viewer);
    builder.push(
        r#") AS favorited,
            COUNT(*) OVER () AS total_count
        FROM articles a
        JOIN users u ON u.id = a.author_id
        WHERE TRUE"#,
    );
    builder
}

fn finish_page(builder: &mut QueryBuilder<'static, Postgres>, limit: i64, offset: i64) {
    builder.push(" ORDER BY a.created_at DESC, a.id LIMIT ");
    builder.push_bind(limit);
    builder.push(" OFFSET ");
    builder.push_bind(offset);
}

/// PostgresRepository
///
/// The `Repository` backed by PostgreSQL. Invariants are enforced by the constraints
/// `schema::ensure_schema` creates, so check and insert are one atomic statement.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn view_by_id(
        tx: &mut Transaction<'_, Postgres>,
        id: Uuid,
        viewer: Option<Uuid>,
    ) -> RepoResult<ArticleView> {
        let sql = format!("{ARTICLE_VIEW_SELECT} WHERE a.id = $2");
        let view = sqlx::query_as::<_, ArticleView>(&sql)
            .bind(viewer)
            .bind(id)
            .fetch_one(&mut **tx)
            .await?;
        Ok(view)
    }

    /// Locks the article row and checks it belongs to `author`.
    async fn lock_owned_article(
        tx: &mut Transaction<'_, Postgres>,
        slug: &str,
        author: Uuid,
    ) -> RepoResult<Uuid> {
        let row: Option<(Uuid, Uuid)> =
            sqlx::query_as("SELECT id, author_id FROM articles WHERE slug = $1 FOR UPDATE")
                .bind(slug)
                .fetch_optional(&mut **tx)
                .await?;
        match row {
            None => Err(RepoError::NotFound("article")),
            Some((_, owner)) if owner != author => Err(RepoError::Forbidden("article")),
            Some((id, _)) => Ok(id),
        }
    }

    async fn article_id(&self, slug: &str) -> RepoResult<Uuid> {
        sqlx::query_scalar("SELECT id FROM articles WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound("article"))
    }

    async fn user_by_username(&self, username: &str) -> RepoResult<User> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, User>(&sql)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound("profile"))
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn ensure_schema(&self) -> Result<(), SchemaError> {
        schema::ensure_schema(&self.pool).await
    }

    // --- USERS ---

    async fn create_user(&self, user: NewUser) -> RepoResult<User> {
        let sql = format!(
            "INSERT INTO users (id, username, email, password_hash) VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let created = sqlx::query_as::<_, User>(&sql)
            .bind(Uuid::new_v4())
            .bind(user.username)
            .bind(user.email)
            .bind(user.password_hash)
            .fetch_one(&self.pool)
            .await?;
        Ok(created)
    }

    async fn get_user(&self, id: Uuid) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_user_by_email(&self, email: &str) -> RepoResult<Option<User>> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        Ok(sqlx::query_as::<_, User>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    /// Uses `COALESCE` so only the supplied fields change.
    async fn update_user(&self, id: Uuid, changes: UserChanges) -> RepoResult<User> {
        let sql = format!(
            r#"
            UPDATE users
            SET username = COALESCE($2, username),
                email = COALESCE($3, email),
                password_hash = COALESCE($4, password_hash),
                bio = COALESCE($5, bio),
                image = COALESCE($6, image),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, User>(&sql)
            .bind(id)
            .bind(changes.username)
            .bind(changes.email)
            .bind(changes.password_hash)
            .bind(changes.bio)
            .bind(changes.image)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound("user"))
    }

    // --- PROFILES & FOLLOWING ---

    async fn get_profile(&self, username: &str, viewer: Option<Uuid>) -> RepoResult<Profile> {
        sqlx::query_as::<_, Profile>(
            r#"
            SELECT u.username, u.bio, u.image,
                   EXISTS(
                       SELECT 1 FROM followings f
                       WHERE f.followee_id = u.id AND f.follower_id = $2
                   ) AS following
            FROM users u
            WHERE u.username = $1
            "#,
        )
        .bind(username)
        .bind(viewer)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound("profile"))
    }

    /// The composite primary key rejects a repeated follow. The CHECK constraint backs the
    /// self-follow comparison.
    async fn follow(&self, follower: Uuid, followee: &str) -> RepoResult<Profile> {
        let target = self.user_by_username(followee).await?;
        if target.id == follower {
            return Err(RepoError::InvariantViolation(Invariant::SelfFollow));
        }

        sqlx::query("INSERT INTO followings (follower_id, followee_id) VALUES ($1, $2)")
            .bind(follower)
            .bind(target.id)
            .execute(&self.pool)
            .await?;

        Ok(Profile {
            username: target.username,
            bio: target.bio,
            image: target.image,
            following: true,
        })
    }

    async fn unfollow(&self, follower: Uuid, followee: &str) -> RepoResult<Profile> {
        let target = self.user_by_username(followee).await?;

        sqlx::query("DELETE FROM followings WHERE follower_id = $1 AND followee_id = $2")
            .bind(follower)
            .bind(target.id)
            .execute(&self.pool)
            .await?;

        Ok(Profile {
            username: target.username,
            bio: target.bio,
            image: target.image,
            following: false,
        })
    }

    // --- ARTICLES ---

    async fn create_article(&self, author: Uuid, article: NewArticle) -> RepoResult<ArticleView> {
        let id = Uuid::new_v4();
        let slug = article.slug();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO articles (id, slug, title, description, body, tag_list, author_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(id)
        .bind(slug)
        .bind(article.title)
        .bind(article.description)
        .bind(article.body)
        .bind(article.tag_list)
        .bind(author)
        .execute(&mut *tx)
        .await?;

        let view = Self::view_by_id(&mut tx, id, Some(author)).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn get_article(&self, slug: &str, viewer: Option<Uuid>) -> RepoResult<ArticleView> {
        let sql = format!("{ARTICLE_VIEW_SELECT} WHERE a.slug = $2");
        sqlx::query_as::<_, ArticleView>(&sql)
            .bind(viewer)
            .bind(slug)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(RepoError::NotFound("article"))
    }

    /// list_articles
    ///
    /// Builds the filter with `QueryBuilder` so every user-supplied value is a bound parameter.
    async fn list_articles(
        &self,
        filter: &ArticleFilter,
        viewer: Option<Uuid>,
    ) -> RepoResult<ArticlePage> {
        let mut builder = page_query(viewer);

        if let Some(tag) = &filter.tag {
            builder.push(" AND ");
            builder.push_bind(tag.clone());
            builder.push(" = ANY(a.tag_list)");
        }
        if let Some(author) = &filter.author {
            builder.push(" AND u.username = ");
            builder.push_bind(author.clone());
        }
        if let Some(favorited_by) = &filter.favorited {
            builder.push(
                " AND EXISTS(SELECT 1 FROM article_favorites ff JOIN users fu ON fu.id = ff.user_id \
                 WHERE ff.article_id = a.id AND fu.username = ",
            );
            builder.push_bind(favorited_by.clone());
            builder.push(")");
        }
        finish_page(&mut builder, filter.limit(), filter.offset());

        let rows = builder
            .build_query_as::<ArticleRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(into_page(rows))
    }

    async fn feed_articles(&self, user: Uuid, params: FeedParams) -> RepoResult<ArticlePage> {
        let mut builder = page_query(Some(user));
        builder.push(" AND a.author_id IN (SELECT followee_id FROM followings WHERE follower_id = ");
        builder.push_bind(user);
        builder.push(")");
        finish_page(&mut builder, params.limit(), params.offset());

        let rows = builder
            .build_query_as::<ArticleRow>()
            .fetch_all(&self.pool)
            .await?;
        Ok(into_page(rows))
    }

    async fn update_article(
        &self,
        slug: &str,
        author: Uuid,
        changes: ArticleChanges,
    ) -> RepoResult<ArticleView> {
        let new_slug = changes.slug();
        let mut tx = self.pool.begin().await?;
        let id = Self::lock_owned_article(&mut tx, slug, author).await?;

        sqlx::query(
            r#"
            UPDATE articles
            SET title = COALESCE($2, title),
                slug = COALESCE($3, slug),
                description = COALESCE($4, description),
                body = COALESCE($5, body),
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(changes.title)
        .bind(new_slug)
        .bind(changes.description)
        .bind(changes.body)
        .execute(&mut *tx)
        .await?;

        let view = Self::view_by_id(&mut tx, id, Some(author)).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn delete_article(&self, slug: &str, author: Uuid) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;
        let id = Self::lock_owned_article(&mut tx, slug, author).await?;

        sqlx::query("DELETE FROM articles WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // --- FAVORITES ---

    /// A plain INSERT inside the transaction: under a race the composite primary key lets
    /// exactly one writer through and the other gets `DuplicateFavorite`.
    async fn favorite_article(&self, user: Uuid, slug: &str) -> RepoResult<ArticleView> {
        let mut tx = self.pool.begin().await?;

        let article_id: Uuid = sqlx::query_scalar("SELECT id FROM articles WHERE slug = $1")
            .bind(slug)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(RepoError::NotFound("article"))?;

        sqlx::query("INSERT INTO article_favorites (user_id, article_id) VALUES ($1, $2)")
            .bind(user)
            .bind(article_id)
            .execute(&mut *tx)
            .await?;

        let view = Self::view_by_id(&mut tx, article_id, Some(user)).await?;
        tx.commit().await?;
        Ok(view)
    }

    async fn unfavorite_article(&self, user: Uuid, slug: &str) -> RepoResult<ArticleView> {
        let article_id = self.article_id(slug).await?;

        sqlx::query("DELETE FROM article_favorites WHERE user_id = $1 AND article_id = $2")
            .bind(user)
            .bind(article_id)
            .execute(&self.pool)
            .await?;

        self.get_article(slug, Some(user)).await
    }

    async fn favorite_pair_count(&self, user: Uuid, slug: &str) -> RepoResult<i64> {
        let count = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM article_favorites f
            JOIN articles a ON a.id = f.article_id
            WHERE f.user_id = $1 AND a.slug = $2
            "#,
        )
        .bind(user)
        .bind(slug)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // --- COMMENTS ---

    /// Inserts through a CTE and joins `users` in the same statement to return the author name.
    async fn add_comment(&self, slug: &str, author: Uuid, body: String) -> RepoResult<Comment> {
        sqlx::query_as::<_, Comment>(
            r#"
            WITH inserted AS (
                INSERT INTO comments (body, article_id, author_id)
                SELECT $1, a.id, $2 FROM articles a WHERE a.slug = $3
                RETURNING id, body, article_id, author_id, created_at, updated_at
            )
            SELECT i.id, i.body, i.article_id, i.author_id, i.created_at, i.updated_at,
                   u.username AS author_username
            FROM inserted i
            JOIN users u ON u.id = i.author_id
            "#,
        )
        .bind(body)
        .bind(author)
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepoError::NotFound("article"))
    }

    async fn get_comments(&self, slug: &str) -> RepoResult<Vec<Comment>> {
        let article_id = self.article_id(slug).await?;
        let sql = format!("{COMMENT_SELECT} WHERE c.article_id = $1 ORDER BY c.created_at, c.id");
        Ok(sqlx::query_as::<_, Comment>(&sql)
            .bind(article_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn delete_comment(&self, slug: &str, id: i64, author: Uuid) -> RepoResult<()> {
        let mut tx = self.pool.begin().await?;

        let owner: Option<Uuid> = sqlx::query_scalar(
            r#"
            SELECT c.author_id
            FROM comments c
            JOIN articles a ON a.id = c.article_id
            WHERE c.id = $1 AND a.slug = $2
            FOR UPDATE OF c
            "#,
        )
        .bind(id)
        .bind(slug)
        .fetch_optional(&mut *tx)
        .await?;

        match owner {
            None => return Err(RepoError::NotFound("comment")),
            Some(owner) if owner != author => return Err(RepoError::Forbidden("comment")),
            Some(_) => {}
        }

        sqlx::query("DELETE FROM comments WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    // --- TAGS ---

    async fn get_tags(&self) -> RepoResult<Vec<String>> {
        Ok(
            sqlx::query_scalar("SELECT DISTINCT unnest(tag_list) AS tag FROM articles ORDER BY tag")
                .fetch_all(&self.pool)
                .await?,
        )
    }
}
