//! Structural definition of the social-graph tables and the `ensure_schema` contract.
//!
//! Every statement is idempotent (`IF NOT EXISTS`), so the whole set can be replayed on each
//! process start. Uniqueness, foreign keys and the self-follow check live in the database so
//! concurrent writers cannot slip past them.

use sqlx::PgPool;
use thiserror::Error;

/// Invariant
///
/// Named structural invariants a write can violate. Each maps to exactly one constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invariant {
    DuplicateFavorite,
    DuplicateFollow,
    SelfFollow,
    DuplicateSlug,
    DuplicateUsername,
    DuplicateEmail,
}

impl std::fmt::Display for Invariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Invariant::DuplicateFavorite => "article is already favorited",
            Invariant::DuplicateFollow => "user is already followed",
            Invariant::SelfFollow => "users cannot follow themselves",
            Invariant::DuplicateSlug => "an article with this slug already exists",
            Invariant::DuplicateUsername => "username is already taken",
            Invariant::DuplicateEmail => "email is already registered",
        };
        f.write_str(msg)
    }
}

/// SchemaError
///
/// Startup failure while creating or checking the schema. Always fatal.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema statement failed: {0}")]
    Database(#[from] sqlx::Error),
    #[error("existing table `{table}` conflicts with the expected structure: missing column `{column}`")]
    Conflict {
        table: &'static str,
        column: &'static str,
    },
    #[error("existing table `{table}` conflicts with the expected structure: missing constraint `{constraint}`")]
    MissingConstraint {
        table: &'static str,
        constraint: &'static str,
    },
}

/// TableDef
///
/// One table: its DDL and the columns and named constraints a pre-existing table must carry
/// to be accepted.
#[derive(Debug, Clone, Copy)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [&'static str],
    pub constraints: &'static [&'static str],
    pub ddl: &'static str,
}

// Constraint names are spelled out so violations can be mapped back to an `Invariant`.
pub const USERS_USERNAME_KEY: &str = "users_username_key";
pub const USERS_EMAIL_KEY: &str = "users_email_key";
pub const ARTICLES_SLUG_KEY: &str = "articles_slug_key";
pub const ARTICLE_FAVORITES_PKEY: &str = "article_favorites_pkey";
pub const FOLLOWINGS_PKEY: &str = "followings_pkey";
pub const FOLLOWINGS_NO_SELF_FOLLOW: &str = "followings_no_self_follow";

/// Tables in dependency order: referenced tables come first.
pub const TABLES: &[TableDef] = &[
    TableDef {
        name: "users",
        columns: &[
            "id",
            "username",
            "email",
            "password_hash",
            "bio",
            "image",
            "created_at",
            "updated_at",
        ],
        constraints: &[USERS_USERNAME_KEY, USERS_EMAIL_KEY],
        ddl: r#"
        CREATE TABLE IF NOT EXISTS users (
            id UUID PRIMARY KEY,
            username TEXT NOT NULL,
            email TEXT NOT NULL,
            password_hash TEXT NOT NULL,
            bio TEXT,
            image TEXT,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT users_username_key UNIQUE (username),
            CONSTRAINT users_email_key UNIQUE (email)
        )
        "#,
    },
    TableDef {
        name: "articles",
        columns: &[
            "id",
            "slug",
            "title",
            "description",
            "body",
            "tag_list",
            "author_id",
            "created_at",
            "updated_at",
        ],
        constraints: &[ARTICLES_SLUG_KEY],
        ddl: r#"
        CREATE TABLE IF NOT EXISTS articles (
            id UUID PRIMARY KEY,
            slug TEXT NOT NULL,
            title TEXT NOT NULL,
            description TEXT NOT NULL DEFAULT '',
            body TEXT NOT NULL,
            tag_list TEXT[] NOT NULL DEFAULT '{}',
            author_id UUID NOT NULL REFERENCES users (id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT articles_slug_key UNIQUE (slug)
        )
        "#,
    },
    TableDef {
        name: "comments",
        columns: &[
            "id",
            "body",
            "article_id",
            "author_id",
            "created_at",
            "updated_at",
        ],
        constraints: &[],
        ddl: r#"
        CREATE TABLE IF NOT EXISTS comments (
            id BIGSERIAL PRIMARY KEY,
            body TEXT NOT NULL,
            article_id UUID NOT NULL REFERENCES articles (id) ON DELETE CASCADE,
            author_id UUID NOT NULL REFERENCES users (id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )
        "#,
    },
    TableDef {
        name: "article_favorites",
        columns: &["user_id", "article_id", "created_at"],
        constraints: &[ARTICLE_FAVORITES_PKEY],
        ddl: r#"
        CREATE TABLE IF NOT EXISTS article_favorites (
            user_id UUID NOT NULL REFERENCES users (id),
            article_id UUID NOT NULL REFERENCES articles (id) ON DELETE CASCADE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT article_favorites_pkey PRIMARY KEY (user_id, article_id)
        )
        "#,
    },
    TableDef {
        name: "followings",
        columns: &["follower_id", "followee_id", "created_at"],
        constraints: &[FOLLOWINGS_PKEY, FOLLOWINGS_NO_SELF_FOLLOW],
        ddl: r#"
        CREATE TABLE IF NOT EXISTS followings (
            follower_id UUID NOT NULL REFERENCES users (id),
            followee_id UUID NOT NULL REFERENCES users (id),
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            CONSTRAINT followings_pkey PRIMARY KEY (follower_id, followee_id),
            CONSTRAINT followings_no_self_follow CHECK (follower_id <> followee_id)
        )
        "#,
    },
];

/// Lookup indexes for the foreign keys the listings filter on.
pub const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS articles_author_id_idx ON articles (author_id)",
    "CREATE INDEX IF NOT EXISTS articles_created_at_idx ON articles (created_at DESC)",
    "CREATE INDEX IF NOT EXISTS comments_article_id_idx ON comments (article_id)",
    "CREATE INDEX IF NOT EXISTS article_favorites_article_id_idx ON article_favorites (article_id)",
    "CREATE INDEX IF NOT EXISTS followings_followee_id_idx ON followings (followee_id)",
];

/// Advisory lock key held while the DDL runs, so concurrent starters take turns.
const SCHEMA_LOCK_KEY: i64 = 0x636f_6e64_7569_74;

pub fn table_names() -> Vec<&'static str> {
    TABLES.iter().map(|t| t.name).collect()
}

/// Maps a violated constraint name back to the invariant it guards.
pub fn invariant_for_constraint(constraint: &str) -> Option<Invariant> {
    match constraint {
        ARTICLE_FAVORITES_PKEY => Some(Invariant::DuplicateFavorite),
        FOLLOWINGS_PKEY => Some(Invariant::DuplicateFollow),
        FOLLOWINGS_NO_SELF_FOLLOW => Some(Invariant::SelfFollow),
        ARTICLES_SLUG_KEY => Some(Invariant::DuplicateSlug),
        USERS_USERNAME_KEY => Some(Invariant::DuplicateUsername),
        USERS_EMAIL_KEY => Some(Invariant::DuplicateEmail),
        _ => None,
    }
}

/// ensure_schema
///
/// Creates every table and index that is missing, then checks that tables which already
/// existed carry the expected columns and the constraints invariants depend on. Runs in one
/// transaction under an advisory lock.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), SchemaError> {
    let mut tx = pool.begin().await?;

    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(SCHEMA_LOCK_KEY)
        .execute(&mut *tx)
        .await?;

    for table in TABLES {
        tracing::debug!(table = table.name, "ensuring table");
        sqlx::query(table.ddl).execute(&mut *tx).await?;
    }
    for index in INDEXES {
        sqlx::query(index).execute(&mut *tx).await?;
    }

    let names: Vec<String> = table_names().into_iter().map(str::to_owned).collect();

    let columns: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT table_name::text, column_name::text
        FROM information_schema.columns
        WHERE table_schema = current_schema() AND table_name = ANY($1)
        "#,
    )
    .bind(names.clone())
    .fetch_all(&mut *tx)
    .await?;

    verify_columns(&columns)?;

    let constraints: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT rel.relname::text, con.conname::text
        FROM pg_constraint con
        JOIN pg_class rel ON rel.oid = con.conrelid
        JOIN pg_namespace nsp ON nsp.oid = rel.relnamespace
        WHERE nsp.nspname = current_schema() AND rel.relname = ANY($1)
        "#,
    )
    .bind(names)
    .fetch_all(&mut *tx)
    .await?;

    verify_constraints(&constraints)?;

    tx.commit().await?;
    tracing::info!(tables = TABLES.len(), "schema verified");
    Ok(())
}

/// Checks a live `(table, column)` listing against `TABLES`.
pub fn verify_columns(present: &[(String, String)]) -> Result<(), SchemaError> {
    for table in TABLES {
        for &column in table.columns {
            let found = present
                .iter()
                .any(|(t, c)| t.as_str() == table.name && c.as_str() == column);
            if !found {
                return Err(SchemaError::Conflict {
                    table: table.name,
                    column,
                });
            }
        }
    }
    Ok(())
}

/// Checks a live `(table, constraint name)` listing against `TABLES`. A legacy table with the
/// right columns but without a key or check would let duplicates through.
pub fn verify_constraints(present: &[(String, String)]) -> Result<(), SchemaError> {
    for table in TABLES {
        for &constraint in table.constraints {
            let found = present
                .iter()
                .any(|(t, c)| t.as_str() == table.name && c.as_str() == constraint);
            if !found {
                return Err(SchemaError::MissingConstraint {
                    table: table.name,
                    constraint,
                });
            }
        }
    }
    Ok(())
}
