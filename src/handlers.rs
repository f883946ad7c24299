use crate::{
    AppState,
    auth::{
        AuthUser, CallIdentity,
        password::{hash_password, verify_password},
    },
    error::ApiError,
    models::{
        ArticleChanges, ArticleFilter, ArticleListResponse, ArticleResponse, CommentListResponse,
        CommentResponse, CreateArticleRequest, CreateCommentRequest, FeedParams, LoginRequest,
        NewArticle, NewUser, ProfileResponse, RegisterRequest, TagListResponse,
        UpdateArticleRequest, UpdateUserRequest, User, UserBody, UserChanges, UserResponse,
    },
    repository::RepoError,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

// --- Helpers ---

/// Runs CPU-bound work (argon2) off the async executor.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("blocking task failed: {e}")))
}

fn required(field: &str, value: &str) -> Result<(), ApiError> {
    if value.trim().is_empty() {
        return Err(ApiError::Validation(format!("{field} can't be blank")));
    }
    Ok(())
}

/// Supplied-but-blank counts as a validation failure; absent means unchanged.
fn optional(field: &str, value: Option<&str>) -> Result<(), ApiError> {
    match value {
        Some(value) => required(field, value),
        None => Ok(()),
    }
}

/// Wraps a stored user with a freshly issued token.
fn user_response(state: &AppState, user: User) -> Result<Json<UserResponse>, ApiError> {
    let token = state.tokens.issue(user.id, &user.username)?;
    Ok(Json(UserResponse {
        user: UserBody {
            email: user.email,
            token,
            username: user.username,
            bio: user.bio,
            image: user.image,
        },
    }))
}

// --- Users ---

/// login
///
/// [Exempt] Exchanges email and password for a token. An unknown email and a wrong password
/// produce the same 401.
#[utoipa::path(
    post,
    path = "/api/users/login",
    tag = "users",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = UserResponse),
        (status = 401, description = "Email or password is invalid")
    )
)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let LoginRequest { user: credentials } = payload;
    required("email", &credentials.email)?;
    required("password", &credentials.password)?;

    let user = state
        .repo
        .get_user_by_email(&credentials.email)
        .await?
        .ok_or(ApiError::InvalidCredentials)?;

    let hash = user.password_hash.clone();
    let matches = blocking(move || verify_password(&hash, &credentials.password)).await?;
    if !matches {
        tracing::info!(user_id = %user.id, "login refused");
        return Err(ApiError::InvalidCredentials);
    }

    user_response(&state, user)
}

/// register
///
/// [Exempt] Creates an account and logs it in.
#[utoipa::path(
    post,
    path = "/api/users",
    tag = "users",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Registered", body = UserResponse),
        (status = 409, description = "Username or email already taken"),
        (status = 422, description = "Missing field")
    )
)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let RegisterRequest { user: input } = payload;
    required("username", &input.username)?;
    required("email", &input.email)?;
    required("password", &input.password)?;

    let password = input.password;
    let password_hash = blocking(move || hash_password(&password)).await??;

    let user = state
        .repo
        .create_user(NewUser {
            username: input.username,
            email: input.email,
            password_hash,
        })
        .await?;
    tracing::info!(user_id = %user.id, username = %user.username, "user registered");

    Ok((StatusCode::CREATED, user_response(&state, user)?))
}

#[utoipa::path(
    get,
    path = "/api/user",
    tag = "users",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn get_current_user(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
) -> Result<Json<UserResponse>, ApiError> {
    let user = state
        .repo
        .get_user(identity.user_id)
        .await?
        .ok_or(RepoError::NotFound("user"))?;
    user_response(&state, user)
}

/// update_user
///
/// Only the fields present in the body change. A new password is hashed before storage.
#[utoipa::path(
    put,
    path = "/api/user",
    tag = "users",
    security(("bearer_auth" = [])),
    request_body = UpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = UserResponse),
        (status = 401, description = "Unauthenticated"),
        (status = 409, description = "Username or email already taken")
    )
)]
pub async fn update_user(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<UserResponse>, ApiError> {
    let UpdateUserRequest { user: input } = payload;
    optional("username", input.username.as_deref())?;
    optional("email", input.email.as_deref())?;
    optional("password", input.password.as_deref())?;

    let password_hash = match input.password {
        Some(password) => Some(blocking(move || hash_password(&password)).await??),
        None => None,
    };

    let changes = UserChanges {
        username: input.username,
        email: input.email,
        password_hash,
        bio: input.bio,
        image: input.image,
    };
    let user = state.repo.update_user(identity.user_id, changes).await?;
    user_response(&state, user)
}

// --- Profiles ---

#[utoipa::path(
    get,
    path = "/api/profiles/{username}",
    tag = "profiles",
    params(("username" = String, Path, description = "Profile username")),
    responses(
        (status = 200, description = "Profile", body = ProfileResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_profile(
    identity: CallIdentity,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state
        .repo
        .get_profile(&username, identity.user_id())
        .await?;
    Ok(Json(ProfileResponse { profile }))
}

/// follow_user
///
/// A repeated follow is a 409; following yourself is a 422.
#[utoipa::path(
    post,
    path = "/api/profiles/{username}/follow",
    tag = "profiles",
    security(("bearer_auth" = [])),
    params(("username" = String, Path, description = "User to follow")),
    responses(
        (status = 200, description = "Followed", body = ProfileResponse),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Already followed"),
        (status = 422, description = "Self-follow")
    )
)]
pub async fn follow_user(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state.repo.follow(identity.user_id, &username).await?;
    Ok(Json(ProfileResponse { profile }))
}

#[utoipa::path(
    delete,
    path = "/api/profiles/{username}/follow",
    tag = "profiles",
    security(("bearer_auth" = [])),
    params(("username" = String, Path, description = "User to unfollow")),
    responses(
        (status = 200, description = "Unfollowed", body = ProfileResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn unfollow_user(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<ProfileResponse>, ApiError> {
    let profile = state.repo.unfollow(identity.user_id, &username).await?;
    Ok(Json(ProfileResponse { profile }))
}

// --- Articles ---

/// list_articles
///
/// [Exempt] Newest first. The gate attaches an anonymous identity here, so `favorited`
/// is always `false`.
#[utoipa::path(
    get,
    path = "/api/articles",
    tag = "articles",
    params(ArticleFilter),
    responses((status = 200, description = "Articles", body = ArticleListResponse))
)]
pub async fn list_articles(
    identity: CallIdentity,
    State(state): State<AppState>,
    Query(filter): Query<ArticleFilter>,
) -> Result<Json<ArticleListResponse>, ApiError> {
    let page = state
        .repo
        .list_articles(&filter, identity.user_id())
        .await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/api/articles/feed",
    tag = "articles",
    security(("bearer_auth" = [])),
    params(FeedParams),
    responses(
        (status = 200, description = "Articles by followed authors", body = ArticleListResponse),
        (status = 401, description = "Unauthenticated")
    )
)]
pub async fn feed_articles(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Query(params): Query<FeedParams>,
) -> Result<Json<ArticleListResponse>, ApiError> {
    let page = state.repo.feed_articles(identity.user_id, params).await?;
    Ok(Json(page.into()))
}

#[utoipa::path(
    get,
    path = "/api/articles/{slug}",
    tag = "articles",
    params(("slug" = String, Path, description = "Article slug")),
    responses(
        (status = 200, description = "Article", body = ArticleResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_article(
    identity: CallIdentity,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ArticleResponse>, ApiError> {
    let article = state.repo.get_article(&slug, identity.user_id()).await?;
    Ok(Json(ArticleResponse { article }))
}

/// create_article
///
/// The slug is derived from the title; a title that slugifies to the slug of an existing
/// article is a 409.
#[utoipa::path(
    post,
    path = "/api/articles",
    tag = "articles",
    security(("bearer_auth" = [])),
    request_body = CreateArticleRequest,
    responses(
        (status = 201, description = "Created", body = ArticleResponse),
        (status = 401, description = "Unauthenticated"),
        (status = 409, description = "Slug already taken"),
        (status = 422, description = "Missing field")
    )
)]
pub async fn create_article(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateArticleRequest>,
) -> Result<(StatusCode, Json<ArticleResponse>), ApiError> {
    let CreateArticleRequest { article: input } = payload;
    required("title", &input.title)?;
    required("body", &input.body)?;

    let article = NewArticle {
        title: input.title,
        description: input.description,
        body: input.body,
        tag_list: input.tag_list,
    };
    if article.slug().is_empty() {
        return Err(ApiError::Validation("title must contain a letter or digit".into()));
    }

    let article = state.repo.create_article(identity.user_id, article).await?;
    tracing::info!(slug = %article.slug, author = %identity.username, "article created");
    Ok((StatusCode::CREATED, Json(ArticleResponse { article })))
}

#[utoipa::path(
    put,
    path = "/api/articles/{slug}",
    tag = "articles",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Article slug")),
    request_body = UpdateArticleRequest,
    responses(
        (status = 200, description = "Updated", body = ArticleResponse),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn update_article(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<UpdateArticleRequest>,
) -> Result<Json<ArticleResponse>, ApiError> {
    let UpdateArticleRequest { article: input } = payload;
    optional("title", input.title.as_deref())?;
    optional("body", input.body.as_deref())?;

    let changes = ArticleChanges {
        title: input.title,
        description: input.description,
        body: input.body,
    };
    if changes.slug().is_some_and(|s| s.is_empty()) {
        return Err(ApiError::Validation("title must contain a letter or digit".into()));
    }

    let article = state
        .repo
        .update_article(&slug, identity.user_id, changes)
        .await?;
    Ok(Json(ArticleResponse { article }))
}

/// delete_article
///
/// Author-only. Removes the article together with its comments and favorites.
#[utoipa::path(
    delete,
    path = "/api/articles/{slug}",
    tag = "articles",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Article slug")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_article(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.repo.delete_article(&slug, identity.user_id).await?;
    tracing::info!(%slug, author = %identity.username, "article deleted");
    Ok(StatusCode::NO_CONTENT)
}

// --- Favorites ---

/// favorite_article
///
/// Not idempotent: favoriting the same article twice is a 409 and storage keeps one row.
#[utoipa::path(
    post,
    path = "/api/articles/{slug}/favorite",
    tag = "favorites",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Article slug")),
    responses(
        (status = 200, description = "Favorited", body = ArticleResponse),
        (status = 404, description = "Not Found"),
        (status = 409, description = "Already favorited")
    )
)]
pub async fn favorite_article(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ArticleResponse>, ApiError> {
    let article = state.repo.favorite_article(identity.user_id, &slug).await?;
    Ok(Json(ArticleResponse { article }))
}

#[utoipa::path(
    delete,
    path = "/api/articles/{slug}/favorite",
    tag = "favorites",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Article slug")),
    responses(
        (status = 200, description = "Unfavorited", body = ArticleResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn unfavorite_article(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ArticleResponse>, ApiError> {
    let article = state
        .repo
        .unfavorite_article(identity.user_id, &slug)
        .await?;
    Ok(Json(ArticleResponse { article }))
}

// --- Comments ---

#[utoipa::path(
    post,
    path = "/api/articles/{slug}/comments",
    tag = "comments",
    security(("bearer_auth" = [])),
    params(("slug" = String, Path, description = "Article slug")),
    request_body = CreateCommentRequest,
    responses(
        (status = 201, description = "Comment Added", body = CommentResponse),
        (status = 404, description = "Not Found"),
        (status = 422, description = "Empty body")
    )
)]
pub async fn add_comment(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path(slug): Path<String>,
    Json(payload): Json<CreateCommentRequest>,
) -> Result<(StatusCode, Json<CommentResponse>), ApiError> {
    let body = payload.comment.body;
    required("body", &body)?;

    let comment = state.repo.add_comment(&slug, identity.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(CommentResponse { comment })))
}

/// get_comments
///
/// [Exempt] Oldest first.
#[utoipa::path(
    get,
    path = "/api/articles/{slug}/comments",
    tag = "comments",
    params(("slug" = String, Path, description = "Article slug")),
    responses(
        (status = 200, description = "Comments", body = CommentListResponse),
        (status = 404, description = "Not Found")
    )
)]
pub async fn get_comments(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<CommentListResponse>, ApiError> {
    let comments = state.repo.get_comments(&slug).await?;
    Ok(Json(CommentListResponse { comments }))
}

#[utoipa::path(
    delete,
    path = "/api/articles/{slug}/comments/{id}",
    tag = "comments",
    security(("bearer_auth" = [])),
    params(
        ("slug" = String, Path, description = "Article slug"),
        ("id" = i64, Path, description = "Comment ID")
    ),
    responses(
        (status = 204, description = "Deleted"),
        (status = 403, description = "Not the author"),
        (status = 404, description = "Not Found")
    )
)]
pub async fn delete_comment(
    AuthUser(identity): AuthUser,
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, i64)>,
) -> Result<StatusCode, ApiError> {
    state
        .repo
        .delete_comment(&slug, id, identity.user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// --- Tags ---

#[utoipa::path(
    get,
    path = "/api/tags",
    tag = "tags",
    responses((status = 200, description = "Every tag in use", body = TagListResponse))
)]
pub async fn get_tags(State(state): State<AppState>) -> Result<Json<TagListResponse>, ApiError> {
    let tags = state.repo.get_tags().await?;
    Ok(Json(TagListResponse { tags }))
}
