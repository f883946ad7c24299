use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, post},
};

/// Article Router Module
///
/// Articles, their comments and favorites, plus the tag list.
/// Reads (list, get, comments, tags) are exempt from the gate; every write needs a token.
pub fn article_routes() -> Router<AppState> {
    Router::new()
        // GET /api/articles?tag=&author=&favorited=&limit=&offset= (exempt)
        // POST /api/articles
        .route(
            "/api/articles",
            get(handlers::list_articles).post(handlers::create_article),
        )
        // GET /api/articles/feed
        // Registered as a literal segment so it wins over `{slug}`.
        .route("/api/articles/feed", get(handlers::feed_articles))
        // GET (exempt) / PUT / DELETE /api/articles/{slug}
        .route(
            "/api/articles/{slug}",
            get(handlers::get_article)
                .put(handlers::update_article)
                .delete(handlers::delete_article),
        )
        // POST/DELETE /api/articles/{slug}/favorite
        // Favoriting twice is a 409, enforced by the composite key on favorites.
        .route(
            "/api/articles/{slug}/favorite",
            post(handlers::favorite_article).delete(handlers::unfavorite_article),
        )
        // GET (exempt) / POST /api/articles/{slug}/comments
        .route(
            "/api/articles/{slug}/comments",
            get(handlers::get_comments).post(handlers::add_comment),
        )
        // DELETE /api/articles/{slug}/comments/{id}
        .route(
            "/api/articles/{slug}/comments/{id}",
            delete(handlers::delete_comment),
        )
        // GET /api/tags (exempt)
        .route("/api/tags", get(handlers::get_tags))
}
