use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

pub fn profile_routes() -> Router<AppState> {
    Router::new()
        // GET /api/profiles/{username} (exempt)
        .route("/api/profiles/{username}", get(handlers::get_profile))
        // POST/DELETE /api/profiles/{username}/follow
        // A repeated follow or a self-follow is rejected by storage, not here.
        .route(
            "/api/profiles/{username}/follow",
            post(handlers::follow_user).delete(handlers::unfollow_user),
        )
}
