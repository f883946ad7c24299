use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Account routes: login, registration and the caller's own user record.
pub fn user_routes() -> Router<AppState> {
    Router::new()
        // POST /api/users/login (exempt)
        .route("/api/users/login", post(handlers::login))
        // POST /api/users (exempt)
        .route("/api/users", post(handlers::register))
        // GET/PUT /api/user
        .route(
            "/api/user",
            get(handlers::get_current_user).put(handlers::update_user),
        )
}
