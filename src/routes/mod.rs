/// Router Module Index
///
/// One module per resource. Every route here sits behind the auth gate; which of them
/// actually require a token is decided by the gate's exemption set, not by where a route
/// is registered.
pub mod articles;
pub mod profiles;
pub mod users;

use crate::AppState;
use axum::Router;

/// All `/api` routes, without the gate layer.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(users::user_routes())
        .merge(profiles::profile_routes())
        .merge(articles::article_routes())
}
