use axum::{
    Router,
    extract::FromRef,
    http::{HeaderName, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::get,
};
use std::{any::Any, sync::Arc, time::Duration};
use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

use tower::ServiceBuilder;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{self, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, Span};

// --- Module Structure ---

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod models;
pub mod repository;
pub mod routes;
pub mod schema;

use auth::{AuthGate, GateState, OperationClassifier, TokenIssuer, TokenVerifier, gate_middleware};

// --- Public Re-exports ---

pub use config::AppConfig;
pub use error::ApiError;
pub use repository::{MemoryRepository, PostgresRepository, Repository, RepositoryState};

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// ApiDoc
///
/// OpenAPI document for every operation, served at `/api-docs/openapi.json` and browsable
/// through the Swagger UI.
#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::login, handlers::register, handlers::get_current_user, handlers::update_user,
        handlers::get_profile, handlers::follow_user, handlers::unfollow_user,
        handlers::list_articles, handlers::feed_articles, handlers::get_article,
        handlers::create_article, handlers::update_article, handlers::delete_article,
        handlers::favorite_article, handlers::unfavorite_article,
        handlers::add_comment, handlers::get_comments, handlers::delete_comment,
        handlers::get_tags
    ),
    components(
        schemas(
            models::LoginRequest, models::LoginUser, models::RegisterRequest, models::RegisterUser,
            models::UpdateUserRequest, models::UpdateUser, models::UserResponse, models::UserBody,
            models::Profile, models::ProfileResponse, models::ArticleView, models::ArticleResponse,
            models::ArticleListResponse, models::CreateArticleRequest, models::CreateArticle,
            models::UpdateArticleRequest, models::UpdateArticle, models::Comment,
            models::CommentResponse, models::CommentListResponse, models::CreateCommentRequest,
            models::CreateComment, models::TagListResponse,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "users", description = "Accounts and sign-in"),
        (name = "profiles", description = "Public profiles and following"),
        (name = "articles", description = "Articles and the personal feed"),
        (name = "favorites", description = "Article favorites"),
        (name = "comments", description = "Article comments"),
        (name = "tags", description = "Tags in use")
    )
)]
pub struct ApiDoc;

/// AppState
///
/// The single shared container for every request: storage, the auth gate, the token
/// issuer and the loaded configuration. All members are cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub repo: RepositoryState,
    pub gate: GateState,
    pub tokens: Arc<TokenIssuer>,
    pub config: AppConfig,
}

impl AppState {
    /// Builds the gate (default exemption set) and the token issuer from the one
    /// configured secret, so whatever the issuer signs the verifier accepts.
    pub fn new(config: AppConfig, repo: RepositoryState) -> Self {
        let secret = config.jwt_secret.as_bytes();
        let gate = AuthGate::new(OperationClassifier::default(), TokenVerifier::new(secret));
        let tokens = TokenIssuer::new(secret, config.token_ttl);

        Self {
            repo,
            gate: Arc::new(gate),
            tokens: Arc::new(tokens),
            config,
        }
    }
}

// --- Axum FromRef Extractor Implementations ---

impl FromRef<AppState> for RepositoryState {
    fn from_ref(app_state: &AppState) -> RepositoryState {
        app_state.repo.clone()
    }
}

impl FromRef<AppState> for GateState {
    fn from_ref(app_state: &AppState) -> GateState {
        app_state.gate.clone()
    }
}

impl FromRef<AppState> for AppConfig {
    fn from_ref(app_state: &AppState) -> AppConfig {
        app_state.config.clone()
    }
}

/// create_router
///
/// Assembles every route, wraps the `/api` routes in the auth gate and applies the
/// observability, timeout and panic layers.
pub fn create_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout;

    // route_layer runs after routing, so the gate sees the matched route template.
    let api = routes::api_routes().route_layer(middleware::from_fn_with_state(
        state.clone(),
        gate_middleware,
    ));

    let base_router = Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(|| async { "ok" }))
        .merge(api)
        .with_state(state);

    with_service_layers(base_router, request_timeout)
}

/// with_service_layers
///
/// Wraps a router in the service stack, outermost first: CORS, request ids, tracing, the
/// request timeout (408) and panic recovery (500 with the generic error body).
pub fn with_service_layers(router: Router, request_timeout: Duration) -> Router {
    let cors = CorsLayer::new()
        .allow_methods(cors::Any)
        .allow_origin(cors::Any)
        .allow_headers(cors::Any);

    let x_request_id = HeaderName::from_static("x-request-id");

    router
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(trace_span_logger)
                        .on_response(
                            DefaultOnResponse::new()
                                .level(Level::INFO)
                                .latency_unit(tower_http::LatencyUnit::Millis),
                        ),
                )
                .layer(PropagateRequestIdLayer::new(x_request_id))
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                ))
                .layer(CatchPanicLayer::custom(panic_response)),
        )
        .layer(cors)
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else {
        "unknown panic payload".to_string()
    };

    ApiError::Internal(format!("handler panicked: {detail}")).into_response()
}

/// trace_span_logger
///
/// Span for one request, tagged with the `x-request-id` set by `SetRequestIdLayer` so every
/// log line of the request (gate decisions included) can be correlated.
fn trace_span_logger(request: &axum::http::Request<axum::body::Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown");

    tracing::info_span!(
        "http_request",
        method = ?request.method(),
        uri = ?request.uri(),
        req_id = %request_id,
    )
}
