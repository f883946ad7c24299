use axum::http::Method;

/// Operation
///
/// Every action the API exposes, keyed by a stable id the gate classifies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Login,
    Register,
    GetCurrentUser,
    UpdateUser,
    GetProfile,
    FollowUser,
    UnfollowUser,
    ListArticles,
    FeedArticles,
    GetArticle,
    CreateArticle,
    UpdateArticle,
    DeleteArticle,
    AddComment,
    GetComments,
    DeleteComment,
    FavoriteArticle,
    UnfavoriteArticle,
    GetTags,
}

// (operation, method, route template as registered with the router)
const ROUTES: &[(Operation, &str, &str)] = &[
    (Operation::Login, "POST", "/api/users/login"),
    (Operation::Register, "POST", "/api/users"),
    (Operation::GetCurrentUser, "GET", "/api/user"),
    (Operation::UpdateUser, "PUT", "/api/user"),
    (Operation::GetProfile, "GET", "/api/profiles/{username}"),
    (Operation::FollowUser, "POST", "/api/profiles/{username}/follow"),
    (Operation::UnfollowUser, "DELETE", "/api/profiles/{username}/follow"),
    (Operation::ListArticles, "GET", "/api/articles"),
    (Operation::FeedArticles, "GET", "/api/articles/feed"),
    (Operation::GetArticle, "GET", "/api/articles/{slug}"),
    (Operation::CreateArticle, "POST", "/api/articles"),
    (Operation::UpdateArticle, "PUT", "/api/articles/{slug}"),
    (Operation::DeleteArticle, "DELETE", "/api/articles/{slug}"),
    (Operation::AddComment, "POST", "/api/articles/{slug}/comments"),
    (Operation::GetComments, "GET", "/api/articles/{slug}/comments"),
    (Operation::DeleteComment, "DELETE", "/api/articles/{slug}/comments/{id}"),
    (Operation::FavoriteArticle, "POST", "/api/articles/{slug}/favorite"),
    (Operation::UnfavoriteArticle, "DELETE", "/api/articles/{slug}/favorite"),
    (Operation::GetTags, "GET", "/api/tags"),
];

impl Operation {
    pub fn id(self) -> &'static str {
        match self {
            Operation::Login => "login",
            Operation::Register => "register",
            Operation::GetCurrentUser => "get-current-user",
            Operation::UpdateUser => "update-user",
            Operation::GetProfile => "get-profile",
            Operation::FollowUser => "follow-user",
            Operation::UnfollowUser => "unfollow-user",
            Operation::ListArticles => "list-articles",
            Operation::FeedArticles => "feed-articles",
            Operation::GetArticle => "get-article",
            Operation::CreateArticle => "create-article",
            Operation::UpdateArticle => "update-article",
            Operation::DeleteArticle => "delete-article",
            Operation::AddComment => "add-comment",
            Operation::GetComments => "get-comments",
            Operation::DeleteComment => "delete-comment",
            Operation::FavoriteArticle => "favorite-article",
            Operation::UnfavoriteArticle => "unfavorite-article",
            Operation::GetTags => "get-tags",
        }
    }

    /// Every operation with its (method, route template), in registration order.
    pub fn routes() -> impl Iterator<Item = (Operation, &'static str, &'static str)> {
        ROUTES.iter().copied()
    }

    /// Looks up the operation behind a matched route template.
    pub fn resolve(method: &Method, route: &str) -> Option<Operation> {
        // axum serves HEAD through the GET handler, so it is the same operation.
        let method = if *method == Method::HEAD { "GET" } else { method.as_str() };
        ROUTES
            .iter()
            .find(|(_, m, r)| *m == method && *r == route)
            .map(|(op, _, _)| *op)
    }
}

/// Operation id for a request. Unresolvable routes get `"<METHOD> <route>"`, which no
/// exemption set contains.
pub fn operation_id(method: &Method, route: &str) -> String {
    match Operation::resolve(method, route) {
        Some(op) => op.id().to_string(),
        None => format!("{method} {route}"),
    }
}
