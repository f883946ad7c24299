use std::collections::HashSet;

/// Operations reachable without a token: sign-in, sign-up and public reads.
pub const DEFAULT_EXEMPTIONS: [&str; 7] = [
    "login",
    "register",
    "get-article",
    "list-articles",
    "get-comments",
    "get-tags",
    "get-profile",
];

/// OperationClassifier
///
/// Decides per operation id whether a token is mandatory. Fails closed: any id outside the
/// exemption set, known or not, requires authentication.
#[derive(Debug, Clone)]
pub struct OperationClassifier {
    exempt: HashSet<String>,
}

impl OperationClassifier {
    pub fn new<I, S>(exempt: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            exempt: exempt.into_iter().map(Into::into).collect(),
        }
    }

    pub fn requires_auth(&self, operation: &str) -> bool {
        !self.exempt.contains(operation)
    }

    pub fn exemptions(&self) -> impl Iterator<Item = &str> {
        self.exempt.iter().map(String::as_str)
    }
}

impl Default for OperationClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_EXEMPTIONS)
    }
}
