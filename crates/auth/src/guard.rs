use crate::readiness::AuthReadiness;

/// Client routes that carry access rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    Home,
    SignIn,
    Discover,
    Matches,
    Chat(String),
    Feed,
    Profile(Option<String>),
    Post(String),
    Admin,
    Other(String),
}

impl Route {
    pub fn parse(path: &str) -> Self {
        let trimmed = path.trim().trim_end_matches('/');
        let segments: Vec<&str> = trimmed
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match segments.as_slice() {
            [] => Self::Home,
            ["auth"] => Self::SignIn,
            ["discover"] => Self::Discover,
            ["matches"] => Self::Matches,
            ["chat", id] => Self::Chat((*id).to_string()),
            ["feed"] => Self::Feed,
            ["profile"] => Self::Profile(None),
            ["profile", id] => Self::Profile(Some((*id).to_string())),
            ["post", id] => Self::Post((*id).to_string()),
            ["admin"] => Self::Admin,
            _ => Self::Other(path.trim().to_string()),
        }
    }

    pub fn path(&self) -> String {
        match self {
            Self::Home => "/".to_string(),
            Self::SignIn => "/auth".to_string(),
            Self::Discover => "/discover".to_string(),
            Self::Matches => "/matches".to_string(),
            Self::Chat(id) => format!("/chat/{id}"),
            Self::Feed => "/feed".to_string(),
            Self::Profile(None) => "/profile".to_string(),
            Self::Profile(Some(id)) => format!("/profile/{id}"),
            Self::Post(id) => format!("/post/{id}"),
            Self::Admin => "/admin".to_string(),
            Self::Other(path) => path.clone(),
        }
    }

    fn requires_session(&self) -> bool {
        !matches!(self, Self::Home | Self::SignIn | Self::Other(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteDecision {
    /// Readiness is still unknown; render nothing and do not redirect.
    Wait,
    Allow,
    Redirect(Route),
}

pub struct RouteGuard;

impl RouteGuard {
    pub fn decide(readiness: &AuthReadiness, route: &Route) -> RouteDecision {
        match readiness {
            AuthReadiness::Unknown => RouteDecision::Wait,
            AuthReadiness::Unauthenticated if route.requires_session() => {
                RouteDecision::Redirect(Route::SignIn)
            }
            AuthReadiness::Unauthenticated => RouteDecision::Allow,
            AuthReadiness::Authenticated(_) if matches!(route, Route::Home | Route::SignIn) => {
                RouteDecision::Redirect(Route::Discover)
            }
            AuthReadiness::Authenticated(session)
                if *route == Route::Admin && !session.user.is_admin() =>
            {
                RouteDecision::Redirect(Route::Home)
            }
            AuthReadiness::Authenticated(_) => RouteDecision::Allow,
        }
    }
}
