use serde::{Deserialize, Serialize};

pub const ADMIN_ROLE: &str = "admin";

/// Signed-in account as returned by the sign-in mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub profile: Option<UserProfile>,
}

/// Profile details the client keeps next to the account.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub photos: Vec<String>,
}

impl AuthUser {
    pub fn new(id: impl Into<String>, username: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            email: String::new(),
            roles: Vec::new(),
            profile: None,
        }
    }

    pub fn with_profile(mut self, profile: UserProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Profile display name, falling back to the username.
    pub fn display_name(&self) -> &str {
        self.profile
            .as_ref()
            .and_then(|profile| profile.display_name.as_deref())
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or(&self.username)
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|candidate| candidate == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role(ADMIN_ROLE)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSession {
    pub user: AuthUser,
    pub token: String,
}

impl AuthSession {
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

/// Whether the client knows who is signed in.
///
/// Starts as `Unknown` and leaves it exactly once, after durable storage was read.
/// Consumers must not redirect while the state is still `Unknown`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AuthReadiness {
    #[default]
    Unknown,
    Authenticated(AuthSession),
    Unauthenticated,
}

impl AuthReadiness {
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Self::Unknown)
    }

    pub fn session(&self) -> Option<&AuthSession> {
        match self {
            Self::Authenticated(session) => Some(session),
            Self::Unknown | Self::Unauthenticated => None,
        }
    }

    pub fn user(&self) -> Option<&AuthUser> {
        self.session().map(|session| &session.user)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Authenticated(_) => "authenticated",
            Self::Unauthenticated => "unauthenticated",
        }
    }
}

/// Value for the `authorization` header and the socket connection params.
///
/// Empty when no session is available, matching what the backend expects from
/// anonymous clients.
pub fn authorization_header(readiness: &AuthReadiness) -> String {
    readiness
        .session()
        .map(AuthSession::bearer)
        .unwrap_or_default()
}
