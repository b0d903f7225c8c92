use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use crate::error::{
    AuthResult, CreateDirSnafu, RenameTempFileSnafu, SerializeSnapshotSnafu, WriteFileSnafu,
};
use crate::readiness::{AuthReadiness, AuthSession, AuthUser};

pub const AUTH_DIRECTORY_NAME: &str = "spark";
pub const AUTH_FILE_NAME: &str = "auth-storage.json";
const SNAPSHOT_VERSION: u32 = 0;

/// On-disk envelope: `{ "state": { ... }, "version": 0 }`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuthSnapshot {
    #[serde(default)]
    pub state: PersistedAuthState,
    #[serde(default)]
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedAuthState {
    #[serde(default)]
    pub user: Option<AuthUser>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub is_authenticated: bool,
}

impl AuthSnapshot {
    pub fn signed_in(session: &AuthSession) -> Self {
        Self {
            state: PersistedAuthState {
                user: Some(session.user.clone()),
                token: Some(session.token.clone()),
                is_authenticated: true,
            },
            version: SNAPSHOT_VERSION,
        }
    }

    pub fn signed_out() -> Self {
        Self {
            state: PersistedAuthState::default(),
            version: SNAPSHOT_VERSION,
        }
    }

    /// Both a non-blank token and a user are required to count as signed in.
    pub fn readiness(&self) -> AuthReadiness {
        let token = self
            .state
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty());

        match (token, &self.state.user) {
            (Some(token), Some(user)) => AuthReadiness::Authenticated(AuthSession {
                user: user.clone(),
                token: token.to_string(),
            }),
            _ => AuthReadiness::Unauthenticated,
        }
    }
}

pub fn default_auth_path() -> PathBuf {
    dirs::config_dir()
        .map(|path| path.join(AUTH_DIRECTORY_NAME))
        .unwrap_or_else(|| PathBuf::from(".spark"))
        .join(AUTH_FILE_NAME)
}

/// Reads the stored snapshot. Missing or unreadable storage counts as signed out.
pub fn load_snapshot(path: &Path) -> AuthSnapshot {
    if !path.exists() {
        tracing::info!("auth storage not found at {:?}, starting signed out", path);
        return AuthSnapshot::signed_out();
    }

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(error) => {
            tracing::warn!(
                "failed to read auth storage at {:?}: {}. starting signed out",
                path,
                error
            );
            return AuthSnapshot::signed_out();
        }
    };

    match serde_json::from_str::<AuthSnapshot>(&content) {
        Ok(snapshot) => snapshot,
        Err(error) => {
            tracing::warn!(
                "failed to parse auth storage at {:?}: {}. starting signed out",
                path,
                error
            );
            AuthSnapshot::signed_out()
        }
    }
}

pub fn persist_snapshot(path: &Path, snapshot: &AuthSnapshot) -> AuthResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).context(CreateDirSnafu {
            stage: "create-auth-directory",
            path: parent.to_path_buf(),
        })?;
    }

    let content = serde_json::to_string_pretty(snapshot).context(SerializeSnapshotSnafu {
        stage: "serialize-auth-snapshot",
    })?;

    let temp_path = path.with_extension("json.tmp");
    std::fs::write(&temp_path, content).context(WriteFileSnafu {
        stage: "write-temporary-auth-file",
        path: temp_path.clone(),
    })?;

    std::fs::rename(&temp_path, path).context(RenameTempFileSnafu {
        stage: "rename-temporary-auth-file",
        from: temp_path,
        to: path.to_path_buf(),
    })?;

    tracing::debug!("saved auth storage to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::scratch_dir;

    #[test]
    fn stored_envelope_resolves_to_authenticated() {
        let dir = scratch_dir("stored-envelope");
        let path = dir.join(AUTH_FILE_NAME);
        std::fs::write(
            &path,
            r#"{"state":{"user":{"id":"u1","username":"anna","email":"a@x","roles":["user"]},"token":"tok","isAuthenticated":true},"version":0}"#,
        )
        .unwrap();

        let readiness = load_snapshot(&path).readiness();
        assert_eq!(
            readiness.session().map(|session| session.token.as_str()),
            Some("tok")
        );
        assert_eq!(readiness.user().map(|user| user.username.as_str()), Some("anna"));
    }

    #[test]
    fn token_without_user_is_signed_out() {
        let snapshot: AuthSnapshot =
            serde_json::from_str(r#"{"state":{"token":"tok"}}"#).unwrap();
        assert_eq!(snapshot.readiness(), AuthReadiness::Unauthenticated);
    }

    #[test]
    fn blank_token_is_signed_out() {
        let snapshot: AuthSnapshot =
            serde_json::from_str(r#"{"state":{"token":"  ","user":{"id":"u1"}}}"#).unwrap();
        assert_eq!(snapshot.readiness(), AuthReadiness::Unauthenticated);
    }

    #[test]
    fn corrupt_or_missing_storage_is_signed_out() {
        let dir = scratch_dir("corrupt-storage");
        let path = dir.join(AUTH_FILE_NAME);
        assert_eq!(load_snapshot(&path).readiness(), AuthReadiness::Unauthenticated);

        std::fs::write(&path, "{not json").unwrap();
        assert_eq!(load_snapshot(&path).readiness(), AuthReadiness::Unauthenticated);
    }

    #[test]
    fn persisted_snapshot_reads_back() {
        let dir = scratch_dir("persist-roundtrip");
        let path = dir.join("nested").join(AUTH_FILE_NAME);
        let session = AuthSession {
            user: AuthUser::new("u1", "anna"),
            token: "tok".to_string(),
        };

        persist_snapshot(&path, &AuthSnapshot::signed_in(&session)).unwrap();
        assert_eq!(
            load_snapshot(&path).readiness(),
            AuthReadiness::Authenticated(session)
        );
        assert!(!path.with_extension("json.tmp").exists());
    }
}
