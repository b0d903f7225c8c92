use std::path::{Path, PathBuf};

use snafu::{OptionExt, ensure};
use tokio::sync::watch;

use crate::error::{AuthResult, EmptyTokenSnafu, NotSignedInSnafu};
use crate::readiness::{AuthReadiness, AuthSession, AuthUser};
use crate::storage::{AuthSnapshot, default_auth_path, load_snapshot, persist_snapshot};

/// Single writer of the auth readiness state.
///
/// Everything else observes it through [`AuthWatch`], which cannot change it.
pub struct AuthStore {
    path: PathBuf,
    readiness: watch::Sender<AuthReadiness>,
}

impl AuthStore {
    pub fn new(path: PathBuf) -> Self {
        let (readiness, _) = watch::channel(AuthReadiness::Unknown);
        Self { path, readiness }
    }

    pub fn load() -> Self {
        Self::new(default_auth_path())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn readiness(&self) -> AuthReadiness {
        self.readiness.borrow().clone()
    }

    pub fn watch(&self) -> AuthWatch {
        AuthWatch {
            receiver: self.readiness.subscribe(),
        }
    }

    /// Reads durable storage once and leaves `Unknown`. Later calls are no-ops.
    pub fn resolve(&self) -> AuthReadiness {
        let current = self.readiness();
        if current.is_resolved() {
            return current;
        }

        let resolved = load_snapshot(&self.path).readiness();
        tracing::info!(state = resolved.name(), "resolved auth readiness");
        self.publish(resolved.clone());
        resolved
    }

    pub fn sign_in(&self, user: AuthUser, token: impl Into<String>) -> AuthResult<AuthSession> {
        let token = token.into().trim().to_string();
        ensure!(!token.is_empty(), EmptyTokenSnafu { stage: "sign-in" });

        let session = AuthSession { user, token };
        persist_snapshot(&self.path, &AuthSnapshot::signed_in(&session))?;
        tracing::info!(user_id = %session.user.id, "signed in");
        self.publish(AuthReadiness::Authenticated(session.clone()));
        Ok(session)
    }

    pub fn sign_out(&self) -> AuthResult<()> {
        persist_snapshot(&self.path, &AuthSnapshot::signed_out())?;
        tracing::info!("signed out");
        self.publish(AuthReadiness::Unauthenticated);
        Ok(())
    }

    /// Replaces profile details of the signed-in user, keeping the token.
    pub fn update_user(&self, user: AuthUser) -> AuthResult<AuthSession> {
        let current = self.readiness();
        let session = current
            .session()
            .context(NotSignedInSnafu {
                stage: "update-user",
            })?;

        let updated = AuthSession {
            user,
            token: session.token.clone(),
        };
        persist_snapshot(&self.path, &AuthSnapshot::signed_in(&updated))?;
        self.publish(AuthReadiness::Authenticated(updated.clone()));
        Ok(updated)
    }

    fn publish(&self, readiness: AuthReadiness) {
        self.readiness.send_replace(readiness);
    }
}

/// Read-only view of the auth readiness state.
#[derive(Debug, Clone)]
pub struct AuthWatch {
    receiver: watch::Receiver<AuthReadiness>,
}

impl AuthWatch {
    pub fn current(&self) -> AuthReadiness {
        self.receiver.borrow().clone()
    }

    /// Waits until storage has been read. Returns `None` if the store was dropped first.
    pub async fn resolved(&mut self) -> Option<AuthReadiness> {
        self.receiver
            .wait_for(AuthReadiness::is_resolved)
            .await
            .ok()
            .map(|readiness| readiness.clone())
    }

    pub async fn changed(&mut self) -> Option<AuthReadiness> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }
}
