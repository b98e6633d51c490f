//! Explicit identity session shared by whoever needs the current credential.

pub mod firebase;
pub mod identity;
pub mod refresh;

use std::sync::Arc;

use tokio::sync::watch;

pub use firebase::{FirebaseConfig, FirebaseIdentity};
pub use identity::{AuthError, AuthResult, Identity, IdentityProvider};
pub use refresh::spawn_token_refresh;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn(Identity),
}

impl SessionState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::SignedIn(identity) => Some(identity),
            Self::SignedOut => None,
        }
    }
}

/// Cloneable handle; every clone observes the same state.
#[derive(Debug, Clone)]
pub struct Session {
    state: Arc<watch::Sender<SessionState>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (state, _) = watch::channel(SessionState::SignedOut);
        Self {
            state: Arc::new(state),
        }
    }

    pub fn current(&self) -> SessionState {
        self.state.borrow().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(*self.state.borrow(), SessionState::SignedIn(_))
    }

    /// Current bearer credential, if signed in.
    pub fn credential(&self) -> Option<String> {
        self.state
            .borrow()
            .identity()
            .map(|identity| identity.id_token.clone())
    }

    pub fn email(&self) -> Option<String> {
        self.state
            .borrow()
            .identity()
            .map(|identity| identity.email.clone())
    }

    /// Change notifications for sign-in, sign-out and token refresh.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub async fn sign_in(
        &self,
        provider: &dyn IdentityProvider,
        email: &str,
        password: &str,
    ) -> AuthResult<Identity> {
        let identity = provider.sign_in(email, password).await.inspect_err(|error| {
            tracing::warn!(error = %error, "sign-in failed");
        })?;
        self.set_identity(identity.clone());
        Ok(identity)
    }

    pub async fn sign_up(
        &self,
        provider: &dyn IdentityProvider,
        email: &str,
        password: &str,
    ) -> AuthResult<Identity> {
        let identity = provider.sign_up(email, password).await.inspect_err(|error| {
            tracing::warn!(error = %error, "sign-up failed");
        })?;
        self.set_identity(identity.clone());
        Ok(identity)
    }

    /// Forces a credential refresh now.
    pub async fn refresh(&self, provider: &dyn IdentityProvider) -> AuthResult<()> {
        let Some(identity) = self.current().identity().cloned() else {
            return identity::NotSignedInSnafu {
                stage: "session-refresh",
                action: "refresh",
            }
            .fail();
        };

        let refreshed = provider.refresh(&identity).await?;
        self.replace_credential(refreshed);
        Ok(())
    }

    pub fn sign_out(&self) {
        let was_signed_in = self.state.send_if_modified(|state| {
            let signed_in = matches!(state, SessionState::SignedIn(_));
            *state = SessionState::SignedOut;
            signed_in
        });
        if was_signed_in {
            tracing::info!("signed out");
        }
    }

    pub fn set_identity(&self, identity: Identity) {
        tracing::info!(user_id = %identity.user_id, "signed in");
        self.state.send_replace(SessionState::SignedIn(identity));
    }

    /// Stores a refreshed credential unless the user signed out or switched meanwhile.
    pub fn replace_credential(&self, refreshed: Identity) -> bool {
        let replaced = self.state.send_if_modified(|state| match state {
            SessionState::SignedIn(current) if current.user_id == refreshed.user_id => {
                *current = refreshed.clone();
                true
            }
            SessionState::SignedIn(_) | SessionState::SignedOut => false,
        });

        if replaced {
            tracing::debug!(user_id = %refreshed.user_id, "credential refreshed");
        } else {
            tracing::debug!("discarding refreshed credential for a session that changed");
        }
        replaced
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use vetchat_agent::BoxFuture;

    use super::*;

    pub(crate) fn identity(user_id: &str, token: &str) -> Identity {
        Identity {
            user_id: user_id.to_string(),
            email: format!("{user_id}@clinic.test"),
            id_token: token.to_string(),
            refresh_token: format!("refresh-{user_id}"),
        }
    }

    /// Accepts one password and counts refreshes.
    #[derive(Default)]
    pub(crate) struct FakeIdentity {
        pub refreshes: AtomicUsize,
    }

    impl IdentityProvider for FakeIdentity {
        fn sign_in<'a>(
            &'a self,
            email: &'a str,
            password: &'a str,
        ) -> BoxFuture<'a, AuthResult<Identity>> {
            Box::pin(async move {
                if password != "hunter2" {
                    return identity::RejectedSnafu {
                        stage: "fake-sign-in",
                        status: 400u16,
                        message: "INVALID_PASSWORD",
                    }
                    .fail();
                }
                let user_id = email.split('@').next().unwrap_or(email);
                Ok(identity(user_id, "tok-0"))
            })
        }

        fn sign_up<'a>(
            &'a self,
            email: &'a str,
            password: &'a str,
        ) -> BoxFuture<'a, AuthResult<Identity>> {
            self.sign_in(email, password)
        }

        fn refresh<'a>(&'a self, current: &'a Identity) -> BoxFuture<'a, AuthResult<Identity>> {
            Box::pin(async move {
                let count = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(identity(&current.user_id, &format!("tok-{count}")))
            })
        }
    }

    #[tokio::test]
    async fn subscribers_observe_sign_in_and_sign_out() {
        let session = Session::new();
        let provider = FakeIdentity::default();
        let mut changes = session.subscribe();

        session
            .sign_in(&provider, "maria@clinic.test", "hunter2")
            .await
            .unwrap();
        changes.changed().await.unwrap();
        assert!(changes.borrow_and_update().identity().is_some());
        assert_eq!(session.credential().as_deref(), Some("tok-0"));

        let other_handle = session.clone();
        other_handle.sign_out();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), SessionState::SignedOut);
        assert!(!session.is_authenticated());
    }

    #[tokio::test]
    async fn rejected_sign_in_leaves_session_signed_out() {
        let session = Session::new();
        let error = session
            .sign_in(&FakeIdentity::default(), "maria@clinic.test", "wrong")
            .await
            .unwrap_err();

        assert!(matches!(error, AuthError::Rejected { .. }));
        assert_eq!(session.current(), SessionState::SignedOut);
    }

    #[tokio::test]
    async fn refresh_requires_a_signed_in_user() {
        let session = Session::new();
        let error = session.refresh(&FakeIdentity::default()).await.unwrap_err();
        assert!(matches!(error, AuthError::NotSignedIn { .. }));
    }

    #[test]
    fn refreshed_credential_for_another_user_is_discarded() {
        let session = Session::new();
        session.set_identity(identity("maria", "tok-0"));

        assert!(!session.replace_credential(identity("paul", "tok-9")));
        assert_eq!(session.credential().as_deref(), Some("tok-0"));

        assert!(session.replace_credential(identity("maria", "tok-1")));
        assert_eq!(session.credential().as_deref(), Some("tok-1"));

        session.sign_out();
        assert!(!session.replace_credential(identity("maria", "tok-2")));
    }
}
