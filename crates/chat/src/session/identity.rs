use snafu::Snafu;
use vetchat_agent::BoxFuture;

/// Signed-in user as reported by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    /// Bearer credential sent to the agent gateway.
    pub id_token: String,
    pub refresh_token: String,
}

impl std::fmt::Debug for Identity {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Identity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("id_token_len", &self.id_token.len())
            .finish_non_exhaustive()
    }
}

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AuthError {
    #[snafu(display("identity provider API key is not configured"))]
    MissingApiKey { stage: &'static str },
    #[snafu(display("failed to build identity client on `{stage}`, {source}"))]
    BuildIdentityClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("identity request failed on `{stage}`, {source}"))]
    IdentityRequest {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("identity provider rejected `{stage}`: {message}"))]
    Rejected {
        stage: &'static str,
        status: u16,
        message: String,
    },
    #[snafu(display("unexpected identity response on `{stage}`, {source}"))]
    IdentityPayload {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("no signed-in user to {action}"))]
    NotSignedIn {
        stage: &'static str,
        action: &'static str,
    },
}

/// Source of identity credentials.
///
/// Sign-out is local to the [`Session`](super::Session); providers only mint tokens.
pub trait IdentityProvider: Send + Sync {
    fn sign_in<'a>(&'a self, email: &'a str, password: &'a str)
    -> BoxFuture<'a, AuthResult<Identity>>;

    fn sign_up<'a>(&'a self, email: &'a str, password: &'a str)
    -> BoxFuture<'a, AuthResult<Identity>>;

    /// Exchanges the refresh token for a fresh credential.
    fn refresh<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, AuthResult<Identity>>;
}
