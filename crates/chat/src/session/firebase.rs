use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use vetchat_agent::BoxFuture;

use super::identity::{
    AuthResult, BuildIdentityClientSnafu, Identity, IdentityPayloadSnafu, IdentityProvider,
    IdentityRequestSnafu, MissingApiKeySnafu, RejectedSnafu,
};

pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com";
pub const DEFAULT_TOKEN_ENDPOINT: &str = "https://securetoken.googleapis.com";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirebaseConfig {
    pub api_key: String,
    pub identity_endpoint: String,
    pub token_endpoint: String,
    pub timeout: Duration,
}

impl FirebaseConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            identity_endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
            token_endpoint: DEFAULT_TOKEN_ENDPOINT.to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Email/password accounts over the Identity Toolkit REST API.
pub struct FirebaseIdentity {
    config: FirebaseConfig,
    client: Client,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PasswordResponse {
    id_token: String,
    refresh_token: String,
    local_id: String,
    #[serde(default)]
    email: String,
}

/// The token endpoint answers in snake_case, unlike the account endpoints.
#[derive(Deserialize)]
struct TokenResponse {
    id_token: String,
    refresh_token: String,
    user_id: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

impl FirebaseIdentity {
    pub fn new(config: FirebaseConfig) -> AuthResult<Self> {
        ensure!(
            !config.api_key.trim().is_empty(),
            MissingApiKeySnafu {
                stage: "build-firebase-identity",
            }
        );

        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context(BuildIdentityClientSnafu {
                stage: "build-firebase-identity",
            })?;

        Ok(Self { config, client })
    }

    fn account_url(&self, action: &str) -> String {
        format!(
            "{}/v1/accounts:{action}",
            self.config.identity_endpoint.trim_end_matches('/')
        )
    }

    fn token_url(&self) -> String {
        format!(
            "{}/v1/token",
            self.config.token_endpoint.trim_end_matches('/')
        )
    }

    async fn password_flow(
        &self,
        action: &'static str,
        email: &str,
        password: &str,
    ) -> AuthResult<Identity> {
        let stage = "firebase-password";
        let request = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };

        tracing::debug!(action = action, "calling identity provider");
        let response = self
            .client
            .post(self.account_url(action))
            .query(&[("key", self.config.api_key.as_str())])
            .json(&request)
            .send()
            .await
            .context(IdentityRequestSnafu { stage })?;

        let body = read_success_body(response, stage).await?;
        let payload: PasswordResponse =
            serde_json::from_str(&body).context(IdentityPayloadSnafu { stage })?;

        Ok(Identity {
            user_id: payload.local_id,
            email: if payload.email.is_empty() {
                email.to_string()
            } else {
                payload.email
            },
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
        })
    }

    async fn exchange_refresh_token(&self, identity: &Identity) -> AuthResult<Identity> {
        let stage = "firebase-refresh";
        let response = self
            .client
            .post(self.token_url())
            .query(&[("key", self.config.api_key.as_str())])
            .form(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", identity.refresh_token.as_str()),
            ])
            .send()
            .await
            .context(IdentityRequestSnafu { stage })?;

        let body = read_success_body(response, stage).await?;
        let payload: TokenResponse =
            serde_json::from_str(&body).context(IdentityPayloadSnafu { stage })?;

        Ok(Identity {
            user_id: payload.user_id,
            email: identity.email.clone(),
            id_token: payload.id_token,
            refresh_token: payload.refresh_token,
        })
    }
}

async fn read_success_body(response: reqwest::Response, stage: &'static str) -> AuthResult<String> {
    let status = response.status();
    let body = response
        .text()
        .await
        .context(IdentityRequestSnafu { stage })?;

    if !status.is_success() {
        return RejectedSnafu {
            stage,
            status: status.as_u16(),
            message: provider_message(&body),
        }
        .fail();
    }
    Ok(body)
}

/// Provider error code such as `INVALID_PASSWORD`, or the raw body.
fn provider_message(body: &str) -> String {
    serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.message)
        .unwrap_or_else(|_| body.trim().to_string())
}

impl IdentityProvider for FirebaseIdentity {
    fn sign_in<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<Identity>> {
        Box::pin(self.password_flow("signInWithPassword", email, password))
    }

    fn sign_up<'a>(
        &'a self,
        email: &'a str,
        password: &'a str,
    ) -> BoxFuture<'a, AuthResult<Identity>> {
        Box::pin(self.password_flow("signUp", email, password))
    }

    fn refresh<'a>(&'a self, identity: &'a Identity) -> BoxFuture<'a, AuthResult<Identity>> {
        Box::pin(self.exchange_refresh_token(identity))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::AuthError;

    #[test]
    fn blank_api_key_is_rejected_up_front() {
        let error = FirebaseIdentity::new(FirebaseConfig::new("  ")).err().unwrap();
        assert!(matches!(error, AuthError::MissingApiKey { .. }));
    }

    #[test]
    fn urls_join_endpoint_and_action() {
        let mut config = FirebaseConfig::new("key");
        config.identity_endpoint = "http://127.0.0.1:9099/".to_string();
        let identity = FirebaseIdentity::new(config).unwrap();

        assert_eq!(
            identity.account_url("signUp"),
            "http://127.0.0.1:9099/v1/accounts:signUp"
        );
        assert_eq!(
            identity.token_url(),
            "https://securetoken.googleapis.com/v1/token"
        );
    }

    #[test]
    fn provider_error_code_is_extracted() {
        let body = r#"{"error":{"code":400,"message":"EMAIL_EXISTS","errors":[]}}"#;
        assert_eq!(provider_message(body), "EMAIL_EXISTS");
        assert_eq!(provider_message("bad gateway\n"), "bad gateway");
    }

    #[test]
    fn sign_in_payload_uses_camel_case() {
        let request = PasswordRequest {
            email: "a@b.c",
            password: "pw",
            return_secure_token: true,
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            serde_json::json!({"email": "a@b.c", "password": "pw", "returnSecureToken": true})
        );
    }
}
