use std::collections::BTreeMap;

pub const DEFAULT_BASE_ADDRESS: &str = "http://localhost:8080";
pub const AUTHENTICATED_CHAT_PATH: &str = "/ai/authenticated/chat/vetChatAgent";
pub const ANONYMOUS_CHAT_PATH: &str = "/ai/anonymous/chat/vetChatAgent";
pub const AUTHORIZATION_HEADER: &str = "Authorization";
pub const PET_KEY_HEADER: &str = "X-Pet-Key";
/// Pet selector option meaning "no particular pet"; never sent upstream.
pub const UNSPECIFIED_PET_KEY: &str = "unspecified";

pub const ANONYMOUS_CONVERSATION_KEY: &str = "anonymous-chat";
pub const NO_PET_CONVERSATION_KEY: &str = "authenticated-chat-no-pet";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportMode {
    Anonymous,
    Authenticated,
}

/// Endpoint and headers for one chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    pub mode: TransportMode,
    pub endpoint: String,
    pub headers: BTreeMap<String, String>,
}

impl TransportConfig {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    pub fn is_authenticated(&self) -> bool {
        self.mode == TransportMode::Authenticated
    }
}

/// Picks the chat endpoint and headers for the caller's identity and pet.
///
/// The pet header only rides along on the authenticated path, and only for a
/// real pet key (not blank, not [`UNSPECIFIED_PET_KEY`]).
pub fn select(
    authenticated: bool,
    credential: Option<&str>,
    pet_key: Option<&str>,
    base_address: &str,
) -> TransportConfig {
    let base = base_address.trim().trim_end_matches('/');
    let mut headers = BTreeMap::new();

    let credential = credential.filter(|token| !token.is_empty());
    let Some(token) = credential.filter(|_| authenticated) else {
        tracing::debug!(authenticated, "selected anonymous chat transport");
        return TransportConfig {
            mode: TransportMode::Anonymous,
            endpoint: format!("{base}{ANONYMOUS_CHAT_PATH}"),
            headers,
        };
    };

    headers.insert(AUTHORIZATION_HEADER.to_string(), format!("Bearer {token}"));
    if let Some(pet_key) = selectable_pet_key(pet_key) {
        headers.insert(PET_KEY_HEADER.to_string(), pet_key.to_string());
    }

    tracing::debug!(
        token_length = token.len(),
        pet_key = ?headers.get(PET_KEY_HEADER),
        "selected authenticated chat transport"
    );

    TransportConfig {
        mode: TransportMode::Authenticated,
        endpoint: format!("{base}{AUTHENTICATED_CHAT_PATH}"),
        headers,
    }
}

/// Key under which a conversation is kept, so identity or pet changes start a fresh chat.
pub fn conversation_key(authenticated: bool, pet_key: Option<&str>) -> String {
    if !authenticated {
        return ANONYMOUS_CONVERSATION_KEY.to_string();
    }

    match pet_key.map(str::trim).filter(|key| !key.is_empty()) {
        Some(key) => format!("authenticated-chat-{key}"),
        None => NO_PET_CONVERSATION_KEY.to_string(),
    }
}

fn selectable_pet_key(pet_key: Option<&str>) -> Option<&str> {
    pet_key
        .map(str::trim)
        .filter(|key| !key.is_empty() && *key != UNSPECIFIED_PET_KEY)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://gateway.test";

    #[test]
    fn anonymous_caller_gets_anonymous_endpoint_without_headers() {
        for pet_key in [None, Some("pet-42"), Some(UNSPECIFIED_PET_KEY)] {
            let config = select(false, None, pet_key, BASE);
            assert_eq!(config.mode, TransportMode::Anonymous);
            assert_eq!(config.endpoint, "http://gateway.test/ai/anonymous/chat/vetChatAgent");
            assert!(config.headers.is_empty());
        }

        // A stale token without an authenticated session must not leak upstream.
        let config = select(false, Some("tok123"), Some("pet-42"), BASE);
        assert!(config.headers.is_empty());
    }

    #[test]
    fn authenticated_caller_without_pet_only_sends_bearer() {
        let config = select(true, Some("tok123"), None, BASE);
        assert_eq!(config.mode, TransportMode::Authenticated);
        assert_eq!(
            config.endpoint,
            "http://gateway.test/ai/authenticated/chat/vetChatAgent"
        );
        assert_eq!(config.header(AUTHORIZATION_HEADER), Some("Bearer tok123"));
        assert_eq!(config.header(PET_KEY_HEADER), None);
    }

    #[test]
    fn authenticated_caller_with_pet_sends_both_headers() {
        let config = select(true, Some("tok123"), Some("pet-42"), BASE);
        assert_eq!(config.header(AUTHORIZATION_HEADER), Some("Bearer tok123"));
        assert_eq!(config.header(PET_KEY_HEADER), Some("pet-42"));
        assert_eq!(config.headers.len(), 2);
    }

    #[test]
    fn unspecified_and_blank_pet_keys_are_not_sent() {
        for pet_key in [UNSPECIFIED_PET_KEY, "", "   "] {
            let config = select(true, Some("tok123"), Some(pet_key), BASE);
            assert!(config.is_authenticated());
            assert_eq!(config.header(PET_KEY_HEADER), None);
        }
    }

    #[test]
    fn missing_or_empty_credential_falls_back_to_anonymous() {
        assert_eq!(select(true, None, Some("pet-42"), BASE).mode, TransportMode::Anonymous);
        assert_eq!(select(true, Some(""), None, BASE).mode, TransportMode::Anonymous);
    }

    #[test]
    fn trailing_slash_in_base_address_is_trimmed() {
        let config = select(false, None, None, "http://gateway.test/");
        assert_eq!(config.endpoint, "http://gateway.test/ai/anonymous/chat/vetChatAgent");
    }

    #[test]
    fn conversation_keys_follow_identity_and_pet() {
        assert_eq!(conversation_key(false, Some("pet-42")), "anonymous-chat");
        assert_eq!(conversation_key(true, None), "authenticated-chat-no-pet");
        assert_eq!(conversation_key(true, Some("")), "authenticated-chat-no-pet");
        assert_eq!(conversation_key(true, Some("pet-42")), "authenticated-chat-pet-42");
    }
}
