use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use snafu::ResultExt;

use super::decoder::{self, DecodedEvent};
use super::error::{
    AgentResult, BuildClientSnafu, ConnectSnafu, EncodeRequestSnafu,
    InvalidHeaderSnafu, PetsPayloadSnafu, PetsRequestSnafu, PetsStatusSnafu, ReadChunkSnafu,
    StatusSnafu,
};
use super::pets::{PET_PROFILES_PATH, PetProfile, parse_pet_directory};
use super::transport::{DEFAULT_BASE_ADDRESS, TransportConfig};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
pub type DecodedEventStream = BoxStream<'static, AgentResult<DecodedEvent>>;

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WirePart {
    Text { text: String },
}

/// One history entry as the agent expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireMessage {
    pub id: String,
    pub role: ChatRole,
    pub parts: Vec<WirePart>,
}

impl WireMessage {
    pub fn text(id: impl Into<String>, role: ChatRole, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            role,
            parts: vec![WirePart::Text { text: text.into() }],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub conversation_key: String,
    pub transport: TransportConfig,
    pub messages: Vec<WireMessage>,
}

impl ChatRequest {
    pub fn new(
        conversation_key: impl Into<String>,
        transport: TransportConfig,
        messages: Vec<WireMessage>,
    ) -> Self {
        Self {
            conversation_key: conversation_key.into(),
            transport,
            messages,
        }
    }
}

#[derive(Debug, Serialize)]
struct ChatRequestBody<'a> {
    id: &'a str,
    messages: &'a [WireMessage],
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    pub base_address: String,
    pub connect_timeout: Duration,
}

impl GatewayConfig {
    pub fn new(base_address: impl Into<String>) -> Self {
        let base_address = base_address.into().trim().trim_end_matches('/').to_string();
        Self {
            base_address: if base_address.is_empty() {
                DEFAULT_BASE_ADDRESS.to_string()
            } else {
                base_address
            },
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_ADDRESS)
    }
}

pub trait ChatGateway: Send + Sync {
    fn base_address(&self) -> &str;

    /// Sends the chat request and returns the decoded response stream.
    ///
    /// Dropping the stream closes the connection.
    fn open_stream<'a>(
        &'a self,
        request: ChatRequest,
    ) -> BoxFuture<'a, AgentResult<DecodedEventStream>>;

    /// Lists the pets the credential's account may chat about.
    fn fetch_pets<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, AgentResult<Vec<PetProfile>>>;
}

pub struct HttpGateway {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(config: GatewayConfig) -> AgentResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "build-gateway-client",
            })?;

        Ok(Self { config, client })
    }

    fn request_headers(transport: &TransportConfig) -> AgentResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        for (name, value) in &transport.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                InvalidHeaderSnafu {
                    stage: "chat-header-name",
                    name: name.clone(),
                }
                .build()
            })?;
            let mut header_value = HeaderValue::from_str(value).map_err(|_| {
                InvalidHeaderSnafu {
                    stage: "chat-header-value",
                    name: name.clone(),
                }
                .build()
            })?;
            if header_name == AUTHORIZATION {
                header_value.set_sensitive(true);
            }
            headers.insert(header_name, header_value);
        }

        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM_CONTENT_TYPE));
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }

    async fn send_chat(&self, request: ChatRequest) -> AgentResult<DecodedEventStream> {
        let headers = Self::request_headers(&request.transport)?;
        let body = serde_json::to_vec(&ChatRequestBody {
            id: &request.conversation_key,
            messages: &request.messages,
        })
        .context(EncodeRequestSnafu {
            stage: "encode-chat-body",
        })?;

        let endpoint = request.transport.endpoint.clone();
        tracing::debug!(
            endpoint = %endpoint,
            mode = ?request.transport.mode,
            conversation_key = %request.conversation_key,
            message_count = request.messages.len(),
            "opening agent stream"
        );

        let response = self
            .client
            .post(&endpoint)
            .headers(headers)
            .body(body)
            .send()
            .await
            .context(ConnectSnafu {
                stage: "send-chat-request",
                endpoint: endpoint.clone(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = match response.text().await {
                Ok(body) => body,
                Err(error) => {
                    tracing::warn!(
                        endpoint = %endpoint,
                        error = %error,
                        "failed to read rejected chat response body"
                    );
                    String::new()
                }
            };
            tracing::warn!(
                endpoint = %endpoint,
                status = status.as_u16(),
                "agent gateway rejected chat request"
            );
            return StatusSnafu {
                stage: "chat-http-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        let chunks = response.bytes_stream().map(|chunk| {
            chunk.context(ReadChunkSnafu {
                stage: "read-agent-stream",
            })
        });

        Ok(decoder::decode(chunks).boxed())
    }

    async fn get_pets(&self, credential: &str) -> AgentResult<Vec<PetProfile>> {
        let endpoint = format!("{}{}", self.config.base_address, PET_PROFILES_PATH);
        let response = self
            .client
            .get(&endpoint)
            .bearer_auth(credential)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await
            .context(PetsRequestSnafu {
                stage: "send-pets-request",
                endpoint: endpoint.clone(),
            })?;

        let status = response.status();
        let payload = response.text().await.context(PetsRequestSnafu {
            stage: "read-pets-response",
            endpoint: endpoint.clone(),
        })?;

        if !status.is_success() {
            return PetsStatusSnafu {
                stage: "pets-http-status",
                status: status.as_u16(),
                body: payload,
            }
            .fail();
        }

        let pets = parse_pet_directory(&payload).context(PetsPayloadSnafu {
            stage: "parse-pets-response",
        })?;
        tracing::debug!(pet_count = pets.len(), "fetched pet profiles");
        Ok(pets)
    }
}

impl ChatGateway for HttpGateway {
    fn base_address(&self) -> &str {
        &self.config.base_address
    }

    fn open_stream<'a>(
        &'a self,
        request: ChatRequest,
    ) -> BoxFuture<'a, AgentResult<DecodedEventStream>> {
        Box::pin(self.send_chat(request))
    }

    fn fetch_pets<'a>(&'a self, credential: &'a str) -> BoxFuture<'a, AgentResult<Vec<PetProfile>>> {
        Box::pin(self.get_pets(credential))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AgentError;
    use crate::transport::{PET_KEY_HEADER, select};

    #[test]
    fn chat_body_carries_conversation_key_and_parts() {
        let messages = vec![
            WireMessage::text("m1", ChatRole::User, "my dog sneezes"),
            WireMessage::text("m2", ChatRole::Assistant, "how often?"),
        ];
        let body = serde_json::to_value(ChatRequestBody {
            id: "authenticated-chat-pet-1",
            messages: &messages,
        })
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "id": "authenticated-chat-pet-1",
                "messages": [
                    {"id": "m1", "role": "user", "parts": [{"type": "text", "text": "my dog sneezes"}]},
                    {"id": "m2", "role": "assistant", "parts": [{"type": "text", "text": "how often?"}]}
                ]
            })
        );
    }

    #[test]
    fn transport_headers_are_forwarded_with_stream_accept() {
        let transport = select(true, Some("tok123"), Some("pet-42"), "http://gateway.test");
        let headers = HttpGateway::request_headers(&transport).unwrap();

        assert_eq!(headers.get(AUTHORIZATION).unwrap(), "Bearer tok123");
        assert!(headers.get(AUTHORIZATION).unwrap().is_sensitive());
        assert_eq!(headers.get(PET_KEY_HEADER).unwrap(), "pet-42");
        assert_eq!(headers.get(ACCEPT).unwrap(), EVENT_STREAM_CONTENT_TYPE);
    }

    #[test]
    fn control_characters_in_credential_are_rejected() {
        let transport = select(true, Some("tok\n123"), None, "http://gateway.test");
        let error = HttpGateway::request_headers(&transport).unwrap_err();
        assert!(matches!(error, AgentError::InvalidHeader { .. }));
        assert!(error.is_transport());
    }

    #[test]
    fn blank_base_address_uses_default() {
        assert_eq!(GatewayConfig::new("  ").base_address, DEFAULT_BASE_ADDRESS);
        assert_eq!(
            GatewayConfig::new("http://gw.test/").base_address,
            "http://gw.test"
        );
    }
}
