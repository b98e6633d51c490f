#![deny(unsafe_code)]

//! Client-side plumbing for the remote vet chat agent: endpoint selection,
//! the chat request itself, and incremental decoding of the streamed reply.

use std::sync::Arc;

pub mod decoder;
pub mod error;
pub mod gateway;
pub mod pets;
pub mod transport;

pub use decoder::{DecodedEvent, StreamDecoder, decode};
pub use error::{AgentError, AgentResult};
pub use gateway::{
    BoxFuture, ChatGateway, ChatRequest, ChatRole, DecodedEventStream, GatewayConfig, HttpGateway,
    WireMessage, WirePart,
};
pub use pets::{PetProfile, PetType};
pub use transport::{
    ANONYMOUS_CONVERSATION_KEY, AUTHORIZATION_HEADER, DEFAULT_BASE_ADDRESS,
    NO_PET_CONVERSATION_KEY, PET_KEY_HEADER, TransportConfig, TransportMode, UNSPECIFIED_PET_KEY,
    conversation_key, select,
};

pub fn create_gateway(config: GatewayConfig) -> AgentResult<Arc<dyn ChatGateway>> {
    tracing::info!(base_address = %config.base_address, "creating agent gateway");
    Ok(Arc::new(HttpGateway::new(config)?))
}
