/// Drives agent streams for the active conversation.
pub mod controller;
pub mod error;
/// Event contracts between the front end and the controller.
pub mod events;
/// Domain entities and deterministic stream state boundaries.
pub mod message;
pub mod pet_selector;
pub mod reducer;

pub use controller::{ChatController, PendingStream};
pub use error::{ChatError, ChatResult};
pub use events::{PetChanged, Stop, StreamEventMapped, StreamEventPayload, Submit};
pub use message::{
    Conversation, ConversationId, Message, MessageId, MessagePart, MessageStatus, Role,
    StreamSessionId, StreamState, StreamTarget, StreamTransition, StreamTransitionRejection,
    StreamTransitionResult,
};
pub use pet_selector::{PetOption, PetSelector};
pub use reducer::{Reduction, apply_stop, apply_stream_closed, apply_stream_event};
