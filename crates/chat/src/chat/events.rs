use vetchat_agent::{AgentError, DecodedEvent};

use crate::chat::message::{StreamTarget, StreamTransition};

/// Emitted when the user submits a prompt to generate a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submit {
    pub target: StreamTarget,
    pub content: String,
}

/// Emitted when user requests cancellation of an active stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Stop {
    pub target: StreamTarget,
}

/// Emitted when the selected pet changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PetChanged {
    pub pet_key: Option<String>,
}

/// Agent stream payload mapped into chat domain language.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEventPayload {
    Delta(String),
    ParseWarning(String),
    Done,
    Error(String),
}

/// Emitted after decoded agent events are mapped into domain events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEventMapped {
    pub target: StreamTarget,
    pub payload: StreamEventPayload,
}

impl Submit {
    /// Creates a submit event with explicit stream target.
    pub fn new(target: StreamTarget, content: impl Into<String>) -> Self {
        Self {
            target,
            content: content.into(),
        }
    }

    /// Returns stream state transition to start the session.
    pub fn start_transition(&self) -> StreamTransition {
        StreamTransition::Start(self.target)
    }
}

impl Stop {
    /// Returns stream state transition for user-triggered cancellation.
    pub fn into_transition(self) -> StreamTransition {
        StreamTransition::Cancel(self.target)
    }
}

impl StreamEventMapped {
    pub fn new(target: StreamTarget, payload: StreamEventPayload) -> Self {
        Self { target, payload }
    }

    /// Maps one item of the decoded agent stream.
    pub fn from_decoded(target: StreamTarget, item: Result<DecodedEvent, AgentError>) -> Self {
        let payload = match item {
            Ok(DecodedEvent::TextDelta(text)) => StreamEventPayload::Delta(text),
            Ok(DecodedEvent::ParseWarning(raw)) => StreamEventPayload::ParseWarning(raw),
            Ok(DecodedEvent::Finished) => StreamEventPayload::Done,
            Err(error) => StreamEventPayload::Error(error.to_string()),
        };
        Self { target, payload }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            StreamEventPayload::Done | StreamEventPayload::Error(_)
        )
    }

    /// Maps terminal payloads to stream state transitions.
    ///
    /// Delta and warning payloads return `None` because they never change the
    /// stream lifecycle state.
    pub fn into_transition(self) -> Option<StreamTransition> {
        match self.payload {
            StreamEventPayload::Delta(_) | StreamEventPayload::ParseWarning(_) => None,
            StreamEventPayload::Done => Some(StreamTransition::Complete(self.target)),
            StreamEventPayload::Error(message) => Some(StreamTransition::Fail {
                target: self.target,
                message,
            }),
        }
    }
}
