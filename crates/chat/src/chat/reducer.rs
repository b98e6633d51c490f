//! Folds mapped stream events into a [`Conversation`].
//!
//! The decoder knows nothing about conversations; everything that mutates chat
//! state during streaming goes through the functions here.

use crate::chat::events::{Stop, StreamEventMapped, StreamEventPayload};
use crate::chat::message::{
    Conversation, Message, MessageStatus, StreamState, StreamTarget, StreamTransition,
    StreamTransitionRejection,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reduction {
    /// Event belongs to a stream that is no longer active.
    Stale,
    Appended,
    Warned,
    Finished(StreamState),
    Rejected(StreamTransitionRejection),
}

pub fn apply_stream_event(conversation: &mut Conversation, event: StreamEventMapped) -> Reduction {
    let target = event.target;
    if !conversation.stream_state.accepts_stream_event(target) {
        tracing::debug!(target = ?target, "dropping stream event for inactive target");
        return Reduction::Stale;
    }

    match event.payload {
        StreamEventPayload::Delta(text) => {
            if let Some(message) = streaming_message_mut(conversation, target) {
                message.append_text(&text);
            }
            Reduction::Appended
        }
        StreamEventPayload::ParseWarning(raw) => {
            tracing::warn!(target = ?target, payload = %raw, "agent sent a malformed frame");
            Reduction::Warned
        }
        StreamEventPayload::Done => finish(
            conversation,
            target,
            StreamTransition::Complete(target),
            MessageStatus::Done,
        ),
        StreamEventPayload::Error(message) => {
            tracing::warn!(target = ?target, error = %message, "agent stream failed");
            finish(
                conversation,
                target,
                StreamTransition::Fail {
                    target,
                    message: message.clone(),
                },
                MessageStatus::Error(message),
            )
        }
    }
}

/// User cancelled; partial text stays as it is.
pub fn apply_stop(conversation: &mut Conversation, stop: Stop) -> Reduction {
    finish(
        conversation,
        stop.target,
        stop.into_transition(),
        MessageStatus::Cancelled,
    )
}

/// The body ended without a `finish` frame. Treated as a normal completion.
pub fn apply_stream_closed(conversation: &mut Conversation, target: StreamTarget) -> Reduction {
    if !conversation.stream_state.accepts_stream_event(target) {
        return Reduction::Stale;
    }

    tracing::debug!(target = ?target, "agent stream closed without finish frame");
    finish(
        conversation,
        target,
        StreamTransition::Complete(target),
        MessageStatus::Done,
    )
}

fn finish(
    conversation: &mut Conversation,
    target: StreamTarget,
    transition: StreamTransition,
    status: MessageStatus,
) -> Reduction {
    match conversation.apply_stream_transition(transition) {
        Ok(state) => {
            if let Some(message) = streaming_message_mut(conversation, target) {
                message.status = status;
            }
            Reduction::Finished(state)
        }
        Err(rejection) => {
            tracing::warn!(target = ?target, rejection = ?rejection, "rejected stream transition");
            Reduction::Rejected(rejection)
        }
    }
}

fn streaming_message_mut(
    conversation: &mut Conversation,
    target: StreamTarget,
) -> Option<&mut Message> {
    conversation
        .in_flight_message_mut()
        .filter(|message| message.status == MessageStatus::Streaming(target.session_id))
}
