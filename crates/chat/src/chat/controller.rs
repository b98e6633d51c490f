//! Owns every conversation and runs one agent stream at a time through the reducer.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use futures::StreamExt;
use snafu::{ResultExt, ensure};
use vetchat_agent::{
    ANONYMOUS_CONVERSATION_KEY, ChatGateway, ChatRequest, DecodedEventStream, conversation_key,
    transport,
};

use crate::chat::error::{AlreadyStreamingSnafu, ChatResult, EmptyPromptSnafu, GatewaySnafu};
use crate::chat::events::{PetChanged, Stop, StreamEventMapped, StreamEventPayload, Submit};
use crate::chat::message::{
    Conversation, ConversationId, Message, MessageId, StreamSessionId, StreamState, StreamTarget,
};
use crate::chat::reducer::{self, Reduction};
use crate::session::Session;

/// A submitted prompt whose response has not been consumed yet.
pub struct PendingStream {
    pub target: StreamTarget,
    conversation_key: String,
    events: DecodedEventStream,
}

impl std::fmt::Debug for PendingStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PendingStream")
            .field("target", &self.target)
            .field("conversation_key", &self.conversation_key)
            .finish_non_exhaustive()
    }
}

pub struct ChatController {
    gateway: Arc<dyn ChatGateway>,
    session: Session,
    pet_key: Option<String>,
    conversations: HashMap<String, Conversation>,
    active_key: String,
    next_conversation_id: u64,
    next_message_id: u64,
    next_stream_id: u64,
}

impl ChatController {
    pub fn new(gateway: Arc<dyn ChatGateway>, session: Session) -> Self {
        let mut controller = Self {
            gateway,
            session,
            pet_key: None,
            conversations: HashMap::new(),
            active_key: String::new(),
            next_conversation_id: 0,
            next_message_id: 0,
            next_stream_id: 0,
        };
        controller.sync_context();
        controller
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn gateway(&self) -> &Arc<dyn ChatGateway> {
        &self.gateway
    }

    pub fn pet_key(&self) -> Option<&str> {
        self.pet_key.as_deref()
    }

    pub fn conversation_key(&self) -> &str {
        &self.active_key
    }

    pub fn active_conversation(&self) -> Option<&Conversation> {
        self.conversations.get(&self.active_key)
    }

    pub fn is_streaming(&self) -> bool {
        self.active_conversation()
            .is_some_and(|conversation| conversation.stream_state.active_target().is_some())
    }

    pub fn apply_pet_change(&mut self, change: PetChanged) -> bool {
        self.pet_key = change
            .pet_key
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty());
        self.sync_context()
    }

    /// Moves to the conversation for the current identity and pet.
    ///
    /// Returns `true` when the active conversation changed. Any stream still running in the
    /// previous conversation is cancelled first.
    pub fn sync_context(&mut self) -> bool {
        let key = conversation_key(self.session.is_authenticated(), self.pet_key.as_deref());
        if key == self.active_key {
            return false;
        }

        self.cancel_active();
        if key == ANONYMOUS_CONVERSATION_KEY {
            // Signed out; nothing from the account stays in memory.
            self.conversations
                .retain(|existing, _| existing == ANONYMOUS_CONVERSATION_KEY);
        }

        tracing::info!(from = %self.active_key, to = %key, "switching conversation");
        conversation_entry(&mut self.conversations, &mut self.next_conversation_id, &key);
        self.active_key = key;
        true
    }

    /// Marks the active stream, if any, as cancelled.
    pub fn cancel_active(&mut self) -> Option<StreamTarget> {
        let conversation = self.conversations.get_mut(&self.active_key)?;
        let target = conversation.stream_state.active_target()?;
        reducer::apply_stop(conversation, Stop { target });
        tracing::info!(target = ?target, "cancelled active stream");
        Some(target)
    }

    /// Appends the prompt and its assistant placeholder, then opens the agent stream.
    pub async fn start(&mut self, content: &str) -> ChatResult<PendingStream> {
        let content = content.trim();
        ensure!(
            !content.is_empty(),
            EmptyPromptSnafu {
                stage: "submit-prompt"
            }
        );

        self.sync_context();
        let conversation_key = self.active_key.clone();
        ensure!(
            !self.is_streaming(),
            AlreadyStreamingSnafu {
                stage: "submit-prompt",
                conversation_key,
            }
        );

        let user_id = MessageId::new(self.next_message_id());
        let assistant_id = MessageId::new(self.next_message_id());
        let session_id = StreamSessionId::new(self.next_stream_id());
        let credential = self.session.credential();
        let transport = transport::select(
            credential.is_some(),
            credential.as_deref(),
            self.pet_key.as_deref(),
            self.gateway.base_address(),
        );

        let conversation = conversation_entry(
            &mut self.conversations,
            &mut self.next_conversation_id,
            &conversation_key,
        );
        let submit = Submit::new(
            StreamTarget::new(conversation.id, session_id),
            content,
        );
        let target = submit.target;

        conversation
            .messages
            .push(Message::user_pending(user_id, submit.content.clone()));
        let history = conversation.wire_history();
        conversation
            .messages
            .push(Message::assistant_streaming(assistant_id, session_id));
        if let Err(rejection) = conversation.apply_stream_transition(submit.start_transition()) {
            tracing::warn!(target = ?target, rejection = ?rejection, "stream start rejected");
        }

        tracing::debug!(
            target = ?target,
            endpoint = %transport.endpoint,
            history = history.len(),
            "opening agent stream"
        );
        let request = ChatRequest::new(conversation_key.clone(), transport, history);
        match self.gateway.open_stream(request).await {
            Ok(events) => Ok(PendingStream {
                target,
                conversation_key,
                events,
            }),
            Err(error) => {
                if let Some(conversation) = self.conversations.get_mut(&conversation_key) {
                    reducer::apply_stream_event(
                        conversation,
                        StreamEventMapped::new(
                            target,
                            StreamEventPayload::Error(error.to_string()),
                        ),
                    );
                }
                Err(error).context(GatewaySnafu {
                    stage: "open-agent-stream",
                })
            }
        }
    }

    /// Pulls the stream to its end or until `cancel` resolves, folding each event into the
    /// conversation. `observer` sees every mapped event before it is applied.
    pub async fn drive<C, F>(
        &mut self,
        pending: PendingStream,
        cancel: C,
        mut observer: F,
    ) -> StreamState
    where
        C: Future<Output = ()>,
        F: FnMut(&StreamEventMapped),
    {
        let PendingStream {
            target,
            conversation_key,
            mut events,
        } = pending;
        let Some(conversation) = self.conversations.get_mut(&conversation_key) else {
            return StreamState::Idle;
        };
        if !conversation.stream_state.accepts_stream_event(target) {
            return conversation.stream_state.clone();
        }

        tokio::pin!(cancel);
        loop {
            tokio::select! {
                biased;
                () = &mut cancel => {
                    reducer::apply_stop(conversation, Stop { target });
                    tracing::info!(target = ?target, "stream cancelled by user");
                    break;
                }
                next = events.next() => {
                    let Some(item) = next else {
                        reducer::apply_stream_closed(conversation, target);
                        break;
                    };
                    let event = StreamEventMapped::from_decoded(target, item);
                    observer(&event);
                    if let Reduction::Finished(_) | Reduction::Stale =
                        reducer::apply_stream_event(conversation, event)
                    {
                        break;
                    }
                }
            }
        }

        drop(events);
        conversation.stream_state.clone()
    }

    /// `start` followed by `drive`, for callers that do not need the gap in between.
    pub async fn submit<C, F>(
        &mut self,
        content: &str,
        cancel: C,
        observer: F,
    ) -> ChatResult<StreamState>
    where
        C: Future<Output = ()>,
        F: FnMut(&StreamEventMapped),
    {
        let pending = self.start(content).await?;
        Ok(self.drive(pending, cancel, observer).await)
    }

    fn next_message_id(&mut self) -> u64 {
        self.next_message_id += 1;
        self.next_message_id
    }

    fn next_stream_id(&mut self) -> u64 {
        self.next_stream_id += 1;
        self.next_stream_id
    }
}

fn conversation_entry<'a>(
    conversations: &'a mut HashMap<String, Conversation>,
    last_id: &mut u64,
    key: &str,
) -> &'a mut Conversation {
    conversations.entry(key.to_string()).or_insert_with(|| {
        *last_id += 1;
        Conversation::new(ConversationId::new(*last_id), key)
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::Mutex;

    use futures::stream;
    use vetchat_agent::{
        AgentError, AgentResult, BoxFuture, DecodedEvent, PetProfile, TransportMode,
    };

    use super::*;
    use crate::chat::error::ChatError;
    use crate::chat::message::MessageStatus;
    use crate::session::tests::identity;

    /// Replays a scripted response and records every request.
    #[derive(Default)]
    pub(crate) struct ScriptedGateway {
        pub replies: Mutex<Vec<Vec<AgentResult<DecodedEvent>>>>,
        pub requests: Mutex<Vec<ChatRequest>>,
        pub pets: Mutex<Option<AgentResult<Vec<PetProfile>>>>,
        pub refuse: bool,
    }

    impl ScriptedGateway {
        pub(crate) fn replying(replies: Vec<Vec<AgentResult<DecodedEvent>>>) -> Self {
            Self {
                replies: Mutex::new(replies),
                ..Self::default()
            }
        }
    }

    impl ChatGateway for ScriptedGateway {
        fn base_address(&self) -> &str {
            "http://agent.test"
        }

        fn open_stream<'a>(
            &'a self,
            request: ChatRequest,
        ) -> BoxFuture<'a, AgentResult<DecodedEventStream>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request);
                if self.refuse {
                    return Err(AgentError::Status {
                        stage: "scripted",
                        status: 503,
                        body: "down".to_string(),
                    });
                }
                let mut replies = self.replies.lock().unwrap();
                let reply = if replies.is_empty() {
                    Vec::new()
                } else {
                    replies.remove(0)
                };
                Ok(stream::iter(reply).boxed())
            })
        }

        fn fetch_pets<'a>(
            &'a self,
            _credential: &'a str,
        ) -> BoxFuture<'a, AgentResult<Vec<PetProfile>>> {
            Box::pin(async move { self.pets.lock().unwrap().take().unwrap_or(Ok(Vec::new())) })
        }
    }

    fn text(fragment: &str) -> AgentResult<DecodedEvent> {
        Ok(DecodedEvent::TextDelta(fragment.to_string()))
    }

    fn never() -> std::future::Pending<()> {
        std::future::pending()
    }

    #[tokio::test]
    async fn streamed_reply_lands_in_the_assistant_message() {
        let gateway = Arc::new(ScriptedGateway::replying(vec![vec![
            text("Keep her "),
            text("hydrated."),
            Ok(DecodedEvent::Finished),
        ]]));
        let mut controller = ChatController::new(gateway.clone(), Session::new());

        let mut seen = Vec::new();
        let state = controller
            .submit("my cat sneezes", never(), |event| seen.push(event.clone()))
            .await
            .unwrap();

        assert!(matches!(state, StreamState::Done(_)));
        assert_eq!(seen.len(), 3);
        let conversation = controller.active_conversation().unwrap();
        assert_eq!(conversation.key, "anonymous-chat");
        assert_eq!(conversation.messages[0].text(), "my cat sneezes");
        assert_eq!(conversation.messages[1].text(), "Keep her hydrated.");
        assert_eq!(conversation.messages[1].status, MessageStatus::Done);

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(requests[0].transport.mode, TransportMode::Anonymous);
        assert_eq!(requests[0].conversation_key, "anonymous-chat");
        assert_eq!(requests[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn second_submit_while_streaming_is_rejected() {
        let gateway = Arc::new(ScriptedGateway::replying(vec![vec![text("partial")]]));
        let mut controller = ChatController::new(gateway.clone(), Session::new());

        let pending = controller.start("first").await.unwrap();
        let error = controller.start("second").await.unwrap_err();
        assert!(matches!(error, ChatError::AlreadyStreaming { .. }));
        assert_eq!(gateway.requests.lock().unwrap().len(), 1);

        let state = controller.drive(pending, never(), |_| {}).await;
        assert!(matches!(state, StreamState::Done(_)));
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn blank_prompt_is_ignored() {
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = ChatController::new(gateway.clone(), Session::new());

        let error = controller.start("   \n").await.unwrap_err();
        assert!(matches!(error, ChatError::EmptyPrompt { .. }));
        assert!(controller.active_conversation().unwrap().messages.is_empty());
        assert!(gateway.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn transport_error_mid_stream_keeps_partial_text() {
        let gateway = Arc::new(ScriptedGateway::replying(vec![vec![
            text("Partial"),
            Err(AgentError::Status {
                stage: "scripted",
                status: 500,
                body: String::new(),
            }),
            text("never applied"),
        ]]));
        let mut controller = ChatController::new(gateway, Session::new());

        let state = controller.submit("hi", never(), |_| {}).await.unwrap();

        assert!(matches!(state, StreamState::Error { .. }));
        let reply = &controller.active_conversation().unwrap().messages[1];
        assert_eq!(reply.text(), "Partial");
        assert!(matches!(reply.status, MessageStatus::Error(_)));
    }

    #[tokio::test]
    async fn refused_request_marks_reply_failed() {
        let gateway = Arc::new(ScriptedGateway {
            refuse: true,
            ..ScriptedGateway::default()
        });
        let mut controller = ChatController::new(gateway, Session::new());

        let error = controller.start("hi").await.unwrap_err();
        assert!(matches!(error, ChatError::Gateway { .. }));
        let conversation = controller.active_conversation().unwrap();
        assert!(matches!(conversation.messages[1].status, MessageStatus::Error(_)));
        assert!(!controller.is_streaming());
    }

    #[tokio::test]
    async fn cancel_stops_the_stream_and_keeps_partial_text() {
        let reply = stream::iter(vec![text("Par")]).chain(stream::pending());
        let gateway = Arc::new(ScriptedGateway::default());
        let mut controller = ChatController::new(gateway, Session::new());

        let mut pending = controller.start("hi").await.unwrap();
        pending.events = reply.boxed();

        let (cancel_tx, cancel_rx) = tokio::sync::oneshot::channel::<()>();
        let mut cancel_tx = Some(cancel_tx);
        let state = controller
            .drive(
                pending,
                async move {
                    let _ = cancel_rx.await;
                },
                |_| {
                    if let Some(sender) = cancel_tx.take() {
                        let _ = sender.send(());
                    }
                },
            )
            .await;

        assert!(matches!(state, StreamState::Cancelled(_)));
        let reply = &controller.active_conversation().unwrap().messages[1];
        assert_eq!(reply.text(), "Par");
        assert_eq!(reply.status, MessageStatus::Cancelled);
    }

    #[tokio::test]
    async fn identity_and_pet_select_the_conversation_and_headers() {
        let gateway = Arc::new(ScriptedGateway::replying(vec![
            vec![Ok(DecodedEvent::Finished)],
            vec![Ok(DecodedEvent::Finished)],
        ]));
        let session = Session::new();
        let mut controller = ChatController::new(gateway.clone(), session.clone());

        session.set_identity(identity("maria", "tok-0"));
        assert!(controller.sync_context());
        assert_eq!(controller.conversation_key(), "authenticated-chat-no-pet");

        assert!(controller.apply_pet_change(PetChanged {
            pet_key: Some("pet-42".to_string()),
        }));
        controller.submit("limping", never(), |_| {}).await.unwrap();
        assert_eq!(controller.conversation_key(), "authenticated-chat-pet-42");

        assert!(controller.apply_pet_change(PetChanged {
            pet_key: Some("unspecified".to_string()),
        }));
        controller.submit("general question", never(), |_| {}).await.unwrap();

        let requests = gateway.requests.lock().unwrap();
        assert_eq!(
            requests[0].transport.header("Authorization"),
            Some("Bearer tok-0")
        );
        assert_eq!(requests[0].transport.header("X-Pet-Key"), Some("pet-42"));
        assert_eq!(requests[1].transport.header("X-Pet-Key"), None);
        assert_eq!(requests[1].messages.len(), 1);
    }

    #[tokio::test]
    async fn switching_context_cancels_the_running_stream() {
        let gateway = Arc::new(ScriptedGateway::default());
        let session = Session::new();
        session.set_identity(identity("maria", "tok-0"));
        let mut controller = ChatController::new(gateway, session.clone());

        let pending = controller.start("hi").await.unwrap();
        session.sign_out();
        assert!(controller.sync_context());
        assert_eq!(controller.conversation_key(), "anonymous-chat");

        let state = controller.drive(pending, never(), |_| {}).await;
        assert!(matches!(state, StreamState::Idle));
        assert!(controller.active_conversation().unwrap().messages.is_empty());
    }
}
