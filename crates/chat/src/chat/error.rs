use snafu::Snafu;
use vetchat_agent::AgentError;

pub type ChatResult<T> = Result<T, ChatError>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ChatError {
    #[snafu(display("nothing to send"))]
    EmptyPrompt { stage: &'static str },
    #[snafu(display("a reply is still streaming in `{conversation_key}`"))]
    AlreadyStreaming {
        stage: &'static str,
        conversation_key: String,
    },
    #[snafu(display("agent request failed on `{stage}`, {source}"))]
    Gateway {
        stage: &'static str,
        source: AgentError,
    },
}
