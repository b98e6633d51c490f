use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum AgentError {
    #[snafu(display("failed to build http client on `{stage}`, {source}"))]
    BuildClient {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("header '{name}' has an invalid value on `{stage}`"))]
    InvalidHeader {
        stage: &'static str,
        name: String,
    },
    #[snafu(display("failed to encode chat request on `{stage}`, {source}"))]
    EncodeRequest {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("failed to reach agent gateway at {endpoint}, {source}"))]
    Connect {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("agent gateway returned status {status}: {body}"))]
    Status {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("agent stream broke while reading, {source}"))]
    ReadChunk {
        stage: &'static str,
        source: reqwest::Error,
    },
    #[snafu(display("failed to request pet profiles from {endpoint}, {source}"))]
    PetsRequest {
        stage: &'static str,
        endpoint: String,
        source: reqwest::Error,
    },
    #[snafu(display("pet directory returned status {status}: {body}"))]
    PetsStatus {
        stage: &'static str,
        status: u16,
        body: String,
    },
    #[snafu(display("failed to parse pet directory response, {source}"))]
    PetsPayload {
        stage: &'static str,
        source: serde_json::Error,
    },
}

impl AgentError {
    /// True for failures of the chat request or its response stream.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::BuildClient { .. }
                | Self::InvalidHeader { .. }
                | Self::EncodeRequest { .. }
                | Self::Connect { .. }
                | Self::Status { .. }
                | Self::ReadChunk { .. }
        )
    }

    /// True for failures of the pet directory query.
    pub fn is_context_fetch(&self) -> bool {
        matches!(
            self,
            Self::PetsRequest { .. } | Self::PetsStatus { .. } | Self::PetsPayload { .. }
        )
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::BuildClient { stage, .. }
            | Self::InvalidHeader { stage, .. }
            | Self::EncodeRequest { stage, .. }
            | Self::Connect { stage, .. }
            | Self::Status { stage, .. }
            | Self::ReadChunk { stage, .. }
            | Self::PetsRequest { stage, .. }
            | Self::PetsStatus { stage, .. }
            | Self::PetsPayload { stage, .. } => stage,
        }
    }
}

pub type AgentResult<T> = Result<T, AgentError>;
