use thiserror::Error;

pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("internal error: {0}")]
    InternalError(String),
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("rpc transport error: {0}")]
    TonicTransportError(#[from] tonic::transport::Error),
    #[error("rpc error: {0}")]
    TonicStatusError(#[from] tonic::Status),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for AgentError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        AgentError::InternalError("failed to send message to actor".to_string())
    }
}

impl From<AgentError> for tonic::Status {
    fn from(error: AgentError) -> Self {
        match error {
            AgentError::InvalidArgument(message) => tonic::Status::invalid_argument(message),
            AgentError::TonicStatusError(status) => status,
            e => tonic::Status::internal(e.to_string()),
        }
    }
}
