use thiserror::Error;

pub type ControlResult<T> = Result<T, ControlError>;

/// Errors produced by the partition control plane.
/// Each variant carries a stable [ErrorCode] that is reported to callers
/// in request results and over the wire.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error("request timed out: {0}")]
    RequestTimeout(String),
    #[error("request not supported: {0}")]
    RequestNotSupported(String),
    #[error("failed to create scheduler session: {0}")]
    SessionCreateFailed(String),
    #[error("failed to attach to scheduler session: {0}")]
    SessionAttachFailed(String),
    #[error("failed to shut down scheduler session: {0}")]
    SessionShutdownFailed(String),
    #[error("failed to subscribe to scheduler session: {0}")]
    SessionSubscribeFailed(String),
    #[error("failed to query scheduler session info: {0}")]
    SessionCommanderInfoFailed(String),
    #[error("scheduler session is not running: {0}")]
    SessionNotRunning(String),
    #[error("failed to submit agents: {0}")]
    SubmitAgentsFailed(String),
    #[error("resource plugin failed: {0}")]
    ResourcePluginFailed(String),
    #[error("failed to activate topology: {0}")]
    ActivateTopologyFailed(String),
    #[error("failed to create topology: {0}")]
    CreateTopologyFailed(String),
    #[error("change state failed: {0}")]
    ChangeStateFailed(String),
    #[error("get state failed: {0}")]
    GetStateFailed(String),
    #[error("set properties failed: {0}")]
    SetPropertiesFailed(String),
    #[error("get properties failed: {0}")]
    GetPropertiesFailed(String),
    #[error("topology error: {0}")]
    TopologyFailed(String),
    #[error("runtime error: {0}")]
    RuntimeError(String),
}

impl ControlError {
    pub fn code(&self) -> ErrorCode {
        match self {
            ControlError::RequestTimeout(_) => ErrorCode::RequestTimeout,
            ControlError::RequestNotSupported(_) => ErrorCode::RequestNotSupported,
            ControlError::SessionCreateFailed(_) => ErrorCode::SessionCreateFailed,
            ControlError::SessionAttachFailed(_) => ErrorCode::SessionAttachFailed,
            ControlError::SessionShutdownFailed(_) => ErrorCode::SessionShutdownFailed,
            ControlError::SessionSubscribeFailed(_) => ErrorCode::SessionSubscribeFailed,
            ControlError::SessionCommanderInfoFailed(_) => ErrorCode::SessionCommanderInfoFailed,
            ControlError::SessionNotRunning(_) => ErrorCode::SessionNotRunning,
            ControlError::SubmitAgentsFailed(_) => ErrorCode::SubmitAgentsFailed,
            ControlError::ResourcePluginFailed(_) => ErrorCode::ResourcePluginFailed,
            ControlError::ActivateTopologyFailed(_) => ErrorCode::ActivateTopologyFailed,
            ControlError::CreateTopologyFailed(_) => ErrorCode::CreateTopologyFailed,
            ControlError::ChangeStateFailed(_) => ErrorCode::ChangeStateFailed,
            ControlError::GetStateFailed(_) => ErrorCode::GetStateFailed,
            ControlError::SetPropertiesFailed(_) => ErrorCode::SetPropertiesFailed,
            ControlError::GetPropertiesFailed(_) => ErrorCode::GetPropertiesFailed,
            ControlError::TopologyFailed(_) => ErrorCode::TopologyFailed,
            ControlError::RuntimeError(_) => ErrorCode::RuntimeError,
        }
    }

    pub fn details(&self) -> String {
        match self {
            ControlError::RequestTimeout(x)
            | ControlError::RequestNotSupported(x)
            | ControlError::SessionCreateFailed(x)
            | ControlError::SessionAttachFailed(x)
            | ControlError::SessionShutdownFailed(x)
            | ControlError::SessionSubscribeFailed(x)
            | ControlError::SessionCommanderInfoFailed(x)
            | ControlError::SessionNotRunning(x)
            | ControlError::SubmitAgentsFailed(x)
            | ControlError::ResourcePluginFailed(x)
            | ControlError::ActivateTopologyFailed(x)
            | ControlError::CreateTopologyFailed(x)
            | ControlError::ChangeStateFailed(x)
            | ControlError::GetStateFailed(x)
            | ControlError::SetPropertiesFailed(x)
            | ControlError::GetPropertiesFailed(x)
            | ControlError::TopologyFailed(x)
            | ControlError::RuntimeError(x) => x.clone(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        ControlError::RuntimeError(message.into())
    }
}

impl From<std::io::Error> for ControlError {
    fn from(error: std::io::Error) -> Self {
        ControlError::RuntimeError(format!("IO error: {error}"))
    }
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for ControlError {
    fn from(_: tokio::sync::mpsc::error::SendError<T>) -> Self {
        ControlError::RuntimeError("channel closed".to_string())
    }
}

impl From<tokio::sync::oneshot::error::RecvError> for ControlError {
    fn from(_: tokio::sync::oneshot::error::RecvError) -> Self {
        ControlError::RuntimeError("channel closed".to_string())
    }
}

/// Stable error identifiers reported to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ErrorCode {
    RuntimeError = 100,
    RequestTimeout = 101,
    RequestNotSupported = 102,
    SessionCreateFailed = 110,
    SessionAttachFailed = 111,
    SessionShutdownFailed = 112,
    SessionSubscribeFailed = 113,
    SessionCommanderInfoFailed = 114,
    SessionNotRunning = 115,
    SubmitAgentsFailed = 120,
    ResourcePluginFailed = 121,
    ActivateTopologyFailed = 130,
    CreateTopologyFailed = 131,
    TopologyFailed = 132,
    ChangeStateFailed = 140,
    GetStateFailed = 141,
    SetPropertiesFailed = 142,
    GetPropertiesFailed = 143,
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}
