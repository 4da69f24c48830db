use crate::device::{AggregatedState, DeviceState};
use crate::error::{ControlError, ErrorCode};
use crate::id::{SessionId, TaskId};
use crate::topology::TopologySource;

/// Parameters common to every partition request.
#[derive(Debug, Clone, Default)]
pub struct CommonParams {
    pub partition_id: String,
    pub run_number: u64,
    /// Request timeout in seconds. Zero means the controller default.
    pub timeout_secs: u64,
}

impl CommonParams {
    pub fn new(partition_id: impl Into<String>) -> Self {
        Self {
            partition_id: partition_id.into(),
            run_number: 0,
            timeout_secs: 0,
        }
    }

    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct InitializeRequest {
    pub common: CommonParams,
    /// An existing scheduler session to attach to.
    /// A new session is created when unset.
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, Default)]
pub struct SubmitRequest {
    pub common: CommonParams,
    pub plugin: String,
    pub resources: String,
}

#[derive(Debug, Clone, Default)]
pub struct ActivateRequest {
    pub common: CommonParams,
    pub topology: TopologySource,
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub common: CommonParams,
    /// Run always creates a new session; supplying one is rejected.
    pub session_id: Option<SessionId>,
    pub plugin: String,
    pub resources: String,
    pub topology: TopologySource,
    /// Derive the agent submissions from the topology requirements
    /// instead of calling a resource plugin.
    pub extract_topo_resources: bool,
}

#[derive(Debug, Clone, Default)]
pub struct UpdateRequest {
    pub common: CommonParams,
    pub topology: TopologySource,
}

#[derive(Debug, Clone, Default)]
pub struct SetPropertiesRequest {
    pub common: CommonParams,
    pub path: String,
    pub properties: Vec<(String, String)>,
}

/// The shared shape of the state-machine requests:
/// GetState, Configure, Start, Stop, Reset and Terminate.
#[derive(Debug, Clone, Default)]
pub struct DeviceRequest {
    pub common: CommonParams,
    pub path: String,
    pub detailed: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ShutdownRequest {
    pub common: CommonParams,
}

#[derive(Debug, Clone, Default)]
pub struct StatusRequest {
    pub running_only: bool,
}

/// The request kinds, used for dispatch logging and request triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Initialize,
    Submit,
    Activate,
    Run,
    Update,
    SetProperties,
    GetState,
    Configure,
    Start,
    Stop,
    Reset,
    Terminate,
    Shutdown,
    Status,
}

impl RequestKind {
    pub const ALL: [RequestKind; 14] = [
        RequestKind::Initialize,
        RequestKind::Submit,
        RequestKind::Activate,
        RequestKind::Run,
        RequestKind::Update,
        RequestKind::SetProperties,
        RequestKind::GetState,
        RequestKind::Configure,
        RequestKind::Start,
        RequestKind::Stop,
        RequestKind::Reset,
        RequestKind::Terminate,
        RequestKind::Shutdown,
        RequestKind::Status,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            RequestKind::Initialize => "Initialize",
            RequestKind::Submit => "Submit",
            RequestKind::Activate => "Activate",
            RequestKind::Run => "Run",
            RequestKind::Update => "Update",
            RequestKind::SetProperties => "SetProperties",
            RequestKind::GetState => "GetState",
            RequestKind::Configure => "Configure",
            RequestKind::Start => "Start",
            RequestKind::Stop => "Stop",
            RequestKind::Reset => "Reset",
            RequestKind::Terminate => "Terminate",
            RequestKind::Shutdown => "Shutdown",
            RequestKind::Status => "Status",
        }
    }
}

impl std::fmt::Display for RequestKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Ok,
    Error,
}

#[derive(Debug, Clone)]
pub struct RequestError {
    pub code: ErrorCode,
    pub details: String,
}

impl From<&ControlError> for RequestError {
    fn from(error: &ControlError) -> Self {
        Self {
            code: error.code(),
            details: error.to_string(),
        }
    }
}

/// One entry of the detailed per-task state listing.
#[derive(Debug, Clone)]
pub struct TaskDetail {
    pub task_id: TaskId,
    pub state: DeviceState,
    pub ignored: bool,
    pub expendable: bool,
    pub host: String,
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct TopologyState {
    pub aggregated: AggregatedState,
    pub detailed: Option<Vec<TaskDetail>>,
}

impl Default for TopologyState {
    fn default() -> Self {
        Self {
            aggregated: AggregatedState::Undefined,
            detailed: None,
        }
    }
}

/// The reply of every partition request.
#[derive(Debug, Clone)]
pub struct RequestResult {
    pub status: RequestStatus,
    pub message: String,
    pub exec_time_ms: u64,
    pub error: Option<RequestError>,
    pub partition_id: String,
    pub run_number: u64,
    pub session_id: Option<SessionId>,
    pub topology_state: TopologyState,
    pub hosts: Vec<String>,
}

impl RequestResult {
    pub fn is_ok(&self) -> bool {
        self.status == RequestStatus::Ok
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Running,
    Stopped,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Running => write!(f, "running"),
            SessionStatus::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PartitionStatus {
    pub partition_id: String,
    pub session_id: Option<SessionId>,
    pub session_status: SessionStatus,
    pub aggregated_state: AggregatedState,
}

/// The reply of the status request.
#[derive(Debug, Clone)]
pub struct StatusResult {
    pub status: RequestStatus,
    pub message: String,
    pub exec_time_ms: u64,
    pub partitions: Vec<PartitionStatus>,
}
