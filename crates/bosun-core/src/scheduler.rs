use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::error::ControlResult;
use crate::id::{AgentId, CollectionId, SessionId, SlotId, TaskId};
use crate::transport::CommandTransport;

/// One agent submission, as produced by a resource plugin or derived from
/// the topology requirements.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitParams {
    /// The resource management system the scheduler should submit through.
    pub rms: String,
    #[serde(default)]
    pub agent_group: String,
    #[serde(default)]
    pub zone: String,
    pub n_agents: u32,
    pub slots_per_agent: u32,
    #[serde(default)]
    pub n_cores: u32,
    /// Active slots the submission is expected to contribute.
    /// Defaults to `n_agents * slots_per_agent` when zero.
    #[serde(default)]
    pub required_slots: u32,
    #[serde(default)]
    pub config: Option<String>,
}

impl SubmitParams {
    pub fn required_slots(&self) -> u32 {
        if self.required_slots > 0 {
            self.required_slots
        } else {
            self.n_agents * self.slots_per_agent
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventSeverity {
    Info,
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub enum SubmitEvent {
    Message { severity: EventSeverity, text: String },
    Done,
}

/// A task placement reported during topology activation.
#[derive(Debug, Clone)]
pub struct TaskActivated {
    pub task_id: TaskId,
    pub collection_id: Option<CollectionId>,
    pub agent_id: AgentId,
    pub slot_id: SlotId,
    pub path: String,
    pub host: String,
    pub work_dir: String,
}

#[derive(Debug, Clone)]
pub enum ActivationEvent {
    Message {
        severity: EventSeverity,
        text: String,
    },
    Progress {
        completed: u32,
        errors: u32,
        total: u32,
    },
    TaskActivated(TaskActivated),
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationMode {
    Activate,
    Update,
    Stop,
}

#[derive(Debug, Clone)]
pub struct AgentInfo {
    pub agent_id: AgentId,
    pub group_name: String,
    pub host: String,
    pub slots: u32,
}

/// A task exit reported by the scheduler.
#[derive(Debug, Clone)]
pub struct TaskDoneEvent {
    pub task_id: TaskId,
    pub path: String,
    pub exit_code: i32,
    pub signal: i32,
    pub host: String,
    pub work_dir: String,
}

/// A handle on one scheduler session. The control plane owns exactly one
/// per partition and drives every scheduler interaction through it.
#[tonic::async_trait]
pub trait SchedulerSession: Send + Sync {
    async fn create(&mut self) -> ControlResult<SessionId>;

    async fn attach(&mut self, session_id: &SessionId) -> ControlResult<()>;

    fn session_id(&self) -> Option<SessionId>;

    fn is_running(&self) -> bool;

    /// Shut the session down on a best-effort basis.
    /// The scheduler is responsible for tearing down any remaining agents.
    async fn shutdown(&mut self) -> ControlResult<()>;

    async fn submit(&mut self, params: &SubmitParams) -> ControlResult<mpsc::UnboundedReceiver<SubmitEvent>>;

    async fn wait_for_active_slots(&mut self, count: u32, timeout: Duration) -> ControlResult<()>;

    async fn agent_info(&self) -> ControlResult<Vec<AgentInfo>>;

    async fn agent_count(&self) -> ControlResult<usize>;

    async fn activate_topology(
        &mut self,
        file: &Path,
        mode: ActivationMode,
    ) -> ControlResult<mpsc::UnboundedReceiver<ActivationEvent>>;

    async fn shutdown_agent(&mut self, agent_id: AgentId) -> ControlResult<()>;

    async fn subscribe_task_done(&mut self) -> ControlResult<mpsc::UnboundedReceiver<TaskDoneEvent>>;

    /// The topology file active in the session, if any.
    /// Used when attaching to an existing session to rebuild local state.
    async fn active_topology_path(&self) -> ControlResult<Option<PathBuf>>;

    /// The placements of the currently active topology, if any.
    /// Used when attaching to an existing session to rebuild local state.
    async fn active_tasks(&self) -> ControlResult<Vec<TaskActivated>>;
}

/// Everything a partition session needs to talk to its deployment:
/// the scheduler session and the command transport to the tasks.
pub struct SessionLink {
    pub scheduler: Box<dyn SchedulerSession>,
    pub transport: Box<dyn CommandTransport>,
}

/// The factory for session links. The production backend connects to a real
/// deployment; the local backend spins up an in-process cluster.
#[tonic::async_trait]
pub trait SchedulerBackend: Send + Sync + 'static {
    async fn connect(&self, partition_id: &str) -> ControlResult<SessionLink>;
}
