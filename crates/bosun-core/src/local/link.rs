use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bosun_server::actor::ActorHandle;
use log::info;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ControlError, ControlResult};
use crate::id::{AgentId, SessionId};
use crate::local::cluster::{ClusterMessage, LocalClusterActor};
use crate::local::LocalClusterOptions;
use crate::scheduler::{
    ActivationEvent, ActivationMode, AgentInfo, SchedulerBackend, SchedulerSession, SessionLink,
    SubmitEvent, SubmitParams, TaskActivated, TaskDoneEvent,
};
use crate::transport::{CommandTransport, DeviceCommand, DeviceEvent};

const SLOT_POLL_INTERVAL: Duration = Duration::from_millis(50);

type ClusterRegistry = Arc<Mutex<HashMap<SessionId, ActorHandle<LocalClusterActor>>>>;
type Binding = Arc<Mutex<Option<ActorHandle<LocalClusterActor>>>>;

/// A [SchedulerBackend] backed by in-process cluster actors.
///
/// Each created session spawns one cluster actor; sessions are kept in a
/// registry so a controller can attach to a session created earlier, as it
/// would against a real scheduler.
#[derive(Default)]
pub struct LocalBackend {
    options: LocalClusterOptions,
    registry: ClusterRegistry,
}

impl LocalBackend {
    pub fn new(options: LocalClusterOptions) -> Self {
        Self {
            options,
            registry: Arc::default(),
        }
    }
}

#[tonic::async_trait]
impl SchedulerBackend for LocalBackend {
    async fn connect(&self, partition_id: &str) -> ControlResult<SessionLink> {
        info!("connecting partition {partition_id:?} to the local cluster backend");
        let binding: Binding = Arc::default();
        Ok(SessionLink {
            scheduler: Box::new(LocalSchedulerSession {
                options: self.options.clone(),
                registry: self.registry.clone(),
                binding: binding.clone(),
                session_id: None,
                running: false,
            }),
            transport: Box::new(LocalTransport { binding }),
        })
    }
}

struct LocalSchedulerSession {
    options: LocalClusterOptions,
    registry: ClusterRegistry,
    binding: Binding,
    session_id: Option<SessionId>,
    running: bool,
}

impl LocalSchedulerSession {
    fn handle(&self) -> ControlResult<ActorHandle<LocalClusterActor>> {
        bound_handle(&self.binding)
    }

    async fn query<T>(
        &self,
        message: impl FnOnce(oneshot::Sender<T>) -> ClusterMessage,
    ) -> ControlResult<T> {
        let (tx, rx) = oneshot::channel();
        self.handle()?.send(message(tx)).await?;
        Ok(rx.await?)
    }
}

fn bound_handle(binding: &Binding) -> ControlResult<ActorHandle<LocalClusterActor>> {
    binding
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .clone()
        .ok_or_else(|| ControlError::RuntimeError("no active scheduler session".to_string()))
}

#[tonic::async_trait]
impl SchedulerSession for LocalSchedulerSession {
    async fn create(&mut self) -> ControlResult<SessionId> {
        let handle = ActorHandle::<LocalClusterActor>::new(self.options.clone());
        let session_id = SessionId::random();
        self.registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(session_id, handle.clone());
        *self.binding.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.session_id = Some(session_id);
        self.running = true;
        Ok(session_id)
    }

    async fn attach(&mut self, session_id: &SessionId) -> ControlResult<()> {
        let handle = self
            .registry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                ControlError::SessionAttachFailed(format!("session {session_id} not found"))
            })?;
        *self.binding.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        self.session_id = Some(*session_id);
        self.running = true;
        Ok(())
    }

    fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    fn is_running(&self) -> bool {
        self.running
    }

    async fn shutdown(&mut self) -> ControlResult<()> {
        let handle = self.binding.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            let _ = handle.send(ClusterMessage::Shutdown).await;
            handle.wait_for_stop().await;
        }
        if let Some(session_id) = self.session_id.take() {
            self.registry
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .remove(&session_id);
        }
        self.running = false;
        Ok(())
    }

    async fn submit(
        &mut self,
        params: &SubmitParams,
    ) -> ControlResult<mpsc::UnboundedReceiver<SubmitEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handle()?
            .send(ClusterMessage::Submit {
                params: params.clone(),
                events: tx,
            })
            .await?;
        Ok(rx)
    }

    async fn wait_for_active_slots(&mut self, count: u32, timeout: Duration) -> ControlResult<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let slots: u32 = self.query(|reply| ClusterMessage::SlotCount { reply }).await?;
            if slots >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(ControlError::RequestTimeout(format!(
                    "timed out waiting for {count} active slots, have {slots}"
                )));
            }
            tokio::time::sleep(SLOT_POLL_INTERVAL).await;
        }
    }

    async fn agent_info(&self) -> ControlResult<Vec<AgentInfo>> {
        self.query(|reply| ClusterMessage::AgentInfo { reply }).await
    }

    async fn agent_count(&self) -> ControlResult<usize> {
        Ok(self.agent_info().await?.len())
    }

    async fn activate_topology(
        &mut self,
        file: &Path,
        mode: ActivationMode,
    ) -> ControlResult<mpsc::UnboundedReceiver<ActivationEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handle()?
            .send(ClusterMessage::Activate {
                file: file.to_path_buf(),
                mode,
                events: tx,
            })
            .await?;
        Ok(rx)
    }

    async fn shutdown_agent(&mut self, agent_id: AgentId) -> ControlResult<()> {
        self.query(|reply| ClusterMessage::ShutdownAgent { agent_id, reply })
            .await?
    }

    async fn subscribe_task_done(&mut self) -> ControlResult<mpsc::UnboundedReceiver<TaskDoneEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.handle()?
            .send(ClusterMessage::RegisterTaskDoneSink { sink: tx })
            .await?;
        Ok(rx)
    }

    async fn active_topology_path(&self) -> ControlResult<Option<PathBuf>> {
        self.query(|reply| ClusterMessage::ActiveTopology { reply })
            .await
    }

    async fn active_tasks(&self) -> ControlResult<Vec<TaskActivated>> {
        self.query(|reply| ClusterMessage::ActiveTasks { reply })
            .await
    }
}

struct LocalTransport {
    binding: Binding,
}

#[tonic::async_trait]
impl CommandTransport for LocalTransport {
    async fn broadcast(&self, path_filter: &str, command: DeviceCommand) -> ControlResult<()> {
        let (tx, rx) = oneshot::channel();
        bound_handle(&self.binding)?
            .send(ClusterMessage::Command {
                path: path_filter.to_string(),
                command,
                reply: tx,
            })
            .await?;
        rx.await?;
        Ok(())
    }

    async fn subscribe(&self) -> ControlResult<mpsc::UnboundedReceiver<DeviceEvent>> {
        let (tx, rx) = mpsc::unbounded_channel();
        bound_handle(&self.binding)?
            .send(ClusterMessage::RegisterEventSink { sink: tx })
            .await?;
        Ok(rx)
    }
}
