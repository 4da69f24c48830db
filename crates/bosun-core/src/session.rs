use std::collections::HashMap;
use std::path::{Path, PathBuf};

use log::{debug, error, info};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::coordinator::TopologyCoordinator;
use crate::deadline::Deadline;
use crate::device::AggregatedState;
use crate::error::{ControlError, ControlResult};
use crate::id::{AgentId, CollectionId, SessionId, SlotId, TaskId};
use crate::scheduler::{
    ActivationEvent, ActivationMode, EventSeverity, SchedulerSession, TaskActivated, TaskDoneEvent,
};
use crate::topology::{TopoModel, TopologySpec};

/// A task placement, immutable for the life of an activation.
#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: TaskId,
    pub collection_id: Option<CollectionId>,
    pub path: String,
    pub host: String,
    pub work_dir: String,
    pub agent_id: AgentId,
    pub slot_id: SlotId,
    pub expendable: bool,
}

#[derive(Debug, Clone)]
pub struct CollectionRecord {
    pub id: CollectionId,
    pub name: String,
    pub path: String,
    pub zone: String,
    pub agent_group: String,
    pub n_original: u32,
    pub n_min: Option<u32>,
    pub n_cores: u32,
    pub num_tasks: u32,
    pub total_tasks: u32,
    pub host: String,
    pub work_dir: String,
    pub agent_id: AgentId,
}

/// Read-only access to the placement caches, handed to coordinator
/// operations that need task or collection metadata.
pub struct SessionView<'a> {
    pub tasks: &'a HashMap<TaskId, TaskRecord>,
    pub collections: &'a HashMap<CollectionId, CollectionRecord>,
}

/// The per-partition record: one scheduler session, the active topology
/// model, and the placement caches built from activation events.
pub struct Session {
    pub partition_id: String,
    pub scheduler: Box<dyn SchedulerSession>,
    pub coordinator: TopologyCoordinator,
    pub model: Option<TopoModel>,
    pub topo_file: Option<PathBuf>,
    pub tasks: HashMap<TaskId, TaskRecord>,
    pub collections: HashMap<CollectionId, CollectionRecord>,
    task_done_logger: Option<JoinHandle<()>>,
}

impl Session {
    pub fn new(
        partition_id: &str,
        scheduler: Box<dyn SchedulerSession>,
        coordinator: TopologyCoordinator,
    ) -> Self {
        Self {
            partition_id: partition_id.to_string(),
            scheduler,
            coordinator,
            model: None,
            topo_file: None,
            tasks: HashMap::new(),
            collections: HashMap::new(),
            task_done_logger: None,
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.scheduler.session_id()
    }

    pub fn view(&self) -> SessionView<'_> {
        SessionView {
            tasks: &self.tasks,
            collections: &self.collections,
        }
    }

    /// Log task exits reported by the scheduler for the life of the session.
    pub fn log_task_done_events(&mut self, mut events: mpsc::UnboundedReceiver<TaskDoneEvent>) {
        let partition_id = self.partition_id.clone();
        self.task_done_logger = Some(tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if event.exit_code != 0 || event.signal != 0 {
                    error!(
                        "partition {partition_id}: task {} with path {:?} exited with code {} and signal {} on host {}",
                        event.task_id, event.path, event.exit_code, event.signal, event.host
                    );
                } else {
                    debug!(
                        "partition {partition_id}: task {} with path {:?} exited cleanly",
                        event.task_id, event.path
                    );
                }
            }
        }));
    }

    /// The ids of the tasks matching a path filter.
    /// An empty filter selects every task of the active topology.
    pub fn select_tasks(&self, path: &str) -> Vec<TaskId> {
        let mut out: Vec<TaskId> = self
            .tasks
            .values()
            .filter(|t| path.is_empty() || t.path.starts_with(path))
            .map(|t| t.id)
            .collect();
        out.sort();
        out
    }

    /// Aggregate the state of the tasks selected by a path.
    ///
    /// A path resolving to exactly one task yields that task's state;
    /// a non-empty path matching nothing is an error.
    pub fn aggregate_for_path(&self, path: &str) -> ControlResult<AggregatedState> {
        if self.model.is_none() {
            return Err(ControlError::GetStateFailed(
                "topology is not initialized".to_string(),
            ));
        }
        if path.is_empty() {
            return Ok(self.coordinator.table().aggregate_all());
        }
        let targets = self.select_tasks(path);
        if targets.is_empty() {
            return Err(ControlError::GetStateFailed(format!(
                "no tasks found matching the path {path:?}"
            )));
        }
        if let [task_id] = targets.as_slice() {
            if let Some(entry) = self.coordinator.table().get(*task_id) {
                return Ok(AggregatedState::Device(entry.state));
            }
        }
        Ok(self.coordinator.table().aggregate(targets))
    }

    /// The distinct hosts the active topology runs on.
    pub fn hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.tasks.values().map(|t| t.host.clone()).collect();
        hosts.sort();
        hosts.dedup();
        hosts
    }

    /// Activate or update the topology at the scheduler and rebuild the
    /// model, the placement caches, and the task state table from the
    /// reported placements.
    pub async fn activate_topology(
        &mut self,
        file: &Path,
        mode: ActivationMode,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        let spec = TopologySpec::from_file(file)?;
        let model = TopoModel::build(spec)?;

        let mut events = self
            .scheduler
            .activate_topology(file, mode)
            .await
            .map_err(|e| ControlError::ActivateTopologyFailed(e.details()))?;

        let mut placements: Vec<TaskActivated> = vec![];
        let mut failure: Option<String> = None;
        loop {
            let remaining = deadline.remaining("activate topology")?;
            let event = tokio::time::timeout(remaining, events.recv())
                .await
                .map_err(|_| {
                    ControlError::RequestTimeout(
                        "timed out waiting for topology activation".to_string(),
                    )
                })?;
            match event {
                Some(ActivationEvent::TaskActivated(placement)) => placements.push(placement),
                Some(ActivationEvent::Message { severity, text }) => {
                    if severity == EventSeverity::Error {
                        failure = Some(text);
                    } else {
                        debug!("activate: {text}");
                    }
                }
                Some(ActivationEvent::Progress {
                    completed,
                    errors,
                    total,
                }) => {
                    if completed + errors == total {
                        info!("activated tasks ({completed}), errors ({errors}), total ({total})");
                    }
                }
                Some(ActivationEvent::Done) => break,
                None => {
                    failure.get_or_insert_with(|| "activation stream closed".to_string());
                    break;
                }
            }
        }
        if let Some(failure) = failure {
            return Err(ControlError::ActivateTopologyFailed(failure));
        }

        self.adopt_topology(model, file, &placements);
        self.coordinator.subscribe_state_changes("").await?;
        info!(
            "topology {} activated with {} tasks in {} collections",
            file.display(),
            self.tasks.len(),
            self.collections.len()
        );
        Ok(())
    }

    /// Rebuild local topology state when attaching to a session that
    /// already has an active topology.
    pub async fn rebuild_from_attach(&mut self, file: &Path) -> ControlResult<()> {
        let spec = TopologySpec::from_file(file)
            .map_err(|e| ControlError::CreateTopologyFailed(e.details()))?;
        let model =
            TopoModel::build(spec).map_err(|e| ControlError::CreateTopologyFailed(e.details()))?;
        let placements = self
            .scheduler
            .active_tasks()
            .await
            .map_err(|e| ControlError::CreateTopologyFailed(e.details()))?;
        self.adopt_topology(model, file, &placements);
        self.coordinator.subscribe_state_changes("").await?;
        Ok(())
    }

    fn adopt_topology(&mut self, model: TopoModel, file: &Path, placements: &[TaskActivated]) {
        self.tasks.clear();
        self.collections.clear();
        for placement in placements {
            let task_name = strip_instance_suffix(leaf_name(&placement.path));
            let expendable = model.is_expendable_task(task_name);
            self.tasks.insert(
                placement.task_id,
                TaskRecord {
                    id: placement.task_id,
                    collection_id: placement.collection_id,
                    path: placement.path.clone(),
                    host: placement.host.clone(),
                    work_dir: placement.work_dir.clone(),
                    agent_id: placement.agent_id,
                    slot_id: placement.slot_id,
                    expendable,
                },
            );
            if let Some(collection_id) = placement.collection_id {
                let collection_path = parent_path(&placement.path);
                let name = strip_instance_suffix(leaf_name(&collection_path)).to_string();
                let info = model.collection(&name);
                self.collections
                    .entry(collection_id)
                    .or_insert_with(|| CollectionRecord {
                        id: collection_id,
                        name,
                        path: collection_path.clone(),
                        zone: info.map(|i| i.zone.clone()).unwrap_or_default(),
                        agent_group: info.map(|i| i.agent_group.clone()).unwrap_or_default(),
                        n_original: info.map(|i| i.n_original).unwrap_or(1),
                        n_min: info.and_then(|i| i.n_min),
                        n_cores: info.map(|i| i.n_cores).unwrap_or(0),
                        num_tasks: info.map(|i| i.num_tasks).unwrap_or(0),
                        total_tasks: info.map(|i| i.total_tasks).unwrap_or(0),
                        host: placement.host.clone(),
                        work_dir: placement.work_dir.clone(),
                        agent_id: placement.agent_id,
                    });
            }
        }
        self.coordinator.rebuild_table(
            self.tasks
                .values()
                .map(|t| (t.id, t.collection_id, t.expendable)),
        );
        self.model = Some(model);
        self.topo_file = Some(file.to_path_buf());
    }

    /// Drop the active topology state, keeping the scheduler session.
    pub fn clear_topology(&mut self) {
        self.model = None;
        self.tasks.clear();
        self.collections.clear();
        self.coordinator.clear_table();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(handle) = self.task_done_logger.take() {
            handle.abort();
        }
    }
}

fn leaf_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn parent_path(path: &str) -> String {
    match path.rfind('/') {
        Some(pos) => path[..pos].to_string(),
        None => path.to_string(),
    }
}

/// Strip the `_<index>` instance suffix a replicated element carries.
fn strip_instance_suffix(name: &str) -> &str {
    match name.rsplit_once('_') {
        Some((base, suffix)) if !suffix.is_empty() && suffix.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_helpers() {
        assert_eq!(leaf_name("main/online/Processors_0/processor"), "processor");
        assert_eq!(
            parent_path("main/online/Processors_0/processor"),
            "main/online/Processors_0"
        );
        assert_eq!(strip_instance_suffix("Processors_12"), "Processors");
        assert_eq!(strip_instance_suffix("Processors"), "Processors");
        assert_eq!(strip_instance_suffix("wf11.dds"), "wf11.dds");
        assert_eq!(strip_instance_suffix("col_a"), "col_a");
    }
}
