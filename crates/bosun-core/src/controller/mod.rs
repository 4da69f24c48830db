mod requests;

pub use requests::*;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bosun_common::config::ControllerConfig;
use log::{debug, error, info, warn};

use crate::coordinator::{TopologyCoordinator, TransitionError};
use crate::deadline::Deadline;
use crate::device::{AggregatedState, Transition};
use crate::error::{ControlError, ControlResult};
use crate::id::SessionId;
use crate::plugin::PluginRegistry;
use crate::restore::{append_history, RestoreData, RestoreEntry, RestoreFile};
use crate::scheduler::{
    ActivationMode, SchedulerBackend, SessionLink, SubmitEvent, SubmitParams,
};
use crate::session::{Session, SessionView};
use crate::topology::{materialize, TopoModel, TopologySource, TopologySpec};

const CONFIGURE_TRANSITIONS: [Transition; 5] = [
    Transition::InitDevice,
    Transition::CompleteInit,
    Transition::Bind,
    Transition::Connect,
    Transition::InitTask,
];

const RESET_TRANSITIONS: [Transition; 2] = [Transition::ResetTask, Transition::ResetDevice];

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    /// Applied when a request does not carry its own timeout.
    pub default_timeout: Duration,
    /// The resource management system used for topology-derived submissions.
    pub rms: String,
    pub restore_dir: Option<std::path::PathBuf>,
    pub restore_id: Option<String>,
    pub history_dir: Option<std::path::PathBuf>,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            default_timeout: Duration::from_secs(30),
            rms: "local".to_string(),
            restore_dir: None,
            restore_id: None,
            history_dir: None,
        }
    }
}

impl From<&ControllerConfig> for ControllerOptions {
    fn from(config: &ControllerConfig) -> Self {
        Self {
            default_timeout: Duration::from_secs(config.request_timeout_secs),
            rms: "local".to_string(),
            restore_dir: config.restore_dir.clone(),
            restore_id: config.restore_id.clone(),
            history_dir: config.history_dir.clone(),
        }
    }
}

struct Partition {
    id: String,
    state: tokio::sync::Mutex<PartitionState>,
    /// The last session id seen on this partition, readable without
    /// taking the request mutex. Status and restore snapshots fall back
    /// to it when the partition is busy with a request.
    last_session: Mutex<Option<SessionId>>,
}

#[derive(Default)]
struct PartitionState {
    session: Option<Session>,
}

/// The partition control plane.
///
/// Owns the partition map and dispatches lifecycle requests. Requests on
/// the same partition are serialized by a per-partition mutex; different
/// partitions proceed independently. Every request is bounded by a
/// wall-clock deadline; sub-operations receive the remaining share.
pub struct PartitionController {
    backend: Arc<dyn SchedulerBackend>,
    options: ControllerOptions,
    partitions: Mutex<HashMap<String, Arc<Partition>>>,
    resource_plugins: PluginRegistry,
    triggers: PluginRegistry,
}

impl PartitionController {
    pub fn new(backend: Arc<dyn SchedulerBackend>, options: ControllerOptions) -> Self {
        Self {
            backend,
            options,
            partitions: Mutex::new(HashMap::new()),
            resource_plugins: PluginRegistry::default(),
            triggers: PluginRegistry::default(),
        }
    }

    /// Build a controller from the application configuration, registering
    /// its resource plugins and request triggers.
    pub fn from_config(
        backend: Arc<dyn SchedulerBackend>,
        config: &ControllerConfig,
    ) -> ControlResult<Self> {
        let mut controller = Self::new(backend, ControllerOptions::from(config));
        for (name, command) in &config.resource_plugins {
            controller.register_resource_plugin(name, command);
        }
        for (name, command) in &config.request_triggers {
            controller.register_request_trigger(name, command)?;
        }
        Ok(controller)
    }

    pub fn register_resource_plugin(&mut self, name: &str, command: &str) {
        self.resource_plugins.register(name, command);
    }

    pub fn register_request_trigger(&mut self, name: &str, command: &str) -> ControlResult<()> {
        if !RequestKind::ALL.iter().any(|k| k.name() == name) {
            return Err(ControlError::RuntimeError(format!(
                "failed to add request trigger {name:?}: not a valid request name"
            )));
        }
        self.triggers.register(name, command);
        Ok(())
    }

    /// Reattach to the sessions recorded in the restore file.
    /// Call before serving requests. Partitions that cannot be attached
    /// get their Shutdown trigger fired.
    pub async fn restore(&self) {
        let (Some(dir), Some(id)) = (&self.options.restore_dir, &self.options.restore_id) else {
            return;
        };
        info!("restoring sessions for {id:?}");
        let data = match RestoreFile::new(dir, id).read() {
            Ok(data) => data,
            Err(e) => {
                error!("failed to read restore file: {e}");
                return;
            }
        };
        for entry in data.entries {
            info!(
                "restoring ({:?}/{})",
                entry.partition_id, entry.session_id
            );
            let request = InitializeRequest {
                common: CommonParams::new(entry.partition_id.clone()),
                session_id: Some(entry.session_id),
            };
            let result = self.initialize(request).await;
            if result.is_ok() {
                info!("successfully attached to the session of {:?}", entry.partition_id);
            } else {
                info!(
                    "failed to attach to the session of {:?}; executing the Shutdown trigger",
                    entry.partition_id
                );
                self.triggers
                    .fire_trigger("Shutdown", &entry.partition_id, 0)
                    .await;
            }
        }
    }

    // Lifecycle requests. Each acquires the partition, runs its flow
    // against the remaining deadline, fires the request trigger, and
    // reports the outcome as a populated result.

    pub async fn initialize(&self, request: InitializeRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::Initialize, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self.exec_initialize(&mut state, &request, &deadline).await;
        self.note_session(&partition, &state);
        self.update_restore(&common.partition_id, &state);
        self.finish(
            RequestKind::Initialize,
            &common,
            &state,
            outcome,
            &deadline,
            "Initialize done",
            None,
        )
        .await
    }

    pub async fn submit(&self, request: SubmitRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::Submit, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self.exec_submit(&mut state, &request, &deadline).await;
        self.finish(
            RequestKind::Submit,
            &common,
            &state,
            outcome,
            &deadline,
            "Submit done",
            None,
        )
        .await
    }

    pub async fn activate(&self, request: ActivateRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::Activate, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self
            .exec_activate(&mut state, &request.topology, &common, &deadline)
            .await;
        self.finish(
            RequestKind::Activate,
            &common,
            &state,
            outcome,
            &deadline,
            "Activate done",
            Some(("", false)),
        )
        .await
    }

    pub async fn run(&self, request: RunRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::Run, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self.exec_run(&mut state, &request, &deadline).await;
        self.note_session(&partition, &state);
        self.update_restore(&common.partition_id, &state);
        self.finish(
            RequestKind::Run,
            &common,
            &state,
            outcome,
            &deadline,
            "Run done",
            Some(("", false)),
        )
        .await
    }

    pub async fn update(&self, request: UpdateRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::Update, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self
            .exec_update(&mut state, &request.topology, &common, &deadline)
            .await;
        self.finish(
            RequestKind::Update,
            &common,
            &state,
            outcome,
            &deadline,
            "Update done",
            Some(("", false)),
        )
        .await
    }

    pub async fn set_properties(&self, request: SetPropertiesRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::SetProperties, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self
            .exec_set_properties(&mut state, &request, &deadline)
            .await;
        self.finish(
            RequestKind::SetProperties,
            &common,
            &state,
            outcome,
            &deadline,
            "SetProperties done",
            None,
        )
        .await
    }

    pub async fn get_state(&self, request: DeviceRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::GetState, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self.exec_get_state(&mut state, &request);
        self.finish(
            RequestKind::GetState,
            &common,
            &state,
            outcome,
            &deadline,
            "GetState done",
            Some((request.path.as_str(), request.detailed)),
        )
        .await
    }

    pub async fn configure(&self, request: DeviceRequest) -> RequestResult {
        self.state_change_request(RequestKind::Configure, &CONFIGURE_TRANSITIONS, request)
            .await
    }

    pub async fn start(&self, request: DeviceRequest) -> RequestResult {
        self.state_change_request(RequestKind::Start, &[Transition::Run], request)
            .await
    }

    pub async fn stop(&self, request: DeviceRequest) -> RequestResult {
        self.state_change_request(RequestKind::Stop, &[Transition::Stop], request)
            .await
    }

    pub async fn reset(&self, request: DeviceRequest) -> RequestResult {
        self.state_change_request(RequestKind::Reset, &RESET_TRANSITIONS, request)
            .await
    }

    pub async fn terminate(&self, request: DeviceRequest) -> RequestResult {
        self.state_change_request(RequestKind::Terminate, &[Transition::End], request)
            .await
    }

    pub async fn shutdown(&self, request: ShutdownRequest) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(RequestKind::Shutdown, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = self.exec_shutdown(&mut state).await;
        self.note_session(&partition, &state);
        if outcome.is_ok() {
            self.remove_partition(&common.partition_id);
        }
        self.update_restore(&common.partition_id, &state);
        self.finish(
            RequestKind::Shutdown,
            &common,
            &state,
            outcome,
            &deadline,
            "Shutdown done",
            None,
        )
        .await
    }

    /// A read-only snapshot of all partitions. Partitions busy with a
    /// request are reported from their last known session id.
    pub async fn status(&self, request: StatusRequest) -> StatusResult {
        let deadline = Deadline::new(self.options.default_timeout);
        let partitions: Vec<Arc<Partition>> = {
            let map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
            map.values().cloned().collect()
        };
        let mut out = vec![];
        for partition in partitions {
            let status = match partition.state.try_lock() {
                Ok(state) => match &state.session {
                    Some(session) => PartitionStatus {
                        partition_id: partition.id.clone(),
                        session_id: session.session_id(),
                        session_status: if session.scheduler.is_running() {
                            SessionStatus::Running
                        } else {
                            SessionStatus::Stopped
                        },
                        aggregated_state: session.coordinator.table().aggregate_all(),
                    },
                    None => PartitionStatus {
                        partition_id: partition.id.clone(),
                        session_id: None,
                        session_status: SessionStatus::Stopped,
                        aggregated_state: AggregatedState::Undefined,
                    },
                },
                // A request is in flight on this partition.
                Err(_) => PartitionStatus {
                    partition_id: partition.id.clone(),
                    session_id: *partition.last_session.lock().unwrap_or_else(|e| e.into_inner()),
                    session_status: SessionStatus::Running,
                    aggregated_state: AggregatedState::Undefined,
                },
            };
            if !request.running_only || status.session_status == SessionStatus::Running {
                out.push(status);
            }
        }
        self.triggers.fire_trigger("Status", "", 0).await;
        StatusResult {
            status: RequestStatus::Ok,
            message: "Status done".to_string(),
            exec_time_ms: deadline.elapsed_ms(),
            partitions: out,
        }
    }

    // Request flows.

    async fn exec_initialize(
        &self,
        state: &mut PartitionState,
        request: &InitializeRequest,
        _deadline: &Deadline,
    ) -> ControlResult<()> {
        // A fresh session replaces any existing one.
        if let Some(mut session) = state.session.take() {
            if let Err(e) = session.scheduler.shutdown().await {
                warn!("failed to shut down the previous session: {e}");
            }
        }
        let partition_id = &request.common.partition_id;
        let SessionLink {
            mut scheduler,
            transport,
        } = self
            .backend
            .connect(partition_id)
            .await
            .map_err(|e| ControlError::SessionCreateFailed(e.details()))?;
        match &request.session_id {
            None => {
                let session_id = scheduler
                    .create()
                    .await
                    .map_err(|e| ControlError::SessionCreateFailed(e.details()))?;
                info!("scheduler session created with session id {session_id}");
            }
            Some(session_id) => {
                scheduler
                    .attach(session_id)
                    .await
                    .map_err(|e| ControlError::SessionAttachFailed(e.details()))?;
                info!("attached to scheduler session {session_id}");
            }
        }
        let task_done = scheduler
            .subscribe_task_done()
            .await
            .map_err(|e| ControlError::SessionSubscribeFailed(e.details()))?;
        let coordinator = TopologyCoordinator::new(transport)
            .await
            .map_err(|e| ControlError::SessionSubscribeFailed(e.details()))?;
        let mut session = Session::new(partition_id, scheduler, coordinator);
        session.log_task_done_events(task_done);

        // When attaching, rebuild local topology state from the remote
        // active topology, if there is one. A failure here leaves the
        // partition initialized without topology state.
        let mut attach_error = None;
        if request.session_id.is_some() {
            match session.scheduler.active_topology_path().await {
                Err(e) => {
                    attach_error = Some(ControlError::SessionCommanderInfoFailed(e.details()))
                }
                Ok(None) => {}
                Ok(Some(path)) => {
                    if let Err(e) = session.rebuild_from_attach(&path).await {
                        attach_error = Some(e);
                    }
                }
            }
        }
        state.session = Some(session);
        match attach_error {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    async fn exec_submit(
        &self,
        state: &mut PartitionState,
        request: &SubmitRequest,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        require_running(state)?;
        let specs = self
            .resource_plugins
            .resource_params(
                &request.plugin,
                &request.resources,
                &request.common.partition_id,
                request.common.run_number,
            )
            .await?;
        info!("preparing to submit {} configurations", specs.len());
        let session = require_running(state)?;
        Self::submit_specs(session, &specs, deadline).await
    }

    async fn submit_specs(
        session: &mut Session,
        specs: &[SubmitParams],
        deadline: &Deadline,
    ) -> ControlResult<()> {
        let mut total_slots = 0;
        for spec in specs {
            let mut events = session
                .scheduler
                .submit(spec)
                .await
                .map_err(|e| ControlError::SubmitAgentsFailed(e.details()))?;
            loop {
                let remaining = deadline.remaining("submit agents")?;
                let event = tokio::time::timeout(remaining, events.recv())
                    .await
                    .map_err(|_| {
                        ControlError::RequestTimeout(
                            "timed out waiting for agent submission".to_string(),
                        )
                    })?;
                match event {
                    Some(SubmitEvent::Message { severity, text }) => {
                        if severity == crate::scheduler::EventSeverity::Error {
                            return Err(ControlError::SubmitAgentsFailed(text));
                        }
                        debug!("submit: {text}");
                    }
                    Some(SubmitEvent::Done) | None => break,
                }
            }
            total_slots += spec.required_slots();
        }
        info!("waiting for {total_slots} active slots");
        session
            .scheduler
            .wait_for_active_slots(total_slots, deadline.remaining("wait for slots")?)
            .await
    }

    async fn exec_activate(
        &self,
        state: &mut PartitionState,
        topology: &TopologySource,
        common: &CommonParams,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        let session = require_running(state)?;
        let file = materialize(topology, self.script_timeout(deadline)).await?;
        session
            .activate_topology(&file, ActivationMode::Activate, deadline)
            .await?;
        self.append_history(common, session);
        Ok(())
    }

    async fn exec_run(
        &self,
        state: &mut PartitionState,
        request: &RunRequest,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        // Run always creates a new session.
        if request.session_id.is_some() {
            return Err(ControlError::RequestNotSupported(
                "attachment to an existing session is not supported by Run".to_string(),
            ));
        }
        let initialize = InitializeRequest {
            common: request.common.clone(),
            session_id: None,
        };
        self.exec_initialize(state, &initialize, deadline).await?;

        let file = materialize(&request.topology, self.script_timeout(deadline)).await?;
        let specs = if request.extract_topo_resources {
            let model = TopoModel::build(TopologySpec::from_file(&file)?)?;
            self.submit_params_from_requirements(&model)
        } else {
            self.resource_plugins
                .resource_params(
                    &request.plugin,
                    &request.resources,
                    &request.common.partition_id,
                    request.common.run_number,
                )
                .await?
        };
        info!("preparing to submit {} configurations", specs.len());
        let session = require_running(state)?;
        Self::submit_specs(session, &specs, deadline).await?;
        session
            .activate_topology(&file, ActivationMode::Activate, deadline)
            .await?;
        self.append_history(&request.common, session);
        Ok(())
    }

    async fn exec_update(
        &self,
        state: &mut PartitionState,
        topology: &TopologySource,
        common: &CommonParams,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        let session = require_running(state)?;
        let file = materialize(topology, self.script_timeout(deadline)).await?;

        // Drive the topology to Idle. When collections fail here, nMin
        // recovery is the one mitigation that is attempted: the topology
        // is reduced to the surviving subset and the reduced topology
        // supersedes the requested one.
        match Self::run_transitions(session, &RESET_TRANSITIONS, "", deadline).await {
            Ok(()) => {
                session
                    .activate_topology(&file, ActivationMode::Update, deadline)
                    .await?;
            }
            Err(failure) => {
                if failure.failed_collections.is_empty() {
                    return Err(failure.error);
                }
                let plan = match session.recovery_plan(&failure.failed_collections) {
                    Ok(plan) => plan,
                    Err(e) => {
                        error!("recovery is not possible: {e}");
                        return Err(failure.error);
                    }
                };
                let report = session.execute_recovery(plan, deadline).await?;
                info!("recovery reduced groups: {:?}", report.reduced);
                Self::run_transitions(session, &RESET_TRANSITIONS, "", deadline)
                    .await
                    .map_err(|e| e.error)?;
            }
        }

        Self::run_transitions(session, &CONFIGURE_TRANSITIONS, "", deadline)
            .await
            .map_err(|e| e.error)?;
        self.append_history(common, session);
        Ok(())
    }

    async fn exec_set_properties(
        &self,
        state: &mut PartitionState,
        request: &SetPropertiesRequest,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        let session = require_running(state)?;
        if session.model.is_none() {
            return Err(ControlError::SetPropertiesFailed(
                "topology is not initialized".to_string(),
            ));
        }
        let targets = session.select_tasks(&request.path);
        let Session {
            coordinator,
            tasks,
            collections,
            ..
        } = session;
        let view = SessionView {
            tasks: &*tasks,
            collections: &*collections,
        };
        coordinator
            .set_properties(
                &request.path,
                &request.properties,
                &targets,
                &view,
                deadline,
            )
            .await
    }

    fn exec_get_state(
        &self,
        state: &mut PartitionState,
        request: &DeviceRequest,
    ) -> ControlResult<()> {
        let session = state.session.as_mut().ok_or_else(|| {
            ControlError::GetStateFailed("partition has no session".to_string())
        })?;
        session.coordinator.drain_events();
        session.aggregate_for_path(&request.path).map(|_| ())
    }

    async fn exec_shutdown(&self, state: &mut PartitionState) -> ControlResult<()> {
        let Some(mut session) = state.session.take() else {
            return Ok(());
        };
        session.clear_topology();
        session
            .scheduler
            .shutdown()
            .await
            .map_err(|e| ControlError::SessionShutdownFailed(e.details()))?;
        info!("scheduler session shut down");
        Ok(())
    }

    async fn state_change_request(
        &self,
        kind: RequestKind,
        transitions: &[Transition],
        request: DeviceRequest,
    ) -> RequestResult {
        let common = request.common.clone();
        let Some(partition) = self.acquire_partition(&common.partition_id) else {
            return self.invalid_partition_result(kind, &common);
        };
        let deadline = self.deadline(&common);
        let mut state = partition.state.lock().await;
        let outcome = match require_running(&mut state) {
            Ok(session) => Self::run_transitions(session, transitions, &request.path, &deadline)
                .await
                .map_err(|e| e.error),
            Err(e) => Err(e),
        };
        self.finish(
            kind,
            &common,
            &state,
            outcome,
            &deadline,
            &format!("{kind} done"),
            Some((request.path.as_str(), request.detailed)),
        )
        .await
    }

    /// Run a sequence of synchronized transitions, short-circuiting on the
    /// first failure.
    async fn run_transitions(
        session: &mut Session,
        transitions: &[Transition],
        path: &str,
        deadline: &Deadline,
    ) -> Result<(), TransitionError> {
        if session.model.is_none() {
            return Err(TransitionError {
                error: ControlError::ChangeStateFailed("topology is not initialized".to_string()),
                failed_collections: vec![],
            });
        }
        for transition in transitions {
            let targets = session.select_tasks(path);
            let Session {
                coordinator,
                tasks,
                collections,
                ..
            } = &mut *session;
            let view = SessionView {
                tasks: &*tasks,
                collections: &*collections,
            };
            coordinator
                .change_state(*transition, path, &targets, &view, deadline)
                .await?;
        }
        Ok(())
    }

    // Plumbing.

    fn acquire_partition(&self, partition_id: &str) -> Option<Arc<Partition>> {
        if partition_id.is_empty() {
            return None;
        }
        let mut map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        Some(
            map.entry(partition_id.to_string())
                .or_insert_with(|| {
                    debug!("created partition {partition_id:?}");
                    Arc::new(Partition {
                        id: partition_id.to_string(),
                        state: tokio::sync::Mutex::new(PartitionState::default()),
                        last_session: Mutex::new(None),
                    })
                })
                .clone(),
        )
    }

    fn remove_partition(&self, partition_id: &str) {
        let mut map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        map.remove(partition_id);
        debug!("removed partition {partition_id:?}");
    }

    fn note_session(&self, partition: &Partition, state: &PartitionState) {
        let session_id = state.session.as_ref().and_then(|s| s.session_id());
        *partition
            .last_session
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = session_id;
    }

    fn deadline(&self, common: &CommonParams) -> Deadline {
        let budget = if common.timeout_secs == 0 {
            self.options.default_timeout
        } else {
            Duration::from_secs(common.timeout_secs)
        };
        Deadline::new(budget)
    }

    /// Generator scripts get at least the process-wide default even when
    /// little of the request budget remains.
    fn script_timeout(&self, deadline: &Deadline) -> Duration {
        deadline.remaining_or_zero().max(self.options.default_timeout)
    }

    fn append_history(&self, common: &CommonParams, session: &Session) {
        let Some(dir) = &self.options.history_dir else {
            return;
        };
        let (Some(session_id), Some(topo_file)) = (session.session_id(), &session.topo_file)
        else {
            return;
        };
        if let Err(e) = append_history(dir, &common.partition_id, &session_id, topo_file) {
            error!("failed to append history for {:?}: {e}", common.partition_id);
        }
    }

    /// Rewrite the restore file from the currently known sessions.
    /// The partition owning the in-flight request is read from the locked
    /// state; the others are sampled without blocking. The partitions-map
    /// mutex is held across the write so concurrent requests cannot race
    /// on the file.
    fn update_restore(&self, current_id: &str, current: &PartitionState) {
        let (Some(dir), Some(id)) = (&self.options.restore_dir, &self.options.restore_id) else {
            return;
        };
        let mut entries = vec![];
        if let Some(session) = &current.session {
            if session.scheduler.is_running() {
                if let Some(session_id) = session.session_id() {
                    entries.push(RestoreEntry {
                        partition_id: current_id.to_string(),
                        session_id,
                    });
                }
            }
        }
        let map = self.partitions.lock().unwrap_or_else(|e| e.into_inner());
        for partition in map.values() {
            if partition.id == current_id {
                continue;
            }
            let session_id = match partition.state.try_lock() {
                Ok(state) => match &state.session {
                    Some(session) if session.scheduler.is_running() => session.session_id(),
                    _ => None,
                },
                Err(_) => *partition
                    .last_session
                    .lock()
                    .unwrap_or_else(|e| e.into_inner()),
            };
            if let Some(session_id) = session_id {
                entries.push(RestoreEntry {
                    partition_id: partition.id.clone(),
                    session_id,
                });
            }
        }
        if let Err(e) = RestoreFile::new(dir, id).write(&RestoreData { entries }) {
            error!("failed to update restore file: {e}");
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn finish(
        &self,
        kind: RequestKind,
        common: &CommonParams,
        state: &PartitionState,
        outcome: ControlResult<()>,
        deadline: &Deadline,
        success_message: &str,
        state_selector: Option<(&str, bool)>,
    ) -> RequestResult {
        let (status, error) = match &outcome {
            Ok(()) => (RequestStatus::Ok, None),
            Err(e) => {
                error!(
                    "partition {:?}: {kind} request failed: {e}",
                    common.partition_id
                );
                (RequestStatus::Error, Some(RequestError::from(e)))
            }
        };
        let topology_state = match (&state.session, state_selector) {
            (Some(session), Some((path, detailed))) => TopologyState {
                aggregated: session
                    .aggregate_for_path(path)
                    .unwrap_or(AggregatedState::Undefined),
                detailed: detailed.then(|| build_detailed(session)),
            },
            _ => TopologyState::default(),
        };
        self.triggers
            .fire_trigger(kind.name(), &common.partition_id, common.run_number)
            .await;
        RequestResult {
            status,
            message: success_message.to_string(),
            exec_time_ms: deadline.elapsed_ms(),
            error,
            partition_id: common.partition_id.clone(),
            run_number: common.run_number,
            session_id: state.session.as_ref().and_then(|s| s.session_id()),
            topology_state,
            hosts: state
                .session
                .as_ref()
                .map(|s| s.hosts())
                .unwrap_or_default(),
        }
    }

    fn invalid_partition_result(&self, kind: RequestKind, common: &CommonParams) -> RequestResult {
        let error = ControlError::RuntimeError("partition id must not be empty".to_string());
        RequestResult {
            status: RequestStatus::Error,
            message: format!("{kind} failed"),
            exec_time_ms: 0,
            error: Some(RequestError::from(&error)),
            partition_id: common.partition_id.clone(),
            run_number: common.run_number,
            session_id: None,
            topology_state: TopologyState::default(),
            hosts: vec![],
        }
    }

    fn submit_params_from_requirements(&self, model: &TopoModel) -> Vec<SubmitParams> {
        model
            .agent_groups
            .values()
            .map(|group| SubmitParams {
                rms: self.options.rms.clone(),
                agent_group: group.name.clone(),
                zone: group.zone.clone(),
                n_agents: group.num_agents,
                slots_per_agent: group.num_slots,
                n_cores: group.num_cores,
                required_slots: group.num_agents * group.num_slots,
                config: None,
            })
            .collect()
    }
}

fn require_running(state: &mut PartitionState) -> ControlResult<&mut Session> {
    match state.session.as_mut() {
        Some(session) if session.scheduler.is_running() => Ok(session),
        _ => Err(ControlError::SessionNotRunning(
            "use Initialize or Run to start a session".to_string(),
        )),
    }
}

/// The detailed per-task listing: one entry per non-ignored task, ordered
/// by path.
fn build_detailed(session: &Session) -> Vec<TaskDetail> {
    let mut out: Vec<TaskDetail> = session
        .coordinator
        .table()
        .entries()
        .filter(|entry| !entry.ignored)
        .map(|entry| {
            let record = session.tasks.get(&entry.task_id);
            TaskDetail {
                task_id: entry.task_id,
                state: entry.state,
                ignored: entry.ignored,
                expendable: entry.expendable,
                host: record.map(|r| r.host.clone()).unwrap_or_default(),
                path: record.map(|r| r.path.clone()).unwrap_or_default(),
            }
        })
        .collect();
    out.sort_by(|a, b| a.path.cmp(&b.path));
    out
}
