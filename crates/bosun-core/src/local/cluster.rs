use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use bosun_server::actor::{Actor, ActorAction, ActorContext};
use log::{debug, warn};
use tokio::sync::{mpsc, oneshot};

use crate::device::{DeviceState, Transition};
use crate::error::{ControlError, ControlResult};
use crate::id::{AgentId, CollectionId, IdGenerator, SlotId, TaskId};
use crate::local::{DeviceBehavior, LocalClusterOptions};
use crate::scheduler::{
    ActivationEvent, ActivationMode, AgentInfo, EventSeverity, SubmitEvent, SubmitParams,
    TaskActivated, TaskDoneEvent,
};
use crate::topology::{TopoModel, TopologySpec};
use crate::transport::{DeviceCommand, DeviceEvent};

const AGENT_STARTUP_DELAY: std::time::Duration = std::time::Duration::from_millis(10);

/// An in-process simulation of an agent scheduler and its task devices.
///
/// One actor per scheduler session. The inbox serializes all cluster
/// mutations, so device events are emitted in a deterministic order.
/// Backs the default CLI wiring and the integration tests.
pub struct LocalClusterActor {
    options: LocalClusterOptions,
    agents: HashMap<AgentId, SimAgent>,
    collections: HashMap<CollectionId, SimCollection>,
    devices: HashMap<TaskId, SimDevice>,
    agent_ids: IdGenerator<AgentId>,
    collection_ids: IdGenerator<CollectionId>,
    task_ids: IdGenerator<TaskId>,
    events: Option<mpsc::UnboundedSender<DeviceEvent>>,
    task_done: Option<mpsc::UnboundedSender<TaskDoneEvent>>,
    active_topology: Option<PathBuf>,
}

struct SimAgent {
    id: AgentId,
    group: String,
    slots: u32,
}

struct SimCollection {
    id: CollectionId,
    path: String,
    agent_id: AgentId,
}

struct SimDevice {
    id: TaskId,
    path: String,
    collection_id: Option<CollectionId>,
    agent_id: AgentId,
    slot_id: SlotId,
    state: DeviceState,
    last_state: DeviceState,
    props: HashMap<String, String>,
    behavior: DeviceBehavior,
}

pub enum ClusterMessage {
    Submit {
        params: SubmitParams,
        events: mpsc::UnboundedSender<SubmitEvent>,
    },
    /// Internal follow-up of [ClusterMessage::Submit]: the agents have
    /// come up and the submission completes.
    AgentsUp {
        params: SubmitParams,
        events: mpsc::UnboundedSender<SubmitEvent>,
    },
    SlotCount {
        reply: oneshot::Sender<u32>,
    },
    AgentInfo {
        reply: oneshot::Sender<Vec<AgentInfo>>,
    },
    Activate {
        file: PathBuf,
        mode: ActivationMode,
        events: mpsc::UnboundedSender<ActivationEvent>,
    },
    ShutdownAgent {
        agent_id: AgentId,
        reply: oneshot::Sender<ControlResult<()>>,
    },
    RegisterEventSink {
        sink: mpsc::UnboundedSender<DeviceEvent>,
    },
    RegisterTaskDoneSink {
        sink: mpsc::UnboundedSender<TaskDoneEvent>,
    },
    Command {
        path: String,
        command: DeviceCommand,
        reply: oneshot::Sender<()>,
    },
    ActiveTopology {
        reply: oneshot::Sender<Option<PathBuf>>,
    },
    ActiveTasks {
        reply: oneshot::Sender<Vec<TaskActivated>>,
    },
    Shutdown,
}

impl Actor for LocalClusterActor {
    type Message = ClusterMessage;
    type Options = LocalClusterOptions;

    fn name() -> &'static str {
        "LocalClusterActor"
    }

    fn new(options: Self::Options) -> Self {
        Self {
            options,
            agents: HashMap::new(),
            collections: HashMap::new(),
            devices: HashMap::new(),
            agent_ids: IdGenerator::new(),
            collection_ids: IdGenerator::new(),
            task_ids: IdGenerator::new(),
            events: None,
            task_done: None,
            active_topology: None,
        }
    }

    fn start(&mut self, _: &mut ActorContext<Self>) {}

    fn receive(&mut self, ctx: &mut ActorContext<Self>, message: ClusterMessage) -> ActorAction {
        match message {
            ClusterMessage::Submit { params, events } => {
                let _ = events.send(SubmitEvent::Message {
                    severity: EventSeverity::Info,
                    text: format!(
                        "submitting {} agents with {} slots to group {:?}",
                        params.n_agents, params.slots_per_agent, params.agent_group
                    ),
                });
                // Agents come up asynchronously, as they would on a real
                // resource manager.
                ctx.send_with_delay(
                    ClusterMessage::AgentsUp { params, events },
                    AGENT_STARTUP_DELAY,
                );
            }
            ClusterMessage::AgentsUp { params, events } => self.handle_submit(&params, &events),
            ClusterMessage::SlotCount { reply } => {
                let _ = reply.send(self.agents.values().map(|a| a.slots).sum());
            }
            ClusterMessage::AgentInfo { reply } => {
                let _ = reply.send(
                    self.agents
                        .values()
                        .map(|a| AgentInfo {
                            agent_id: a.id,
                            group_name: a.group.clone(),
                            host: self.options.host.clone(),
                            slots: a.slots,
                        })
                        .collect(),
                );
            }
            ClusterMessage::Activate { file, mode, events } => {
                self.handle_activate(&file, mode, &events);
            }
            ClusterMessage::ShutdownAgent { agent_id, reply } => {
                let _ = reply.send(self.handle_shutdown_agent(agent_id));
            }
            ClusterMessage::RegisterEventSink { sink } => self.events = Some(sink),
            ClusterMessage::RegisterTaskDoneSink { sink } => self.task_done = Some(sink),
            ClusterMessage::Command {
                path,
                command,
                reply,
            } => {
                self.handle_command(&path, &command);
                let _ = reply.send(());
            }
            ClusterMessage::ActiveTopology { reply } => {
                let _ = reply.send(self.active_topology.clone());
            }
            ClusterMessage::ActiveTasks { reply } => {
                let _ = reply.send(self.placements());
            }
            ClusterMessage::Shutdown => return ActorAction::Stop,
        }
        ActorAction::Continue
    }

    fn stop(self) {}
}

impl LocalClusterActor {
    fn handle_submit(&mut self, params: &SubmitParams, events: &mpsc::UnboundedSender<SubmitEvent>) {
        for _ in 0..params.n_agents {
            let Ok(id) = self.agent_ids.next() else {
                let _ = events.send(SubmitEvent::Message {
                    severity: EventSeverity::Error,
                    text: "agent id space exhausted".to_string(),
                });
                return;
            };
            self.agents.insert(
                id,
                SimAgent {
                    id,
                    group: params.agent_group.clone(),
                    slots: params.slots_per_agent,
                },
            );
        }
        let _ = events.send(SubmitEvent::Done);
    }

    fn handle_activate(
        &mut self,
        file: &std::path::Path,
        mode: ActivationMode,
        events: &mpsc::UnboundedSender<ActivationEvent>,
    ) {
        if mode == ActivationMode::Stop {
            self.collections.clear();
            self.devices.clear();
            self.active_topology = None;
            let _ = events.send(ActivationEvent::Done);
            return;
        }

        let model = match TopologySpec::from_file(file).and_then(TopoModel::build) {
            Ok(model) => model,
            Err(e) => {
                let _ = events.send(ActivationEvent::Message {
                    severity: EventSeverity::Error,
                    text: format!("failed to read topology: {e}"),
                });
                let _ = events.send(ActivationEvent::Done);
                return;
            }
        };

        if mode == ActivationMode::Activate {
            self.collections.clear();
            self.devices.clear();
        }

        // One agent per collection instance, taken from the instance's
        // agent group. Agents already carrying a surviving collection
        // keep it across updates.
        let mut busy: HashSet<AgentId> = self.collections.values().map(|c| c.agent_id).collect();
        let layout = model.runtime_layout();
        let total: u32 = layout.iter().map(|c| c.tasks.len() as u32).sum();
        let mut errors = 0u32;

        let keep: HashSet<&str> = layout.iter().map(|c| c.path.as_str()).collect();
        // Drop collections that are no longer part of the topology.
        let stale: Vec<CollectionId> = self
            .collections
            .values()
            .filter(|c| !keep.contains(c.path.as_str()))
            .map(|c| c.id)
            .collect();
        for id in stale {
            if let Some(collection) = self.collections.remove(&id) {
                busy.remove(&collection.agent_id);
                self.devices.retain(|_, d| d.collection_id != Some(id));
            }
        }

        for collection in &layout {
            let existing = self
                .collections
                .values()
                .find(|c| c.path == collection.path)
                .map(|c| c.id);
            let collection_id = match existing {
                Some(id) => id,
                None => {
                    // Find a free agent in the collection's agent group.
                    let agent = self
                        .agents
                        .values()
                        .filter(|a| a.group == collection.agent_group)
                        .find(|a| !busy.contains(&a.id));
                    let Some(agent) = agent else {
                        errors += collection.tasks.len() as u32;
                        let _ = events.send(ActivationEvent::Message {
                            severity: EventSeverity::Error,
                            text: format!(
                                "no free agent in group {:?} for collection {:?}",
                                collection.agent_group, collection.path
                            ),
                        });
                        continue;
                    };
                    let Ok(id) = self.collection_ids.next() else {
                        continue;
                    };
                    let agent_id = agent.id;
                    busy.insert(agent_id);
                    self.collections.insert(
                        id,
                        SimCollection {
                            id,
                            path: collection.path.clone(),
                            agent_id,
                        },
                    );
                    for (slot, task) in collection.tasks.iter().enumerate() {
                        let Ok(task_id) = self.task_ids.next() else {
                            continue;
                        };
                        let behavior = self.behavior_for(&task.path);
                        self.devices.insert(
                            task_id,
                            SimDevice {
                                id: task_id,
                                path: task.path.clone(),
                                collection_id: Some(id),
                                agent_id,
                                slot_id: SlotId::from(slot as u64 + 1),
                                state: DeviceState::Idle,
                                last_state: DeviceState::Undefined,
                                props: HashMap::new(),
                                behavior,
                            },
                        );
                    }
                    id
                }
            };
            debug!(
                "collection {:?} active as {collection_id} on the local cluster",
                collection.path
            );
        }

        for placement in self.placements() {
            let _ = events.send(ActivationEvent::TaskActivated(placement));
        }
        let _ = events.send(ActivationEvent::Progress {
            completed: total - errors,
            errors,
            total,
        });
        if errors > 0 {
            let _ = events.send(ActivationEvent::Message {
                severity: EventSeverity::Error,
                text: format!("failed to activate {errors} of {total} tasks"),
            });
        } else {
            self.active_topology = Some(file.to_path_buf());
        }
        let _ = events.send(ActivationEvent::Done);
    }

    fn handle_shutdown_agent(&mut self, agent_id: AgentId) -> ControlResult<()> {
        if self.agents.remove(&agent_id).is_none() {
            return Err(ControlError::RuntimeError(format!(
                "agent {agent_id} not found"
            )));
        }
        self.collections.retain(|_, c| c.agent_id != agent_id);
        let dead: Vec<TaskId> = self
            .devices
            .values()
            .filter(|d| d.agent_id == agent_id)
            .map(|d| d.id)
            .collect();
        for task_id in dead {
            if let Some(device) = self.devices.remove(&task_id) {
                if let Some(sink) = &self.task_done {
                    let _ = sink.send(TaskDoneEvent {
                        task_id,
                        path: device.path.clone(),
                        exit_code: 0,
                        signal: 15,
                        host: self.options.host.clone(),
                        work_dir: self.options.work_dir.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn handle_command(&mut self, path: &str, command: &DeviceCommand) {
        let Some(events) = self.events.clone() else {
            warn!("device command received before an event sink was registered");
            return;
        };
        let mut targets: Vec<TaskId> = self
            .devices
            .values()
            .filter(|d| path.is_empty() || d.path.starts_with(path))
            .map(|d| d.id)
            .collect();
        targets.sort();
        for task_id in targets {
            let Some(device) = self.devices.get_mut(&task_id) else {
                continue;
            };
            match command {
                DeviceCommand::ChangeState { transition } => {
                    if device.behavior.stall_on == Some(*transition) {
                        continue;
                    }
                    if device.state == DeviceState::Error {
                        // A broken device stays broken and says so.
                        let _ = events.send(DeviceEvent::StateChange {
                            task_id,
                            current: DeviceState::Error,
                            last: device.last_state,
                        });
                        continue;
                    }
                    let next = if device.behavior.fail_on == Some(*transition) {
                        DeviceState::Error
                    } else {
                        transition.expected_state()
                    };
                    device.last_state = device.state;
                    device.state = next;
                    let _ = events.send(DeviceEvent::StateChange {
                        task_id,
                        current: device.state,
                        last: device.last_state,
                    });
                    if *transition == Transition::End && next == DeviceState::Exiting {
                        if let Some(sink) = &self.task_done {
                            let _ = sink.send(TaskDoneEvent {
                                task_id,
                                path: device.path.clone(),
                                exit_code: 0,
                                signal: 0,
                                host: self.options.host.clone(),
                                work_dir: self.options.work_dir.clone(),
                            });
                        }
                    }
                }
                DeviceCommand::SetProperties { request_id, props } => {
                    let ok = !device.behavior.fail_properties;
                    if ok {
                        for (key, value) in props {
                            device.props.insert(key.clone(), value.clone());
                        }
                    }
                    let _ = events.send(DeviceEvent::PropertiesSet {
                        task_id,
                        request_id: *request_id,
                        ok,
                    });
                }
                DeviceCommand::GetProperties { request_id, query } => {
                    let props = device
                        .props
                        .iter()
                        .filter(|(key, _)| query.is_empty() || key.contains(query.as_str()))
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect();
                    let _ = events.send(DeviceEvent::Properties {
                        task_id,
                        request_id: *request_id,
                        ok: true,
                        props,
                    });
                }
                DeviceCommand::SubscribeStateChanges => {
                    let _ = events.send(DeviceEvent::Subscription { task_id, ok: true });
                    // Subscribers get a snapshot of the current state.
                    let _ = events.send(DeviceEvent::StateChange {
                        task_id,
                        current: device.state,
                        last: device.last_state,
                    });
                }
                DeviceCommand::UnsubscribeStateChanges => {
                    let _ = events.send(DeviceEvent::Subscription { task_id, ok: true });
                }
            }
        }
    }

    fn behavior_for(&self, path: &str) -> DeviceBehavior {
        self.options
            .behaviors
            .iter()
            .find(|b| path.starts_with(&b.path_prefix))
            .cloned()
            .unwrap_or_default()
    }

    fn placements(&self) -> Vec<TaskActivated> {
        let mut out: Vec<TaskActivated> = self
            .devices
            .values()
            .map(|d| TaskActivated {
                task_id: d.id,
                collection_id: d.collection_id,
                agent_id: d.agent_id,
                slot_id: d.slot_id,
                path: d.path.clone(),
                host: self.options.host.clone(),
                work_dir: self.options.work_dir.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.path.cmp(&b.path));
        out
    }
}
