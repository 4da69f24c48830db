use std::collections::{HashMap, HashSet};

use log::warn;

use crate::coordinator::{apply_event, TopologyCoordinator};
use crate::deadline::Deadline;
use crate::error::{ControlError, ControlResult};
use crate::id::TaskId;
use crate::session::SessionView;
use crate::transport::{DeviceCommand, DeviceEvent};

/// The outcome of a bulk property read.
#[derive(Debug, Default)]
pub struct GetPropertiesResult {
    pub devices: HashMap<TaskId, HashMap<String, String>>,
    pub failed: Vec<TaskId>,
}

impl TopologyCoordinator {
    /// Set properties on every task matching the path and wait for all
    /// per-task replies. Fails when any task rejects the update or does
    /// not reply before the deadline; the failed tasks are listed in the
    /// error details.
    pub async fn set_properties(
        &mut self,
        path: &str,
        props: &[(String, String)],
        targets: &[TaskId],
        view: &SessionView<'_>,
        deadline: &Deadline,
    ) -> ControlResult<()> {
        if targets.is_empty() {
            warn!("SetProperties initiated on an empty set of tasks, check the path argument");
            return Ok(());
        }
        let request_id = self.next_request_id();
        self.drain_events();
        self.transport
            .broadcast(
                path,
                DeviceCommand::SetProperties {
                    request_id,
                    props: props.to_vec(),
                },
            )
            .await
            .map_err(|e| {
                ControlError::SetPropertiesFailed(format!("failed to broadcast properties: {e}"))
            })?;

        let mut pending: HashSet<TaskId> = targets
            .iter()
            .copied()
            .filter(|id| self.table.get(*id).is_none_or(|e| !e.ignored))
            .collect();
        let mut failed: Vec<TaskId> = vec![];

        let Self { events, table, .. } = self;
        while !pending.is_empty() {
            let remaining = deadline.remaining_or_zero();
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    apply_event(table, &event);
                    if let DeviceEvent::PropertiesSet { task_id, request_id: rid, ok } = event {
                        if rid == request_id && pending.remove(&task_id) && !ok {
                            failed.push(task_id);
                        }
                    }
                }
                _ = tokio::time::sleep(remaining) => break,
            }
        }
        // Missing replies at the deadline count as failures.
        failed.extend(pending.drain());

        if failed.is_empty() {
            return Ok(());
        }
        let mut lines = vec![format!(
            "failed to set properties on {} devices:",
            failed.len()
        )];
        for task_id in &failed {
            let path = view
                .tasks
                .get(task_id)
                .map(|t| t.path.as_str())
                .unwrap_or("-");
            lines.push(format!("  task: {task_id}, path: {path}"));
        }
        Err(ControlError::SetPropertiesFailed(lines.join("\n")))
    }

    /// Read properties from every task matching the path. Tasks that do
    /// not reply before the deadline are reported in the failed list.
    pub async fn get_properties(
        &mut self,
        path: &str,
        query: &str,
        targets: &[TaskId],
        deadline: &Deadline,
    ) -> ControlResult<GetPropertiesResult> {
        if targets.is_empty() {
            warn!("GetProperties initiated on an empty set of tasks, check the path argument");
            return Ok(GetPropertiesResult::default());
        }
        let request_id = self.next_request_id();
        self.drain_events();
        self.transport
            .broadcast(
                path,
                DeviceCommand::GetProperties {
                    request_id,
                    query: query.to_string(),
                },
            )
            .await
            .map_err(|e| {
                ControlError::GetPropertiesFailed(format!("failed to broadcast query: {e}"))
            })?;

        let mut pending: HashSet<TaskId> = targets
            .iter()
            .copied()
            .filter(|id| self.table.get(*id).is_none_or(|e| !e.ignored))
            .collect();
        let mut result = GetPropertiesResult::default();

        let Self { events, table, .. } = self;
        while !pending.is_empty() {
            let remaining = deadline.remaining_or_zero();
            if remaining.is_zero() {
                break;
            }
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    apply_event(table, &event);
                    if let DeviceEvent::Properties { task_id, request_id: rid, ok, props } = event {
                        if rid == request_id && pending.remove(&task_id) {
                            if ok {
                                result.devices.insert(task_id, props);
                            } else {
                                result.failed.push(task_id);
                            }
                        }
                    }
                }
                _ = tokio::time::sleep(remaining) => break,
            }
        }
        result.failed.extend(pending.drain());
        Ok(result)
    }
}
