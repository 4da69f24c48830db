use std::collections::HashSet;

use log::{info, warn};

use crate::coordinator::summary::state_summary;
use crate::coordinator::{apply_event, TopologyCoordinator};
use crate::deadline::Deadline;
use crate::device::{AggregatedState, DeviceState, Transition};
use crate::error::ControlError;
use crate::id::{AgentId, CollectionId, TaskId};
use crate::session::SessionView;
use crate::transport::{DeviceCommand, DeviceEvent};

/// A collection that did not make a synchronized transition.
/// The unit recovery reasons about.
#[derive(Debug, Clone)]
pub struct CollectionFailure {
    pub collection_id: CollectionId,
    pub name: String,
    pub path: String,
    pub agent_id: AgentId,
    pub state: AggregatedState,
}

/// A failed synchronized transition, with the per-collection breakdown
/// that recovery needs.
#[derive(Debug)]
pub struct TransitionError {
    pub error: ControlError,
    pub failed_collections: Vec<CollectionFailure>,
}

impl From<TransitionError> for ControlError {
    fn from(value: TransitionError) -> Self {
        value.error
    }
}

impl TopologyCoordinator {
    /// Drive every task matching the path through a transition and wait
    /// until all of them reached the expected state, failed, or the
    /// deadline elapsed.
    ///
    /// An empty target set is a no-op success. On timeout the still-pending
    /// tasks are classified as failed and the topology is left in whatever
    /// state the tasks reached; nothing is rolled back.
    pub async fn change_state(
        &mut self,
        transition: Transition,
        path: &str,
        targets: &[TaskId],
        view: &SessionView<'_>,
        deadline: &Deadline,
    ) -> Result<(), TransitionError> {
        let expected = transition.expected_state();
        if targets.is_empty() {
            warn!("{transition} transition initiated on an empty set of tasks");
            return Ok(());
        }

        self.drain_events();
        self.transport
            .broadcast(path, DeviceCommand::ChangeState { transition })
            .await
            .map_err(|e| TransitionError {
                error: ControlError::ChangeStateFailed(format!(
                    "failed to broadcast {transition} transition: {e}"
                )),
                failed_collections: vec![],
            })?;

        let mut pending = HashSet::new();
        let mut reached: Vec<TaskId> = vec![];
        let mut failed: Vec<TaskId> = vec![];
        let mut ignored: Vec<TaskId> = vec![];
        for &task_id in targets {
            match self.table.get(task_id) {
                None => warn!("transition target {task_id} is not in the state table"),
                Some(entry) if entry.ignored => ignored.push(task_id),
                Some(entry) if entry.state == expected => reached.push(task_id),
                Some(_) => {
                    pending.insert(task_id);
                }
            }
        }

        let Self { events, table, .. } = self;
        let mut timed_out = false;
        let mut stream_closed = false;
        while !pending.is_empty() {
            let remaining = deadline.remaining_or_zero();
            if remaining.is_zero() {
                timed_out = true;
                break;
            }
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else {
                        stream_closed = true;
                        break;
                    };
                    apply_event(table, &event);
                    let DeviceEvent::StateChange { task_id, current, .. } = event else {
                        continue;
                    };
                    if !pending.contains(&task_id) {
                        continue;
                    }
                    let Some(entry) = table.get(task_id) else {
                        continue;
                    };
                    if entry.ignored {
                        pending.remove(&task_id);
                        ignored.push(task_id);
                    } else if current == expected {
                        pending.remove(&task_id);
                        reached.push(task_id);
                    } else if current == DeviceState::Error
                        || (current == DeviceState::Exiting && expected != DeviceState::Exiting)
                    {
                        pending.remove(&task_id);
                        if entry.expendable {
                            table.mark_ignored(task_id);
                            ignored.push(task_id);
                        } else {
                            failed.push(task_id);
                        }
                    }
                }
                _ = tokio::time::sleep(remaining) => {
                    timed_out = true;
                    break;
                }
            }
        }

        if timed_out || stream_closed {
            failed.extend(pending.drain());
        }

        info!(
            "{transition} transition: {} reached {expected}, {} failed, {} ignored",
            reached.len(),
            failed.len(),
            ignored.len()
        );

        if failed.is_empty() && !timed_out && !stream_closed {
            return Ok(());
        }

        let failed_collections = state_summary(expected, table, &failed, view);
        let error = if timed_out {
            ControlError::RequestTimeout(format!(
                "timed out waiting for the {transition} transition: {} of {} devices missed the {expected} state",
                failed.len(),
                targets.len()
            ))
        } else if stream_closed {
            ControlError::ChangeStateFailed(format!(
                "command transport closed during the {transition} transition"
            ))
        } else {
            ControlError::ChangeStateFailed(format!(
                "{} of {} devices failed to reach the {expected} state via {transition}",
                failed.len(),
                targets.len()
            ))
        };
        Err(TransitionError {
            error,
            failed_collections,
        })
    }
}
