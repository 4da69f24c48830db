mod properties;
mod recovery;
mod summary;
mod transition;

pub use properties::GetPropertiesResult;
pub use recovery::{RecoveryPlan, RecoveryReport};
pub use transition::{CollectionFailure, TransitionError};

use tokio::sync::mpsc;

use crate::error::{ControlError, ControlResult};
use crate::id::{CollectionId, TaskId};
use crate::state_table::TaskStateTable;
use crate::transport::{CommandTransport, DeviceCommand, DeviceEvent};

/// Drives the task set of a partition through synchronized state
/// transitions and property gathers.
///
/// The coordinator owns the command transport and its event stream, and is
/// the only writer of the [TaskStateTable]. At most one operation runs at a
/// time (the partition mutex guarantees this); events arriving between
/// operations are drained into the table when the next operation starts.
pub struct TopologyCoordinator {
    transport: Box<dyn CommandTransport>,
    events: mpsc::UnboundedReceiver<DeviceEvent>,
    table: TaskStateTable,
    next_request_id: u64,
}

impl TopologyCoordinator {
    pub async fn new(transport: Box<dyn CommandTransport>) -> ControlResult<Self> {
        let events = transport.subscribe().await?;
        Ok(Self {
            transport,
            events,
            table: TaskStateTable::default(),
            next_request_id: 1,
        })
    }

    pub fn table(&self) -> &TaskStateTable {
        &self.table
    }

    pub fn rebuild_table<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = (TaskId, Option<CollectionId>, bool)>,
    {
        self.table.rebuild(tasks);
    }

    pub fn clear_table(&mut self) {
        self.table.clear();
    }

    pub fn mark_collection_ignored(&mut self, collection_id: CollectionId) {
        self.table.mark_collection_ignored(collection_id);
    }

    /// Ask every matching task to report state changes from now on.
    /// The tasks reply with their current state, which reaches the table
    /// on the next event drain.
    pub async fn subscribe_state_changes(&mut self, path: &str) -> ControlResult<()> {
        self.transport
            .broadcast(path, DeviceCommand::SubscribeStateChanges)
            .await
            .map_err(|e| {
                ControlError::SessionSubscribeFailed(format!(
                    "failed to subscribe to state changes: {e}"
                ))
            })
    }

    /// Apply all already-delivered events without waiting.
    pub fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            apply_event(&mut self.table, &event);
        }
    }

    pub(super) fn next_request_id(&mut self) -> u64 {
        let id = self.next_request_id;
        self.next_request_id += 1;
        id
    }
}

/// Fold one device event into the state table.
/// Property replies are only meaningful to the operation that requested
/// them; stale ones are dropped here.
pub(super) fn apply_event(table: &mut TaskStateTable, event: &DeviceEvent) {
    match event {
        DeviceEvent::StateChange {
            task_id, current, ..
        } => {
            table.apply_state_change(*task_id, *current);
        }
        DeviceEvent::Subscription { task_id, ok } => {
            table.set_subscribed(*task_id, *ok);
        }
        DeviceEvent::PropertiesSet { .. } | DeviceEvent::Properties { .. } => {}
    }
}
