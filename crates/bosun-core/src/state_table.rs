use std::collections::HashMap;

use log::warn;

use crate::device::{aggregate, AggregatedState, DeviceState};
use crate::id::{CollectionId, TaskId};

/// The tracked status of one task in the active topology.
#[derive(Debug, Clone)]
pub struct TaskStatusEntry {
    pub task_id: TaskId,
    pub collection_id: Option<CollectionId>,
    pub state: DeviceState,
    pub last_state: DeviceState,
    pub subscribed: bool,
    /// Ignored tasks no longer participate in failure classification or
    /// state aggregation. Set for tasks whose agents were shut down.
    pub ignored: bool,
    pub expendable: bool,
}

/// The authoritative task-state mapping of the active topology.
/// Written only by the topology coordinator in response to device events.
#[derive(Debug, Default)]
pub struct TaskStateTable {
    entries: HashMap<TaskId, TaskStatusEntry>,
}

impl TaskStateTable {
    /// Replace the table contents for a fresh activation.
    /// Every task starts out in the Idle state, unsubscribed.
    pub fn rebuild<I>(&mut self, tasks: I)
    where
        I: IntoIterator<Item = (TaskId, Option<CollectionId>, bool)>,
    {
        self.entries = tasks
            .into_iter()
            .map(|(task_id, collection_id, expendable)| {
                (
                    task_id,
                    TaskStatusEntry {
                        task_id,
                        collection_id,
                        state: DeviceState::Idle,
                        last_state: DeviceState::Undefined,
                        subscribed: false,
                        ignored: false,
                        expendable,
                    },
                )
            })
            .collect();
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, task_id: TaskId) -> Option<&TaskStatusEntry> {
        self.entries.get(&task_id)
    }

    pub fn entries(&self) -> impl Iterator<Item = &TaskStatusEntry> {
        self.entries.values()
    }

    pub fn task_ids(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.entries.keys().copied()
    }

    /// Apply a state-change event. Unknown tasks are logged and dropped;
    /// late events of a previous topology fall into this case.
    pub fn apply_state_change(
        &mut self,
        task_id: TaskId,
        current: DeviceState,
    ) -> Option<&TaskStatusEntry> {
        let Some(entry) = self.entries.get_mut(&task_id) else {
            warn!("state change for unknown task {task_id}");
            return None;
        };
        entry.last_state = entry.state;
        entry.state = current;
        Some(entry)
    }

    pub fn set_subscribed(&mut self, task_id: TaskId, subscribed: bool) {
        if let Some(entry) = self.entries.get_mut(&task_id) {
            entry.subscribed = subscribed;
        }
    }

    pub fn mark_ignored(&mut self, task_id: TaskId) {
        if let Some(entry) = self.entries.get_mut(&task_id) {
            entry.ignored = true;
        }
    }

    /// Ignore every task of a collection. Used by recovery after the
    /// collection's agent has been shut down.
    pub fn mark_collection_ignored(&mut self, collection_id: CollectionId) {
        for entry in self.entries.values_mut() {
            if entry.collection_id == Some(collection_id) {
                entry.ignored = true;
            }
        }
    }

    /// Aggregate the states of the given tasks, skipping ignored entries.
    pub fn aggregate<I>(&self, tasks: I) -> AggregatedState
    where
        I: IntoIterator<Item = TaskId>,
    {
        aggregate(
            tasks
                .into_iter()
                .filter_map(|id| self.entries.get(&id))
                .filter(|e| !e.ignored)
                .map(|e| e.state),
        )
    }

    /// Aggregate all non-ignored tasks in the table.
    pub fn aggregate_all(&self) -> AggregatedState {
        aggregate(
            self.entries
                .values()
                .filter(|e| !e.ignored)
                .map(|e| e.state),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TaskStateTable {
        let mut table = TaskStateTable::default();
        table.rebuild([
            (TaskId::from(1), Some(CollectionId::from(10)), false),
            (TaskId::from(2), Some(CollectionId::from(10)), false),
            (TaskId::from(3), None, false),
        ]);
        table
    }

    #[test]
    fn test_rebuild_starts_idle() {
        let table = table();
        assert_eq!(table.len(), 3);
        assert_eq!(table.aggregate_all(), AggregatedState::Device(DeviceState::Idle));
        let entry = table.get(TaskId::from(1)).unwrap();
        assert_eq!(entry.last_state, DeviceState::Undefined);
        assert!(!entry.subscribed);
    }

    #[test]
    fn test_apply_state_change_tracks_last_state() {
        let mut table = table();
        table.apply_state_change(TaskId::from(1), DeviceState::InitializingDevice);
        let entry = table.get(TaskId::from(1)).unwrap();
        assert_eq!(entry.state, DeviceState::InitializingDevice);
        assert_eq!(entry.last_state, DeviceState::Idle);
        assert_eq!(table.aggregate_all(), AggregatedState::Mixed);

        assert!(table
            .apply_state_change(TaskId::from(99), DeviceState::Ready)
            .is_none());
    }

    #[test]
    fn test_ignored_tasks_leave_aggregation() {
        let mut table = table();
        table.apply_state_change(TaskId::from(2), DeviceState::Error);
        table.mark_collection_ignored(CollectionId::from(10));
        assert!(table.get(TaskId::from(1)).unwrap().ignored);
        assert!(table.get(TaskId::from(2)).unwrap().ignored);
        assert!(!table.get(TaskId::from(3)).unwrap().ignored);
        assert_eq!(table.aggregate_all(), AggregatedState::Device(DeviceState::Idle));
    }
}
