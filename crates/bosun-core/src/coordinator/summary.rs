use std::collections::BTreeMap;

use log::error;

use crate::coordinator::transition::CollectionFailure;
use crate::device::{aggregate, AggregatedState, DeviceState};
use crate::id::TaskId;
use crate::session::SessionView;
use crate::state_table::TaskStateTable;

/// Log a per-task and per-collection breakdown of a failed transition and
/// return the collections the failed tasks belong to, with the agent and
/// path information recovery needs.
pub(super) fn state_summary(
    expected: DeviceState,
    table: &TaskStateTable,
    failed: &[TaskId],
    view: &SessionView<'_>,
) -> Vec<CollectionFailure> {
    for (count, task_id) in failed.iter().enumerate() {
        let Some(entry) = table.get(*task_id) else {
            continue;
        };
        if count == 0 {
            error!("following devices failed to transition to the {expected} state:");
        }
        let location = view
            .tasks
            .get(task_id)
            .map(|t| format!(", path: {}, host: {}, agent: {}", t.path, t.host, t.agent_id))
            .unwrap_or_default();
        error!(
            "  {} device: state: {}, previous state: {}, task: {}, collection: {}, subscribed: {}{location}",
            count + 1,
            entry.state,
            entry.last_state,
            entry.task_id,
            entry
                .collection_id
                .map(|c| c.to_string())
                .unwrap_or_else(|| "-".to_string()),
            entry.subscribed,
        );
    }

    // The failed collections, each aggregated over its non-ignored tasks.
    let mut failed_collection_ids = BTreeMap::new();
    for task_id in failed {
        if let Some(collection_id) = table.get(*task_id).and_then(|e| e.collection_id) {
            failed_collection_ids.insert(collection_id, ());
        }
    }

    let mut failures = vec![];
    for (collection_id, ()) in failed_collection_ids {
        let state = aggregate(
            table
                .entries()
                .filter(|e| e.collection_id == Some(collection_id) && !e.ignored)
                .map(|e| e.state),
        );
        if state == AggregatedState::Device(expected) {
            continue;
        }
        let Some(record) = view.collections.get(&collection_id) else {
            error!("state summary: collection {collection_id} is not in the session cache");
            continue;
        };
        error!(
            "  collection failed to reach {expected}: state: {state}, collection: {}, path: {}, agent: {}",
            record.name, record.path, record.agent_id
        );
        failures.push(CollectionFailure {
            collection_id,
            name: record.name.clone(),
            path: record.path.clone(),
            agent_id: record.agent_id,
            state,
        });
    }

    let total = table.len();
    error!(
        "summary after transitioning to the {expected} state: [tasks] total: {total}, failed: {}; [collections] failed: {}",
        failed.len(),
        failures.len()
    );
    failures
}
