use std::collections::BTreeMap;
use std::time::Duration;

use log::{info, warn};
use uuid::Uuid;

use crate::coordinator::transition::CollectionFailure;
use crate::deadline::Deadline;
use crate::error::{ControlError, ControlResult};
use crate::id::{AgentId, CollectionId};
use crate::scheduler::ActivationMode;
use crate::session::Session;

const AGENT_POLL_INTERVAL: Duration = Duration::from_millis(50);
const AGENT_POLL_ATTEMPTS: usize = 400;

/// A validated reduction of the topology to its surviving subset.
/// Producing a plan performs the nMin checks only; nothing is mutated
/// until the plan is executed.
#[derive(Debug)]
pub struct RecoveryPlan {
    /// Group name to (previous, remaining) multiplicity.
    reduced: BTreeMap<String, (u32, u32)>,
    /// The failed collections and their owning agents.
    casualties: Vec<(CollectionId, AgentId, String)>,
}

/// What a successful recovery did to the topology.
#[derive(Debug)]
pub struct RecoveryReport {
    /// Group name to (previous, remaining) multiplicity.
    pub reduced: BTreeMap<String, (u32, u32)>,
}

impl Session {
    /// Check whether the failed collections can be recovered from:
    /// every failed collection must be inside a group with a configured
    /// nMin floor, and every affected group must keep at least nMin
    /// collections.
    pub fn recovery_plan(&self, failed: &[CollectionFailure]) -> ControlResult<RecoveryPlan> {
        let model = self.model.as_ref().ok_or_else(|| {
            ControlError::TopologyFailed("no active topology to recover".to_string())
        })?;
        if failed.is_empty() {
            return Err(ControlError::TopologyFailed(
                "no failed collections to recover from".to_string(),
            ));
        }

        let mut failed_per_group: BTreeMap<String, u32> = BTreeMap::new();
        for failure in failed {
            let Some((group, _, n_min)) = model.group_of_collection(&failure.name) else {
                return Err(ControlError::TopologyFailed(format!(
                    "failed collection {:?} is not part of a replicated group",
                    failure.path
                )));
            };
            if n_min.is_none() {
                return Err(ControlError::TopologyFailed(format!(
                    "failed collection {:?} is in group {group:?} which has no nMin configured",
                    failure.path
                )));
            }
            *failed_per_group.entry(group.to_string()).or_default() += 1;
        }

        let mut reduced = BTreeMap::new();
        for (group, failed_count) in &failed_per_group {
            let Some(spec) = model.spec().groups.iter().find(|g| &g.name == group) else {
                return Err(ControlError::TopologyFailed(format!(
                    "group {group:?} not found in the topology"
                )));
            };
            let n_min = spec.n_min.unwrap_or(0);
            let remaining = spec.n.saturating_sub(*failed_count);
            info!(
                "group {group:?} with n: {}, nMin: {n_min}, failed count: {failed_count}",
                spec.n
            );
            if remaining < n_min {
                return Err(ControlError::TopologyFailed(format!(
                    "number of remaining collections in group {group:?} ({remaining}) is below nMin ({n_min})"
                )));
            }
            reduced.insert(group.clone(), (spec.n, remaining));
        }

        Ok(RecoveryPlan {
            reduced,
            casualties: failed
                .iter()
                .map(|f| (f.collection_id, f.agent_id, f.path.clone()))
                .collect(),
        })
    }

    /// Carry out a recovery plan: shut down the owning agents of the
    /// failed collections, rewrite the topology file with the reduced
    /// multiplicities (nMin annotations preserved), and re-activate the
    /// scheduler topology in update mode. Any failure here surfaces as a
    /// topology error.
    pub async fn execute_recovery(
        &mut self,
        plan: RecoveryPlan,
        deadline: &Deadline,
    ) -> ControlResult<RecoveryReport> {
        let model = self.model.as_ref().ok_or_else(|| {
            ControlError::TopologyFailed("no active topology to recover".to_string())
        })?;
        let mut spec = model.spec().clone();

        // The failed tasks are gone for good; nothing aggregates over
        // them or fails because of them from here on.
        for (collection_id, _, _) in &plan.casualties {
            self.coordinator.mark_collection_ignored(*collection_id);
        }

        // Shut down the owning agents and wait for the count to drop.
        // Best effort: a mismatch is logged but does not abort recovery.
        let map_err =
            |e: ControlError| ControlError::TopologyFailed(format!("agent shutdown failed: {e}"));
        let current = self.scheduler.agent_count().await.map_err(map_err)?;
        let expected = current.saturating_sub(plan.casualties.len());
        for (_, agent_id, path) in &plan.casualties {
            info!("sending shutdown signal to agent {agent_id}, responsible for {path:?}");
            self.scheduler
                .shutdown_agent(*agent_id)
                .await
                .map_err(map_err)?;
        }
        let mut attempts = 0;
        loop {
            let count = self.scheduler.agent_count().await.map_err(map_err)?;
            if count == expected {
                info!("successfully reduced the number of agents to {count}");
                break;
            }
            attempts += 1;
            if attempts >= AGENT_POLL_ATTEMPTS {
                warn!(
                    "could not reduce the number of agents to {expected}, current count is {count}"
                );
                break;
            }
            tokio::time::sleep(AGENT_POLL_INTERVAL).await;
        }

        // Rewrite the topology with the reduced multiplicities.
        for (group, (_, remaining)) in &plan.reduced {
            spec.reduce_group(group, *remaining)?;
        }
        let dir = std::env::temp_dir().join(format!("bosun-{}", Uuid::new_v4()));
        std::fs::create_dir_all(&dir)
            .map_err(|e| ControlError::TopologyFailed(format!("failed to create temp dir: {e}")))?;
        let path = dir.join(format!("topo_{}_reduced.yaml", self.partition_id));
        spec.save(&path)?;
        info!("saved reduced topology file as {}", path.display());

        // Adopt the reduced topology at the scheduler and rebuild.
        self.activate_topology(&path, ActivationMode::Update, deadline)
            .await
            .map_err(|e| {
                ControlError::TopologyFailed(format!(
                    "recovery of the remaining collections failed: {e}"
                ))
            })?;

        Ok(RecoveryReport {
            reduced: plan.reduced,
        })
    }

    /// Plan and execute a recovery in one step.
    pub async fn attempt_recovery(
        &mut self,
        failed: &[CollectionFailure],
        deadline: &Deadline,
    ) -> ControlResult<RecoveryReport> {
        info!("attempting recovery of {} failed collections", failed.len());
        let plan = self.recovery_plan(failed)?;
        self.execute_recovery(plan, deadline).await
    }
}
