use std::collections::{BTreeMap, HashMap};

use crate::topology::spec::TopologySpec;

/// One agent group placed in a zone, with its multiplicity and core demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneGroup {
    pub n: u32,
    pub n_cores: u32,
    pub agent_group: String,
}

/// The nMin bookkeeping of a collection that belongs to a group with a
/// configured floor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionNInfo {
    pub n_original: u32,
    pub n_min: u32,
    pub agent_group: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionInfo {
    pub name: String,
    pub zone: String,
    pub agent_group: String,
    pub n_original: u32,
    pub n_min: Option<u32>,
    pub n_cores: u32,
    pub num_tasks: u32,
    pub total_tasks: u32,
}

/// The agent demand of one agent group, summed over its member collections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentGroupInfo {
    pub name: String,
    pub zone: String,
    pub num_agents: u32,
    pub min_agents: Option<u32>,
    pub num_slots: u32,
    pub num_cores: u32,
}

#[derive(Debug, Default)]
pub(crate) struct Requirements {
    pub collections: Vec<CollectionInfo>,
    pub zone_info: BTreeMap<String, Vec<ZoneGroup>>,
    pub n_info: HashMap<String, CollectionNInfo>,
    pub agent_groups: BTreeMap<String, AgentGroupInfo>,
}

/// Infer the resource requirements of a topology: per-collection placement
/// and multiplicity, zones (derived from agent-group names when not
/// declared), nMin floors, and the per-agent-group agent/slot/core demand
/// that drives Submit.
pub(crate) fn extract(spec: &TopologySpec) -> Requirements {
    let mut out = Requirements::default();

    for collection in &spec.collections {
        let (n_original, n_min) = match spec.group_of(&collection.name) {
            Some(group) => (group.n, group.n_min),
            None => (1, None),
        };
        let agent_group = collection.agent_group.clone().unwrap_or_default();
        let zone = collection.zone.clone().unwrap_or_else(|| agent_group.clone());
        let num_tasks: u32 = collection.tasks.iter().map(|t| t.n).sum();

        out.collections.push(CollectionInfo {
            name: collection.name.clone(),
            zone: zone.clone(),
            agent_group: agent_group.clone(),
            n_original,
            n_min,
            n_cores: collection.n_cores,
            num_tasks,
            total_tasks: n_original * num_tasks,
        });

        if let Some(n_min) = n_min {
            out.n_info.insert(
                collection.name.clone(),
                CollectionNInfo {
                    n_original,
                    n_min,
                    agent_group: agent_group.clone(),
                },
            );
        }

        if !zone.is_empty() {
            let zone_groups = out.zone_info.entry(zone.clone()).or_default();
            if !zone_groups.iter().any(|zg| zg.agent_group == agent_group) {
                zone_groups.push(ZoneGroup {
                    n: n_original,
                    n_cores: collection.n_cores,
                    agent_group: agent_group.clone(),
                });
            }
        }

        let info = out
            .agent_groups
            .entry(agent_group.clone())
            .or_insert_with(|| AgentGroupInfo {
                name: agent_group.clone(),
                zone: zone.clone(),
                num_agents: 0,
                min_agents: None,
                num_slots: 0,
                num_cores: 0,
            });
        info.num_agents += n_original;
        if let Some(n_min) = n_min {
            info.min_agents = Some(info.min_agents.unwrap_or(0) + n_min);
        }
        info.num_slots = info.num_slots.max(num_tasks);
        info.num_cores = info.num_cores.max(collection.n_cores);
    }

    out
}
