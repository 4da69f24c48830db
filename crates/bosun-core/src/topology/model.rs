use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::ControlResult;
use crate::topology::requirements::{
    extract, AgentGroupInfo, CollectionInfo, CollectionNInfo, ZoneGroup,
};
use crate::topology::spec::TopologySpec;

/// The in-memory representation of a parsed topology.
///
/// Built once per activation and read-only afterwards; a topology update
/// replaces the whole model.
#[derive(Debug)]
pub struct TopoModel {
    spec: TopologySpec,
    pub collections: Vec<CollectionInfo>,
    /// Zone name to the agent groups placed in the zone.
    pub zone_info: BTreeMap<String, Vec<ZoneGroup>>,
    /// Collection name to its nMin bookkeeping, for collections that have one.
    pub n_info: HashMap<String, CollectionNInfo>,
    /// Agent group name to its aggregate agent demand.
    pub agent_groups: BTreeMap<String, AgentGroupInfo>,
    expendable_tasks: HashSet<String>,
}

/// One collection instance as it is laid out at runtime.
#[derive(Debug, Clone)]
pub struct RuntimeCollection {
    pub name: String,
    pub path: String,
    pub group: Option<String>,
    pub instance: u32,
    pub agent_group: String,
    pub zone: String,
    pub tasks: Vec<RuntimeTask>,
}

#[derive(Debug, Clone)]
pub struct RuntimeTask {
    pub name: String,
    pub path: String,
    pub expendable: bool,
}

impl TopoModel {
    pub fn build(spec: TopologySpec) -> ControlResult<Self> {
        let requirements = extract(&spec);
        let expendable_tasks = spec
            .collections
            .iter()
            .flat_map(|c| c.tasks.iter())
            .filter(|t| t.expendable)
            .map(|t| t.name.clone())
            .collect();
        Ok(Self {
            spec,
            collections: requirements.collections,
            zone_info: requirements.zone_info,
            n_info: requirements.n_info,
            agent_groups: requirements.agent_groups,
            expendable_tasks,
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &TopologySpec {
        &self.spec
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionInfo> {
        self.collections.iter().find(|c| c.name == name)
    }

    /// The name, multiplicity and floor of the group owning a collection.
    pub fn group_of_collection(&self, collection: &str) -> Option<(&str, u32, Option<u32>)> {
        self.spec
            .group_of(collection)
            .map(|g| (g.name.as_str(), g.n, g.n_min))
    }

    /// The total number of runtime tasks across all collection instances.
    pub fn task_count(&self) -> usize {
        self.collections
            .iter()
            .map(|c| c.total_tasks as usize)
            .sum()
    }

    /// Expand the topology into its runtime instances with stable paths.
    ///
    /// Grouped collections are laid out as `main/<group>/<collection>_<i>`,
    /// standalone collections as `main/<collection>`; task instances append
    /// `<task>` or `<task>_<k>` when a task is replicated inside the
    /// collection.
    pub fn runtime_layout(&self) -> Vec<RuntimeCollection> {
        let mut out = Vec::new();
        for info in &self.collections {
            let Some(spec) = self.spec.collections.iter().find(|c| c.name == info.name) else {
                continue;
            };
            let group = self.spec.group_of(&info.name).map(|g| g.name.clone());
            for instance in 0..info.n_original {
                let path = match &group {
                    Some(group) => format!("main/{}/{}_{}", group, info.name, instance),
                    None => format!("main/{}", info.name),
                };
                let mut tasks = Vec::new();
                for task in &spec.tasks {
                    for k in 0..task.n {
                        let task_path = if task.n == 1 {
                            format!("{}/{}", path, task.name)
                        } else {
                            format!("{}/{}_{}", path, task.name, k)
                        };
                        tasks.push(RuntimeTask {
                            name: task.name.clone(),
                            path: task_path,
                            expendable: task.expendable,
                        });
                    }
                }
                out.push(RuntimeCollection {
                    name: info.name.clone(),
                    path,
                    group: group.clone(),
                    instance,
                    agent_group: info.agent_group.clone(),
                    zone: info.zone.clone(),
                    tasks,
                });
            }
        }
        out
    }

    pub fn is_expendable_task(&self, task_name: &str) -> bool {
        self.expendable_tasks.contains(task_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIXTURE: &str = r#"
name: layout
collections:
  - name: Samplers
    agent_group: calib
    tasks:
      - name: sampler
        n: 2
  - name: Processors
    agent_group: online
    tasks:
      - name: processor
groups:
  - name: online
    n: 3
    collections: [Processors]
"#;

    #[test]
    fn test_runtime_layout_paths() {
        let model = TopoModel::build(TopologySpec::from_yaml(FIXTURE).unwrap()).unwrap();
        let layout = model.runtime_layout();
        assert_eq!(layout.len(), 4);
        assert_eq!(model.task_count(), 5);

        let samplers = &layout[0];
        assert_eq!(samplers.path, "main/Samplers");
        assert_eq!(samplers.tasks.len(), 2);
        assert_eq!(samplers.tasks[0].path, "main/Samplers/sampler_0");
        assert_eq!(samplers.tasks[1].path, "main/Samplers/sampler_1");

        let processors = &layout[1..];
        assert_eq!(processors[0].path, "main/online/Processors_0");
        assert_eq!(processors[2].path, "main/online/Processors_2");
        assert_eq!(processors[1].tasks[0].path, "main/online/Processors_1/processor");
    }

    #[test]
    fn test_group_lookup() {
        let model = TopoModel::build(TopologySpec::from_yaml(FIXTURE).unwrap()).unwrap();
        assert_eq!(model.group_of_collection("Processors"), Some(("online", 3, None)));
        assert_eq!(model.group_of_collection("Samplers"), None);
    }
}
