use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};

/// The declarative topology description consumed by the control plane.
///
/// The description is a YAML document listing collections of tasks and the
/// replicated groups that contain them. The production wire format of the
/// topology reader is abstracted behind this document; the control plane
/// never inspects anything else.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologySpec {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub collections: Vec<CollectionSpec>,
    #[serde(default)]
    pub groups: Vec<GroupSpec>,
}

/// A bundle of co-located tasks. Collections are the atomic failure unit
/// for recovery: a collection fails as a whole and is replaced as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionSpec {
    pub name: String,
    /// The resource zone the collection is placed in.
    /// Defaults to the agent group name when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zone: Option<String>,
    /// The agent group that provides the hosts for this collection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_group: Option<String>,
    /// Cores required per agent of this collection.
    #[serde(default)]
    pub n_cores: u32,
    pub tasks: Vec<TaskSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSpec {
    pub name: String,
    /// How many instances of the task each collection instance runs.
    #[serde(default = "default_task_n")]
    pub n: u32,
    /// Expendable tasks do not fail a transition when they misbehave.
    #[serde(default)]
    pub expendable: bool,
}

fn default_task_n() -> u32 {
    1
}

/// A replicated subtree: `n` instances of each member collection,
/// with an optional `n_min` floor below which the partition is lost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSpec {
    pub name: String,
    pub n: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n_min: Option<u32>,
    pub collections: Vec<String>,
}

impl TopologySpec {
    pub fn from_yaml(content: &str) -> ControlResult<Self> {
        let spec: TopologySpec = serde_yaml::from_str(content)
            .map_err(|e| ControlError::TopologyFailed(format!("invalid topology: {e}")))?;
        spec.validate()?;
        Ok(spec)
    }

    pub fn from_file(path: &Path) -> ControlResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ControlError::TopologyFailed(format!(
                "failed to read topology file {}: {e}",
                path.display()
            ))
        })?;
        Self::from_yaml(&content)
    }

    pub fn to_yaml(&self) -> ControlResult<String> {
        serde_yaml::to_string(self)
            .map_err(|e| ControlError::TopologyFailed(format!("failed to serialize topology: {e}")))
    }

    pub fn save(&self, path: &Path) -> ControlResult<()> {
        std::fs::write(path, self.to_yaml()?).map_err(|e| {
            ControlError::TopologyFailed(format!(
                "failed to write topology file {}: {e}",
                path.display()
            ))
        })
    }

    /// The group a collection belongs to, if any.
    pub fn group_of(&self, collection: &str) -> Option<&GroupSpec> {
        self.groups
            .iter()
            .find(|g| g.collections.iter().any(|c| c == collection))
    }

    /// Set the multiplicity of a group, preserving its `n_min`.
    /// Used by recovery to adopt the surviving subset.
    pub fn reduce_group(&mut self, group: &str, remaining: u32) -> ControlResult<()> {
        let group = self
            .groups
            .iter_mut()
            .find(|g| g.name == group)
            .ok_or_else(|| {
                ControlError::TopologyFailed(format!("group {group:?} not found in topology"))
            })?;
        group.n = remaining;
        Ok(())
    }

    fn validate(&self) -> ControlResult<()> {
        let mut names = HashSet::new();
        for collection in &self.collections {
            if collection.name.is_empty() {
                return Err(ControlError::TopologyFailed(
                    "collection with an empty name".to_string(),
                ));
            }
            if !names.insert(collection.name.as_str()) {
                return Err(ControlError::TopologyFailed(format!(
                    "duplicate collection {:?}",
                    collection.name
                )));
            }
            if collection.tasks.is_empty() {
                return Err(ControlError::TopologyFailed(format!(
                    "collection {:?} has no tasks",
                    collection.name
                )));
            }
        }
        let mut group_names = HashSet::new();
        let mut grouped = HashSet::new();
        for group in &self.groups {
            if !group_names.insert(group.name.as_str()) {
                return Err(ControlError::TopologyFailed(format!(
                    "duplicate group {:?}",
                    group.name
                )));
            }
            if group.n == 0 {
                return Err(ControlError::TopologyFailed(format!(
                    "group {:?} has zero multiplicity",
                    group.name
                )));
            }
            if let Some(n_min) = group.n_min {
                if n_min > group.n {
                    return Err(ControlError::TopologyFailed(format!(
                        "group {:?} has n_min {n_min} above n {}",
                        group.name, group.n
                    )));
                }
            }
            for member in &group.collections {
                if !names.contains(member.as_str()) {
                    return Err(ControlError::TopologyFailed(format!(
                        "group {:?} references unknown collection {member:?}",
                        group.name
                    )));
                }
                if !grouped.insert(member.as_str()) {
                    return Err(ControlError::TopologyFailed(format!(
                        "collection {member:?} appears in more than one group"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EXAMPLE: &str = r#"
name: example
collections:
  - name: Processors
    agent_group: online
    tasks:
      - name: processor
groups:
  - name: online
    n: 4
    n_min: 2
    collections: [Processors]
"#;

    #[test]
    fn test_parse_and_round_trip() {
        let spec = TopologySpec::from_yaml(EXAMPLE).unwrap();
        assert_eq!(spec.collections.len(), 1);
        assert_eq!(spec.groups[0].n, 4);
        assert_eq!(spec.groups[0].n_min, Some(2));
        assert_eq!(spec.group_of("Processors").unwrap().name, "online");
        assert!(spec.group_of("Other").is_none());

        let reparsed = TopologySpec::from_yaml(&spec.to_yaml().unwrap()).unwrap();
        assert_eq!(reparsed, spec);
    }

    #[test]
    fn test_reduce_group_preserves_n_min() {
        let mut spec = TopologySpec::from_yaml(EXAMPLE).unwrap();
        spec.reduce_group("online", 2).unwrap();
        assert_eq!(spec.groups[0].n, 2);
        assert_eq!(spec.groups[0].n_min, Some(2));
        assert!(spec.reduce_group("offline", 1).is_err());
    }

    #[test]
    fn test_validation() {
        let unknown_member = r#"
collections:
  - name: A
    tasks: [{ name: t }]
groups:
  - name: g
    n: 2
    collections: [B]
"#;
        assert!(TopologySpec::from_yaml(unknown_member).is_err());

        let bad_n_min = r#"
collections:
  - name: A
    tasks: [{ name: t }]
groups:
  - name: g
    n: 2
    n_min: 3
    collections: [A]
"#;
        assert!(TopologySpec::from_yaml(bad_n_min).is_err());
    }
}
