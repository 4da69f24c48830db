mod cluster;
mod link;

pub use cluster::{ClusterMessage, LocalClusterActor};
pub use link::LocalBackend;

use crate::device::Transition;

/// How a simulated device behaves. Behaviors are matched against task
/// paths by prefix; the first match wins. Used to exercise failure and
/// timeout paths end to end.
#[derive(Debug, Clone, Default)]
pub struct DeviceBehavior {
    pub path_prefix: String,
    /// Enter the Error state instead of performing this transition.
    pub fail_on: Option<Transition>,
    /// Never reply to this transition.
    pub stall_on: Option<Transition>,
    /// Reject property updates.
    pub fail_properties: bool,
}

#[derive(Debug, Clone)]
pub struct LocalClusterOptions {
    pub behaviors: Vec<DeviceBehavior>,
    pub host: String,
    pub work_dir: String,
}

impl Default for LocalClusterOptions {
    fn default() -> Self {
        Self {
            behaviors: vec![],
            host: "localhost".to_string(),
            work_dir: "/tmp".to_string(),
        }
    }
}
