mod materialize;
mod model;
mod requirements;
mod spec;

pub use materialize::{materialize, TopologySource};
pub use model::{RuntimeCollection, RuntimeTask, TopoModel};
pub use requirements::{AgentGroupInfo, CollectionInfo, CollectionNInfo, ZoneGroup};
pub use spec::{CollectionSpec, GroupSpec, TaskSpec, TopologySpec};
