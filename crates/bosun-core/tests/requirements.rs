use bosun_core::topology::{AgentGroupInfo, CollectionInfo, TopoModel, TopologySpec, ZoneGroup};

fn build(yaml: &str) -> TopoModel {
    TopoModel::build(TopologySpec::from_yaml(yaml).unwrap()).unwrap()
}

fn check_zone_group(zg: &ZoneGroup, n: u32, n_cores: u32, agent_group: &str) {
    assert_eq!(zg.n, n);
    assert_eq!(zg.n_cores, n_cores);
    assert_eq!(zg.agent_group, agent_group);
}

#[allow(clippy::too_many_arguments)]
fn check_collection(
    info: &CollectionInfo,
    name: &str,
    zone: &str,
    agent_group: &str,
    n_original: u32,
    n_min: Option<u32>,
    n_cores: u32,
    num_tasks: u32,
    total_tasks: u32,
) {
    assert_eq!(info.name, name);
    assert_eq!(info.zone, zone);
    assert_eq!(info.agent_group, agent_group);
    assert_eq!(info.n_original, n_original);
    assert_eq!(info.n_min, n_min);
    assert_eq!(info.n_cores, n_cores);
    assert_eq!(info.num_tasks, num_tasks);
    assert_eq!(info.total_tasks, total_tasks);
}

fn check_agent_group(
    info: &AgentGroupInfo,
    name: &str,
    zone: &str,
    num_agents: u32,
    min_agents: Option<u32>,
    num_slots: u32,
    num_cores: u32,
) {
    assert_eq!(info.name, name);
    assert_eq!(info.zone, zone);
    assert_eq!(info.num_agents, num_agents);
    assert_eq!(info.min_agents, min_agents);
    assert_eq!(info.num_slots, num_slots);
    assert_eq!(info.num_cores, num_cores);
}

#[test]
fn test_infinite_topology() {
    // One collection of twelve tasks, no groups, no placement constraints.
    let model = build(
        r#"
name: ex-topo-infinite
collections:
  - name: EPNCollection
    tasks:
      - name: epn-device
        n: 12
"#,
    );

    assert_eq!(model.zone_info.len(), 0);
    assert_eq!(model.n_info.len(), 0);
    assert_eq!(model.collections.len(), 1);
    check_collection(&model.collections[0], "EPNCollection", "", "", 1, None, 0, 12, 12);

    assert_eq!(model.agent_groups.len(), 1);
    check_agent_group(&model.agent_groups[""], "", "", 1, None, 12, 0);
}

#[test]
fn test_zones_from_agent_group_names() {
    // Zones are not declared and derive from the agent group names.
    let model = build(
        r#"
name: ex-topo-groupname
collections:
  - name: SamplersSinks
    agent_group: calib
    tasks:
      - name: sampler
      - name: sink
  - name: Processors
    agent_group: online
    tasks:
      - name: processor
groups:
  - name: online
    n: 4
    collections: [Processors]
"#,
    );

    assert_eq!(model.zone_info.len(), 2);
    assert_eq!(model.zone_info["calib"].len(), 1);
    check_zone_group(&model.zone_info["calib"][0], 1, 0, "calib");
    assert_eq!(model.zone_info["online"].len(), 1);
    check_zone_group(&model.zone_info["online"][0], 4, 0, "online");

    assert_eq!(model.collections.len(), 2);
    check_collection(&model.collections[0], "SamplersSinks", "calib", "calib", 1, None, 0, 2, 2);
    check_collection(&model.collections[1], "Processors", "online", "online", 4, None, 0, 1, 4);

    assert_eq!(model.agent_groups.len(), 2);
    check_agent_group(&model.agent_groups["online"], "online", "online", 4, None, 1, 0);
    check_agent_group(&model.agent_groups["calib"], "calib", "calib", 1, None, 2, 0);
}

#[test]
fn test_zones_with_cores() {
    // The calib zone hosts two agent groups with core requirements.
    let model = build(
        r#"
name: ex-topo-groupname-ncores
collections:
  - name: Samplers
    zone: calib
    agent_group: calib1
    n_cores: 2
    tasks:
      - name: sampler
  - name: Sinks
    zone: calib
    agent_group: calib2
    n_cores: 1
    tasks:
      - name: sink
  - name: Processors
    zone: online
    agent_group: online
    tasks:
      - name: processor
groups:
  - name: online
    n: 4
    collections: [Processors]
"#,
    );

    assert_eq!(model.zone_info.len(), 2);
    assert_eq!(model.zone_info["calib"].len(), 2);
    check_zone_group(&model.zone_info["calib"][0], 1, 2, "calib1");
    check_zone_group(&model.zone_info["calib"][1], 1, 1, "calib2");
    assert_eq!(model.zone_info["online"].len(), 1);
    check_zone_group(&model.zone_info["online"][0], 4, 0, "online");

    assert_eq!(model.collections.len(), 3);
    check_collection(&model.collections[0], "Samplers", "calib", "calib1", 1, None, 2, 1, 1);
    check_collection(&model.collections[1], "Sinks", "calib", "calib2", 1, None, 1, 1, 1);
    check_collection(&model.collections[2], "Processors", "online", "online", 4, None, 0, 1, 4);

    assert_eq!(model.agent_groups.len(), 3);
    check_agent_group(&model.agent_groups["online"], "online", "online", 4, None, 1, 0);
    check_agent_group(&model.agent_groups["calib1"], "calib1", "calib", 1, None, 1, 2);
    check_agent_group(&model.agent_groups["calib2"], "calib2", "calib", 1, None, 1, 1);
}

#[test]
fn test_n_min() {
    let model = build(
        r#"
name: ex-topo-groupname-crashing
collections:
  - name: SamplersSinks
    agent_group: calib
    tasks:
      - name: sampler
      - name: sink
  - name: Processors
    agent_group: online
    tasks:
      - name: processor
      - name: receiver
groups:
  - name: online
    n: 4
    n_min: 2
    collections: [Processors]
"#,
    );

    assert_eq!(model.zone_info.len(), 2);
    check_zone_group(&model.zone_info["calib"][0], 1, 0, "calib");
    check_zone_group(&model.zone_info["online"][0], 4, 0, "online");

    assert_eq!(model.n_info.len(), 1);
    let n_info = &model.n_info["Processors"];
    assert_eq!(n_info.n_original, 4);
    assert_eq!(n_info.n_min, 2);
    assert_eq!(n_info.agent_group, "online");

    assert_eq!(model.collections.len(), 2);
    check_collection(&model.collections[0], "SamplersSinks", "calib", "calib", 1, None, 0, 2, 2);
    check_collection(&model.collections[1], "Processors", "online", "online", 4, Some(2), 0, 2, 8);

    assert_eq!(model.agent_groups.len(), 2);
    check_agent_group(&model.agent_groups["online"], "online", "online", 4, Some(2), 2, 0);
    check_agent_group(&model.agent_groups["calib"], "calib", "calib", 1, None, 2, 0);
}

#[test]
fn test_realistic_epn() {
    let model = build(
        r#"
name: ex-epn
collections:
  - name: wf11.dds
    zone: calib
    agent_group: calib1
    n_cores: 128
    tasks:
      - name: calib-device
        n: 17
  - name: RecoCollection
    agent_group: online
    tasks:
      - name: reco-device
        n: 223
groups:
  - name: online
    n: 50
    n_min: 50
    collections: [RecoCollection]
"#,
    );

    assert_eq!(model.zone_info.len(), 2);
    assert_eq!(model.zone_info["calib"].len(), 1);
    check_zone_group(&model.zone_info["calib"][0], 1, 128, "calib1");
    assert_eq!(model.zone_info["online"].len(), 1);
    check_zone_group(&model.zone_info["online"][0], 50, 0, "online");

    assert_eq!(model.n_info.len(), 1);
    let n_info = &model.n_info["RecoCollection"];
    assert_eq!(n_info.n_original, 50);
    assert_eq!(n_info.n_min, 50);
    assert_eq!(n_info.agent_group, "online");

    assert_eq!(model.collections.len(), 2);
    check_collection(&model.collections[0], "wf11.dds", "calib", "calib1", 1, None, 128, 17, 17);
    check_collection(
        &model.collections[1],
        "RecoCollection",
        "online",
        "online",
        50,
        Some(50),
        0,
        223,
        11150,
    );

    assert_eq!(model.agent_groups.len(), 2);
    check_agent_group(&model.agent_groups["online"], "online", "online", 50, Some(50), 223, 0);
    check_agent_group(&model.agent_groups["calib1"], "calib1", "calib", 1, None, 17, 128);
}
