
use std::collections::BTreeMap;
use std::sync::Arc;

use dispatch_lite::config::ResolverConfig;
use dispatch_lite::error::DispatchError;
use dispatch_lite::inventory::{
    Cluster, ClusterStatus, Command, CommandStatus, FallThrough, InMemoryInventory, InventorySnapshot,
    ResolutionEngine,
};

use test_harness::{criterion, engine, spark_inventory};

const POLICIES: [FallThrough; 2] = [FallThrough::ZeroClusters, FallThrough::NoEligibleCommand];

/// Clusters `C1{cpu}` and `C2{gpu}`; `Cmd1` (spark) is associated with the
/// listed clusters only.
fn gpu_cpu_inventory(cmd1_on: &[&str]) -> InventorySnapshot {
    let mut c1 = Cluster::new("C1", "cpu-cluster", "1.0", ClusterStatus::Up).with_tags(["cpu"]);
    let mut c2 = Cluster::new("C2", "gpu-cluster", "1.0", ClusterStatus::Up).with_tags(["gpu"]);
    if cmd1_on.contains(&"C1") {
        c1 = c1.with_commands(["Cmd1"]);
    }
    if cmd1_on.contains(&"C2") {
        c2 = c2.with_commands(["Cmd1"]);
    }
    InventorySnapshot::builder()
        .cluster(c1)
        .cluster(c2)
        .command(Command::new("Cmd1", "spark", "3.1", CommandStatus::Active))
        .build()
        .unwrap()
}

fn pairs(
    engine: &ResolutionEngine,
    criteria: &[&str],
    command: &str,
) -> Result<BTreeMap<String, String>, DispatchError> {
    let criteria: Vec<_> = criteria.iter().map(|c| criterion(c)).collect();
    engine
        .resolve(&criteria, &criterion(command))
        .map(|r| r.command_ids())
}

#[test]
fn test_first_matching_criterion_wins() {
    for policy in POLICIES {
        let engine = engine(gpu_cpu_inventory(&["C2"]), policy);
        let resolution = engine
            .resolve(&[criterion("tags=gpu"), criterion("tags=cpu")], &criterion("name=spark"))
            .unwrap();

        assert_eq!(resolution.criterion_index(), 0, "{policy:?}");
        assert_eq!(
            resolution.command_ids(),
            BTreeMap::from([("C2".to_string(), "Cmd1".to_string())]),
            "{policy:?}"
        );
    }
}

#[test]
fn test_matched_clusters_without_command_do_not_fall_through() {
    let engine = engine(gpu_cpu_inventory(&["C1"]), FallThrough::ZeroClusters);
    let result = pairs(&engine, &["tags=gpu", "tags=cpu"], "name=spark");
    assert!(matches!(result, Err(DispatchError::NoMatchFound { criteria: 2 })));
}

#[test]
fn test_no_eligible_command_policy_falls_through() {
    let engine = engine(gpu_cpu_inventory(&["C1"]), FallThrough::NoEligibleCommand);
    let resolution = engine
        .resolve(&[criterion("tags=gpu"), criterion("tags=cpu")], &criterion("name=spark"))
        .unwrap();
    assert_eq!(resolution.criterion_index(), 1);
    assert_eq!(
        resolution.command_ids(),
        BTreeMap::from([("C1".to_string(), "Cmd1".to_string())])
    );
}

#[test]
fn test_criterion_matching_no_cluster_falls_through() {
    for policy in POLICIES {
        let engine = engine(gpu_cpu_inventory(&["C1"]), policy);
        let result = pairs(&engine, &["tags=tpu", "tags=cpu"], "name=spark").unwrap();
        assert_eq!(
            result,
            BTreeMap::from([("C1".to_string(), "Cmd1".to_string())]),
            "{policy:?}"
        );
    }
}

#[test]
fn test_no_criterion_matches() {
    for policy in POLICIES {
        let engine = engine(gpu_cpu_inventory(&["C1", "C2"]), policy);
        let result = pairs(&engine, &["tags=tpu", "tags=fpga"], "name=spark");
        assert!(matches!(result, Err(DispatchError::NoMatchFound { criteria: 2 })), "{policy:?}");
    }
}

#[test]
fn test_clusters_without_eligible_command_are_dropped() {
    for policy in POLICIES {
        let engine = engine(gpu_cpu_inventory(&["C2"]), policy);
        let both = vec![criterion("status=UP")];
        let resolution = engine.resolve(&both, &criterion("name=spark")).unwrap();
        assert_eq!(resolution.len(), 1, "{policy:?}");
        assert!(resolution.get("C1").is_none());
        assert_eq!(resolution.get("C2").unwrap().command.id, "Cmd1");
    }
}

#[test]
fn test_first_command_in_priority_order_is_selected() {
    let build = |order: [&str; 2]| {
        InventorySnapshot::builder()
            .cluster(Cluster::new("c1", "yarn", "1", ClusterStatus::Up).with_commands(order))
            .command(Command::new("spark-a", "spark", "3.0", CommandStatus::Active).with_tags(["type:spark"]))
            .command(Command::new("spark-b", "spark", "3.1", CommandStatus::Active).with_tags(["type:spark"]))
            .build()
            .unwrap()
    };

    let forward = engine(build(["spark-a", "spark-b"]), FallThrough::ZeroClusters);
    assert_eq!(
        pairs(&forward, &["id=c1"], "tags=type:spark").unwrap()["c1"],
        "spark-a"
    );

    let reversed = engine(build(["spark-b", "spark-a"]), FallThrough::ZeroClusters);
    assert_eq!(
        pairs(&reversed, &["id=c1"], "tags=type:spark").unwrap()["c1"],
        "spark-b"
    );
}

#[test]
fn test_default_statuses_are_injected() {
    let engine = engine(spark_inventory(), FallThrough::ZeroClusters);

    // c-down is out of service and spark-24 is deprecated: neither is eligible
    // unless asked for explicitly.
    let resolution = engine
        .resolve(&[criterion("tags=sched:adhoc")], &criterion("tags=type:spark"))
        .unwrap();
    assert_eq!(
        resolution.command_ids(),
        BTreeMap::from([
            ("c-cpu".to_string(), "spark-31".to_string()),
            ("c-gpu".to_string(), "spark-31".to_string()),
        ])
    );

    let resolution = engine
        .resolve(
            &[criterion("tags=sched:adhoc,status=OUT_OF_SERVICE")],
            &criterion("tags=type:spark,status=DEPRECATED"),
        )
        .unwrap_err();
    assert!(matches!(resolution, DispatchError::NoMatchFound { .. }));

    let deprecated = engine
        .resolve(&[criterion("id=c-cpu")], &criterion("tags=type:spark,status=DEPRECATED"))
        .unwrap();
    assert_eq!(deprecated.get("c-cpu").unwrap().command.id, "spark-24");
}

#[test]
fn test_resolution_is_deterministic() {
    let engine = engine(spark_inventory(), FallThrough::ZeroClusters);
    let criteria = [criterion("tags=sched:adhoc")];
    let command = criterion("tags=type:spark");

    let first = engine.resolve(&criteria, &command).unwrap();
    for _ in 0..20 {
        assert_eq!(engine.resolve(&criteria, &command).unwrap(), first);
    }

    let ids: Vec<&str> = first.pairs().map(|p| p.cluster.id.as_str()).collect();
    assert_eq!(ids, vec!["c-cpu", "c-gpu"]);
    assert_eq!(first.preferred().unwrap().cluster.id, "c-cpu");
}

#[test]
fn test_empty_criteria_list_is_rejected() {
    let engine = engine(spark_inventory(), FallThrough::ZeroClusters);
    assert!(matches!(
        engine.resolve(&[], &criterion("tags=type:spark")),
        Err(DispatchError::InvalidRequest(_))
    ));
}

#[test]
fn test_find_matching_with_and_without_default_status() {
    let engine = engine(spark_inventory(), FallThrough::ZeroClusters);
    let adhoc = criterion("tags=sched:adhoc");

    let ids = |clusters: Vec<Cluster>| clusters.into_iter().map(|c| c.id).collect::<Vec<_>>();
    assert_eq!(ids(engine.find_matching_clusters(&adhoc, true)), vec!["c-cpu", "c-gpu"]);
    assert_eq!(
        ids(engine.find_matching_clusters(&adhoc, false)),
        vec!["c-cpu", "c-down", "c-gpu"]
    );

    let spark = criterion("name=spark");
    assert_eq!(engine.find_matching_commands(&spark, true).len(), 1);
    assert_eq!(engine.find_matching_commands(&spark, false).len(), 2);
}

#[test]
fn test_engine_sees_replaced_inventory() {
    let inventory = Arc::new(InMemoryInventory::new(gpu_cpu_inventory(&[])));
    let engine = ResolutionEngine::new(inventory.clone(), ResolverConfig::default());
    let criteria = [criterion("tags=gpu")];

    assert!(engine.resolve(&criteria, &criterion("name=spark")).is_err());

    inventory.replace(gpu_cpu_inventory(&["C2"]));
    let resolution = engine.resolve(&criteria, &criterion("name=spark")).unwrap();
    assert_eq!(resolution.get("C2").unwrap().command.id, "Cmd1");
}
