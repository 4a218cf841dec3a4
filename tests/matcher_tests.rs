
use std::io::Write;
use std::sync::Arc;

use dispatch_lite::error::DispatchError;
use dispatch_lite::inventory::{
    find_matching_resources, matches, Cluster, ClusterStatus, Command, CommandStatus, InMemoryInventory,
    InventorySnapshot, InventoryStore,
};

use test_harness::{criterion, spark_inventory};

fn cluster() -> Cluster {
    Cluster::new("c1", "prod-yarn", "2.7", ClusterStatus::Up).with_tags(["sched:sla", "type:yarn", "env:prod"])
}

#[test]
fn test_scalar_fields_match_exactly() {
    let c = cluster();
    assert!(matches(&criterion("id=c1"), &c));
    assert!(matches(&criterion("name=prod-yarn,version=2.7"), &c));
    assert!(!matches(&criterion("name=Prod-Yarn"), &c));
    assert!(!matches(&criterion("version=2.7.1"), &c));
    assert!(!matches(&criterion("id=c1,name=other"), &c));
}

#[test]
fn test_tags_must_be_subset() {
    let c = cluster();
    assert!(matches(&criterion("tags=sched:sla"), &c));
    assert!(matches(&criterion("tags=type:yarn|env:prod"), &c));
    assert!(!matches(&criterion("tags=type:yarn|env:test"), &c));
}

#[test]
fn test_status_compares_canonical_form() {
    let c = cluster();
    assert!(matches(&criterion("status=UP"), &c));
    assert!(!matches(&criterion("status=up"), &c));
    assert!(!matches(&criterion("status=TERMINATED"), &c));

    let cmd = Command::new("cmd", "spark", "3.1", CommandStatus::Deprecated);
    assert!(matches(&criterion("status=DEPRECATED"), &cmd));
}

#[test]
fn test_find_matching_resources_sorted_and_defaulted() {
    let snapshot = spark_inventory();
    let adhoc = criterion("tags=sched:adhoc");

    let all: Vec<&str> = find_matching_resources(&adhoc, snapshot.clusters(), None)
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(all, vec!["c-cpu", "c-down", "c-gpu"]);

    let up: Vec<&str> = find_matching_resources(&adhoc, snapshot.clusters(), Some("UP"))
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(up, vec!["c-cpu", "c-gpu"]);

    // An explicit status is never overridden by the default.
    let down: Vec<&str> = find_matching_resources(
        &criterion("tags=sched:adhoc,status=OUT_OF_SERVICE"),
        snapshot.clusters(),
        Some("UP"),
    )
    .into_iter()
    .map(|c| c.id.as_str())
    .collect();
    assert_eq!(down, vec!["c-down"]);
}

#[test]
fn test_snapshot_lookups_ignore_status() {
    let snapshot = spark_inventory();

    let spark: Vec<&str> = snapshot
        .find_commands_matching(&criterion("name=spark"))
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(spark, vec!["spark-24", "spark-31"]);

    let cpu = snapshot.find_clusters_matching(&criterion("tags=type:cpu"));
    assert_eq!(cpu.len(), 2);
}

#[test]
fn test_inventory_rejects_duplicate_ids() {
    let result = InventorySnapshot::builder()
        .cluster(cluster())
        .cluster(cluster())
        .build();
    assert!(matches!(
        result,
        Err(DispatchError::DuplicateResource { kind: "cluster", .. })
    ));

    // Ids are scoped per resource kind.
    let result = InventorySnapshot::builder()
        .cluster(cluster())
        .command(Command::new("c1", "spark", "3.1", CommandStatus::Active))
        .build();
    assert!(result.is_ok());
}

#[test]
fn test_commands_for_cluster_skips_dangling_ids() {
    let snapshot = InventorySnapshot::builder()
        .cluster(cluster().with_commands(["missing", "spark", "hive"]))
        .command(Command::new("spark", "spark", "3.1", CommandStatus::Active))
        .command(Command::new("hive", "hive", "3.0", CommandStatus::Active))
        .build()
        .unwrap();

    let ids: Vec<&str> = snapshot
        .commands_for_cluster(snapshot.cluster("c1").unwrap())
        .into_iter()
        .map(|c| c.id.as_str())
        .collect();
    assert_eq!(ids, vec!["spark", "hive"]);
}

#[test]
fn test_inventory_loads_from_json() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(
        file,
        r#"{{
            "clusters": [
                {{"id": "c1", "name": "yarn", "version": "2.7", "status": "UP",
                  "tags": ["sched:adhoc"], "commands": ["spark"]}}
            ],
            "commands": [
                {{"id": "spark", "name": "spark", "version": "3.1", "status": "ACTIVE",
                  "executable": ["spark-submit"]}}
            ]
        }}"#
    )
    .unwrap();

    let inventory = InMemoryInventory::from_json_file(file.path()).unwrap();
    let snapshot = inventory.snapshot();
    assert_eq!(snapshot.cluster("c1").unwrap().commands, vec!["spark"]);
    assert_eq!(snapshot.command("spark").unwrap().executable, vec!["spark-submit"]);
    assert_eq!(snapshot.len(), 2);
}

#[test]
fn test_inventory_json_requires_cluster_fields() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, r#"{{"clusters": [{{"id": "c1"}}], "commands": []}}"#).unwrap();
    assert!(matches!(
        InMemoryInventory::from_json_file(file.path()),
        Err(DispatchError::Json(_))
    ));
}

#[test]
fn test_replaced_snapshot_leaves_held_snapshot_intact() {
    let inventory = InMemoryInventory::new(spark_inventory());
    let before: Arc<InventorySnapshot> = inventory.snapshot();

    inventory.replace(InventorySnapshot::default());

    assert!(before.cluster("c-cpu").is_some());
    assert!(inventory.snapshot().is_empty());
}
