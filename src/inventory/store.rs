use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::{DispatchError, Result};
use crate::inventory::criterion::Criterion;
use crate::inventory::matcher::find_matching_resources;
use crate::inventory::resource::{Cluster, Command};

/// An immutable view of the resource inventory at one point in time.
///
/// Records are keyed by id in ordered maps so every traversal is in ascending
/// id order, independent of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventorySnapshot {
    clusters: BTreeMap<String, Cluster>,
    commands: BTreeMap<String, Command>,
}

/// On-disk JSON form of an inventory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InventoryDocument {
    #[serde(default)]
    pub clusters: Vec<Cluster>,
    #[serde(default)]
    pub commands: Vec<Command>,
}

impl InventorySnapshot {
    pub fn builder() -> InventoryBuilder {
        InventoryBuilder::default()
    }

    pub fn cluster(&self, id: &str) -> Option<&Cluster> {
        self.clusters.get(id)
    }

    pub fn command(&self, id: &str) -> Option<&Command> {
        self.commands.get(id)
    }

    pub fn clusters(&self) -> impl Iterator<Item = &Cluster> {
        self.clusters.values()
    }

    pub fn commands(&self) -> impl Iterator<Item = &Command> {
        self.commands.values()
    }

    pub fn find_clusters_matching(&self, criterion: &Criterion) -> Vec<&Cluster> {
        find_matching_resources(criterion, self.clusters.values(), None)
    }

    pub fn find_commands_matching(&self, criterion: &Criterion) -> Vec<&Command> {
        find_matching_resources(criterion, self.commands.values(), None)
    }

    /// Commands associated with `cluster`, in the cluster's priority order.
    /// Associations pointing at ids missing from the snapshot are skipped.
    pub fn commands_for_cluster(&self, cluster: &Cluster) -> Vec<&Command> {
        cluster
            .commands
            .iter()
            .filter_map(|id| {
                let command = self.commands.get(id);
                if command.is_none() {
                    tracing::debug!(cluster_id = %cluster.id, command_id = %id, "Skipping dangling command association");
                }
                command
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clusters.len() + self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty() && self.commands.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct InventoryBuilder {
    clusters: Vec<Cluster>,
    commands: Vec<Command>,
}

impl InventoryBuilder {
    pub fn cluster(mut self, cluster: Cluster) -> Self {
        self.clusters.push(cluster);
        self
    }

    pub fn command(mut self, command: Command) -> Self {
        self.commands.push(command);
        self
    }

    /// Builds the snapshot, rejecting duplicate ids within a resource kind.
    pub fn build(self) -> Result<InventorySnapshot> {
        let mut snapshot = InventorySnapshot::default();

        for cluster in self.clusters {
            if snapshot.clusters.contains_key(&cluster.id) {
                return Err(DispatchError::DuplicateResource {
                    kind: "cluster",
                    id: cluster.id,
                });
            }
            snapshot.clusters.insert(cluster.id.clone(), cluster);
        }

        for command in self.commands {
            if snapshot.commands.contains_key(&command.id) {
                return Err(DispatchError::DuplicateResource {
                    kind: "command",
                    id: command.id,
                });
            }
            snapshot.commands.insert(command.id.clone(), command);
        }

        Ok(snapshot)
    }
}

impl TryFrom<InventoryDocument> for InventorySnapshot {
    type Error = DispatchError;

    fn try_from(doc: InventoryDocument) -> Result<Self> {
        let mut builder = InventorySnapshot::builder();
        for cluster in doc.clusters {
            builder = builder.cluster(cluster);
        }
        for command in doc.commands {
            builder = builder.command(command);
        }
        builder.build()
    }
}

/// Read-only access to the current inventory.
///
/// Implementations must be safe for concurrent readers; the snapshot returned
/// is never mutated after it is handed out.
pub trait InventoryStore: Send + Sync {
    fn snapshot(&self) -> Arc<InventorySnapshot>;
}

/// Inventory held in memory. Updates swap in a whole new snapshot, so readers
/// holding an older snapshot are unaffected.
#[derive(Debug, Default)]
pub struct InMemoryInventory {
    current: RwLock<Arc<InventorySnapshot>>,
}

impl InMemoryInventory {
    pub fn new(snapshot: InventorySnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// Load an inventory from a JSON document of `{"clusters": [...], "commands": [...]}`.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let doc: InventoryDocument = serde_json::from_str(&data)?;
        let snapshot = InventorySnapshot::try_from(doc)?;
        tracing::info!(
            path = %path.display(),
            clusters = snapshot.clusters.len(),
            commands = snapshot.commands.len(),
            "Loaded inventory"
        );
        Ok(Self::new(snapshot))
    }

    /// Atomically replace the published snapshot.
    pub fn replace(&self, snapshot: InventorySnapshot) {
        let mut current = self.current.write().unwrap_or_else(|e| e.into_inner());
        *current = Arc::new(snapshot);
    }
}

impl InventoryStore for InMemoryInventory {
    fn snapshot(&self) -> Arc<InventorySnapshot> {
        self.current
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}
