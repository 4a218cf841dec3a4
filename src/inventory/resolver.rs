//! Criteria resolution: picks the clusters and commands a job can run on.
//!
//! Cluster criteria are tried in caller order. The first criterion that
//! matches at least one cluster produces the candidate set; each candidate
//! keeps the first command in its priority-ordered associations that matches
//! the command criterion. Whether an empty candidate map moves on to the next
//! cluster criterion is governed by [`FallThrough`].

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ResolverConfig;
use crate::error::{DispatchError, Result};
use crate::inventory::criterion::Criterion;
use crate::inventory::matcher::{find_matching_resources, matches};
use crate::inventory::resource::{Cluster, Command};
use crate::inventory::store::{InventorySnapshot, InventoryStore};

/// When resolution moves on to the next cluster criterion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallThrough {
    /// Only when the cluster criterion matched no cluster at all. Clusters that
    /// matched but had no eligible command end resolution with no match.
    ZeroClusters,
    /// Whenever the criterion produced no cluster/command pair.
    NoEligibleCommand,
}

/// One candidate placement for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPair {
    pub cluster: Cluster,
    pub command: Command,
}

/// Result of a successful resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    criterion_index: usize,
    pairs: BTreeMap<String, ResolvedPair>,
}

impl Resolution {
    /// Position in the cluster criteria of the criterion that produced this result.
    pub fn criterion_index(&self) -> usize {
        self.criterion_index
    }

    /// Candidates in ascending cluster id order.
    pub fn pairs(&self) -> impl Iterator<Item = &ResolvedPair> {
        self.pairs.values()
    }

    pub fn get(&self, cluster_id: &str) -> Option<&ResolvedPair> {
        self.pairs.get(cluster_id)
    }

    /// Cluster id to command id.
    pub fn command_ids(&self) -> BTreeMap<String, String> {
        self.pairs
            .iter()
            .map(|(cluster_id, pair)| (cluster_id.clone(), pair.command.id.clone()))
            .collect()
    }

    /// The placement to use: the candidate with the lowest cluster id.
    /// Always `Some` for a resolution returned by [`ResolutionEngine::resolve`].
    pub fn preferred(&self) -> Option<&ResolvedPair> {
        self.pairs.values().next()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Resolves criteria against a shared inventory. Never mutates the inventory,
/// and every call works on one snapshot, so concurrent callers are safe.
pub struct ResolutionEngine {
    inventory: Arc<dyn InventoryStore>,
    config: ResolverConfig,
}

impl ResolutionEngine {
    pub fn new(inventory: Arc<dyn InventoryStore>, config: ResolverConfig) -> Self {
        Self { inventory, config }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Pick cluster/command pairs for the ordered `cluster_criteria`.
    ///
    /// Criteria that omit a status are restricted to the configured default
    /// eligible statuses.
    pub fn resolve(
        &self,
        cluster_criteria: &[Criterion],
        command_criterion: &Criterion,
    ) -> Result<Resolution> {
        if cluster_criteria.is_empty() {
            return Err(DispatchError::InvalidRequest(
                "at least one cluster criterion is required".to_string(),
            ));
        }

        let snapshot = self.inventory.snapshot();
        resolve_in(&snapshot, cluster_criteria, command_criterion, &self.config)
    }

    /// Clusters matching `criterion`, ascending by id. With `add_default_status`
    /// a criterion without a status only matches clusters in the default status.
    pub fn find_matching_clusters(
        &self,
        criterion: &Criterion,
        add_default_status: bool,
    ) -> Vec<Cluster> {
        let snapshot = self.inventory.snapshot();
        let default_status = add_default_status.then(|| self.config.default_cluster_status.as_str());
        find_matching_resources(criterion, snapshot.clusters(), default_status)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Commands matching `criterion`, ascending by id. With `add_default_status`
    /// a criterion without a status only matches commands in the default status.
    pub fn find_matching_commands(
        &self,
        criterion: &Criterion,
        add_default_status: bool,
    ) -> Vec<Command> {
        let snapshot = self.inventory.snapshot();
        let default_status = add_default_status.then(|| self.config.default_command_status.as_str());
        find_matching_resources(criterion, snapshot.commands(), default_status)
            .into_iter()
            .cloned()
            .collect()
    }
}

fn resolve_in(
    snapshot: &InventorySnapshot,
    cluster_criteria: &[Criterion],
    command_criterion: &Criterion,
    config: &ResolverConfig,
) -> Result<Resolution> {
    let command_criterion =
        command_criterion.with_default_status(config.default_command_status.as_str());

    for (index, criterion) in cluster_criteria.iter().enumerate() {
        let criterion = criterion.with_default_status(config.default_cluster_status.as_str());
        let candidates = snapshot.find_clusters_matching(&criterion);

        if candidates.is_empty() {
            tracing::debug!(criterion = %criterion, index, "No clusters matched, trying next criterion");
            continue;
        }

        let mut pairs = BTreeMap::new();
        for cluster in candidates {
            let selected = snapshot
                .commands_for_cluster(cluster)
                .into_iter()
                .find(|command| matches(&command_criterion, *command));

            match selected {
                Some(command) => {
                    pairs.insert(
                        cluster.id.clone(),
                        ResolvedPair {
                            cluster: cluster.clone(),
                            command: command.clone(),
                        },
                    );
                }
                None => {
                    tracing::debug!(cluster_id = %cluster.id, "No eligible command on cluster");
                }
            }
        }

        if !pairs.is_empty() {
            tracing::debug!(criterion = %criterion, index, candidates = pairs.len(), "Resolved job criteria");
            return Ok(Resolution {
                criterion_index: index,
                pairs,
            });
        }

        match config.fall_through {
            FallThrough::ZeroClusters => {
                tracing::debug!(criterion = %criterion, index, "Clusters matched but none had an eligible command");
                break;
            }
            FallThrough::NoEligibleCommand => continue,
        }
    }

    Err(DispatchError::NoMatchFound {
        criteria: cluster_criteria.len(),
    })
}
