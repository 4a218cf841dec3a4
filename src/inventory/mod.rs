//! Resource inventory and criteria resolution.
//!
//! - [`criterion`]: validated, partially specified filters
//! - [`resource`]: cluster and command records
//! - [`matcher`]: the single-criterion match predicate
//! - [`store`]: immutable inventory snapshots and the read-only store seam
//! - [`resolver`]: ordered cluster criteria + command criterion to placements

pub mod criterion;
pub mod matcher;
pub mod resolver;
pub mod resource;
pub mod store;

pub use criterion::Criterion;
pub use matcher::{find_matching_resources, matches};
pub use resolver::{FallThrough, Resolution, ResolutionEngine, ResolvedPair};
pub use resource::{Cluster, ClusterStatus, Command, CommandStatus, Resource};
pub use store::{InMemoryInventory, InventoryDocument, InventorySnapshot, InventoryStore};
