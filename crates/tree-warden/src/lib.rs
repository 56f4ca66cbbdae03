//! A dependency-tree warden for `node_modules/`: builds the ideal tree a
//! project's manifest demands, reconciles it with lockfiles and the actual
//! installed tree, and extracts everything to its final resting place.

pub use edge::{DepType, Edge, EdgeError};
pub use error::WardenError;
pub use graph::Graph;
pub use inventory::Inventory;
pub use lockfile::{Lockfile, LockfileDiff, LockfileFormat, LockfileNode, VerifyIssue};
pub use node::Node;
pub use reifier::ReifySummary;
pub use warden::*;

mod edge;
mod error;
mod fs;
mod graph;
mod inventory;
mod lockfile;
mod node;
mod placement;
mod reifier;
mod resolver;
mod warden;
