//! Tower-following traversal.
//!
//! One traversal per facility: fetch a chip, detect towers, convert their
//! box centers to coordinates, and keep walking from each of them until the
//! detector runs dry or the depth and visit caps are reached.

pub mod follower;
pub mod ledger;
pub mod output;
pub mod visited;

pub use follower::{FollowLimits, FollowSettings, NodeStatus, TowerFollower, TraceNode, TraceReport};
pub use ledger::{TraceLedger, VisitEvent};
pub use output::{ChipWriter, TraceOutput};
pub use visited::{VisitedSet, DEFAULT_EPSILON};
