pub mod actions;
pub mod feed;
pub mod queue;

pub use actions::{ActionOutcome, RiderActions};
pub use feed::{post_change_stream, FeedItem, RideFeed, SnapshotSource};
pub use queue::{ActionOp, ActionQueue, ReplayReport};
