pub mod cache;
pub mod score;

pub use cache::{MatchCache, MatchShortlist};
pub use score::{compare_matches, MatchEntry};
