pub mod model;
pub mod repo;
pub mod search;
pub mod throttle;

pub use model::{CreatePostInput, Origin, OriginPrecision, PostStatus, RidePost, RIDE_POSTS_COLLECTION};
pub use repo::{PostEdit, PostRepository};
pub use search::{FeedSearch, FoundPost, Page, PageParams, SearchFilters};
pub use throttle::QueryThrottle;
