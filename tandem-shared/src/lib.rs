pub mod campus;
pub mod events;
pub mod geo;

pub use campus::Campus;
pub use events::{Notification, NotificationKind};
pub use geo::GeoPoint;
