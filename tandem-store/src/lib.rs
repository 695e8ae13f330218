pub mod app_config;
pub mod memory;
pub mod notify;

pub use app_config::{BookingRules, ClientRules, Config, MatchingRules};
pub use memory::MemoryStore;
pub use notify::{RecordingNotifier, StoreNotifier};
