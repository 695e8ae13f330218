use serde::Deserialize;
use std::env;
use std::time::Duration;

/// Process-scoped configuration. Loaded once at startup and passed by
/// reference into the engines; tests construct it with `Config::default()`
/// and inject a fresh instance per case.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub booking: BookingRules,
    #[serde(default)]
    pub matching: MatchingRules,
    #[serde(default)]
    pub client: ClientRules,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BookingRules {
    /// TTL on a pending request and its hold.
    #[serde(default = "default_request_ttl")]
    pub request_ttl_seconds: u64,
    /// Auto-accept is suppressed at or above this recent no-show count.
    #[serde(default = "default_no_show_limit")]
    pub auto_accept_no_show_limit: u32,
    /// Fallback geofence radius when the rider has no matching prefs.
    #[serde(default = "default_radius")]
    pub default_radius_meters: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct MatchingRules {
    /// Shortlist cap per rider.
    #[serde(default = "default_top_n")]
    pub top_n: usize,
    /// Posts whose window started within this grace are still eligible.
    #[serde(default = "default_window_grace")]
    pub window_grace_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ClientRules {
    /// Cached feed items are flagged stale past this age without a
    /// confirmed refresh.
    #[serde(default = "default_stale_after")]
    pub stale_after_seconds: u64,
    #[serde(default = "default_replay_attempts")]
    pub replay_max_attempts: u32,
    /// Feed query throttle: allowed queries per rider per window.
    #[serde(default = "default_max_queries")]
    pub max_queries_per_window: usize,
    #[serde(default = "default_query_window")]
    pub query_window_seconds: u64,
}

fn default_request_ttl() -> u64 {
    600
}
fn default_no_show_limit() -> u32 {
    3
}
fn default_radius() -> f64 {
    1000.0
}
fn default_top_n() -> usize {
    10
}
fn default_window_grace() -> u64 {
    360
}
fn default_stale_after() -> u64 {
    300
}
fn default_replay_attempts() -> u32 {
    3
}
fn default_max_queries() -> usize {
    10
}
fn default_query_window() -> u64 {
    60
}

impl Default for BookingRules {
    fn default() -> Self {
        Self {
            request_ttl_seconds: default_request_ttl(),
            auto_accept_no_show_limit: default_no_show_limit(),
            default_radius_meters: default_radius(),
        }
    }
}

impl Default for MatchingRules {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            window_grace_seconds: default_window_grace(),
        }
    }
}

impl Default for ClientRules {
    fn default() -> Self {
        Self {
            stale_after_seconds: default_stale_after(),
            replay_max_attempts: default_replay_attempts(),
            max_queries_per_window: default_max_queries(),
            query_window_seconds: default_query_window(),
        }
    }
}

impl BookingRules {
    pub fn request_ttl(&self) -> Duration {
        Duration::from_secs(self.request_ttl_seconds)
    }
}

impl MatchingRules {
    pub fn window_grace(&self) -> Duration {
        Duration::from_secs(self.window_grace_seconds)
    }
}

impl ClientRules {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_seconds)
    }

    pub fn query_window(&self) -> Duration {
        Duration::from_secs(self.query_window_seconds)
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            // Start off by merging in the "default" configuration file
            .add_source(config::File::with_name("config/default"))
            // Add in the current environment file
            // Default to 'development' env
            // Note that this file is _optional_
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add in a local configuration file
            // This file shouldn't be checked in to git
            .add_source(config::File::with_name("config/local").required(false))
            // Add in settings from the environment (with a prefix of TANDEM)
            // Eg.. `TANDEM__BOOKING__REQUEST_TTL_SECONDS=300`
            .add_source(config::Environment::with_prefix("TANDEM").separator("__"))
            .build()?;

        s.try_deserialize()
    }
}
