/// Portal client configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// The portal REST API origin (e.g. `https://my.anchorhost.example`).
    pub api_base_url: String,
    /// The push-event service endpoint.
    pub realtime_url: String,
    /// Polling fallback interval in seconds. Reads stay correct without push
    /// delivery; push only reduces latency.
    pub poll_interval_secs: u64,
}

/// Default polling fallback cadence.
const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Panics with a descriptive message if a required variable is missing.
    pub fn from_env() -> Self {
        Self {
            api_base_url: required_var("PORTAL_API_URL"),
            realtime_url: required_var("PORTAL_REALTIME_URL"),
            poll_interval_secs: std::env::var("PORTAL_POLL_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_POLL_INTERVAL_SECS),
        }
    }

    /// Fixed configuration for tests and offline development.
    pub fn for_tests() -> Self {
        Self {
            api_base_url: "http://localhost:0".to_string(),
            realtime_url: "memory://".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
        }
    }
}

fn required_var(name: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| panic!("{name} env var is required"))
}
