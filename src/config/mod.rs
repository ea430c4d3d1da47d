//! Engine configuration (code > env > defaults).

const DEFAULT_MAX_ROUND_TRIPS: usize = 20;
const DEFAULT_STREAM_IDLE_TIMEOUT_MS: u64 = 120_000;

const MAX_ROUND_TRIPS_ENV: &str = "TILLER_MAX_ROUND_TRIPS";
const STREAM_IDLE_TIMEOUT_ENV: &str = "TILLER_STREAM_IDLE_TIMEOUT_MS";

/// Tunables for the turn engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Cap on agent round-trips per turn.
    pub max_round_trips: usize,
    /// Idle window on the agent stream before the turn fails. `0` disables
    /// the timeout.
    pub stream_idle_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_round_trips: DEFAULT_MAX_ROUND_TRIPS,
            stream_idle_timeout_ms: DEFAULT_STREAM_IDLE_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from the environment (`TILLER_MAX_ROUND_TRIPS`,
    /// `TILLER_STREAM_IDLE_TIMEOUT_MS`), reading a `.env` file first when
    /// present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        if let Some(value) = env_var(MAX_ROUND_TRIPS_ENV).and_then(|v| parse_positive_usize(&v)) {
            config.max_round_trips = value;
        }
        if let Some(value) = env_var(STREAM_IDLE_TIMEOUT_ENV).and_then(|v| parse_u64(&v)) {
            config.stream_idle_timeout_ms = value;
        }
        config
    }

    pub fn with_max_round_trips(mut self, max_round_trips: usize) -> Self {
        self.max_round_trips = max_round_trips;
        self
    }

    pub fn with_stream_idle_timeout_ms(mut self, stream_idle_timeout_ms: u64) -> Self {
        self.stream_idle_timeout_ms = stream_idle_timeout_ms;
        self
    }
}

fn env_var(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_positive_usize(value: &str) -> Option<usize> {
    let parsed = value.trim().parse::<usize>().ok()?;
    (parsed > 0).then_some(parsed)
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}
