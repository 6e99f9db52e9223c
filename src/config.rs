use std::env;
use std::str::FromStr;
use tracing::warn;

const DEFAULT_PORT: u16 = 8080;
const GUEST_MAX_REQUESTS: u32 = 30; // per window
const AUTH_MAX_REQUESTS: u32 = 100;
const WINDOW_MS: i64 = 60_000; // one minute, shared by both tiers
const SWEEP_THRESHOLD: usize = 10_000;

/// Deployment-tunable knobs, read once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub guest_max: u32,
    pub auth_max: u32,
    pub window_ms: i64,
    pub sweep_threshold: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            guest_max: GUEST_MAX_REQUESTS,
            auth_max: AUTH_MAX_REQUESTS,
            window_ms: WINDOW_MS,
            sweep_threshold: SWEEP_THRESHOLD,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        Self {
            port: env_or("PORT", DEFAULT_PORT),
            guest_max: env_or("RATE_LIMIT_GUEST", GUEST_MAX_REQUESTS),
            auth_max: env_or("RATE_LIMIT_AUTH", AUTH_MAX_REQUESTS),
            window_ms: env_or("RATE_LIMIT_WINDOW_MS", WINDOW_MS),
            sweep_threshold: env_or("RATE_LIMIT_SWEEP_THRESHOLD", SWEEP_THRESHOLD),
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparseable {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
