use std::env;

/// Engine address used when nothing else is configured.
pub static DEFAULT_ENGINE_URL: &str = "tcp://localhost:5000";

/// Environment variable overriding `DEFAULT_ENGINE_URL`.
pub static ENGINE_URL_ENV: &str = "SENTINEL_ENGINE_URL";

/// Engine address from the environment, or the built-in default.
pub fn default_engine_url() -> String {
    match env::var(ENGINE_URL_ENV) {
        Ok(url) if !url.trim().is_empty() => url.trim().to_string(),
        _ => DEFAULT_ENGINE_URL.to_string(),
    }
}

/// Reads a size from the environment, never going below `min_size`.
pub fn env_size(var: &str, min_size: usize) -> usize {
    if let Ok(req) = env::var(var) {
        std::cmp::max(req.trim().parse().unwrap_or(0), min_size)
    } else {
        min_size
    }
}
