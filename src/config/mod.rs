use crate::models::Operation;
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::str::FromStr;

#[cfg(test)]
mod tests;

const DEFAULT_TIME_ADDITION_MS: u64 = 100;
const DEFAULT_TIME_SUBTRACTION_MS: u64 = 100;
const DEFAULT_TIME_MULTIPLICATION_MS: u64 = 200;
const DEFAULT_TIME_DIVISION_MS: u64 = 200;
const DEFAULT_COMPUTING_POWER: usize = 4;
const DEFAULT_HTTP_HOST: &str = "127.0.0.1";
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_ORCHESTRATOR_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_JWT_SECRET: &str = "dagcalc-insecure-dev-secret";

/// Path of the key=value config file unless `DAGCALC_CONFIG` overrides it.
const DEFAULT_CONFIG_PATH: &str = "config/dagcalc.conf";

#[derive(Debug, Clone)]
pub struct Config {
    pub http: HttpConfig,
    pub agent: AgentConfig,
    pub times: OperationTimes,
    pub auth: AuthConfig,
}

#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Number of concurrent worker loops per agent process.
    pub computing_power: usize,
    pub orchestrator_url: String,
}

/// Artificial per-operation latency agents observe, in milliseconds
#[derive(Debug, Clone)]
pub struct OperationTimes {
    pub addition_ms: u64,
    pub subtraction_ms: u64,
    pub multiplication_ms: u64,
    pub division_ms: u64,
}

impl OperationTimes {
    pub fn for_operation(&self, operation: Operation) -> u64 {
        match operation {
            Operation::Add => self.addition_ms,
            Operation::Sub => self.subtraction_ms,
            Operation::Mul => self.multiplication_ms,
            Operation::Div => self.division_ms,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl Config {
    /// Load configuration for a binary.
    ///
    /// Reads the key=value file (path from `DAGCALC_CONFIG` or the default
    /// location), then lets process environment variables override file
    /// values key by key. A missing file yields the defaults.
    pub fn load() -> Self {
        match dotenvy::dotenv() {
            Ok(path) => tracing::debug!("loaded .env file from {:?}", path),
            Err(_) => tracing::debug!("no .env file found"),
        }

        let path = env::var("DAGCALC_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut values = read_config_file(Path::new(&path));

        for key in [
            "TIME_ADDITION_MS",
            "TIME_SUBTRACTION_MS",
            "TIME_MULTIPLICATION_MS",
            "TIME_DIVISION_MS",
            "COMPUTING_POWER",
            "JWT_SECRET_KEY",
            "HTTP_HOST",
            "HTTP_PORT",
            "ORCHESTRATOR_URL",
        ] {
            if let Ok(value) = env::var(key) {
                values.insert(key.to_string(), value);
            }
        }

        Self::from_values(&values)
    }

    /// Build a configuration from a key=value file only (no env overrides).
    pub fn from_file(path: &Path) -> Self {
        let values = read_config_file(path);
        Self::from_values(&values)
    }

    fn from_values(values: &HashMap<String, String>) -> Self {
        let jwt_secret = values
            .get("JWT_SECRET_KEY")
            .filter(|secret| !secret.trim().is_empty())
            .cloned()
            .unwrap_or_else(|| {
                tracing::warn!("JWT_SECRET_KEY not set, falling back to the development secret");
                DEFAULT_JWT_SECRET.to_string()
            });

        Config {
            http: HttpConfig {
                host: values
                    .get("HTTP_HOST")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_HTTP_HOST.to_string()),
                port: parse_or(values, "HTTP_PORT", DEFAULT_HTTP_PORT),
            },
            agent: AgentConfig {
                computing_power: parse_or(values, "COMPUTING_POWER", DEFAULT_COMPUTING_POWER),
                orchestrator_url: values
                    .get("ORCHESTRATOR_URL")
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_ORCHESTRATOR_URL.to_string()),
            },
            times: OperationTimes {
                addition_ms: parse_or(values, "TIME_ADDITION_MS", DEFAULT_TIME_ADDITION_MS),
                subtraction_ms: parse_or(values, "TIME_SUBTRACTION_MS", DEFAULT_TIME_SUBTRACTION_MS),
                multiplication_ms: parse_or(
                    values,
                    "TIME_MULTIPLICATION_MS",
                    DEFAULT_TIME_MULTIPLICATION_MS,
                ),
                division_ms: parse_or(values, "TIME_DIVISION_MS", DEFAULT_TIME_DIVISION_MS),
            },
            auth: AuthConfig { jwt_secret },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_values(&HashMap::new())
    }
}

/// Parse a `KEY=value` file into a map.
///
/// Lines starting with `#` and blank lines are skipped; lines without `=`
/// are ignored. A missing or unreadable file yields an empty map so every
/// key falls back to its default.
fn read_config_file(path: &Path) -> HashMap<String, String> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => {
            tracing::info!("config file {:?} not found, using defaults", path);
            return HashMap::new();
        }
    };

    let mut values = HashMap::new();
    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        values.insert(key.trim().to_string(), value.trim().to_string());
    }
    values
}

/// Parse one config value, falling back to the default when the key is
/// absent or the value is malformed.
fn parse_or<T: FromStr>(values: &HashMap<String, String>, key: &str, default: T) -> T {
    values
        .get(key)
        .and_then(|value| value.parse().ok())
        .unwrap_or(default)
}
