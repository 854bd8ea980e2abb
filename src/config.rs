//! Agent arguments and the versioned configuration store.
//!
//! Arguments arrive as a comma-delimited `k=v` string (the agent attach
//! string) optionally combined with a flat YAML file named by the `conf`
//! key. Directly supplied keys supersede file keys. Dynamic enable merges
//! extra keys by publishing a *new* snapshot; probes keep the snapshot they
//! were built with.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use thiserror::Error;

/// Default metrics prefix.
pub const DEFAULT_PREFIX: &str = "periscope";
/// Default control-plane port.
pub const DEFAULT_HTTP_PORT: u16 = 5005;
/// Default probe set when the `probes` key is absent.
pub const DEFAULT_PROBES: &str = "memory";
/// Default sink when the `sink` key is absent.
pub const DEFAULT_SINK: &str = "log";

const SERVER: &str = "server";
const PORT: &str = "port";
const PREFIX: &str = "prefix";
const PROBES: &str = "probes";
const SINK: &str = "sink";
const HTTP_PORT: &str = "http_port";
const HTTP_SERVER_ENABLED: &str = "http_server_enabled";
const CONF: &str = "conf";

const REQUIRED: &[&str] = &[SERVER, PORT];

/// Configuration error types. These fail fast at the point of
/// instantiation rather than being tolerated at runtime.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the conf file.
    #[error("failed to read conf file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the conf file as a flat YAML map.
    #[error("failed to parse conf file: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// The argument string was not a comma-delimited list of `k=v` pairs.
    #[error("arguments must be a comma-delimited list in k=v form, got '{0}'")]
    Malformed(String),

    /// A required argument was not supplied.
    #[error("{0} argument was not supplied")]
    Missing(&'static str),

    /// An argument was present but unusable.
    #[error("invalid value for {key}: {reason}")]
    Invalid { key: String, reason: String },
}

/// An immutable snapshot of the agent's argument set.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: HashMap<String, String>,
}

impl Arguments {
    /// Parse a comma-delimited `k=v` argument string, then load and fold in
    /// the conf file if a `conf` key names one. Validates required keys.
    pub fn parse(args: &str) -> Result<Self, ConfigError> {
        let mut values = HashMap::new();
        for pair in args.split(',').filter(|p| !p.trim().is_empty()) {
            let mut tokens = pair.splitn(2, '=');
            match (tokens.next(), tokens.next()) {
                (Some(key), Some(value)) if !key.trim().is_empty() => {
                    values.insert(key.trim().to_owned(), value.trim().to_owned());
                }
                _ => return Err(ConfigError::Malformed(pair.to_owned())),
            }
        }
        Self::from_values(values)
    }

    /// Build from an already-assembled map (used by `merged` and tests).
    pub fn from_values(mut values: HashMap<String, String>) -> Result<Self, ConfigError> {
        if let Some(conf) = values.get(CONF).cloned() {
            for (key, value) in load_conf_file(conf.as_ref())? {
                // Directly supplied arguments supersede the conf file.
                values.entry(key).or_insert(value);
            }
        }

        for required in REQUIRED.iter().copied() {
            if !values.contains_key(required) {
                return Err(ConfigError::Missing(required));
            }
        }

        let args = Self { values };
        // Surface malformed numerics now rather than at first use.
        args.port()?;
        args.http_port()?;
        Ok(args)
    }

    /// A new snapshot with `extra` folded in, new keys winning.
    pub fn merged(&self, extra: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut values = self.values.clone();
        values.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        Self::from_values(values)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Integer argument; present-but-unparsable is a configuration error.
    pub fn get_int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        self.get(key)
            .map(|raw| {
                raw.parse().map_err(|_| ConfigError::Invalid {
                    key: key.to_owned(),
                    reason: format!("'{raw}' is not an integer"),
                })
            })
            .transpose()
    }

    /// Duration argument: humantime syntax (`10ms`, `5s`), with a bare
    /// integer read as seconds for compatibility with plain period args.
    pub fn get_duration(&self, key: &str) -> Result<Option<Duration>, ConfigError> {
        self.get(key)
            .map(|raw| {
                if let Ok(secs) = raw.parse::<u64>() {
                    return Ok(Duration::from_secs(secs));
                }
                humantime::parse_duration(raw).map_err(|e| ConfigError::Invalid {
                    key: key.to_owned(),
                    reason: e.to_string(),
                })
            })
            .transpose()
    }

    /// Colon-delimited list argument; absent means empty.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.get(key)
            .map(|raw| {
                raw.split(':')
                    .filter(|s| !s.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Sink host, required at construction.
    pub fn server(&self) -> &str {
        self.get(SERVER).unwrap_or_default()
    }

    /// Sink port, required at construction.
    pub fn port(&self) -> Result<u16, ConfigError> {
        match self.get_int(PORT)? {
            Some(p) if (1..=i64::from(u16::MAX)).contains(&p) => Ok(p as u16),
            Some(p) => Err(ConfigError::Invalid {
                key: PORT.to_owned(),
                reason: format!("{p} is out of range"),
            }),
            None => Err(ConfigError::Missing(PORT)),
        }
    }

    pub fn prefix(&self) -> &str {
        self.get(PREFIX).unwrap_or(DEFAULT_PREFIX)
    }

    /// Probe type names to start with, colon-delimited.
    pub fn probes(&self) -> Vec<String> {
        let probes = self.get_list(PROBES);
        if probes.is_empty() {
            vec![DEFAULT_PROBES.to_owned()]
        } else {
            probes
        }
    }

    pub fn sink(&self) -> &str {
        self.get(SINK).unwrap_or(DEFAULT_SINK)
    }

    pub fn http_port(&self) -> Result<u16, ConfigError> {
        match self.get_int(HTTP_PORT)? {
            Some(p) if (1..=i64::from(u16::MAX)).contains(&p) => Ok(p as u16),
            Some(p) => Err(ConfigError::Invalid {
                key: HTTP_PORT.to_owned(),
                reason: format!("{p} is out of range"),
            }),
            None => Ok(DEFAULT_HTTP_PORT),
        }
    }

    pub fn http_server_enabled(&self) -> bool {
        self.get(HTTP_SERVER_ENABLED)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true)
    }
}

/// Load a flat YAML map, stringifying scalar values.
fn load_conf_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let parsed: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&content)?;

    let mut values = HashMap::with_capacity(parsed.len());
    for (key, value) in parsed {
        let rendered = match value {
            serde_yaml::Value::String(s) => s,
            serde_yaml::Value::Bool(b) => b.to_string(),
            serde_yaml::Value::Number(n) => n.to_string(),
            other => {
                return Err(ConfigError::Invalid {
                    key,
                    reason: format!("unsupported conf value: {other:?}"),
                });
            }
        };
        values.insert(key, rendered);
    }
    Ok(values)
}

/// Versioned shared view of the argument set.
///
/// `merge` publishes a fresh [`Arguments`] snapshot; readers that captured
/// the previous `Arc` keep seeing it unchanged. Only probes instantiated
/// after a merge observe the new keys.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    current: Arc<RwLock<Arc<Arguments>>>,
}

impl ConfigStore {
    pub fn new(arguments: Arguments) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(arguments))),
        }
    }

    /// The latest snapshot.
    pub fn snapshot(&self) -> Arc<Arguments> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    /// Publish a new snapshot with `extra` merged in and return it.
    pub fn merge(&self, extra: &HashMap<String, String>) -> Result<Arc<Arguments>, ConfigError> {
        let mut guard = self.current.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(guard.merged(extra)?);
        *guard = Arc::clone(&next);
        Ok(next)
    }
}
