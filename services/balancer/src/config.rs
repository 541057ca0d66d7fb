use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use streambal_engine::config::{
    DEFAULT_GROUPING_TAG_KEY, DEFAULT_OVERALL_CAPACITY, DEFAULT_PER_GROUP_CAPACITY,
};
use streambal_engine::{GlobalConfig, GuardConfigs, Namespace};

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: SocketAddr,
    pub log_level: String,

    /// Capacity limits for every namespace without an override.
    pub default_guard: GlobalConfig,

    /// Optional TOML file of per-namespace overrides.
    pub guards_file: Option<PathBuf>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = lookup("STREAMBAL_LISTEN_ADDR")
            .unwrap_or_else(|| "127.0.0.1:9020".to_string())
            .parse()
            .context("STREAMBAL_LISTEN_ADDR must be a socket address (host:port).")?;

        let log_level = lookup("STREAMBAL_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        let overall_capacity = lookup("STREAMBAL_OVERALL_CAPACITY")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("STREAMBAL_OVERALL_CAPACITY must be a non-negative integer.")?
            .unwrap_or(DEFAULT_OVERALL_CAPACITY);

        let per_group_capacity = lookup("STREAMBAL_PER_GROUP_CAPACITY")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("STREAMBAL_PER_GROUP_CAPACITY must be a non-negative integer.")?
            .unwrap_or(DEFAULT_PER_GROUP_CAPACITY);

        let grouping_tag_key = lookup("STREAMBAL_GROUPING_TAG_KEY")
            .unwrap_or_else(|| DEFAULT_GROUPING_TAG_KEY.to_string());

        let guards_file = lookup("STREAMBAL_GUARDS_FILE")
            .filter(|v| !v.trim().is_empty())
            .map(PathBuf::from);

        Ok(Self {
            listen_addr,
            log_level,
            default_guard: GlobalConfig::new(overall_capacity, per_group_capacity, grouping_tag_key),
            guards_file,
        })
    }

    /// Default guard plus any overrides from the guards file.
    pub fn guard_configs(&self) -> Result<GuardConfigs> {
        match &self.guards_file {
            Some(path) => load_guards_file(path, &self.default_guard),
            None => Ok(GuardConfigs::new(self.default_guard.clone())),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GuardsFile {
    #[serde(default)]
    guards: Vec<GuardEntry>,
}

/// One `[[guards]]` table. Omitted limits inherit the default guard.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct GuardEntry {
    guard_name: String,
    environment: String,
    overall_capacity: Option<u64>,
    per_group_capacity: Option<u64>,
    grouping_tag_key: Option<String>,
}

pub fn load_guards_file(path: &Path, default: &GlobalConfig) -> Result<GuardConfigs> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read guards file {}", path.display()))?;
    parse_guards(&contents, default)
        .with_context(|| format!("invalid guards file {}", path.display()))
}

pub fn parse_guards(contents: &str, default: &GlobalConfig) -> Result<GuardConfigs> {
    let file: GuardsFile = toml::from_str(contents)?;

    let mut seen = HashSet::new();
    let mut configs = GuardConfigs::new(default.clone());
    for entry in file.guards {
        let namespace = Namespace::new(entry.guard_name, entry.environment);
        if namespace.guard_name.is_empty() || namespace.environment.is_empty() {
            bail!("guard entries need a guard_name and an environment");
        }
        if !seen.insert(namespace.clone()) {
            bail!("guard {namespace} is configured more than once");
        }

        let config = GlobalConfig::new(
            entry.overall_capacity.unwrap_or(default.overall_capacity),
            entry.per_group_capacity.unwrap_or(default.per_group_capacity),
            entry
                .grouping_tag_key
                .unwrap_or_else(|| default.grouping_tag_key.clone()),
        );
        configs = configs.with_override(namespace, config);
    }

    Ok(configs)
}
