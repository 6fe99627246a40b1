//! Cluster configuration: the YAML schema from spec.md §6.
use crate::error::{MatrixError, MatrixResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Default chunk size for `local_outbound` batches (spec.md §3).
pub const DEFAULT_CHUNK_SIZE: usize = 1_000;

/// The cluster-wide configuration every controller loads at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Ordered, unique node names. A node's index here is fixed for the run.
    pub sim_nodes: Vec<String>,
    pub num_agentprocs: HashMap<String, u32>,
    pub num_storeprocs: HashMap<String, u32>,
    pub controller_port: HashMap<String, u16>,
    pub state_dsn: HashMap<String, String>,
    pub num_rounds: u32,
    /// `YYYY-MM-DD`, converted to a Unix timestamp at UTC midnight.
    pub start_time: String,
    /// `"1h 30m"`-style interval string, summed to seconds.
    pub round_time: String,
    pub root_seed: u64,
    pub state_store_module: String,
    pub rabbitmq_host: String,
    pub rabbitmq_port: u16,
    pub rabbitmq_username: String,
    pub rabbitmq_password: String,
    pub event_exchange: String,
    /// Tunable; defaults to [`DEFAULT_CHUNK_SIZE`] when absent from YAML.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

impl ClusterConfig {
    /// Load and validate a cluster config from a YAML file, expanding
    /// `$VAR`/`${VAR}` references in path-typed values (`state_dsn`) once.
    pub fn load(path: impl AsRef<Path>) -> MatrixResult<Self> {
        let raw = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MatrixError::Config(format!("reading {:?}: {e}", path.as_ref())))?;
        let mut config: ClusterConfig = serde_yaml::from_str(&raw)?;
        for dsn in config.state_dsn.values_mut() {
            *dsn = expand_env(dsn);
        }
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants not expressible in the YAML schema
    /// itself. Run once at startup per spec.md §7 ("ConfigError ...
    /// exits before any service is opened").
    pub fn validate(&self) -> MatrixResult<()> {
        if self.sim_nodes.is_empty() {
            return Err(MatrixError::Config("sim_nodes must not be empty".into()));
        }
        let mut seen = std::collections::HashSet::new();
        for node in &self.sim_nodes {
            if !seen.insert(node) {
                return Err(MatrixError::Config(format!(
                    "duplicate node name in sim_nodes: {node}"
                )));
            }
        }
        for node in &self.sim_nodes {
            if !self.num_agentprocs.contains_key(node) {
                return Err(MatrixError::Config(format!(
                    "num_agentprocs missing entry for node {node}"
                )));
            }
            if !self.controller_port.contains_key(node) {
                return Err(MatrixError::Config(format!(
                    "controller_port missing entry for node {node}"
                )));
            }
            if !self.state_dsn.contains_key(node) {
                return Err(MatrixError::Config(format!(
                    "state_dsn missing entry for node {node}"
                )));
            }
            // Open question resolved in SPEC_FULL.md §9: num_storeprocs = 0
            // is a configuration error absent a documented use case.
            match self.num_storeprocs.get(node) {
                Some(0) => {
                    return Err(MatrixError::Config(format!(
                        "num_storeprocs for node {node} must be at least 1"
                    )))
                }
                Some(_) => {}
                None => {
                    return Err(MatrixError::Config(format!(
                        "num_storeprocs missing entry for node {node}"
                    )))
                }
            }
        }
        // num_rounds = 0 is permitted (spec.md §8: terminates on the first
        // barrier crossing) -- not validated further here.
        Ok(())
    }

    pub fn num_controllers(&self) -> usize {
        self.sim_nodes.len()
    }

    pub fn node_index(&self, node: &str) -> Option<usize> {
        self.sim_nodes.iter().position(|n| n == node)
    }

    /// Unix timestamp (UTC midnight) for `start_time`.
    pub fn start_timestamp(&self) -> MatrixResult<i64> {
        let date = NaiveDate::parse_from_str(&self.start_time, "%Y-%m-%d")
            .map_err(|e| MatrixError::Config(format!("invalid start_time: {e}")))?;
        Ok(date
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc()
            .timestamp())
    }

    /// `round_time` summed to seconds, e.g. `"1h 30m"` -> 5400.
    pub fn round_time_secs(&self) -> MatrixResult<i64> {
        parse_interval(&self.round_time)
    }
}

/// Parse a `<int>{s|m|h|d}` interval string, summing each part.
fn parse_interval(spec: &str) -> MatrixResult<i64> {
    let mut total = 0i64;
    for part in spec.split_whitespace() {
        let (digits, unit) = part.split_at(
            part.find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| MatrixError::Config(format!("invalid round_time part: {part}")))?,
        );
        let n: i64 = digits
            .parse()
            .map_err(|_| MatrixError::Config(format!("invalid round_time part: {part}")))?;
        let mult = match unit {
            "s" => 1,
            "m" => 60,
            "h" => 3_600,
            "d" => 86_400,
            other => {
                return Err(MatrixError::Config(format!(
                    "unknown round_time unit {other:?} in {part:?}"
                )))
            }
        };
        total += n * mult;
    }
    Ok(total)
}

/// Expand `$VAR` and `${VAR}` references against the process environment.
/// Unset variables are left untouched (mirrors typical shell behaviour
/// for defensive configs rather than erroring on a missing var).
fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        let braced = chars.peek() == Some(&'{');
        if braced {
            chars.next();
        }
        let mut name = String::new();
        while let Some(&c) = chars.peek() {
            if braced {
                if c == '}' {
                    chars.next();
                    break;
                }
            } else if !(c.is_alphanumeric() || c == '_') {
                break;
            }
            name.push(c);
            chars.next();
        }
        match std::env::var(&name) {
            Ok(val) => out.push_str(&val),
            Err(_) => {
                out.push('$');
                if braced {
                    out.push('{');
                    out.push_str(&name);
                    out.push('}');
                } else {
                    out.push_str(&name);
                }
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_interval() {
        assert_eq!(parse_interval("1h 30m").unwrap(), 5400);
        assert_eq!(parse_interval("90s").unwrap(), 90);
        assert_eq!(parse_interval("1d").unwrap(), 86_400);
    }

    #[test]
    fn rejects_unknown_unit() {
        assert!(parse_interval("5x").is_err());
    }

    #[test]
    fn expands_braced_and_bare_vars() {
        std::env::set_var("MATRIX_TEST_VAR", "value");
        assert_eq!(expand_env("pre-${MATRIX_TEST_VAR}-post"), "pre-value-post");
        assert_eq!(expand_env("$MATRIX_TEST_VAR/tail"), "value/tail");
        assert_eq!(expand_env("$MATRIX_DOES_NOT_EXIST"), "$MATRIX_DOES_NOT_EXIST");
    }
}
