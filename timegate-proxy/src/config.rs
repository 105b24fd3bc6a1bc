//! Configuration for the federation proxy
//!
//! Loaded from a YAML file. Parsing is strict: unknown keys anywhere in the
//! file are rejected, so a typo cannot silently drop a backend.

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::Path;

use timegate_core::time::duration_serde;
use timegate_core::{GateError, GateResult};

/// Top-level proxy configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxyConfig {
    /// Address to bind the HTTP server to.
    #[serde(default = "default_listen", skip_serializing_if = "is_default_listen")]
    pub listen: String,

    /// The logical databases this proxy serves.
    #[serde(default)]
    pub databases: Vec<DatabaseConfig>,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        ProxyConfig {
            listen: default_listen(),
            databases: Vec::new(),
        }
    }
}

fn default_listen() -> String {
    "0.0.0.0:8086".to_string()
}

fn is_default_listen(s: &String) -> bool {
    *s == default_listen()
}

/// One logical database: a set of retention-tiered primaries plus a set of
/// aggregation servers. Either side may be empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub name: String,

    /// Retention-tiered primary backends, order-independent on disk.
    #[serde(default, rename = "influxes", skip_serializing_if = "Vec::is_empty")]
    pub primaries: Vec<TierConfig>,

    /// Aggregation servers.
    #[serde(default, rename = "scotties", skip_serializing_if = "Vec::is_empty")]
    pub aggregators: Vec<AggregatorConfig>,
}

/// One retention-tiered primary backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TierConfig {
    /// Backend endpoint, e.g. `http://somehost:8086`.
    #[serde(rename = "hostAndPort")]
    pub host_and_port: String,

    /// Length of this backend's retention window; strictly positive.
    #[serde(with = "duration_serde")]
    pub duration: Duration,

    /// The backend-side database to query.
    pub database: String,
}

/// An aggregation server. Exactly one of the three fields may be set:
/// a direct endpoint, a set of disjoint shards whose aggregates must be
/// recomposed, or a plain group of further aggregation servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct AggregatorConfig {
    #[serde(
        default,
        rename = "hostAndPort",
        skip_serializing_if = "Option::is_none"
    )]
    pub host_and_port: Option<String>,

    /// Disjoint shards requiring aggregate recomposition.
    #[serde(default, rename = "partials", skip_serializing_if = "Vec::is_empty")]
    pub shards: Vec<AggregatorConfig>,

    /// Plain group members.
    #[serde(default, rename = "scotties", skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AggregatorConfig>,
}

/// The resolved mode of an aggregation-server entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregatorMode<'a> {
    Direct(&'a str),
    Sharded(&'a [AggregatorConfig]),
    Group(&'a [AggregatorConfig]),
}

impl AggregatorConfig {
    /// Resolve which of the three mutually exclusive modes this entry is
    /// in. Zero or more than one populated field is a configuration error.
    pub fn mode(&self) -> GateResult<AggregatorMode<'_>> {
        let mut modes = Vec::with_capacity(1);
        if let Some(endpoint) = &self.host_and_port {
            modes.push(AggregatorMode::Direct(endpoint.as_str()));
        }
        if !self.shards.is_empty() {
            modes.push(AggregatorMode::Sharded(&self.shards));
        }
        if !self.children.is_empty() {
            modes.push(AggregatorMode::Group(&self.children));
        }
        match modes.len() {
            1 => Ok(modes[0]),
            0 => Err(GateError::Config(
                "aggregation server needs one of hostAndPort, partials, or scotties".to_string(),
            )),
            _ => Err(GateError::Config(
                "aggregation server may set only one of hostAndPort, partials, or scotties"
                    .to_string(),
            )),
        }
    }

    fn validate(&self) -> GateResult<()> {
        match self.mode()? {
            AggregatorMode::Direct(_) => Ok(()),
            AggregatorMode::Sharded(members) | AggregatorMode::Group(members) => {
                for member in members {
                    member.validate()?;
                }
                Ok(())
            }
        }
    }
}

impl ProxyConfig {
    /// Parse configuration from YAML text.
    pub fn from_yaml(text: &str) -> GateResult<ProxyConfig> {
        let config: ProxyConfig =
            serde_yaml::from_str(text).map_err(|e| GateError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> GateResult<ProxyConfig> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Structural validation beyond what serde enforces.
    pub fn validate(&self) -> GateResult<()> {
        let mut seen = std::collections::HashSet::new();
        for db in &self.databases {
            if db.name.is_empty() {
                return Err(GateError::Config("database name cannot be empty".to_string()));
            }
            if !seen.insert(db.name.as_str()) {
                return Err(GateError::Config(format!(
                    "duplicate database name: {}",
                    db.name
                )));
            }
            for tier in &db.primaries {
                if tier.host_and_port.is_empty() {
                    return Err(GateError::Config(format!(
                        "database '{}' has a primary without an endpoint",
                        db.name
                    )));
                }
                if tier.duration <= Duration::zero() {
                    return Err(GateError::Config(format!(
                        "database '{}' has a primary with a non-positive retention",
                        db.name
                    )));
                }
            }
            for aggregator in &db.aggregators {
                aggregator.validate()?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
databases:
  - name: metrics
    influxes:
      - hostAndPort: http://alpha:8086
        duration: 100h
        database: a
      - hostAndPort: http://bravo:8086
        duration: 10h
        database: b
    scotties:
      - hostAndPort: http://delta:8086
      - partials:
          - hostAndPort: http://echo:8086
          - hostAndPort: http://foxtrot:8086
      - scotties:
          - hostAndPort: http://golf:8086
"#;

    #[test]
    fn test_parse_sample() {
        let config = ProxyConfig::from_yaml(SAMPLE).unwrap();
        assert_eq!(config.databases.len(), 1);
        let db = &config.databases[0];
        assert_eq!(db.name, "metrics");
        assert_eq!(db.primaries.len(), 2);
        assert_eq!(db.primaries[0].duration, Duration::hours(100));
        assert_eq!(db.primaries[0].database, "a");
        assert_eq!(db.aggregators.len(), 3);
        assert!(matches!(
            db.aggregators[0].mode().unwrap(),
            AggregatorMode::Direct("http://delta:8086")
        ));
        assert!(matches!(
            db.aggregators[1].mode().unwrap(),
            AggregatorMode::Sharded(s) if s.len() == 2
        ));
        assert!(matches!(
            db.aggregators[2].mode().unwrap(),
            AggregatorMode::Group(c) if c.len() == 1
        ));
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let bad = "databases:\n  - name: x\n    retention: 5h\n";
        assert!(ProxyConfig::from_yaml(bad).is_err());

        let bad = "databases:\n  - name: x\n    influxes:\n      - hostAndPort: http://a\n        duration: 1h\n        database: d\n        shard: 3\n";
        assert!(ProxyConfig::from_yaml(bad).is_err());
    }

    #[test]
    fn test_duplicate_database_name_rejected() {
        let bad = "databases:\n  - name: x\n  - name: x\n";
        let err = ProxyConfig::from_yaml(bad).unwrap_err();
        assert!(err.to_string().contains("duplicate database name"));
    }

    #[test]
    fn test_aggregator_mode_exclusivity() {
        let none = AggregatorConfig::default();
        assert!(none.mode().is_err());

        let both = AggregatorConfig {
            host_and_port: Some("http://a".to_string()),
            shards: vec![AggregatorConfig {
                host_and_port: Some("http://b".to_string()),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(both.mode().is_err());
    }

    #[test]
    fn test_non_positive_duration_rejected() {
        let bad = "databases:\n  - name: x\n    influxes:\n      - hostAndPort: http://a\n        duration: 0s\n        database: d\n";
        assert!(ProxyConfig::from_yaml(bad).is_err());
    }

    #[test]
    fn test_empty_database_is_valid() {
        let config = ProxyConfig::from_yaml("databases:\n  - name: nothing\n").unwrap();
        assert!(config.databases[0].primaries.is_empty());
        assert!(config.databases[0].aggregators.is_empty());
    }
}
