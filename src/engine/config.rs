//! Layered, dotted-key configuration namespace backed by TOML.
//!
//! The engine only ever consumes two shapes of lookup: a single dotted-key value,
//! optionally scoped by a component and profile, and a subset of keys sharing a prefix
//! (used e.g. to enumerate all hosts under `remote.<name>`). A real deployment loads this
//! from a file on disk; tests and the `osh` demo binary build it in memory.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use toml::Value as TomlValue;
use tracing::debug;

use super::error::EngineError;

/// A flattened, dotted-key configuration namespace.
#[derive(Debug, Clone, Default)]
pub struct Config {
    entries: BTreeMap<String, String>,
}

impl Config {
    /// Parse a TOML document into a dotted-key namespace.
    pub fn from_toml_str(text: &str) -> Result<Config, EngineError> {
        let parsed: TomlValue = toml::from_str(text).map_err(|e| EngineError::Config(e.to_string()))?;
        let mut entries = BTreeMap::new();
        flatten(&parsed, String::new(), &mut entries);
        Ok(Config { entries })
    }

    /// Load and parse a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config, EngineError> {
        let path = path.as_ref();
        debug!(path = %path.display(), "loading configuration");
        let text = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("{}: {e}", path.display())))?;
        Config::from_toml_str(&text)
    }

    /// Set a single dotted-key value directly (used by tests and the CLI's `-D` flag).
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.entries.insert(key.into(), value.into());
    }

    /// Look up `component.profile.key`, falling back to `component.key` when `profile`
    /// is `None`, and to the component's default profile (`config_value(component)`)
    /// when the direct key is absent.
    pub fn value(&self, component: &str, profile: Option<&str>, key: &str) -> Option<String> {
        if let Some(profile) = profile {
            let scoped = format!("{component}.{profile}.{key}");
            if let Some(v) = self.entries.get(&scoped) {
                return Some(v.clone());
            }
        }
        let direct = format!("{component}.{key}");
        if let Some(v) = self.entries.get(&direct) {
            return Some(v.clone());
        }
        if profile.is_none() {
            if let Some(default_profile) = self.entries.get(&format!("{component}.default")) {
                let scoped = format!("{component}.{default_profile}.{key}");
                return self.entries.get(&scoped).cloned();
            }
        }
        None
    }

    /// Every entry whose key starts with `prefix.`, with the prefix stripped.
    pub fn subset(&self, prefix: &str) -> BTreeMap<String, String> {
        let needle = format!("{prefix}.");
        self.entries
            .iter()
            .filter_map(|(k, v)| k.strip_prefix(&needle).map(|rest| (rest.to_string(), v.clone())))
            .collect()
    }
}

fn flatten(value: &TomlValue, prefix: String, out: &mut BTreeMap<String, String>) {
    match value {
        TomlValue::Table(table) => {
            for (k, v) in table {
                let key = if prefix.is_empty() { k.clone() } else { format!("{prefix}.{k}") };
                flatten(v, key, out);
            }
        }
        TomlValue::String(s) => {
            out.insert(prefix, s.clone());
        }
        TomlValue::Array(items) => {
            let joined = items
                .iter()
                .map(|i| scalar_to_string(i))
                .collect::<Vec<_>>()
                .join(",");
            out.insert(prefix, joined);
        }
        other => {
            out.insert(prefix, scalar_to_string(other));
        }
    }
}

fn scalar_to_string(value: &TomlValue) -> String {
    match value {
        TomlValue::String(s) => s.clone(),
        TomlValue::Integer(i) => i.to_string(),
        TomlValue::Float(f) => f.to_string(),
        TomlValue::Boolean(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_lookup_with_profile_and_default() {
        let config = Config::from_toml_str(
            r#"
            [remote.build]
            user = "ubuntu"
            hosts = "a, b"

            [db]
            default = "prod"

            [db.prod]
            host = "prod-db"
            "#,
        )
        .unwrap();
        assert_eq!(config.value("remote.build", None, "user").as_deref(), Some("ubuntu"));
        assert_eq!(config.value("db", None, "host").as_deref(), Some("prod-db"));
        assert!(config.value("db", None, "missing").is_none());
    }

    #[test]
    fn subset_strips_prefix() {
        let config = Config::from_toml_str(
            r#"
            [remote.build]
            user = "ubuntu"
            hosts = "a"
            "#,
        )
        .unwrap();
        let subset = config.subset("remote.build");
        assert_eq!(subset.get("user").map(String::as_str), Some("ubuntu"));
    }
}
