//! Worker identities, host descriptors, and cluster resolution.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::config::Config;
use super::error::EngineError;

/// An immutable record identifying one remote execution target.
///
/// Everything but `schema` is fixed at construction time; `schema` may be set once the
/// database profile (if any) has been resolved against configuration, mirroring the
/// source's treatment of a host's schema as the one mutable field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// Short name used for display and cluster membership pattern matching.
    pub name: String,
    /// Network address or hostname passed to `ssh`.
    pub address: String,
    /// Remote login user.
    pub user: String,
    /// Optional path to an SSH identity (private key) file.
    pub identity_file: Option<String>,
    /// Optional database profile name, appended to the `remoteosh` invocation.
    pub db_profile: Option<String>,
    /// Optional schema, resolved lazily and the only mutable field.
    pub schema: Option<String>,
}

impl HostDescriptor {
    /// Set the resolved schema, returning the updated descriptor.
    pub fn with_schema(mut self, schema: impl Into<String>) -> HostDescriptor {
        self.schema = Some(schema.into());
        self
    }
}

impl fmt::Display for HostDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.address)
    }
}

/// The tag attached to every emitted tuple from a fork worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerIdentity {
    /// `0..N-1` identity assigned when `thread_gen` was an integer count.
    Index(u32),
    /// An arbitrary label, used when `thread_gen` was a finite sequence of strings.
    Label(String),
    /// A cluster host, used when `thread_gen` resolved to host descriptors.
    Host(HostDescriptor),
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerIdentity::Index(i) => write!(f, "{i}"),
            WorkerIdentity::Label(l) => write!(f, "{l}"),
            WorkerIdentity::Host(h) => write!(f, "{h}"),
        }
    }
}

impl From<WorkerIdentity> for super::value::Value {
    fn from(id: WorkerIdentity) -> Self {
        match id {
            WorkerIdentity::Index(i) => super::value::Value::Int(i as i64),
            WorkerIdentity::Label(l) => super::value::Value::Str(l),
            WorkerIdentity::Host(h) => super::value::Value::Host(h),
        }
    }
}

/// A named, ordered list of host descriptors, resolved against configuration.
///
/// Cluster definitions live under `remote.<name>.{user, identity, hosts}` in the
/// configuration namespace (see [`Config`]); a lookup may additionally filter hosts by a
/// substring pattern, e.g. `name:pattern` in the fork `thread_gen` grammar.
#[derive(Debug, Clone)]
pub struct Cluster {
    /// Cluster name, as it appears in configuration and in `thread_gen` strings.
    pub name: String,
    /// Ordered host descriptors, in configuration order.
    pub hosts: Vec<HostDescriptor>,
}

impl Cluster {
    /// Resolve a cluster by name from configuration.
    ///
    /// Expects `remote.<name>.user`, `remote.<name>.hosts` (a comma-separated address
    /// list), and optionally `remote.<name>.identity`.
    pub fn resolve(config: &Config, name: &str) -> Result<Cluster, EngineError> {
        let prefix = format!("remote.{name}");
        let user = config
            .value(&prefix, None, "user")
            .ok_or_else(|| EngineError::UnknownCluster(name.to_string()))?;
        let identity = config.value(&prefix, None, "identity");
        let hosts_csv = config
            .value(&prefix, None, "hosts")
            .ok_or_else(|| EngineError::UnknownCluster(name.to_string()))?;
        let hosts = hosts_csv
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|address| HostDescriptor {
                name: address.to_string(),
                address: address.to_string(),
                user: user.clone(),
                identity_file: identity.clone(),
                db_profile: None,
                schema: None,
            })
            .collect();
        Ok(Cluster { name: name.to_string(), hosts })
    }

    /// Filter the cluster's hosts by a substring pattern over the host's name/address.
    pub fn matching(&self, pattern: Option<&str>) -> Vec<HostDescriptor> {
        match pattern {
            None => self.hosts.clone(),
            Some(p) => self
                .hosts
                .iter()
                .filter(|h| h.name.contains(p) || h.address.contains(p))
                .cloned()
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_resolves_and_filters() {
        let mut config = Config::default();
        config.set("remote.build.user", "ubuntu");
        config.set("remote.build.hosts", "build-01, build-02, stage-01");
        let cluster = Cluster::resolve(&config, "build").expect("cluster");
        assert_eq!(cluster.hosts.len(), 3);
        assert_eq!(cluster.matching(Some("build-")).len(), 2);
        assert_eq!(cluster.matching(None).len(), 3);
    }

    #[test]
    fn unknown_cluster_errors() {
        let config = Config::default();
        assert!(Cluster::resolve(&config, "nope").is_err());
    }
}
