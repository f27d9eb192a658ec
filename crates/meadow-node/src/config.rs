//! Cluster and per-node configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use meadow_protocol::{NodeClass, NodeId, ProtocolConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration of a whole cluster run by one process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cluster size N.
    pub nodes: usize,

    /// Base seed; node `i` uses `seed + i`. Entropy when unset.
    pub seed: Option<u64>,

    /// Per-node class override, indexed by node id. Nodes without an entry
    /// flip a coin at startup.
    pub classes: Vec<NodeClass>,

    /// Directory for `process_<id>.csv` audit trails.
    pub audit_dir: Option<PathBuf>,

    /// Protocol parameters shared by every node.
    pub protocol: ProtocolConfig,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            nodes: 3,
            seed: None,
            classes: Vec::new(),
            audit_dir: None,
            protocol: ProtocolConfig::default(),
        }
    }
}

impl ClusterConfig {
    /// Create config from environment variables with defaults.
    ///
    /// Reads `MEADOW_NODES`, `MEADOW_SEED`, `MEADOW_AUDIT_DIR` and
    /// `MEADOW_IDLE_UNIT_MS`.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(nodes) = env_parse::<usize>("MEADOW_NODES")? {
            config.nodes = nodes;
        }
        config.seed = env_parse::<u64>("MEADOW_SEED")?;
        config.audit_dir = std::env::var("MEADOW_AUDIT_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);
        if let Some(ms) = env_parse::<u64>("MEADOW_IDLE_UNIT_MS")? {
            config.protocol.idle_unit_ms = ms;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_nodes(mut self, nodes: usize) -> Self {
        self.nodes = nodes;
        self
    }

    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    #[must_use]
    pub fn with_classes(mut self, classes: Vec<NodeClass>) -> Self {
        self.classes = classes;
        self
    }

    #[must_use]
    pub fn with_audit_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.audit_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_protocol(mut self, protocol: ProtocolConfig) -> Self {
        self.protocol = protocol;
        self
    }

    #[must_use]
    pub fn with_idle_unit(mut self, unit: Duration) -> Self {
        self.protocol = self.protocol.with_idle_unit(unit);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.nodes == 0 {
            return Err(Error::Config("cluster needs at least one node".into()));
        }
        if NodeId::try_from(self.nodes).is_err() {
            return Err(Error::Config(format!("too many nodes: {}", self.nodes)));
        }
        if self.classes.len() > self.nodes {
            return Err(Error::Config(format!(
                "{} class overrides for {} nodes",
                self.classes.len(),
                self.nodes
            )));
        }
        self.protocol.validate()?;
        Ok(())
    }

    /// Configuration of node `id`.
    pub fn node(&self, id: NodeId) -> Result<NodeConfig> {
        if id as usize >= self.nodes {
            return Err(Error::Config(format!(
                "node {id} outside a cluster of {}",
                self.nodes
            )));
        }
        Ok(NodeConfig {
            id,
            cluster_size: self.nodes,
            class: self.classes.get(id as usize).copied(),
            seed: self.seed.map(|s| s.wrapping_add(u64::from(id))),
            audit_dir: self.audit_dir.clone(),
            protocol: self.protocol.clone(),
        })
    }

    /// Configuration of every node, in id order.
    pub fn node_configs(&self) -> Result<Vec<NodeConfig>> {
        (0..self.nodes as NodeId).map(|id| self.node(id)).collect()
    }
}

/// Configuration of a single node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub id: NodeId,
    pub cluster_size: usize,
    /// Fixed class, or `None` to flip a coin.
    pub class: Option<NodeClass>,
    pub seed: Option<u64>,
    pub audit_dir: Option<PathBuf>,
    pub protocol: ProtocolConfig,
}

impl NodeConfig {
    /// The node's random source.
    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }

    /// Configured class, or a fair coin drawn from `rng`.
    pub fn resolve_class(&self, rng: &mut StdRng) -> NodeClass {
        self.class.unwrap_or_else(|| NodeClass::random(rng))
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| Error::Config(format!("invalid {key}: {e}"))),
        Err(_) => Ok(None),
    }
}
