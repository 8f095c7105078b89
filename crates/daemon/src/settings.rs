// Daemon Settings
// TOML file (SPOOL_CONFIG, default spool.toml) layered under SPOOL__* environment overrides

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use spool_core::domain::{QueueConfig, QueueKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_FILE: &str = "spool.toml";
pub const DEFAULT_QUEUE: &str = "default";
const DEFAULT_QUEUE_DIR: &str = "~/.spool/queues/default";
const ENV_PREFIX: &str = "SPOOL";

/// One `[queues.<name>]` table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: QueueKind,
    #[serde(flatten)]
    pub config: QueueConfig,
}

fn default_kind() -> QueueKind {
    QueueKind::PersistableChannel
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Queue the executable feeds
    pub queue: String,
    /// How long shutdown waits for queues to drain, in milliseconds
    pub flush_timeout_ms: u64,
    pub queues: BTreeMap<String, QueueSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            queue: DEFAULT_QUEUE.to_string(),
            flush_timeout_ms: 5_000,
            queues: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Load from `SPOOL_CONFIG` (or `spool.toml`) plus the environment
    pub fn load() -> Result<Self> {
        let path = std::env::var("SPOOL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
        Self::load_from(&path)
    }

    /// Load from `path` (optional) plus the environment
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = config::Config::builder()
            .add_source(
                config::File::from(path)
                    .required(false)
                    .format(config::FileFormat::Toml),
            )
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;

        let settings: Settings = config
            .try_deserialize()
            .context("Failed to deserialize settings")?;
        Ok(settings.resolve())
    }

    /// Fill names from table keys, expand `~`, and supply the default queue
    fn resolve(mut self) -> Self {
        if self.queues.is_empty() {
            self.queues.insert(DEFAULT_QUEUE.to_string(), default_queue());
        }
        for (name, queue) in self.queues.iter_mut() {
            if queue.config.name.is_empty() {
                queue.config.name = name.clone();
            }
            if let Some(dir) = &queue.config.data_dir {
                queue.config.data_dir = Some(expand(dir));
            }
        }
        self
    }

    pub fn queue_settings(&self, name: &str) -> Option<&QueueSettings> {
        self.queues.get(name)
    }

    pub fn flush_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.flush_timeout_ms)
    }
}

fn default_queue() -> QueueSettings {
    QueueSettings {
        kind: default_kind(),
        config: QueueConfig {
            data_dir: Some(PathBuf::from(DEFAULT_QUEUE_DIR)),
            ..QueueConfig::new(DEFAULT_QUEUE)
        },
    }
}

fn expand(dir: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&dir.to_string_lossy()).into_owned())
}
