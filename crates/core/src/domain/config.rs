// Queue Configuration

use super::error::{DomainError, Result};
use super::kind::QueueKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Maximum length of a queue name
pub const MAX_QUEUE_NAME_LEN: usize = 64;

/// Full configuration of one queue.
///
/// Durations are written in milliseconds when (de)serialized, so a settings
/// file carries `boost_timeout = 300000` rather than a nested struct.
/// Every field has a default; see [`QueueConfig::default`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub name: String,

    /// Capacity of the in-memory buffer
    pub queue_length: usize,
    /// Maximum items per handler invocation
    pub batch_length: usize,
    /// Steady-state worker count
    pub workers: usize,
    /// Scale-up ceiling
    pub max_workers: usize,
    /// Workers added per boost
    pub boost_workers: usize,
    /// Sustained saturation before a boost, and calm period before it ends
    #[serde(with = "duration_ms")]
    pub boost_timeout: Duration,
    /// How long `push` waits for buffer space
    #[serde(with = "duration_ms")]
    pub block_timeout: Duration,

    // Backend-specific
    pub data_dir: Option<PathBuf>,
    pub connection_string: Option<String>,
    pub queue_key: Option<String>,
    pub set_key: Option<String>,

    // Fallback wrapping
    pub wrap_if_necessary: bool,
    #[serde(with = "duration_ms")]
    pub wrap_timeout: Duration,
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            queue_length: 20,
            batch_length: 20,
            workers: 1,
            max_workers: 10,
            boost_workers: 1,
            boost_timeout: Duration::from_secs(5 * 60),
            block_timeout: Duration::from_secs(1),
            data_dir: None,
            connection_string: None,
            queue_key: None,
            set_key: None,
            wrap_if_necessary: false,
            wrap_timeout: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl QueueConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Validate the parts of the configuration every queue kind relies on
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;

        if self.batch_length == 0 {
            return Err(invalid(format!(
                "queue '{}': batch_length must be at least 1",
                self.name
            )));
        }
        if self.queue_length == 0 {
            return Err(invalid(format!(
                "queue '{}': queue_length must be at least 1",
                self.name
            )));
        }
        if self.max_workers == 0 {
            return Err(invalid(format!(
                "queue '{}': max_workers must be at least 1",
                self.name
            )));
        }
        if self.workers > self.max_workers {
            return Err(invalid(format!(
                "queue '{}': workers ({}) exceeds max_workers ({})",
                self.name, self.workers, self.max_workers
            )));
        }
        Ok(())
    }

    /// Validate for a specific kind, including backend fields
    pub fn validate_for(&self, kind: QueueKind) -> Result<()> {
        self.validate()?;

        if kind.is_remote() {
            match self.connection_string.as_deref().map(str::trim) {
                Some(conn) if !conn.is_empty() => {}
                _ => {
                    return Err(invalid(format!(
                        "queue '{}': type '{}' requires a connection_string",
                        self.name, kind
                    )))
                }
            }
        }
        if kind.is_local() {
            if let Some(dir) = &self.data_dir {
                if dir.as_os_str().is_empty() {
                    return Err(invalid(format!(
                        "queue '{}': data_dir must not be empty",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Directory of the local store (`queues/<name>` unless configured)
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("queues").join(&self.name))
    }

    /// Key of the remote list (the queue name unless configured)
    pub fn queue_key(&self) -> String {
        self.queue_key.clone().unwrap_or_else(|| self.name.clone())
    }

    /// Key of the membership set for unique variants
    pub fn set_key(&self) -> String {
        self.set_key
            .clone()
            .unwrap_or_else(|| format!("{}_unique", self.queue_key()))
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            name: self.name.clone(),
            queue_length: self.queue_length,
            batch_length: self.batch_length,
            workers: self.workers,
            max_workers: self.max_workers,
            boost_workers: self.boost_workers,
            boost_timeout: self.boost_timeout,
            block_timeout: self.block_timeout,
        }
    }
}

/// The subset of [`QueueConfig`] a worker pool needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub name: String,
    pub queue_length: usize,
    pub batch_length: usize,
    pub workers: usize,
    pub max_workers: usize,
    pub boost_workers: usize,
    pub boost_timeout: Duration,
    pub block_timeout: Duration,
}

/// Runtime adjustment of a running pool; `None` keeps the current value
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolTuning {
    pub max_workers: Option<usize>,
    pub boost_workers: Option<usize>,
    pub boost_timeout: Option<Duration>,
    pub block_timeout: Option<Duration>,
}

fn invalid(msg: String) -> DomainError {
    DomainError::InvalidConfiguration(msg)
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(invalid("queue name cannot be empty".to_string()));
    }
    if name.len() > MAX_QUEUE_NAME_LEN {
        return Err(invalid(format!(
            "queue name too long ({} > {})",
            name.len(),
            MAX_QUEUE_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid(format!(
            "queue name must be alphanumeric (plus '-', '_', '.'): {}",
            name
        )));
    }
    Ok(())
}

/// Serde adapter: `Duration` as whole milliseconds
mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
