// Queue Kinds

use super::error::DomainError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Closed set of queue implementations, selected by type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueKind {
    /// In-memory buffer only
    Channel,
    /// Every push persisted to the local store
    Level,
    /// Every push persisted to the remote list store
    Redis,
    /// In-memory fast path, persisted across shutdown
    PersistableChannel,
    UniqueChannel,
    UniqueLevel,
    UniqueRedis,
    UniquePersistableChannel,
}

impl QueueKind {
    pub const ALL: [QueueKind; 8] = [
        QueueKind::Channel,
        QueueKind::Level,
        QueueKind::Redis,
        QueueKind::PersistableChannel,
        QueueKind::UniqueChannel,
        QueueKind::UniqueLevel,
        QueueKind::UniqueRedis,
        QueueKind::UniquePersistableChannel,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueKind::Channel => "channel",
            QueueKind::Level => "level",
            QueueKind::Redis => "redis",
            QueueKind::PersistableChannel => "persistable-channel",
            QueueKind::UniqueChannel => "unique-channel",
            QueueKind::UniqueLevel => "unique-level",
            QueueKind::UniqueRedis => "unique-redis",
            QueueKind::UniquePersistableChannel => "unique-persistable-channel",
        }
    }

    pub fn is_unique(&self) -> bool {
        matches!(
            self,
            QueueKind::UniqueChannel
                | QueueKind::UniqueLevel
                | QueueKind::UniqueRedis
                | QueueKind::UniquePersistableChannel
        )
    }

    /// Backed by the local on-disk store
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            QueueKind::Level
                | QueueKind::UniqueLevel
                | QueueKind::PersistableChannel
                | QueueKind::UniquePersistableChannel
        )
    }

    /// Backed by the remote list store
    pub fn is_remote(&self) -> bool {
        matches!(self, QueueKind::Redis | QueueKind::UniqueRedis)
    }

    /// The unique counterpart of this kind
    pub fn to_unique(self) -> Self {
        match self {
            QueueKind::Channel => QueueKind::UniqueChannel,
            QueueKind::Level => QueueKind::UniqueLevel,
            QueueKind::Redis => QueueKind::UniqueRedis,
            QueueKind::PersistableChannel => QueueKind::UniquePersistableChannel,
            unique => unique,
        }
    }
}

impl std::fmt::Display for QueueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueueKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag = s.trim().to_ascii_lowercase();
        QueueKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == tag)
            .ok_or_else(|| DomainError::UnknownQueueKind(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tags_round_trip_through_from_str() {
        for kind in QueueKind::ALL {
            assert_eq!(kind.as_str().parse::<QueueKind>().unwrap(), kind);
        }
    }

    #[test]
    fn test_unknown_tag() {
        let err = "leveldb".parse::<QueueKind>().unwrap_err();
        assert_eq!(err, DomainError::UnknownQueueKind("leveldb".to_string()));
    }

    #[test]
    fn test_serde_uses_type_tags() {
        let kind: QueueKind = serde_json::from_str("\"unique-persistable-channel\"").unwrap();
        assert_eq!(kind, QueueKind::UniquePersistableChannel);
        assert!(kind.is_unique());
        assert!(kind.is_local());
        assert_eq!(QueueKind::Redis.to_unique(), QueueKind::UniqueRedis);
    }
}
