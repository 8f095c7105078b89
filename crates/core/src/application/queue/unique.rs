// In-memory Membership Set for unique queues
// Identities are the encoded item bytes

use std::collections::HashSet;
use std::sync::Mutex;

/// Identities currently queued and not yet dequeued
#[derive(Debug, Default)]
pub struct MembershipSet {
    members: Mutex<HashSet<Vec<u8>>>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an identity; `false` if it was already a member
    pub fn insert(&self, identity: &[u8]) -> bool {
        self.lock().insert(identity.to_vec())
    }

    pub fn remove(&self, identity: &[u8]) -> bool {
        self.lock().remove(identity)
    }

    pub fn contains(&self, identity: &[u8]) -> bool {
        self.lock().contains(identity)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<Vec<u8>>> {
        self.members.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_exclusive_until_removed() {
        let set = MembershipSet::new();
        assert!(set.insert(b"\"A\""));
        assert!(!set.insert(b"\"A\""));
        assert!(set.contains(b"\"A\""));
        assert_eq!(set.len(), 1);

        assert!(set.remove(b"\"A\""));
        assert!(set.is_empty());
        assert!(set.insert(b"\"A\""));
    }
}
