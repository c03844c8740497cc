//! In-memory client directory.
//!
//! Maps nicknames to the write half of the stream each client authenticated
//! on. Nicknames are not unique: a later registration overwrites an earlier
//! one. Each registration gets an [`OwnerId`] so that a stream closing late
//! cannot evict the entry of whoever registered the name after it.

use std::sync::atomic::{AtomicU64, Ordering};

use chat_core::PduWriter;
use dashmap::DashMap;

/// Identifies the stream handler that registered a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

#[derive(Debug)]
struct ClientEntry {
    owner: OwnerId,
    writer: PduWriter,
}

/// Nickname → stream directory.
#[derive(Debug, Default)]
pub struct Directory {
    clients: DashMap<String, ClientEntry>,
    next_owner: AtomicU64,
}

impl Directory {
    /// Create an empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `nickname`, replacing any existing entry.
    pub fn register(&self, nickname: &str, writer: PduWriter) -> OwnerId {
        let owner = OwnerId(self.next_owner.fetch_add(1, Ordering::Relaxed));
        let previous = self
            .clients
            .insert(nickname.to_string(), ClientEntry { owner, writer });

        if previous.is_some() {
            tracing::info!("Nickname {} re-registered, previous stream replaced", nickname);
        }
        tracing::debug!(
            "Registered {} (owner={:?}, total: {})",
            nickname,
            owner,
            self.clients.len()
        );
        owner
    }

    /// Remove `nickname` if it is still registered by `owner`.
    ///
    /// Returns whether an entry was removed.
    pub fn remove(&self, nickname: &str, owner: OwnerId) -> bool {
        let removed = self
            .clients
            .remove_if(nickname, |_, entry| entry.owner == owner)
            .is_some();

        if removed {
            tracing::debug!("Removed {} (total: {})", nickname, self.clients.len());
        }
        removed
    }

    /// Writer for `nickname`'s stream.
    pub fn lookup(&self, nickname: &str) -> Option<PduWriter> {
        self.clients.get(nickname).map(|entry| entry.writer.clone())
    }

    /// Whether `nickname` is registered.
    pub fn contains(&self, nickname: &str) -> bool {
        self.clients.contains_key(nickname)
    }

    /// Registered nicknames, sorted.
    pub fn nicknames(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Number of registered nicknames.
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no nicknames are registered.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn writer() -> PduWriter {
        let (tx, _rx) = tokio::io::duplex(64);
        PduWriter::new(tx)
    }

    #[tokio::test]
    async fn register_and_lookup() {
        let directory = Directory::new();
        let alice = writer();
        directory.register("alice", alice.clone());

        assert!(directory.contains("alice"));
        assert!(directory.lookup("alice").unwrap().same_stream(&alice));
        assert!(directory.lookup("bob").is_none());
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn nicknames_are_sorted() {
        let directory = Directory::new();
        for name in ["carol", "alice", "bob"] {
            directory.register(name, writer());
        }
        assert_eq!(directory.nicknames(), vec!["alice", "bob", "carol"]);
    }

    #[tokio::test]
    async fn duplicate_registration_overwrites() {
        let directory = Directory::new();
        let first = writer();
        let second = writer();

        directory.register("alice", first.clone());
        directory.register("alice", second.clone());

        assert_eq!(directory.len(), 1);
        let current = directory.lookup("alice").unwrap();
        assert!(current.same_stream(&second));
        assert!(!current.same_stream(&first));
    }

    #[tokio::test]
    async fn remove_is_owner_checked() {
        let directory = Directory::new();
        let stale = directory.register("alice", writer());
        let current = directory.register("alice", writer());
        assert_ne!(stale, current);

        // The replaced stream closing must not evict the new registration.
        assert!(!directory.remove("alice", stale));
        assert!(directory.contains("alice"));

        assert!(directory.remove("alice", current));
        assert!(directory.is_empty());
    }

    #[tokio::test]
    async fn remove_unknown_is_noop() {
        let directory = Directory::new();
        let owner = directory.register("alice", writer());
        assert!(!directory.remove("bob", owner));
        assert_eq!(directory.len(), 1);
    }

    #[tokio::test]
    async fn concurrent_registrations_are_all_visible() {
        let directory = Arc::new(Directory::new());
        let mut tasks = Vec::new();
        for i in 0..32 {
            let directory = directory.clone();
            tasks.push(tokio::spawn(async move {
                directory.register(&format!("user{i:02}"), writer());
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let names = directory.nicknames();
        assert_eq!(names.len(), 32);
        assert_eq!(names[0], "user00");
        assert_eq!(names[31], "user31");
    }
}
