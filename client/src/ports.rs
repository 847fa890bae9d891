//! Capability ports the host platform provides.
//!
//! The core never touches platform services directly. Each service is a
//! small trait; production wiring injects the platform implementation
//! (keychain-backed storage, OS HTTP stack), tests inject fakes.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::error::Result;

/// Encrypted key-value store port.
///
/// Backed by the platform keychain or an encrypted database. The store
/// guarantees atomic whole-value writes and a single writer per key; the
/// client never issues concurrent writes to one key.
#[async_trait]
pub trait SecureVault: Send + Sync {
    /// Read a value, `None` if the key is absent.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value atomically, replacing any previous one.
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Delete a key; deleting an absent key is a no-op.
    async fn delete(&self, key: &str) -> Result<()>;
}

/// In-memory vault for tests and hosts without a platform store.
#[derive(Default, Clone)]
pub struct MemoryVault {
    entries: Arc<DashMap<String, Vec<u8>>>,
}

impl MemoryVault {
    /// Create an empty vault.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the vault is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl SecureVault for MemoryVault {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.remove(key);
        Ok(())
    }
}
