use crate::model::{ProtocolDefinition, ProtocolKey};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub protocol: Arc<ProtocolDefinition>,
    pub digest: String,
    pub source: Option<PathBuf>,
}

/// Loaded protocols keyed by `(id, version)`.
///
/// Owned by a [`super::ProtocolLoader`]; entries only change through `put` and
/// `invalidate`.
#[derive(Debug, Default, Clone)]
pub struct ProtocolCache {
    entries: BTreeMap<ProtocolKey, CacheEntry>,
}

impl ProtocolCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &ProtocolKey) -> Option<Arc<ProtocolDefinition>> {
        self.entries.get(key).map(|e| Arc::clone(&e.protocol))
    }

    pub fn entry(&self, key: &ProtocolKey) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn put(
        &mut self,
        protocol: ProtocolDefinition,
        digest: String,
        source: Option<PathBuf>,
    ) -> Arc<ProtocolDefinition> {
        let protocol = Arc::new(protocol);
        self.entries.insert(
            protocol.key(),
            CacheEntry {
                protocol: Arc::clone(&protocol),
                digest,
                source,
            },
        );
        protocol
    }

    pub fn invalidate(&mut self, key: &ProtocolKey) -> Option<CacheEntry> {
        self.entries.remove(key)
    }

    /// Drop the entry that was loaded from `path`, if any.
    pub fn invalidate_source(&mut self, path: &std::path::Path) -> Option<CacheEntry> {
        let key = self
            .entries
            .iter()
            .find(|(_, e)| e.source.as_deref() == Some(path))
            .map(|(k, _)| k.clone())?;
        self.entries.remove(&key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &ProtocolKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
