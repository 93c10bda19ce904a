//! In-memory module registry.

use std::path::PathBuf;

use async_trait::async_trait;
use dashmap::DashMap;

use modweave_protocols::{ModuleDefinition, ModuleLoader, ProtocolError};

/// Concurrent in-process [`ModuleLoader`]. Search paths are ignored.
#[derive(Debug, Default)]
pub struct MemoryModuleLoader {
    modules: DashMap<String, ModuleDefinition>,
}

impl MemoryModuleLoader {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a module, builder style.
    pub fn with_module(self, module: ModuleDefinition) -> Self {
        self.register(module);
        self
    }

    /// Register a module, returning the definition it replaced.
    pub fn register(&self, module: ModuleDefinition) -> Option<ModuleDefinition> {
        self.modules.insert(module.name.clone(), module)
    }

    /// Remove a module by name.
    pub fn remove(&self, name: &str) -> Option<ModuleDefinition> {
        self.modules.remove(name).map(|(_, module)| module)
    }

    pub fn get(&self, name: &str) -> Option<ModuleDefinition> {
        self.modules.get(name).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// Registered module names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[async_trait]
impl ModuleLoader for MemoryModuleLoader {
    async fn find_module(
        &self,
        name: &str,
        _search_paths: &[PathBuf],
    ) -> Result<Option<ModuleDefinition>, ProtocolError> {
        Ok(self.get(name))
    }
}
