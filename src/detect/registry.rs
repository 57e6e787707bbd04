use std::collections::HashMap;

use anyhow::{anyhow, Result};

use super::backend::{BackendCapability, BackendDescriptor};

/// Registry of backend descriptors, keyed by name.
pub struct BackendRegistry {
    descriptors: HashMap<String, BackendDescriptor>,
    default_name: Option<String>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
            default_name: None,
        }
    }

    /// Registry holding the built-in presets, with `ultralytics` as default.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(BackendDescriptor::ultralytics());
        registry.register(BackendDescriptor::yolov8());
        registry.register(BackendDescriptor::live());
        registry
    }

    /// Register a descriptor. The first registered descriptor becomes the default.
    pub fn register(&mut self, descriptor: BackendDescriptor) {
        let name = descriptor.name.clone();
        if self.default_name.is_none() {
            self.default_name = Some(name.clone());
        }
        self.descriptors.insert(name, descriptor);
    }

    /// Set default descriptor by name.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if !self.descriptors.contains_key(name) {
            return Err(anyhow!("backend '{}' not registered", name));
        }
        self.default_name = Some(name.to_string());
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&BackendDescriptor> {
        self.descriptors.get(name)
    }

    pub fn default_descriptor(&self) -> Option<&BackendDescriptor> {
        self.default_name.as_ref().and_then(|name| self.get(name))
    }

    /// List registered names, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut names: Vec<String> = self.descriptors.keys().cloned().collect();
        names.sort();
        names
    }

    /// Select a descriptor that supports the requested capability.
    ///
    /// Prefers the default descriptor when it supports the capability.
    pub fn descriptor_for_capability(
        &self,
        capability: BackendCapability,
    ) -> Result<&BackendDescriptor> {
        if let Some(default) = self.default_descriptor() {
            if default.supports(capability) {
                return Ok(default);
            }
        }
        let mut names = self.list().into_iter();
        names
            .find_map(|name| {
                self.descriptors
                    .get(&name)
                    .filter(|descriptor| descriptor.supports(capability))
            })
            .ok_or_else(|| {
                anyhow!(
                    "no registered backend supports capability {:?}",
                    capability
                )
            })
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}
