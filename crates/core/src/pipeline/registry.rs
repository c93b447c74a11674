// crates/core/src/pipeline/registry.rs
//! Named pipelines, resolved by the capability string in a start request.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use super::Pipeline;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Unknown capability: {0}")]
    Unknown(String),

    #[error("Capability already registered: {0}")]
    Duplicate(String),
}

#[derive(Clone, Default)]
pub struct PipelineRegistry {
    pipelines: HashMap<String, Arc<dyn Pipeline>>,
}

impl PipelineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        capability: impl Into<String>,
        pipeline: Arc<dyn Pipeline>,
    ) -> Result<(), RegistryError> {
        let capability = capability.into();
        if self.pipelines.contains_key(&capability) {
            return Err(RegistryError::Duplicate(capability));
        }
        self.pipelines.insert(capability, pipeline);
        Ok(())
    }

    pub fn get(&self, capability: &str) -> Result<Arc<dyn Pipeline>, RegistryError> {
        self.pipelines
            .get(capability)
            .cloned()
            .ok_or_else(|| RegistryError::Unknown(capability.to_string()))
    }

    /// Registered capability names, sorted.
    pub fn capabilities(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.pipelines.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
