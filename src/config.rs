//! Engine configuration.

use crate::error::ConfigError;
use crate::types::{SearchStrategy, StoragePolicy};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Tunables for a fault-injection run. Every field has a default, so a
/// partial JSON object is a valid configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub search_strategy: SearchStrategy,
    /// Total iterations, the reference iteration included.
    pub max_iterations: usize,
    /// Skip candidates on calls that duplicate an earlier identical call.
    pub avoid_redundant_injections: bool,
    /// Fold the fault-scope token into every index frame.
    pub scope_counter: bool,
    /// Hash index frame components instead of embedding them raw.
    pub digest_components: bool,
    pub storage_policy: StoragePolicy,
    /// Iterations running longer than this are recorded as failures.
    pub iteration_timeout_ms: Option<u64>,
    /// Stop the run after the first failing fault iteration.
    pub abort_on_first_failure: bool,
    /// Fail an otherwise passing iteration in which a call failed without
    /// an injected fault.
    pub fail_on_organic_failures: bool,
    /// Never inject at a call that already failed on its own in the
    /// reference iteration.
    pub avoid_injections_on_organic_failures: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            search_strategy: SearchStrategy::BreadthFirst,
            max_iterations: 99,
            avoid_redundant_injections: false,
            scope_counter: false,
            digest_components: true,
            storage_policy: StoragePolicy::PerRequest,
            iteration_timeout_ms: None,
            abort_on_first_failure: false,
            fail_on_organic_failures: false,
            avoid_injections_on_organic_failures: false,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::Malformed("max_iterations must be at least 1".into()));
        }
        if let SearchStrategy::SingleTarget(method) = &self.search_strategy {
            if method.is_empty() {
                return Err(ConfigError::Malformed("single_target needs a method name".into()));
            }
        }
        Ok(())
    }

    pub fn iteration_timeout(&self) -> Option<Duration> {
        self.iteration_timeout_ms.map(Duration::from_millis)
    }
}
