use crate::dei::ExecutionIndex;
use crate::primitives::Payload;
use std::collections::HashMap;

/// A remote call that repeats an earlier identical call in the same iteration.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct RedundancyWarning {
    pub method: String,
    pub index: ExecutionIndex,
    /// The earlier call it repeats.
    pub duplicate_of: ExecutionIndex,
}

impl std::fmt::Display for RedundancyWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "redundant call to {} at {} (repeats {})", self.method, self.index, self.duplicate_of)
    }
}

/// Flags calls that repeat an earlier call with the same site, arguments
/// and response.
///
/// Two calls are equivalent only when the innermost frame has the same
/// scope and signature, the arguments are identical, and both returned the
/// same response. Failed calls are never compared: their outcome may come
/// from an injected fault.
#[derive(Debug, Default)]
pub struct RedundancyAnalyzer {
    first_seen: HashMap<(String, String, String), ExecutionIndex>,
    warnings: Vec<RedundancyWarning>,
}

impl RedundancyAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a completed call. Returns the warning when it repeats an
    /// earlier one.
    pub fn observe(
        &mut self,
        index: &ExecutionIndex,
        method: &str,
        arguments: &Payload,
        response: &Payload,
    ) -> Option<RedundancyWarning> {
        let site = index.scoped_signature_projection()?;
        let key = (site, arguments.canonical(), response.canonical());
        match self.first_seen.get(&key) {
            Some(original) if original != index => {
                let warning = RedundancyWarning {
                    method: method.to_string(),
                    index: index.clone(),
                    duplicate_of: original.clone(),
                };
                tracing::warn!(method, index = %index, "redundant remote call");
                self.warnings.push(warning.clone());
                Some(warning)
            }
            Some(_) => None,
            None => {
                self.first_seen.insert(key, index.clone());
                None
            }
        }
    }

    pub fn warnings(&self) -> &[RedundancyWarning] {
        &self.warnings
    }

    pub fn take_warnings(&mut self) -> Vec<RedundancyWarning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn reset(&mut self) {
        self.first_seen.clear();
        self.warnings.clear();
    }
}
