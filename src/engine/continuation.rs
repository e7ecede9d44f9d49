//! Continuation helpers for assertions around fault-injected code.
//!
//! `execute_without_faults` establishes ground truth: calls inside it are
//! indexed but never faulted. `assert_on_fault` accepts a failure only when
//! a fault was injected inside it, and re-raises it otherwise. Both can be
//! nested; with the scope counter enabled, each nesting gives the same call
//! site a distinct execution index.

use crate::engine::core::FaultEngine;
use crate::error::EngineError;
use crate::scope::ScopeKind;

#[derive(Debug, thiserror::Error)]
pub enum ContinuationError<E> {
    /// The program failed and no fault explains it.
    #[error("failure without an injected fault: {0}")]
    Program(E),
    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl FaultEngine {
    /// Runs `body` in a scope where no fault is injected.
    pub fn execute_without_faults<T>(&self, body: impl FnOnce(&FaultEngine) -> T) -> Result<T, EngineError> {
        self.enter_scope(ScopeKind::WithoutFaults)?;
        let out = body(self);
        self.exit_scope()?;
        Ok(out)
    }

    /// Runs `body`; a failure is accepted, and handed to `on_fault`, only if
    /// a fault was injected inside this scope.
    ///
    /// Returns `Ok(Some(value))` on success and `Ok(None)` for an accepted
    /// failure.
    pub fn assert_on_fault<T, E>(
        &self,
        body: impl FnOnce(&FaultEngine) -> Result<T, E>,
        on_fault: impl FnOnce(&E),
    ) -> Result<Option<T>, ContinuationError<E>> {
        self.enter_scope(ScopeKind::OnFault)?;
        let result = body(self);
        let closed = self.exit_scope()?;
        match result {
            Ok(value) => Ok(Some(value)),
            Err(e) if closed.fault_injected => {
                tracing::debug!(scope = %closed.token, "failure explained by injected fault");
                on_fault(&e);
                Ok(None)
            }
            Err(e) => Err(ContinuationError::Program(e)),
        }
    }
}
