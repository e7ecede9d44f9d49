//! Nested fault scopes opened by continuation helpers.
//!
//! Each scope gets a sequence number among its siblings; the scope token is
//! the path of those numbers from the root (`"2"`, `"2/1"`, ...). When the
//! scope counter is enabled the token becomes part of every frame key, so
//! the same call site inside two different nestings yields two indices.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// Calls are indexed but never receive a fault.
    WithoutFaults,
    /// Failures are only acceptable when a fault was injected inside.
    OnFault,
}

#[derive(Debug, Clone)]
struct ScopeFrame {
    id: u64,
    kind: ScopeKind,
    fault_injected: bool,
    children: u64,
}

/// Stack of open scopes for one iteration.
#[derive(Debug, Clone, Default)]
pub struct ScopeTracker {
    stack: Vec<ScopeFrame>,
    root_children: u64,
}

/// Result of closing a scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClosedScope {
    pub token: String,
    pub kind: ScopeKind,
    pub fault_injected: bool,
}

impl ScopeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a scope and returns its token.
    pub fn enter_scope(&mut self, kind: ScopeKind) -> String {
        let siblings = match self.stack.last_mut() {
            Some(parent) => &mut parent.children,
            None => &mut self.root_children,
        };
        *siblings += 1;
        let id = *siblings;
        self.stack.push(ScopeFrame { id, kind, fault_injected: false, children: 0 });
        let token = self.current_scope_id();
        tracing::debug!(scope = %token, ?kind, "scope entered");
        token
    }

    /// Closes the innermost scope. A fault injected inside it also counts
    /// as injected in the enclosing scope.
    pub fn exit_scope(&mut self) -> Option<ClosedScope> {
        let token = self.current_scope_id();
        let frame = self.stack.pop()?;
        if frame.fault_injected {
            if let Some(parent) = self.stack.last_mut() {
                parent.fault_injected = true;
            }
        }
        Some(ClosedScope { token, kind: frame.kind, fault_injected: frame.fault_injected })
    }

    /// Path token of the innermost scope; empty at the root.
    pub fn current_scope_id(&self) -> String {
        self.stack
            .iter()
            .map(|f| f.id.to_string())
            .collect::<Vec<_>>()
            .join("/")
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// True if any open scope forbids injection.
    pub fn faults_suppressed(&self) -> bool {
        self.stack.iter().any(|f| f.kind == ScopeKind::WithoutFaults)
    }

    pub fn mark_fault_injected(&mut self) {
        if let Some(frame) = self.stack.last_mut() {
            frame.fault_injected = true;
        }
    }

    /// Whether a fault was injected inside the innermost open scope.
    pub fn scope_fault_injected(&self) -> bool {
        self.stack.last().map(|f| f.fault_injected).unwrap_or(false)
    }

    pub fn reset(&mut self) {
        self.stack.clear();
        self.root_children = 0;
    }
}
