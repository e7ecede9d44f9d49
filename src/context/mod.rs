//! Per-request causal context.
//!
//! The [`ContextRegistry`] maps a [`RequestId`] to the request's current
//! vector clock, the clock it arrived with, and its execution-index stack.
//! The storage policy is fixed at construction:
//!
//! * `PerRequest`: one slot per request id. Child tasks get their own slot
//!   through [`ContextRegistry::fork`], inheriting the parent's state.
//! * `SharedGlobal`: every id resolves to one slot. Only sound for
//!   single-threaded harnesses that run one request at a time.
//!
//! Only the call path holding a request id touches that id's slot. The
//! registry's mutex only makes map access safe; it does not order
//! operations across requests.

use crate::dei::index::ExecutionIndex;
use crate::error::ProtocolError;
use crate::primitives::Payload;
use crate::time::VectorClock;
use crate::types::{NodeId, RequestId, StoragePolicy};
use std::collections::HashMap;
use std::sync::Mutex;

/// How a request entered this node.
#[derive(Debug, Clone, Default)]
pub struct RequestOrigin {
    /// Node whose clock entry this request increments.
    pub node: NodeId,
    /// Clock carried by the inbound request, if any.
    pub origin_clock: Option<VectorClock>,
    /// Index of the caller's outgoing call, when the request was issued by
    /// an instrumented caller in another process.
    pub parent_index: Option<ExecutionIndex>,
}

impl RequestOrigin {
    pub fn new(node: impl Into<NodeId>) -> Self {
        RequestOrigin { node: node.into(), ..Default::default() }
    }

    pub fn with_origin_clock(mut self, clock: VectorClock) -> Self {
        self.origin_clock = Some(clock);
        self
    }

    pub fn with_parent_index(mut self, index: ExecutionIndex) -> Self {
        self.parent_index = Some(index);
        self
    }
}

/// An outgoing call that has passed `before_call` but not `after_call`.
#[derive(Debug, Clone)]
pub struct OpenCall {
    pub index: ExecutionIndex,
    pub method: String,
    pub arguments: Payload,
    pub injected: bool,
    /// Issued inside a scope that forbids faults.
    pub suppressed: bool,
}

/// Everything the engine tracks for one logical request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
    pub node: NodeId,
    pub vclock: VectorClock,
    pub origin_vclock: VectorClock,
    /// Frames of the calls currently in flight, on top of any parent prefix.
    pub index_stack: ExecutionIndex,
    /// Occurrences seen so far, keyed by `<prefix>|<frame key>`.
    pub counters: HashMap<String, u64>,
    pub open_calls: Vec<OpenCall>,
    /// Fork ordinals from the root request down to this one (`"fork2/fork1"`);
    /// empty for a request that was not forked.
    pub fork_path: String,
    /// Children forked from this request so far.
    pub forks: u64,
}

impl RequestContext {
    /// Fresh context. The current clock starts as a copy of the origin clock.
    pub fn new(request_id: RequestId, origin: RequestOrigin) -> Self {
        let origin_vclock = origin.origin_clock.unwrap_or_default();
        RequestContext {
            request_id,
            node: origin.node,
            vclock: origin_vclock.clone(),
            origin_vclock,
            index_stack: origin.parent_index.unwrap_or_default(),
            counters: HashMap::new(),
            open_calls: Vec::new(),
            fork_path: String::new(),
            forks: 0,
        }
    }
}

enum Slots {
    PerRequest(HashMap<RequestId, RequestContext>),
    Shared(Option<RequestContext>),
}

pub struct ContextRegistry {
    policy: StoragePolicy,
    slots: Mutex<Slots>,
}

impl ContextRegistry {
    pub fn new(policy: StoragePolicy) -> Self {
        let slots = match policy {
            StoragePolicy::PerRequest => Slots::PerRequest(HashMap::new()),
            StoragePolicy::SharedGlobal => Slots::Shared(None),
        };
        ContextRegistry { policy, slots: Mutex::new(slots) }
    }

    pub fn policy(&self) -> StoragePolicy {
        self.policy
    }

    /// Creates the slot for `request_id`. Under the shared policy this
    /// replaces whatever request occupied the single slot.
    pub fn begin(&self, request_id: RequestId, origin: RequestOrigin) -> Result<(), ProtocolError> {
        let mut slots = self.slots.lock().map_err(|_| ProtocolError::Poisoned)?;
        let ctx = RequestContext::new(request_id, origin);
        match &mut *slots {
            Slots::PerRequest(map) => {
                if map.contains_key(&request_id) {
                    return Err(ProtocolError::DuplicateRequest(request_id));
                }
                map.insert(request_id, ctx);
            }
            Slots::Shared(slot) => *slot = Some(ctx),
        }
        Ok(())
    }

    /// Snapshot of the slot for `request_id`.
    pub fn get(&self, request_id: RequestId) -> Result<RequestContext, ProtocolError> {
        self.with_context(request_id, |ctx| ctx.clone())
    }

    /// Overwrites the slot for `request_id`.
    pub fn set(&self, request_id: RequestId, context: RequestContext) -> Result<(), ProtocolError> {
        let mut slots = self.slots.lock().map_err(|_| ProtocolError::Poisoned)?;
        match &mut *slots {
            Slots::PerRequest(map) => {
                map.insert(request_id, context);
            }
            Slots::Shared(slot) => *slot = Some(context),
        }
        Ok(())
    }

    /// Runs `f` against the slot while holding the registry lock.
    pub fn with_context<R>(
        &self,
        request_id: RequestId,
        f: impl FnOnce(&mut RequestContext) -> R,
    ) -> Result<R, ProtocolError> {
        let mut slots = self.slots.lock().map_err(|_| ProtocolError::Poisoned)?;
        let ctx = match &mut *slots {
            Slots::PerRequest(map) => map.get_mut(&request_id),
            Slots::Shared(slot) => slot.as_mut(),
        };
        ctx.map(f).ok_or(ProtocolError::UnknownRequest(request_id))
    }

    /// Gives `child` a copy of `parent`'s clocks and index stack. The child
    /// starts with no open calls; its counters continue from the parent's.
    ///
    /// Each fork takes the next ordinal of its parent, and the child's fork
    /// path carries it into every frame key the child produces. Siblings
    /// forked in the same order therefore keep distinct, reproducible
    /// indices even when they call the same site.
    pub fn fork(&self, parent: RequestId, child: RequestId) -> Result<(), ProtocolError> {
        let mut slots = self.slots.lock().map_err(|_| ProtocolError::Poisoned)?;
        match &mut *slots {
            Slots::PerRequest(map) => {
                if map.contains_key(&child) {
                    return Err(ProtocolError::DuplicateRequest(child));
                }
                let parent_ctx = map.get_mut(&parent).ok_or(ProtocolError::UnknownRequest(parent))?;
                parent_ctx.forks += 1;
                let mut inherited = parent_ctx.clone();
                inherited.request_id = child;
                inherited.open_calls.clear();
                inherited.forks = 0;
                inherited.fork_path = if parent_ctx.fork_path.is_empty() {
                    format!("fork{}", parent_ctx.forks)
                } else {
                    format!("{}/fork{}", parent_ctx.fork_path, parent_ctx.forks)
                };
                map.insert(child, inherited);
            }
            // One slot: the child already sees the parent's state.
            Slots::Shared(slot) => {
                if slot.is_none() {
                    return Err(ProtocolError::UnknownRequest(parent));
                }
            }
        }
        Ok(())
    }

    /// Releases the slot for `request_id`.
    pub fn remove(&self, request_id: RequestId) -> Result<RequestContext, ProtocolError> {
        let mut slots = self.slots.lock().map_err(|_| ProtocolError::Poisoned)?;
        let removed = match &mut *slots {
            Slots::PerRequest(map) => map.remove(&request_id),
            Slots::Shared(slot) => slot.take(),
        };
        removed.ok_or(ProtocolError::UnknownRequest(request_id))
    }

    pub fn contains(&self, request_id: RequestId) -> bool {
        self.with_context(request_id, |_| ()).is_ok()
    }

    pub fn active_requests(&self) -> usize {
        match self.slots.lock() {
            Ok(slots) => match &*slots {
                Slots::PerRequest(map) => map.len(),
                Slots::Shared(slot) => usize::from(slot.is_some()),
            },
            Err(_) => 0,
        }
    }

    /// Drops every slot. Called between iterations.
    pub fn clear(&self) -> Result<(), ProtocolError> {
        let mut slots = self.slots.lock().map_err(|_| ProtocolError::Poisoned)?;
        match &mut *slots {
            Slots::PerRequest(map) => map.clear(),
            Slots::Shared(slot) => *slot = None,
        }
        Ok(())
    }
}

impl Default for ContextRegistry {
    fn default() -> Self {
        Self::new(StoragePolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_merges_origin_clock() {
        let registry = ContextRegistry::new(StoragePolicy::PerRequest);
        let id = RequestId::new();
        let mut origin = VectorClock::new();
        origin.increment("gateway");
        registry.begin(id, RequestOrigin::new("users").with_origin_clock(origin.clone())).unwrap();

        let ctx = registry.get(id).unwrap();
        assert_eq!(ctx.vclock.get("gateway"), 1);
        assert_eq!(ctx.origin_vclock, origin);
        assert_eq!(ctx.node, "users");
    }

    #[test]
    fn test_per_request_slots_are_isolated() {
        let registry = ContextRegistry::new(StoragePolicy::PerRequest);
        let a = RequestId::new();
        let b = RequestId::new();
        registry.begin(a, RequestOrigin::new("n")).unwrap();
        registry.begin(b, RequestOrigin::new("n")).unwrap();
        registry.with_context(a, |ctx| { ctx.vclock.increment("n"); }).unwrap();

        assert_eq!(registry.get(a).unwrap().vclock.get("n"), 1);
        assert_eq!(registry.get(b).unwrap().vclock.get("n"), 0);
        assert_eq!(registry.active_requests(), 2);
    }

    #[test]
    fn test_duplicate_and_unknown_ids() {
        let registry = ContextRegistry::default();
        let id = RequestId::new();
        registry.begin(id, RequestOrigin::new("n")).unwrap();
        assert_eq!(registry.begin(id, RequestOrigin::new("n")), Err(ProtocolError::DuplicateRequest(id)));

        let stranger = RequestId::new();
        assert_eq!(registry.get(stranger).unwrap_err(), ProtocolError::UnknownRequest(stranger));
        assert!(registry.remove(stranger).is_err());
    }

    #[test]
    fn test_fork_inherits_parent_state() {
        let registry = ContextRegistry::default();
        let parent = RequestId::new();
        let child = RequestId::new();
        registry.begin(parent, RequestOrigin::new("n")).unwrap();
        registry.with_context(parent, |ctx| { ctx.vclock.increment("n"); }).unwrap();
        registry.fork(parent, child).unwrap();

        let ctx = registry.get(child).unwrap();
        assert_eq!(ctx.request_id, child);
        assert_eq!(ctx.vclock.get("n"), 1);

        registry.with_context(child, |ctx| { ctx.vclock.increment("n"); }).unwrap();
        assert_eq!(registry.get(parent).unwrap().vclock.get("n"), 1, "child writes stay in the child slot");
    }

    #[test]
    fn test_fork_assigns_sibling_ordinals() {
        let registry = ContextRegistry::default();
        let parent = RequestId::new();
        let (a, b, grandchild) = (RequestId::new(), RequestId::new(), RequestId::new());
        registry.begin(parent, RequestOrigin::new("n")).unwrap();
        registry.fork(parent, a).unwrap();
        registry.fork(parent, b).unwrap();
        registry.fork(b, grandchild).unwrap();

        assert_eq!(registry.get(parent).unwrap().fork_path, "");
        assert_eq!(registry.get(parent).unwrap().forks, 2);
        assert_eq!(registry.get(a).unwrap().fork_path, "fork1");
        assert_eq!(registry.get(b).unwrap().fork_path, "fork2");
        assert_eq!(registry.get(grandchild).unwrap().fork_path, "fork2/fork1");

        let stranger = RequestId::new();
        assert_eq!(registry.fork(stranger, RequestId::new()), Err(ProtocolError::UnknownRequest(stranger)));
    }

    #[test]
    fn test_shared_global_single_slot() {
        let registry = ContextRegistry::new(StoragePolicy::SharedGlobal);
        let a = RequestId::new();
        let b = RequestId::new();
        registry.begin(a, RequestOrigin::new("n")).unwrap();
        registry.with_context(a, |ctx| { ctx.vclock.increment("n"); }).unwrap();

        // Any id resolves to the one slot.
        assert_eq!(registry.get(b).unwrap().vclock.get("n"), 1);
        assert_eq!(registry.active_requests(), 1);
    }

    #[test]
    fn test_clear_drops_all_slots() {
        let registry = ContextRegistry::default();
        let id = RequestId::new();
        registry.begin(id, RequestOrigin::new("n")).unwrap();
        registry.clear().unwrap();
        assert!(!registry.contains(id));
        assert_eq!(registry.active_requests(), 0);
    }
}
