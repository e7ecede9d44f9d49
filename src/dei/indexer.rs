use crate::context::{ContextRegistry, RequestContext};
use crate::dei::index::{ExecutionIndex, Frame, FrameKey};
use crate::error::ProtocolError;
use crate::time::VectorClock;
use crate::types::RequestId;

/// Computes execution indices for outgoing calls.
///
/// The indexer holds no per-request state: counters and the frame stack
/// live in the request's [`RequestContext`], so two requests never share
/// occurrence counts and a re-executed program sees fresh counters.
#[derive(Debug, Clone, Copy)]
pub struct ExecutionIndexer {
    digest_components: bool,
}

impl ExecutionIndexer {
    pub fn new(digest_components: bool) -> Self {
        ExecutionIndexer { digest_components }
    }

    /// Pushes a frame for `signature` onto `ctx` and returns the resulting
    /// index together with the clock to send on the call.
    ///
    /// The occurrence counter is keyed on the serialized prefix plus the
    /// frame key, so the n-th call to the same site under the same parent
    /// frames, scope and ancestry always gets occurrence n. A forked request
    /// folds its fork path into the scope component, so sibling tasks never
    /// share an index.
    pub fn push_frame(
        &self,
        ctx: &mut RequestContext,
        signature: &str,
        scope: Option<&str>,
    ) -> (ExecutionIndex, VectorClock) {
        let node = ctx.node.clone();
        ctx.vclock.increment(&node);

        let ancestry = ctx.origin_vclock.to_canonical_string();
        let scope = scope_component(&ctx.fork_path, scope.unwrap_or(""));
        let key = FrameKey::new(&scope, signature, &ancestry, self.digest_components);
        let counter_key = format!("{}|{}", ctx.index_stack.to_canonical_string(), key.encode());
        let occurrence = ctx.counters.entry(counter_key).or_insert(0);
        *occurrence += 1;

        let frame = Frame { key, occurrence: *occurrence };
        ctx.index_stack.push(frame);
        tracing::debug!(request = %ctx.request_id, index = %ctx.index_stack, "execution index computed");
        (ctx.index_stack.clone(), ctx.vclock.clone())
    }

    /// Pops the innermost frame, which must belong to `expected`.
    pub fn pop_frame(
        &self,
        ctx: &mut RequestContext,
        expected: &ExecutionIndex,
    ) -> Result<Frame, ProtocolError> {
        if &ctx.index_stack != expected {
            return Err(ProtocolError::OutOfOrder {
                request: ctx.request_id,
                reported: expected.to_canonical_string(),
                expected: ctx.index_stack.to_canonical_string(),
            });
        }
        ctx.index_stack.pop().ok_or(ProtocolError::NoOpenCall(ctx.request_id))
    }

    /// Registry-level form of [`push_frame`](Self::push_frame).
    pub fn index_for(
        &self,
        registry: &ContextRegistry,
        request: RequestId,
        signature: &str,
        scope: Option<&str>,
    ) -> Result<ExecutionIndex, ProtocolError> {
        registry.with_context(request, |ctx| self.push_frame(ctx, signature, scope).0)
    }

    /// Registry-level form of [`pop_frame`](Self::pop_frame). An open call
    /// tracked for the same index is closed with it.
    pub fn pop(
        &self,
        registry: &ContextRegistry,
        request: RequestId,
        expected: &ExecutionIndex,
    ) -> Result<Frame, ProtocolError> {
        registry.with_context(request, |ctx| -> Result<Frame, ProtocolError> {
            let frame = self.pop_frame(ctx, expected)?;
            if ctx.open_calls.last().is_some_and(|call| &call.index == expected) {
                ctx.open_calls.pop();
            }
            Ok(frame)
        })?
    }
}

// Scope component of a frame key: the fork path of the issuing request,
// then the fault-scope token.
fn scope_component(fork_path: &str, scope: &str) -> String {
    match (fork_path.is_empty(), scope.is_empty()) {
        (true, _) => scope.to_string(),
        (false, true) => fork_path.to_string(),
        (false, false) => format!("{fork_path}:{scope}"),
    }
}

impl Default for ExecutionIndexer {
    fn default() -> Self {
        Self::new(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{OpenCall, RequestOrigin};
    use crate::primitives::Payload;
    use crate::types::StoragePolicy;

    fn run_loop(indexer: &ExecutionIndexer, calls: usize) -> Vec<String> {
        let registry = ContextRegistry::new(StoragePolicy::PerRequest);
        let id = RequestId::new();
        registry.begin(id, RequestOrigin::new("client")).unwrap();
        (0..calls)
            .map(|_| {
                let idx = indexer.index_for(&registry, id, "Client::hello@main.rs:10", None).unwrap();
                indexer.pop(&registry, id, &idx).unwrap();
                idx.to_canonical_string()
            })
            .collect()
    }

    #[test]
    fn test_loop_calls_get_distinct_stable_indices() {
        let indexer = ExecutionIndexer::default();
        let first = run_loop(&indexer, 3);
        let second = run_loop(&indexer, 3);

        assert_eq!(first.len(), 3);
        assert_ne!(first[0], first[1]);
        assert_ne!(first[1], first[2]);
        assert_eq!(first, second, "re-execution reproduces the same indices");
    }

    #[test]
    fn test_nested_frames_and_pop() {
        let indexer = ExecutionIndexer::new(false);
        let registry = ContextRegistry::default();
        let id = RequestId::new();
        registry.begin(id, RequestOrigin::new("client")).unwrap();

        let outer = indexer.index_for(&registry, id, "outer", None).unwrap();
        let inner = indexer.index_for(&registry, id, "inner", None).unwrap();
        assert_eq!(outer.depth(), 1);
        assert_eq!(inner.depth(), 2);
        assert_eq!(inner.frames()[0], outer.frames()[0]);
        assert_eq!(inner.last().unwrap().key.signature, "inner");

        assert!(matches!(indexer.pop(&registry, id, &outer), Err(ProtocolError::OutOfOrder { .. })));
        let popped = indexer.pop(&registry, id, &inner).unwrap();
        assert_eq!(popped.key.signature, "inner");
        indexer.pop(&registry, id, &outer).unwrap();
        assert_eq!(
            indexer.pop(&registry, id, &ExecutionIndex::new()),
            Err(ProtocolError::NoOpenCall(id))
        );
    }

    #[test]
    fn test_scope_token_separates_counts() {
        let indexer = ExecutionIndexer::default();
        let registry = ContextRegistry::default();
        let id = RequestId::new();
        registry.begin(id, RequestOrigin::new("client")).unwrap();

        let outside = indexer.index_for(&registry, id, "sig", None).unwrap();
        indexer.pop(&registry, id, &outside).unwrap();
        let inside = indexer.index_for(&registry, id, "sig", Some("1")).unwrap();
        indexer.pop(&registry, id, &inside).unwrap();

        assert_ne!(outside, inside);
        assert_eq!(inside.last().unwrap().occurrence, 1, "scoped occurrences count independently");
    }

    #[test]
    fn test_ancestry_distinguishes_origins() {
        let indexer = ExecutionIndexer::default();
        let registry = ContextRegistry::default();
        let plain = RequestId::new();
        let caused = RequestId::new();
        let mut origin = VectorClock::new();
        origin.increment("upstream");
        registry.begin(plain, RequestOrigin::new("svc")).unwrap();
        registry.begin(caused, RequestOrigin::new("svc").with_origin_clock(origin)).unwrap();

        let a = indexer.index_for(&registry, plain, "sig", None).unwrap();
        let b = indexer.index_for(&registry, caused, "sig", None).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_equal_origin_clocks_give_equal_indices() {
        let indexer = ExecutionIndexer::default();
        let mut zeroed = VectorClock::new();
        zeroed.set("upstream", 0);
        let mut plain = RequestContext::new(RequestId::new(), RequestOrigin::new("svc"));
        let mut with_zero = RequestContext::new(RequestId::new(), RequestOrigin::new("svc").with_origin_clock(zeroed));

        let (a, _) = indexer.push_frame(&mut plain, "sig", None);
        let (b, _) = indexer.push_frame(&mut with_zero, "sig", None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_push_increments_node_clock() {
        let indexer = ExecutionIndexer::default();
        let mut ctx = RequestContext::new(RequestId::new(), RequestOrigin::new("svc"));
        let (_, clock) = indexer.push_frame(&mut ctx, "a", None);
        assert_eq!(clock.get("svc"), 1);
        let (_, clock) = indexer.push_frame(&mut ctx, "b", None);
        assert_eq!(clock.get("svc"), 2);
    }

    #[test]
    fn test_pop_frame_rejects_mismatched_index() {
        let indexer = ExecutionIndexer::default();
        let mut ctx = RequestContext::new(RequestId::new(), RequestOrigin::new("svc"));
        let (first, _) = indexer.push_frame(&mut ctx, "a", None);
        let (second, _) = indexer.push_frame(&mut ctx, "b", None);

        assert!(matches!(indexer.pop_frame(&mut ctx, &first), Err(ProtocolError::OutOfOrder { .. })));
        assert!(indexer.pop_frame(&mut ctx, &second).is_ok());
        assert!(indexer.pop_frame(&mut ctx, &first).is_ok());
    }

    #[test]
    fn test_pop_closes_matching_open_call() {
        let indexer = ExecutionIndexer::default();
        let registry = ContextRegistry::default();
        let id = RequestId::new();
        registry.begin(id, RequestOrigin::new("client")).unwrap();

        let idx = indexer.index_for(&registry, id, "sig", None).unwrap();
        registry
            .with_context(id, |ctx| {
                ctx.open_calls.push(OpenCall {
                    index: idx.clone(),
                    method: "svc/Sig".into(),
                    arguments: Payload::Null,
                    injected: false,
                    suppressed: false,
                })
            })
            .unwrap();

        indexer.pop(&registry, id, &idx).unwrap();
        let ctx = registry.get(id).unwrap();
        assert!(ctx.index_stack.is_empty());
        assert!(ctx.open_calls.is_empty(), "frame stack and open calls stay in step");
    }

    #[test]
    fn test_forked_siblings_get_distinct_indices() {
        let indexer = ExecutionIndexer::default();
        let registry = ContextRegistry::default();
        let parent = RequestId::new();
        let (a, b) = (RequestId::new(), RequestId::new());
        registry.begin(parent, RequestOrigin::new("client")).unwrap();
        registry.fork(parent, a).unwrap();
        registry.fork(parent, b).unwrap();

        let from_a = indexer.index_for(&registry, a, "sig", None).unwrap();
        let from_b = indexer.index_for(&registry, b, "sig", None).unwrap();
        let from_parent = indexer.index_for(&registry, parent, "sig", None).unwrap();
        assert_ne!(from_a, from_b);
        assert_ne!(from_a, from_parent);
        assert_ne!(from_b, from_parent);
    }

    #[test]
    fn test_fork_path_joins_scope_token() {
        assert_eq!(scope_component("", ""), "");
        assert_eq!(scope_component("", "1/2"), "1/2");
        assert_eq!(scope_component("fork1", ""), "fork1");
        assert_eq!(scope_component("fork1", "2"), "fork1:2");
    }
}
