use crate::analysis::RedundancyAnalyzer;
use crate::catalog::{FaultCatalog, FaultSpec};
use crate::config::EngineConfig;
use crate::context::{ContextRegistry, OpenCall, RequestOrigin};
use crate::dei::{ExecutionIndex, ExecutionIndexer};
use crate::error::{ConfigError, EngineError, FaultError, ProtocolError};
use crate::primitives::{service_name, CallOutcome, CallSite, Mutation, Payload};
use crate::report::{CallRecord, IterationOutcome, IterationRecord, RunStatus, TestExecutionReport};
use crate::scope::{ClosedScope, ScopeKind, ScopeTracker};
use crate::search::{Candidate, IterationPlan, SearchController, SearchState};
use crate::time::VectorClock;
use crate::types::{RequestId, ValueKind};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;
use tracing::{debug, info, warn};

/// A fault the caller must apply at this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaultDecision {
    /// Catalog rule that allowed the fault.
    pub rule: String,
    pub fault: FaultSpec,
    /// Transformer step; 0 for other faults.
    pub step: usize,
    /// Pre-computed transformer output.
    pub mutation: Option<Mutation>,
}

impl FaultDecision {
    /// Name and metadata of an exception fault.
    pub fn exception(&self) -> Option<(&str, &BTreeMap<String, String>)> {
        match &self.fault {
            FaultSpec::Exception { name, metadata } => Some((name.as_str(), metadata)),
            _ => None,
        }
    }

    /// The byzantine value cast to the call's declared return type.
    pub fn byzantine_as(&self, expected: ValueKind) -> Option<Result<Payload, FaultError>> {
        match &self.fault {
            FaultSpec::Byzantine { kind, value } => Some(FaultSpec::cast_byzantine(*kind, value, expected)),
            _ => None,
        }
    }

    /// The transformed response to return instead of the real one.
    pub fn transformed(&self) -> Option<&Payload> {
        self.mutation.as_ref().map(|m| &m.value)
    }
}

/// Answer to `before_call`.
#[derive(Debug, Clone)]
pub struct BeforeCall {
    pub execution_index: ExecutionIndex,
    /// Clock to propagate with the outgoing call.
    pub vclock: VectorClock,
    pub fault: Option<FaultDecision>,
}

struct EngineState {
    search: SearchController,
    scopes: ScopeTracker,
    analyzer: RedundancyAnalyzer,
    current: Option<IterationRecord>,
    report: TestExecutionReport,
    last_report: Option<TestExecutionReport>,
}

impl EngineState {
    // Stamps the skip counters and publishes the report.
    fn finish_report(&mut self) {
        self.report.skipped_redundant = self.search.skipped_redundant();
        self.report.skipped_organic = self.search.skipped_organic();
        self.last_report = Some(self.report.clone());
    }
}

/// The fault-injection decision engine.
///
/// Instrumentation drives it through the decision protocol
/// (`begin_request`, `before_call`, `after_call`, `end_request`) inside
/// iterations bracketed by `begin_iteration`/`complete_iteration`, or lets
/// [`explore`](FaultEngine::explore) run the whole loop.
///
/// # Example
///
/// ```
/// use faultline_core::catalog::{CatalogEntry, FaultCatalog};
/// use faultline_core::context::RequestOrigin;
/// use faultline_core::engine::FaultEngine;
/// use faultline_core::primitives::{CallOutcome, CallSite};
/// use faultline_core::config::EngineConfig;
/// use faultline_core::types::RequestId;
/// use std::collections::BTreeMap;
///
/// let catalog = FaultCatalog::new(vec![CatalogEntry::builder("users")
///     .pattern("Users/Get")
///     .exception("Unavailable", BTreeMap::new())
///     .build()
///     .unwrap()]);
/// let engine = FaultEngine::new(EngineConfig::default(), catalog).unwrap();
///
/// let report = engine
///     .explore(|engine, _plan| -> Result<(), String> {
///         let id = RequestId::new();
///         engine.begin_request(id, RequestOrigin::new("client")).map_err(|e| e.to_string())?;
///         let site = CallSite::new("client.rs:10", "app.Users/Get");
///         let call = engine.before_call(id, &site).map_err(|e| e.to_string())?;
///         let outcome = match &call.fault {
///             Some(_) => CallOutcome::failed("Unavailable"),
///             None => CallOutcome::success("alice"),
///         };
///         engine.after_call(id, &call.execution_index, outcome).map_err(|e| e.to_string())?;
///         engine.end_request(id).map_err(|e| e.to_string())
///     })
///     .unwrap();
/// assert_eq!(report.iterations.len(), 2);
/// ```
pub struct FaultEngine {
    config: EngineConfig,
    catalog: FaultCatalog,
    registry: ContextRegistry,
    indexer: ExecutionIndexer,
    state: Mutex<EngineState>,
}

impl FaultEngine {
    pub fn new(config: EngineConfig, catalog: FaultCatalog) -> Result<Self, ConfigError> {
        config.validate()?;
        let state = EngineState {
            search: SearchController::new(
                config.search_strategy.clone(),
                config.max_iterations,
                config.avoid_redundant_injections,
            )
            .with_organic_avoidance(config.avoid_injections_on_organic_failures),
            scopes: ScopeTracker::new(),
            analyzer: RedundancyAnalyzer::new(),
            current: None,
            report: TestExecutionReport::new(),
            last_report: None,
        };
        Ok(FaultEngine {
            registry: ContextRegistry::new(config.storage_policy),
            indexer: ExecutionIndexer::new(config.digest_components),
            config,
            catalog,
            state: Mutex::new(state),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &FaultCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &ContextRegistry {
        &self.registry
    }

    fn lock(&self) -> Result<MutexGuard<'_, EngineState>, ProtocolError> {
        self.state.lock().map_err(|_| ProtocolError::Poisoned)
    }

    // --- Iteration lifecycle ------------------------------------------------

    /// Starts the next iteration, or returns `None` once the run is over.
    pub fn begin_iteration(&self) -> Result<Option<IterationPlan>, EngineError> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        if st.current.is_some() {
            return Err(ProtocolError::IterationActive.into());
        }
        if st.report.status != RunStatus::Running {
            return Ok(None);
        }

        let Some(plan) = st.search.next_plan() else {
            st.report.status = match st.search.state() {
                SearchState::BoundedStop => RunStatus::BoundedStop,
                _ => RunStatus::Exhausted,
            };
            st.finish_report();
            info!(
                status = ?st.report.status,
                iterations = st.report.iterations.len(),
                "fault injection run finished"
            );
            return Ok(None);
        };

        self.registry.clear()?;
        st.scopes.reset();
        st.analyzer.reset();
        match &plan.inject {
            Some(c) => info!(iteration = plan.iteration, fault = %c.fault, method = %c.method, "starting fault iteration"),
            None => info!(iteration = plan.iteration, "starting reference iteration"),
        }
        st.current = Some(IterationRecord::new(plan.iteration, plan.inject.clone()));
        Ok(Some(plan))
    }

    /// Records how the running iteration ended.
    ///
    /// A failing reference iteration ends the run with
    /// [`EngineError::BaselineFailed`]. A failing fault iteration is recorded
    /// and the run goes on, unless `abort_on_first_failure` is set. With
    /// `fail_on_organic_failures`, a passing iteration that saw a call fail
    /// without an injected fault counts as failed.
    pub fn complete_iteration(&self, outcome: IterationOutcome) -> Result<(), EngineError> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        let mut record = st.current.take().ok_or(ProtocolError::NoActiveIteration)?;

        if record.is_reference() {
            record.warnings = st.analyzer.take_warnings();
        }
        if let Some(c) = &record.planned {
            if !record.fault_delivered {
                debug!(iteration = record.iteration, index = %c.index, "planned fault was never reached");
            }
        }
        let outcome = match outcome {
            IterationOutcome::Passed if self.config.fail_on_organic_failures => {
                let failed: Vec<&str> = record.organic_failures().map(|c| c.method.as_str()).collect();
                if failed.is_empty() {
                    IterationOutcome::Passed
                } else {
                    IterationOutcome::Failed { error: format!("organic failures present: {}", failed.join(", ")) }
                }
            }
            other => other,
        };
        let baseline_error = match (&outcome, record.is_reference()) {
            (IterationOutcome::Failed { error }, true) => Some(error.clone()),
            (IterationOutcome::TimedOut { elapsed_ms }, true) => Some(format!("timed out after {elapsed_ms}ms")),
            _ => None,
        };
        let fault_failed = outcome.is_failure() && baseline_error.is_none();
        if fault_failed {
            info!(iteration = record.iteration, ?outcome, "fault iteration failed");
        }
        let iteration = record.iteration;
        record.outcome = Some(outcome);
        st.report.iterations.push(record);
        st.search.complete_iteration();
        self.registry.clear()?;

        if let Some(error) = baseline_error {
            warn!(%error, "reference iteration failed; aborting run");
            st.report.status = RunStatus::BaselineFailed;
            st.finish_report();
            return Err(EngineError::BaselineFailed(error));
        }
        if fault_failed && self.config.abort_on_first_failure {
            warn!(iteration, "fault iteration failed; skipping remaining iterations");
            st.report.status = RunStatus::AbortedOnFailure;
            st.finish_report();
        }
        Ok(())
    }

    /// Runs `program` once per iteration until the fault space is exhausted
    /// or the iteration bound is reached, then returns the final report.
    ///
    /// Iterations slower than the configured timeout are recorded as timed
    /// out; nothing is cancelled mid-iteration.
    pub fn explore<E, F>(&self, mut program: F) -> Result<TestExecutionReport, EngineError>
    where
        E: Display,
        F: FnMut(&FaultEngine, &IterationPlan) -> Result<(), E>,
    {
        let timeout = self.config.iteration_timeout();
        while let Some(plan) = self.begin_iteration()? {
            let started = Instant::now();
            let result = program(self, &plan);
            let elapsed = started.elapsed();
            let outcome = match (result, timeout) {
                (_, Some(limit)) if elapsed > limit => {
                    warn!(iteration = plan.iteration, elapsed_ms = elapsed.as_millis() as u64, "iteration timed out");
                    IterationOutcome::TimedOut { elapsed_ms: elapsed.as_millis() as u64 }
                }
                (Ok(()), _) => IterationOutcome::Passed,
                (Err(e), _) => IterationOutcome::Failed { error: e.to_string() },
            };
            self.complete_iteration(outcome)?;
        }
        let st = self.lock()?;
        let report = st.last_report.clone().unwrap_or_else(|| st.report.clone());
        Ok(report)
    }

    // --- Decision protocol --------------------------------------------------

    /// Opens the context for a logical request arriving at `origin.node`.
    pub fn begin_request(&self, request: RequestId, origin: RequestOrigin) -> Result<(), EngineError> {
        let st = self.lock()?;
        if st.current.is_none() {
            return Err(ProtocolError::NoActiveIteration.into());
        }
        self.registry.begin(request, origin)?;
        debug!(%request, "request started");
        Ok(())
    }

    /// Gives a child task its own context inherited from `parent`.
    pub fn fork_request(&self, parent: RequestId, child: RequestId) -> Result<(), EngineError> {
        self.registry.fork(parent, child)?;
        Ok(())
    }

    /// Indexes an outgoing call and decides whether to fault it.
    pub fn before_call(&self, request: RequestId, site: &CallSite) -> Result<BeforeCall, EngineError> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        let record = st.current.as_mut().ok_or(ProtocolError::NoActiveIteration)?;

        let scope = self.config.scope_counter.then(|| st.scopes.current_scope_id());
        let (index, vclock) = self
            .registry
            .with_context(request, |ctx| self.indexer.push_frame(ctx, &site.signature, scope.as_deref()))?;
        let suppressed = st.scopes.faults_suppressed();

        if !suppressed {
            if let Some(entry) = self.catalog.match_method(&site.method) {
                for fault in entry.immediate_faults() {
                    st.search.offer(Candidate {
                        index: index.clone(),
                        method: site.method.clone(),
                        rule: entry.name().to_string(),
                        fault: fault.clone(),
                        step: 0,
                    });
                }
            }
        }

        let mut decision = None;
        if let Some(candidate) = st.search.injection_for(&index).cloned() {
            if suppressed {
                debug!(index = %index, "fault suppressed by enclosing scope");
            } else {
                match realize(&mut st.search, &candidate) {
                    Ok(d) => decision = Some(d),
                    Err(e) => {
                        warn!(index = %index, error = %e, "fault could not be realised");
                        record.injection_errors.push(e);
                    }
                }
            }
        }

        if let Some(d) = &decision {
            info!(index = %index, method = %site.method, fault = %d.fault, "injecting fault");
            st.scopes.mark_fault_injected();
            record.fault_delivered = true;
        }
        record.observed.push(index.clone());
        record.calls.push(CallRecord {
            request,
            index: index.clone(),
            method: site.method.clone(),
            injected: decision.as_ref().map(|d| d.fault.clone()),
            outcome: None,
        });

        let open = OpenCall {
            index: index.clone(),
            method: site.method.clone(),
            arguments: site.arguments.clone(),
            injected: decision.is_some(),
            suppressed,
        };
        self.registry.with_context(request, |ctx| ctx.open_calls.push(open))?;

        Ok(BeforeCall { execution_index: index, vclock, fault: decision })
    }

    /// Reports how the call at `index` ended. `index` must be the innermost
    /// open call of `request`.
    pub fn after_call(&self, request: RequestId, index: &ExecutionIndex, outcome: CallOutcome) -> Result<(), EngineError> {
        let mut guard = self.lock()?;
        let st = &mut *guard;
        let record = st.current.as_mut().ok_or(ProtocolError::NoActiveIteration)?;

        let open = self.registry.with_context(request, |ctx| {
            let top = ctx.open_calls.last().ok_or(ProtocolError::NoOpenCall(request))?;
            if &top.index != index {
                return Err(ProtocolError::OutOfOrder {
                    request,
                    reported: index.to_canonical_string(),
                    expected: top.index.to_canonical_string(),
                });
            }
            self.indexer.pop_frame(ctx, index)?;
            ctx.open_calls.pop().ok_or(ProtocolError::NoOpenCall(request))
        })??;

        if let Some(call) = record
            .calls
            .iter_mut()
            .rev()
            .find(|c| c.request == request && &c.index == index && c.outcome.is_none())
        {
            call.outcome = Some(outcome.clone());
        }

        match &outcome {
            CallOutcome::Success { response } if !open.injected => {
                st.search.record_reference_payload(index, response);
                if !open.suppressed {
                    if let Some(entry) = self.catalog.match_method(&open.method) {
                        for fault in entry.transformer_faults() {
                            if let FaultSpec::Transformer { transformer } = fault {
                                if !transformer.accepts(response) {
                                    continue;
                                }
                                st.search.offer(Candidate {
                                    index: index.clone(),
                                    method: open.method.clone(),
                                    rule: entry.name().to_string(),
                                    fault: fault.clone(),
                                    step: 0,
                                });
                            }
                        }
                    }
                }
                if record.is_reference() {
                    if let Some(w) = st.analyzer.observe(index, &open.method, &open.arguments, response) {
                        st.search.mark_duplicate(w.index, w.duplicate_of);
                    }
                }
            }
            CallOutcome::Failed { .. } if !open.injected => {
                debug!(index = %index, method = %open.method, "call failed organically");
                if record.is_reference() {
                    st.search.mark_organic_failure(index.clone());
                }
            }
            CallOutcome::InjectionFailed { error } => {
                warn!(index = %index, %error, "caller could not apply fault");
                record.injection_errors.push(error.clone());
            }
            _ => {}
        }
        Ok(())
    }

    /// Closes a logical request and releases its context.
    pub fn end_request(&self, request: RequestId) -> Result<(), EngineError> {
        let st = self.lock()?;
        if st.current.is_none() {
            return Err(ProtocolError::NoActiveIteration.into());
        }
        let open = self.registry.with_context(request, |ctx| ctx.open_calls.len())?;
        if open > 0 {
            return Err(ProtocolError::OpenCalls { request, open }.into());
        }
        self.registry.remove(request)?;
        debug!(%request, "request finished");
        Ok(())
    }

    /// Folds a clock returned with a response into the request's clock.
    pub fn merge_response_clock(&self, request: RequestId, clock: &VectorClock) -> Result<(), EngineError> {
        self.registry.with_context(request, |ctx| ctx.vclock.merge_into(clock))?;
        Ok(())
    }

    // --- Scopes -------------------------------------------------------------

    pub fn enter_scope(&self, kind: ScopeKind) -> Result<String, EngineError> {
        let mut st = self.lock()?;
        Ok(st.scopes.enter_scope(kind))
    }

    pub fn exit_scope(&self) -> Result<ClosedScope, EngineError> {
        let mut st = self.lock()?;
        st.scopes.exit_scope().ok_or_else(|| ProtocolError::ScopeUnderflow.into())
    }

    /// Whether a fault was injected inside the innermost open scope.
    pub fn scope_fault_injected(&self) -> bool {
        self.state.lock().map(|st| st.scopes.scope_fault_injected()).unwrap_or(false)
    }

    // --- Queries ------------------------------------------------------------

    /// Whether the running iteration has handed out its fault.
    pub fn was_fault_injected(&self) -> bool {
        self.state
            .lock()
            .map(|st| st.current.as_ref().map(|r| r.fault_delivered).unwrap_or(false))
            .unwrap_or(false)
    }

    /// Whether the running iteration injected a fault on `method`.
    pub fn was_fault_injected_on_method(&self, method: &str) -> bool {
        self.state
            .lock()
            .map(|st| {
                st.current
                    .as_ref()
                    .map(|r| r.injected_calls().any(|c| c.method == method))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Whether the running iteration injected a fault on a call whose service
    /// name contains `service`.
    pub fn was_fault_injected_on_service(&self, service: &str) -> bool {
        self.state
            .lock()
            .map(|st| {
                st.current
                    .as_ref()
                    .map(|r| r.injected_calls().any(|c| service_name(&c.method).contains(service)))
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    /// Whether a call in the running iteration failed without an injected fault.
    pub fn iteration_contains_organic_failures(&self) -> bool {
        self.state
            .lock()
            .map(|st| {
                st.current
                    .as_ref()
                    .map(|r| r.organic_failures().next().is_some())
                    .unwrap_or(false)
            })
            .unwrap_or(false)
    }

    pub fn current_iteration(&self) -> Option<usize> {
        self.state.lock().ok()?.current.as_ref().map(|r| r.iteration)
    }

    /// Report of the most recently finished run.
    pub fn last_report(&self) -> Option<TestExecutionReport> {
        self.state.lock().ok()?.last_report.clone()
    }
}

// Turns a planned candidate into the decision handed to the caller.
// Transformers need the reference payload and schedule their next step.
fn realize(search: &mut SearchController, candidate: &Candidate) -> Result<FaultDecision, FaultError> {
    let mutation = match &candidate.fault {
        FaultSpec::Transformer { transformer } => {
            let reference = search
                .reference_payload(&candidate.index)
                .cloned()
                .ok_or_else(|| FaultError::EmptyPayload {
                    transformer: transformer.name().to_string(),
                    step: candidate.step,
                })?;
            let mutation = transformer.apply(&reference, candidate.step)?;
            if mutation.has_next {
                search.offer(Candidate { step: candidate.step + 1, ..candidate.clone() });
            }
            Some(mutation)
        }
        _ => None,
    };
    Ok(FaultDecision {
        rule: candidate.rule.clone(),
        fault: candidate.fault.clone(),
        step: candidate.step,
        mutation,
    })
}
