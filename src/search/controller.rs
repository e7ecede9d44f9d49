use crate::catalog::FaultSpec;
use crate::dei::ExecutionIndex;
use crate::primitives::Payload;
use crate::types::SearchStrategy;
use std::collections::{HashMap, HashSet, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchState {
    /// Before or during iteration 0, which injects nothing.
    Reference,
    Exploring,
    /// Every discovered pair has been tried.
    Exhausted,
    /// The iteration bound was hit with pairs left untried.
    BoundedStop,
}

/// One (execution index, fault) pair, plus the transformer step when the
/// fault is a transformer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize)]
pub struct Candidate {
    pub index: ExecutionIndex,
    pub method: String,
    pub rule: String,
    pub fault: FaultSpec,
    pub step: usize,
}

impl Candidate {
    fn key(&self) -> CandidateKey {
        (self.index.clone(), self.fault.clone(), self.step)
    }
}

type CandidateKey = (ExecutionIndex, FaultSpec, usize);

/// What the next iteration should do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IterationPlan {
    /// 0 for the reference iteration.
    pub iteration: usize,
    pub inject: Option<Candidate>,
}

impl IterationPlan {
    pub fn is_reference(&self) -> bool {
        self.inject.is_none()
    }
}

/// Sequences iterations and picks one untried pair for each.
///
/// Candidates are offered as call sites are discovered, in any iteration,
/// and deduplicated against everything already scheduled, running or
/// explored. The strategy decides only the order in which the pending queue
/// is drained.
#[derive(Debug)]
pub struct SearchController {
    strategy: SearchStrategy,
    max_iterations: usize,
    avoid_redundant: bool,
    state: SearchState,
    started: usize,
    pending: VecDeque<Candidate>,
    seen: HashSet<CandidateKey>,
    explored: Vec<Candidate>,
    current: Option<Candidate>,
    reference_payloads: HashMap<ExecutionIndex, Payload>,
    duplicates: HashMap<ExecutionIndex, ExecutionIndex>,
    skipped_redundant: usize,
    avoid_organic: bool,
    organic_failures: HashSet<ExecutionIndex>,
    skipped_organic: usize,
}

impl SearchController {
    pub fn new(strategy: SearchStrategy, max_iterations: usize, avoid_redundant: bool) -> Self {
        SearchController {
            strategy,
            max_iterations,
            avoid_redundant,
            state: SearchState::Reference,
            started: 0,
            pending: VecDeque::new(),
            seen: HashSet::new(),
            explored: Vec::new(),
            current: None,
            reference_payloads: HashMap::new(),
            duplicates: HashMap::new(),
            skipped_redundant: 0,
            avoid_organic: false,
            organic_failures: HashSet::new(),
            skipped_organic: 0,
        }
    }

    /// Skip candidates at calls recorded with [`mark_organic_failure`](Self::mark_organic_failure).
    pub fn with_organic_avoidance(mut self, avoid: bool) -> Self {
        self.avoid_organic = avoid;
        self
    }

    pub fn state(&self) -> SearchState {
        self.state
    }

    /// Decides the next iteration, or `None` once the search has stopped.
    /// A plan that is never completed is dropped by the next call.
    pub fn next_plan(&mut self) -> Option<IterationPlan> {
        if matches!(self.state, SearchState::Exhausted | SearchState::BoundedStop) {
            return None;
        }
        self.complete_iteration();

        if self.started >= self.max_iterations {
            self.state = if self.has_viable_candidate() {
                SearchState::BoundedStop
            } else {
                SearchState::Exhausted
            };
            tracing::info!(state = ?self.state, iterations = self.started, "search stopped at iteration bound");
            return None;
        }

        if self.started == 0 {
            self.started = 1;
            return Some(IterationPlan { iteration: 0, inject: None });
        }

        while let Some(candidate) = self.take_next() {
            if self.fails_organically(&candidate) {
                self.skipped_organic += 1;
                tracing::debug!(index = %candidate.index, fault = %candidate.fault, "skipping candidate on organically failing call");
                continue;
            }
            if self.is_redundant(&candidate) {
                self.skipped_redundant += 1;
                tracing::debug!(index = %candidate.index, fault = %candidate.fault, "skipping redundant candidate");
                continue;
            }
            let iteration = self.started;
            self.started += 1;
            self.state = SearchState::Exploring;
            self.current = Some(candidate.clone());
            return Some(IterationPlan { iteration, inject: Some(candidate) });
        }

        self.state = SearchState::Exhausted;
        tracing::info!(iterations = self.started, "fault space exhausted");
        None
    }

    /// Marks the running iteration's pair as explored.
    pub fn complete_iteration(&mut self) {
        if let Some(done) = self.current.take() {
            self.explored.push(done);
        }
    }

    /// Queues a candidate unless the strategy filters it or it was seen before.
    pub fn offer(&mut self, candidate: Candidate) -> bool {
        if let SearchStrategy::SingleTarget(target) = &self.strategy {
            if &candidate.method != target {
                return false;
            }
        }
        if !self.seen.insert(candidate.key()) {
            return false;
        }
        tracing::debug!(index = %candidate.index, fault = %candidate.fault, step = candidate.step, "candidate scheduled");
        self.pending.push_back(candidate);
        true
    }

    /// The pair to inject at `index` in the running iteration, if any.
    pub fn injection_for(&self, index: &ExecutionIndex) -> Option<&Candidate> {
        self.current.as_ref().filter(|c| &c.index == index)
    }

    pub fn current(&self) -> Option<&Candidate> {
        self.current.as_ref()
    }

    /// First unfaulted response seen at `index`; transformers mutate it.
    pub fn record_reference_payload(&mut self, index: &ExecutionIndex, payload: &Payload) {
        self.reference_payloads
            .entry(index.clone())
            .or_insert_with(|| payload.clone());
    }

    pub fn reference_payload(&self, index: &ExecutionIndex) -> Option<&Payload> {
        self.reference_payloads.get(index)
    }

    /// Records that `duplicate` repeats the call made at `original`.
    pub fn mark_duplicate(&mut self, duplicate: ExecutionIndex, original: ExecutionIndex) {
        self.duplicates.entry(duplicate).or_insert(original);
    }

    /// Records that the call at `index` failed without an injected fault.
    pub fn mark_organic_failure(&mut self, index: ExecutionIndex) {
        self.organic_failures.insert(index);
    }

    pub fn explored(&self) -> &[Candidate] {
        &self.explored
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    pub fn iterations_started(&self) -> usize {
        self.started
    }

    pub fn skipped_redundant(&self) -> usize {
        self.skipped_redundant
    }

    pub fn skipped_organic(&self) -> usize {
        self.skipped_organic
    }

    fn take_next(&mut self) -> Option<Candidate> {
        match self.strategy {
            SearchStrategy::BreadthFirst | SearchStrategy::SingleTarget(_) => self.pending.pop_front(),
            SearchStrategy::DepthFirst => self.pending.pop_back(),
        }
    }

    // Skippable when the same fault at the same step is already planned on
    // the call this one duplicates.
    fn is_redundant(&self, candidate: &Candidate) -> bool {
        if !self.avoid_redundant {
            return false;
        }
        self.duplicates
            .get(&candidate.index)
            .map(|original| {
                self.seen
                    .contains(&(original.clone(), candidate.fault.clone(), candidate.step))
            })
            .unwrap_or(false)
    }

    fn fails_organically(&self, candidate: &Candidate) -> bool {
        self.avoid_organic && self.organic_failures.contains(&candidate.index)
    }

    fn has_viable_candidate(&self) -> bool {
        self.pending
            .iter()
            .any(|c| !self.fails_organically(c) && !self.is_redundant(c))
    }
}
