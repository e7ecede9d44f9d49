//! Per-run execution report and its human-readable rendering.

use crate::analysis::RedundancyWarning;
use crate::catalog::FaultSpec;
use crate::dei::ExecutionIndex;
use crate::error::FaultError;
use crate::primitives::CallOutcome;
use crate::search::Candidate;
use crate::types::RequestId;
use serde::Serialize;

/// How an iteration of the program under test ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "result")]
pub enum IterationOutcome {
    Passed,
    Failed { error: String },
    /// Ran past the configured timeout; counted as a failure.
    TimedOut { elapsed_ms: u64 },
}

impl IterationOutcome {
    pub fn is_failure(&self) -> bool {
        !matches!(self, IterationOutcome::Passed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallRecord {
    pub request: RequestId,
    pub index: ExecutionIndex,
    pub method: String,
    /// Fault handed to the caller at this call, if any.
    pub injected: Option<FaultSpec>,
    /// `None` until `after_call` reports back.
    pub outcome: Option<CallOutcome>,
}

impl CallRecord {
    /// The call failed although no fault was injected into it.
    pub fn is_organic_failure(&self) -> bool {
        self.injected.is_none() && matches!(self.outcome, Some(CallOutcome::Failed { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationRecord {
    pub iteration: usize,
    /// The pair this iteration set out to inject; `None` for the reference run.
    pub planned: Option<Candidate>,
    /// Whether the planned fault was actually reached and handed out.
    pub fault_delivered: bool,
    pub observed: Vec<ExecutionIndex>,
    pub calls: Vec<CallRecord>,
    pub warnings: Vec<RedundancyWarning>,
    pub injection_errors: Vec<FaultError>,
    pub outcome: Option<IterationOutcome>,
}

impl IterationRecord {
    pub fn new(iteration: usize, planned: Option<Candidate>) -> Self {
        IterationRecord {
            iteration,
            planned,
            fault_delivered: false,
            observed: Vec::new(),
            calls: Vec::new(),
            warnings: Vec::new(),
            injection_errors: Vec::new(),
            outcome: None,
        }
    }

    pub fn is_reference(&self) -> bool {
        self.planned.is_none()
    }

    /// Calls that received a fault.
    pub fn injected_calls(&self) -> impl Iterator<Item = &CallRecord> {
        self.calls.iter().filter(|c| c.injected.is_some())
    }

    pub fn organic_failures(&self) -> impl Iterator<Item = &CallRecord> {
        self.calls.iter().filter(|c| c.is_organic_failure())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Exhausted,
    BoundedStop,
    BaselineFailed,
    /// A fault iteration failed and the run was configured to stop there.
    AbortedOnFailure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestExecutionReport {
    pub status: RunStatus,
    pub iterations: Vec<IterationRecord>,
    /// Candidates dropped as equivalent to an already planned pair.
    pub skipped_redundant: usize,
    /// Candidates dropped because their call failed on its own.
    pub skipped_organic: usize,
}

impl TestExecutionReport {
    pub fn new() -> Self {
        TestExecutionReport {
            status: RunStatus::Running,
            iterations: Vec::new(),
            skipped_redundant: 0,
            skipped_organic: 0,
        }
    }

    pub fn reference(&self) -> Option<&IterationRecord> {
        self.iterations.first().filter(|r| r.is_reference())
    }

    pub fn fault_iterations(&self) -> impl Iterator<Item = &IterationRecord> {
        self.iterations.iter().filter(|r| !r.is_reference())
    }

    pub fn failed_iterations(&self) -> impl Iterator<Item = &IterationRecord> {
        self.iterations
            .iter()
            .filter(|r| r.outcome.as_ref().map(IterationOutcome::is_failure).unwrap_or(false))
    }

    /// Whether any iteration saw a call fail without an injected fault.
    pub fn contains_organic_failures(&self) -> bool {
        self.iterations.iter().any(|r| r.organic_failures().next().is_some())
    }

    /// Redundancy warnings; only the reference iteration carries them.
    pub fn warnings(&self) -> &[RedundancyWarning] {
        self.reference().map(|r| r.warnings.as_slice()).unwrap_or(&[])
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl Default for TestExecutionReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Format a run report for human consumption.
pub fn format_report(report: &TestExecutionReport) -> String {
    let mut output = String::new();

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");
    output.push_str("  Fault Injection Test Execution Report\n");
    output.push_str("═══════════════════════════════════════════════════════════════════════\n\n");

    let failures = report.failed_iterations().count();
    output.push_str(&format!("Status:                 {:?}\n", report.status));
    output.push_str(&format!("Iterations:             {}\n", report.iterations.len()));
    output.push_str(&format!("Fault iterations:       {}\n", report.fault_iterations().count()));
    output.push_str(&format!("Failed iterations:      {}\n", failures));
    if report.skipped_redundant > 0 {
        output.push_str(&format!("Skipped as redundant:   {}\n", report.skipped_redundant));
    }
    if report.skipped_organic > 0 {
        output.push_str(&format!("Skipped as organic:     {}\n", report.skipped_organic));
    }
    output.push('\n');

    if let Some(reference) = report.reference() {
        output.push_str("─── Reference Iteration ───────────────────────────────────────────────\n");
        output.push_str(&format!("Call sites observed:    {}\n", reference.observed.len()));
        for call in reference.organic_failures() {
            output.push_str(&format!("  organic failure: {} at {}\n", call.method, call.index));
        }
        for warning in &reference.warnings {
            output.push_str(&format!("  warning: {}\n", warning));
        }
        output.push('\n');
    }

    if report.fault_iterations().next().is_some() {
        output.push_str("─── Fault Iterations ──────────────────────────────────────────────────\n");
        for record in report.fault_iterations() {
            output.push_str(&format_iteration(record));
        }
        output.push('\n');
    }

    output.push_str("═══════════════════════════════════════════════════════════════════════\n");

    output
}

/// One line per fault iteration, plus any injection errors.
pub fn format_iteration(record: &IterationRecord) -> String {
    let mut output = String::new();
    let result = match &record.outcome {
        Some(IterationOutcome::Passed) => "passed".to_string(),
        Some(IterationOutcome::Failed { error }) => format!("failed: {error}"),
        Some(IterationOutcome::TimedOut { elapsed_ms }) => format!("timed out after {elapsed_ms}ms"),
        None => "incomplete".to_string(),
    };
    match &record.planned {
        Some(c) => output.push_str(&format!(
            "  [{}] {} on {}{} -> {}\n",
            record.iteration,
            c.fault,
            c.method,
            if record.fault_delivered { "" } else { " (not reached)" },
            result
        )),
        None => output.push_str(&format!("  [{}] reference -> {}\n", record.iteration, result)),
    }
    for err in &record.injection_errors {
        output.push_str(&format!("      injection error: {err}\n"));
    }
    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dei::{Frame, FrameKey};

    fn candidate() -> Candidate {
        Candidate {
            index: ExecutionIndex::from_frames(vec![Frame { key: FrameKey::new("", "sig", "{}", true), occurrence: 1 }]),
            method: "Users/Get".into(),
            rule: "users".into(),
            fault: FaultSpec::exception("Unavailable"),
            step: 0,
        }
    }

    fn sample() -> TestExecutionReport {
        let mut reference = IterationRecord::new(0, None);
        reference.outcome = Some(IterationOutcome::Passed);
        let mut faulted = IterationRecord::new(1, Some(candidate()));
        faulted.fault_delivered = true;
        faulted.outcome = Some(IterationOutcome::Failed { error: "Unavailable".into() });
        TestExecutionReport {
            status: RunStatus::Exhausted,
            iterations: vec![reference, faulted],
            skipped_redundant: 0,
            skipped_organic: 0,
        }
    }

    #[test]
    fn test_report_queries() {
        let report = sample();
        assert!(report.reference().is_some());
        assert_eq!(report.fault_iterations().count(), 1);
        assert_eq!(report.failed_iterations().count(), 1);
        assert!(report.warnings().is_empty());
    }

    #[test]
    fn test_organic_failure_needs_failed_uninjected_call() {
        let mut report = sample();
        let call = |injected: Option<FaultSpec>, outcome: CallOutcome| CallRecord {
            request: RequestId::new(),
            index: candidate().index,
            method: "Users/Get".into(),
            injected,
            outcome: Some(outcome),
        };
        report.iterations[1].calls.push(call(Some(FaultSpec::exception("Unavailable")), CallOutcome::failed("Unavailable")));
        report.iterations[0].calls.push(call(None, CallOutcome::success("alice")));
        assert!(!report.contains_organic_failures());

        report.iterations[0].calls.push(call(None, CallOutcome::failed("connection refused")));
        assert!(report.contains_organic_failures());
        assert_eq!(report.iterations[0].organic_failures().count(), 1);
        assert!(format_report(&report).contains("organic failure: Users/Get"));
    }

    #[test]
    fn test_format_report() {
        let formatted = format_report(&sample());
        assert!(formatted.contains("Status:                 Exhausted"));
        assert!(formatted.contains("Iterations:             2"));
        assert!(formatted.contains("[1] exception Unavailable on Users/Get -> failed: Unavailable"));
    }

    #[test]
    fn test_json_export() {
        let json = sample().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["status"], "exhausted");
        assert_eq!(value["iterations"][1]["planned"]["fault"]["fault"], "exception");
        assert_eq!(value["iterations"][1]["outcome"]["result"], "failed");
    }
}
