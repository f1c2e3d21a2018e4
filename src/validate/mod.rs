// src/validate/mod.rs — Validation coordinator
//
// Turns queued validation requests into a bounded batch of sandbox
// runs. At most `max_concurrent` runs are in flight at once; excess
// requests never enter the batch — the scheduler leaves them queued
// for the next cycle. One attempt per request: a timeout or non-zero
// exit is a terminal failure, and only the external pipeline can
// resubmit the hypothesis as a new request.

pub mod sandbox;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use crate::core::state::ValidationRequest;
use crate::infra::errors::ArfError;
use sandbox::{RunStatus, SandboxExecutor, SandboxSpec};

/// Terminal result of one validation attempt.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub request_id: String,
    pub success: bool,
    pub summary: String,
    /// Full raw run output, persisted by the scheduler as an appendix
    /// artifact.
    pub raw_output: String,
}

pub struct ValidationCoordinator {
    executor: Arc<SandboxExecutor>,
    max_concurrent: usize,
    timeout: Duration,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl ValidationCoordinator {
    pub fn new(executor: Arc<SandboxExecutor>, max_concurrent: usize, timeout: Duration) -> Self {
        Self {
            executor,
            max_concurrent: max_concurrent.max(1),
            timeout,
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Highest number of sandbox runs observed in flight at once.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    /// Run every request in `batch` to a terminal outcome, never more
    /// than `max_concurrent` at a time. Outcomes come back in request
    /// order.
    pub async fn run_batch(&self, batch: Vec<ValidationRequest>) -> Vec<Outcome> {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let mut set: JoinSet<(usize, Outcome)> = JoinSet::new();

        for (idx, request) in batch.into_iter().enumerate() {
            let semaphore = semaphore.clone();
            let executor = self.executor.clone();
            let timeout = self.timeout;
            let in_flight = self.in_flight.clone();
            let peak = self.peak_in_flight.clone();

            set.spawn(async move {
                // Closed only if the semaphore is dropped, which cannot
                // happen while this task holds a clone.
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");

                let active = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(active, Ordering::SeqCst);

                let outcome = run_one(&executor, &request, timeout).await;

                in_flight.fetch_sub(1, Ordering::SeqCst);
                (idx, outcome)
            });
        }

        let mut outcomes: Vec<(usize, Outcome)> = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok(pair) => outcomes.push(pair),
                Err(e) => tracing::error!("Validation task panicked: {}", e),
            }
        }
        outcomes.sort_by_key(|(idx, _)| *idx);
        outcomes.into_iter().map(|(_, o)| o).collect()
    }
}

async fn run_one(
    executor: &SandboxExecutor,
    request: &ValidationRequest,
    timeout: Duration,
) -> Outcome {
    let program = request
        .program
        .clone()
        .unwrap_or_else(|| default_program(&request.hypothesis));

    let spec = SandboxSpec {
        name: request.id.clone(),
        program,
        inputs: request.inputs.clone(),
        timeout,
    };

    match executor.run(&spec).await {
        Ok(report) => {
            let success = matches!(report.status, RunStatus::Completed { exit_code: 0 });
            let summary = match report.status {
                RunStatus::Completed { exit_code: 0 } => {
                    format!("validated: {}", first_line(&report.stdout))
                }
                RunStatus::Completed { exit_code } => {
                    format!("failed (exit {exit_code}): {}", first_line(&report.stderr))
                }
                RunStatus::TimedOut => "failed: timed out".to_string(),
            };
            let mut raw = String::new();
            raw.push_str(&report.stdout);
            if !report.stderr.is_empty() {
                raw.push_str("\n--- stderr ---\n");
                raw.push_str(&report.stderr);
            }
            if let Some(out) = report.output {
                raw.push_str("\n--- output ---\n");
                raw.push_str(&out);
            }
            Outcome {
                request_id: request.id.clone(),
                success,
                summary,
                raw_output: raw,
            }
        }
        Err(e) => {
            tracing::error!(request = %request.id, "Sandbox run failed: {}", e);
            Outcome {
                request_id: request.id.clone(),
                success: false,
                summary: format!("failed: {e}"),
                raw_output: String::new(),
            }
        }
    }
}

/// Default validation program used when the pipeline did not supply
/// one: records the hypothesis and an inconclusive verdict at the
/// declared output path.
fn default_program(hypothesis: &str) -> String {
    let comment = hypothesis.replace(['\n', '\r'], " ");
    format!(
        "# Hypothesis: {comment}\n\
         import json, sys\n\
         \n\
         with open(sys.argv[-1], \"w\") as f:\n\
         \x20\x20\x20\x20json.dump({{\"verdict\": \"inconclusive\"}}, f)\n\
         print(\"no program supplied; recorded inconclusive verdict\")\n"
    )
}

fn first_line(s: &str) -> &str {
    s.lines().next().unwrap_or("").trim()
}
