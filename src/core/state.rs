// src/core/state.rs — Durable engine state
//
// The single unit of durability. Owned exclusively by the cycle
// scheduler: other components return deltas or snapshots that the
// scheduler folds in here before committing a checkpoint. Every field
// carries a serde default so checkpoints written by older engine
// versions keep loading as the schema grows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet, VecDeque};
use std::path::PathBuf;

use crate::backend::quota::BackendUsage;

pub const SCHEMA_VERSION: u32 = 2;

/// A hypothesis queued for sandboxed validation. Stays in
/// `pending_validations` until a terminal outcome is durably recorded,
/// so a crash mid-run means a retry on the next boot, never a lost
/// request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub id: String,
    pub hypothesis: String,
    pub created_at: DateTime<Utc>,
    /// Generated program source, when the pipeline supplied one. The
    /// coordinator renders a default program otherwise.
    #[serde(default)]
    pub program: Option<String>,
    /// Dataset paths handed to the program as arguments.
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
}

impl ValidationRequest {
    pub fn new(hypothesis: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            hypothesis: hypothesis.into(),
            created_at: Utc::now(),
            program: None,
            inputs: Vec::new(),
        }
    }
}

/// An unanswered comment pulled from the document collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineState {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    #[serde(default = "Utc::now")]
    pub last_checkpoint: DateTime<Utc>,

    /// Input identifiers already consumed. Grows only; an identifier
    /// present here is never dispatched again, even across restarts.
    #[serde(default)]
    pub processed_inputs: BTreeSet<String>,

    #[serde(default)]
    pub pending_validations: VecDeque<ValidationRequest>,

    #[serde(default)]
    pub pending_questions: VecDeque<String>,

    #[serde(default)]
    pub comment_queue: VecDeque<Comment>,

    /// Bumped by exactly one per completed synthesis cycle.
    #[serde(default = "default_framework_version")]
    pub framework_version: u64,

    #[serde(default)]
    pub usage_stats: BTreeMap<String, BackendUsage>,

    /// Validation ids currently held by the coordinator. Deliberately
    /// not durable: rebuilt empty on every boot, so no request can be
    /// stuck "active" after a crash.
    #[serde(skip)]
    pub active_experiments: HashSet<String>,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

fn default_framework_version() -> u64 {
    1
}

impl Default for EngineState {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            last_checkpoint: Utc::now(),
            processed_inputs: BTreeSet::new(),
            pending_validations: VecDeque::new(),
            pending_questions: VecDeque::new(),
            comment_queue: VecDeque::new(),
            framework_version: 1,
            usage_stats: BTreeMap::new(),
            active_experiments: HashSet::new(),
        }
    }
}

impl EngineState {
    pub fn is_processed(&self, input_id: &str) -> bool {
        self.processed_inputs.contains(input_id)
    }

    /// Record an input as consumed. Insert-only by construction.
    pub fn mark_processed(&mut self, input_id: impl Into<String>) {
        self.processed_inputs.insert(input_id.into());
    }

    pub fn queue_validation(&mut self, request: ValidationRequest) {
        self.pending_validations.push_back(request);
    }

    /// Drop a request after its terminal outcome has been durably
    /// recorded. Also clears its active marker.
    pub fn complete_validation(&mut self, request_id: &str) {
        self.pending_validations.retain(|r| r.id != request_id);
        self.active_experiments.remove(request_id);
    }

    pub fn hours_since_checkpoint(&self, now: DateTime<Utc>) -> i64 {
        (now - self.last_checkpoint).num_hours()
    }

    /// Advance the checkpoint timestamp, keeping it monotone even if
    /// the wall clock stepped backwards.
    pub fn touch_checkpoint(&mut self, now: DateTime<Utc>) {
        if now > self.last_checkpoint {
            self.last_checkpoint = now;
        }
    }

    pub fn bump_framework_version(&mut self) {
        self.framework_version += 1;
    }
}
