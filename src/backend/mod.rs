// src/backend/mod.rs — Reasoning/compute backend layer

pub mod dispatch;
pub mod quota;

use serde::{Deserialize, Serialize};

/// How a backend is reached. Hosted backends are subject to quota
/// ceilings; local backends have none and serve as the terminal
/// fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    Hosted,
    Local,
}

/// Declared capability tags. Selection matches on these, never on
/// backend name strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    /// Turning raw inputs into structured concepts.
    Extraction,
    /// Answering comments and processing references.
    Reasoning,
    /// Full-framework review passes.
    Synthesis,
}

/// Handle to a selected backend. Selection has no side effects; usage
/// is recorded against the ledger only after a call completes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendHandle {
    pub name: String,
    pub kind: BackendKind,
}

impl std::fmt::Display for BackendHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}
