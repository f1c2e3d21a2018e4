// src/backend/dispatch.rs — Quota-aware backend selection
//
// Backends are tried in declared preference order: the first hosted
// backend carrying the requested capability and still within quota
// wins. When every hosted candidate is out of quota (or none is
// configured), selection falls back to a local backend, which has no
// ceiling. A local backend always exists — `Dispatcher::new` appends a
// built-in one if the config declares none — so selection never fails.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use super::quota::{QuotaLedger, QuotaLimits};
use super::{BackendHandle, BackendKind, Capability};
use crate::infra::config::BackendEntry;

/// Name of the built-in local fallback used when the config declares
/// no local backend of its own.
pub const BUILTIN_LOCAL: &str = "ollama";

pub struct Dispatcher {
    backends: Vec<BackendEntry>,
}

impl Dispatcher {
    pub fn new(mut backends: Vec<BackendEntry>) -> Self {
        if !backends.iter().any(|b| b.kind == BackendKind::Local) {
            tracing::info!(
                "No local backend configured; adding built-in '{}' as terminal fallback",
                BUILTIN_LOCAL
            );
            backends.push(BackendEntry {
                name: BUILTIN_LOCAL.to_string(),
                kind: BackendKind::Local,
                capabilities: vec![
                    Capability::Extraction,
                    Capability::Reasoning,
                    Capability::Synthesis,
                ],
                daily_token_limit: u64::MAX,
                rpm_limit: u32::MAX,
            });
        }
        Self { backends }
    }

    /// Quota ceilings for the hosted backends, keyed by name. Local
    /// backends are deliberately absent: the ledger treats unknown
    /// names as unlimited.
    pub fn limits(&self) -> BTreeMap<String, QuotaLimits> {
        self.backends
            .iter()
            .filter(|b| b.kind == BackendKind::Hosted)
            .map(|b| {
                (
                    b.name.clone(),
                    QuotaLimits {
                        daily_token_limit: b.daily_token_limit,
                        rpm_limit: b.rpm_limit,
                    },
                )
            })
            .collect()
    }

    /// Pick a backend for `capability`. Infallible: the local fallback
    /// is the guaranteed terminal case.
    pub fn select(
        &self,
        capability: Capability,
        ledger: &QuotaLedger,
        now: DateTime<Utc>,
    ) -> BackendHandle {
        for entry in &self.backends {
            if entry.kind != BackendKind::Hosted {
                continue;
            }
            if !entry.capabilities.contains(&capability) {
                continue;
            }
            if ledger.within_limit(&entry.name, now) {
                return BackendHandle {
                    name: entry.name.clone(),
                    kind: BackendKind::Hosted,
                };
            }
            tracing::debug!(backend = %entry.name, "Skipping backend: quota exhausted");
        }

        // Prefer a local backend declaring the capability, but any
        // local backend serves as the terminal case.
        let local = self
            .backends
            .iter()
            .find(|b| b.kind == BackendKind::Local && b.capabilities.contains(&capability))
            .or_else(|| self.backends.iter().find(|b| b.kind == BackendKind::Local))
            .expect("Dispatcher::new guarantees a local backend");

        tracing::warn!(backend = %local.name, "Falling back to local backend");
        BackendHandle {
            name: local.name.clone(),
            kind: BackendKind::Local,
        }
    }
}
