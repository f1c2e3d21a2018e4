// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::backend::{BackendKind, Capability};
use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub sandbox: SandboxConfig,

    #[serde(default)]
    pub documents: DocumentsConfig,

    /// Backends in declared preference order. The dispatcher appends a
    /// built-in local fallback if none of these is local.
    #[serde(default)]
    pub backends: Vec<BackendEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory scanned for new conversation exports.
    pub input_dir: PathBuf,
    /// Admission cap for sandbox runs per cycle. Excess requests stay
    /// queued for the next cycle.
    pub max_concurrent_validations: usize,
    /// Pending-validation depth that triggers a synthesis pass.
    pub synthesis_pending_threshold: usize,
    /// Hours since the last checkpoint that trigger a synthesis pass.
    pub synthesis_interval_hours: i64,
    /// Pause after an unexpected cycle failure before retrying.
    pub cooldown_secs: u64,
    pub idle_active_secs: u64,
    pub idle_comments_secs: u64,
    pub idle_quiet_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./input"),
            max_concurrent_validations: 3,
            synthesis_pending_threshold: 5,
            synthesis_interval_hours: 6,
            cooldown_secs: 60,
            idle_active_secs: 300,
            idle_comments_secs: 600,
            idle_quiet_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Interpreter used to run generated validation programs.
    pub interpreter: String,
    /// Hard wall-clock limit per run.
    pub timeout_secs: u64,
    /// Environments older than this are removed by the reclamation pass.
    pub retention_hours: u64,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".into(),
            timeout_secs: 300,
            retention_hours: 24,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentsConfig {
    /// Directory holding the framework document, appendices and feeds.
    pub output_dir: PathBuf,
    /// Main document file name, scanned for comment and reference markers.
    pub main_doc: String,
}

impl Default for DocumentsConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            main_doc: "framework.tex".into(),
        }
    }
}

/// One `[[backends]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendEntry {
    pub name: String,
    pub kind: BackendKind,
    #[serde(default = "all_capabilities")]
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_daily_token_limit")]
    pub daily_token_limit: u64,
    #[serde(default = "default_rpm_limit")]
    pub rpm_limit: u32,
}

fn all_capabilities() -> Vec<Capability> {
    vec![
        Capability::Extraction,
        Capability::Reasoning,
        Capability::Synthesis,
    ]
}

fn default_daily_token_limit() -> u64 {
    1_000_000
}

fn default_rpm_limit() -> u32 {
    60
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.engine.max_concurrent_validations, 3);
        assert_eq!(c.engine.synthesis_pending_threshold, 5);
        assert_eq!(c.engine.synthesis_interval_hours, 6);
        assert_eq!(c.engine.cooldown_secs, 60);
        assert_eq!(c.engine.idle_quiet_secs, 1800);
        assert_eq!(c.sandbox.timeout_secs, 300);
        assert_eq!(c.sandbox.interpreter, "python3");
        assert!(c.backends.is_empty());
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.engine.max_concurrent_validations, 3);
        assert_eq!(config.documents.main_doc, "framework.tex");
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[engine]
input_dir = "/srv/arf/input"
max_concurrent_validations = 5
synthesis_pending_threshold = 8
synthesis_interval_hours = 12
cooldown_secs = 30
idle_active_secs = 60
idle_comments_secs = 120
idle_quiet_secs = 600

[sandbox]
interpreter = "python3.12"
timeout_secs = 120
retention_hours = 6

[documents]
output_dir = "/srv/arf/output"
main_doc = "framework.md"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.engine.max_concurrent_validations, 5);
        assert_eq!(config.engine.idle_quiet_secs, 600);
        assert_eq!(config.sandbox.interpreter, "python3.12");
        assert_eq!(config.sandbox.retention_hours, 6);
        assert_eq!(config.documents.main_doc, "framework.md");
    }

    #[test]
    fn test_parse_backends_toml() {
        let toml_str = r#"
[[backends]]
name = "gpt-4o"
kind = "hosted"
capabilities = ["extraction", "reasoning"]
daily_token_limit = 500000
rpm_limit = 30

[[backends]]
name = "ollama"
kind = "local"
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].name, "gpt-4o");
        assert_eq!(config.backends[0].kind, BackendKind::Hosted);
        assert_eq!(config.backends[0].capabilities.len(), 2);
        assert_eq!(config.backends[0].daily_token_limit, 500_000);
        assert_eq!(config.backends[1].kind, BackendKind::Local);
        // Defaults fill in for the terse local entry
        assert_eq!(config.backends[1].capabilities.len(), 3);
        assert_eq!(config.backends[1].rpm_limit, 60);
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.engine.max_concurrent_validations,
            config.engine.max_concurrent_validations
        );
        assert_eq!(deserialized.sandbox.timeout_secs, config.sandbox.timeout_secs);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
