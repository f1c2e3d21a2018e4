// src/infra/paths.rs — Path management
//
// All paths respect the ARF_HOME environment variable for isolation.
// When ARF_HOME is set, everything lives under that directory. When
// unset, config uses ~/.arf/ and data uses the platform data dir.

use directories::ProjectDirs;
use std::path::PathBuf;
use std::sync::OnceLock;

static PROJECT_DIRS: OnceLock<ProjectDirs> = OnceLock::new();

fn project_dirs() -> &'static ProjectDirs {
    PROJECT_DIRS.get_or_init(|| {
        ProjectDirs::from("", "", "arf").expect("Could not determine home directory")
    })
}

/// Returns the ARF_HOME override, if set.
fn arf_home() -> Option<PathBuf> {
    std::env::var_os("ARF_HOME").map(PathBuf::from)
}

/// Configuration directory: $ARF_HOME/ or ~/.arf/
pub fn config_dir() -> PathBuf {
    if let Some(home) = arf_home() {
        return home;
    }
    dirs_home().join(".arf")
}

/// Data directory: $ARF_HOME/data/ or the platform-local data dir.
pub fn data_dir() -> PathBuf {
    if let Some(home) = arf_home() {
        return home.join("data");
    }
    project_dirs().data_local_dir().to_path_buf()
}

/// Home directory
pub fn dirs_home() -> PathBuf {
    directories::BaseDirs::new()
        .expect("Could not determine home directory")
        .home_dir()
        .to_path_buf()
}

/// State directory: holds the engine checkpoint.
pub fn state_dir() -> PathBuf {
    config_dir().join("state")
}

/// Canonical checkpoint file.
pub fn checkpoint_path() -> PathBuf {
    state_dir().join("checkpoint.json")
}

/// Root under which disposable sandbox environments are provisioned.
pub fn sandbox_root() -> PathBuf {
    data_dir().join("sandboxes")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure all required directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    let dirs = [config_dir(), state_dir(), data_dir(), sandbox_root()];

    for dir in &dirs {
        tokio::fs::create_dir_all(dir).await?;
    }

    Ok(())
}
