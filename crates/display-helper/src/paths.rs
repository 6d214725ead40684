//! On-disk layout resolution (spec §6, §4 supplemental): a single directory
//! holding the three snapshot tiers and the log file, with legacy-name
//! migration on first run.

use directories::ProjectDirs;
use std::path::{Path, PathBuf};

pub struct HelperPaths {
    pub root: PathBuf,
    pub current: PathBuf,
    pub previous: PathBuf,
    pub golden: PathBuf,
    pub legacy: PathBuf,
}

/// Mirrors the original's `compute_log_dir` fallback chain: platform data
/// directory, then an `APPDATA`-style environment variable, then a temp
/// directory, each tried in order until one can be created.
pub fn resolve() -> HelperPaths {
    let root = platform_data_dir()
        .or_else(env_data_dir)
        .unwrap_or_else(temp_data_dir);

    let _ = std::fs::create_dir_all(&root);

    HelperPaths {
        current: root.join("display_session_current.json"),
        previous: root.join("display_session_previous.json"),
        golden: root.join("display_golden_restore.json"),
        legacy: root.join("display_session_restore.json"),
        root,
    }
}

fn platform_data_dir() -> Option<PathBuf> {
    ProjectDirs::from("", "", "Sunshine").map(|dirs| dirs.data_dir().to_path_buf())
}

fn env_data_dir() -> Option<PathBuf> {
    std::env::var_os("APPDATA")
        .or_else(|| std::env::var_os("XDG_DATA_HOME"))
        .map(|base| Path::new(&base).join("Sunshine"))
}

fn temp_data_dir() -> PathBuf {
    std::env::temp_dir().join("Sunshine")
}

/// If `current` is absent but `legacy` exists, copy it to `current` and
/// remove the legacy file. Runs unconditionally at startup, not lazily on
/// first load (original_source behavior).
pub fn migrate_legacy_snapshot(paths: &HelperPaths) {
    if paths.current.exists() || !paths.legacy.exists() {
        return;
    }

    if std::fs::copy(&paths.legacy, &paths.current).is_ok() {
        let _ = std::fs::remove_file(&paths.legacy);
        tracing::info!(from = %paths.legacy.display(), to = %paths.current.display(), "migrated legacy snapshot");
    }
}
