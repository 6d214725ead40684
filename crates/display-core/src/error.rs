//! Error types surfaced by the core crate's few fallible entry points.
//! Most of the state machine's own logic cannot fail — a port returning a
//! bad status is represented as data (`ApplyStatus`), not `Err` — so this
//! enum only covers construction-time and persistence-boundary failures.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("failed to read snapshot directory {path}: {source}")]
    SnapshotDirUnavailable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot file {path} contained invalid JSON: {source}")]
    SnapshotCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}
