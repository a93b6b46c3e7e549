use dashmap::DashMap;
use lazy_static::lazy_static;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

lazy_static! {
    static ref ARTIFACT_LOCKS: DashMap<PathBuf, Arc<Mutex<()>>> = DashMap::new();
}

/// Process-wide single-writer lock for one artifact path
pub(crate) fn artifact_lock(artifact: &Path) -> Arc<Mutex<()>> {
    ARTIFACT_LOCKS
        .entry(artifact.to_path_buf())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .value()
        .clone()
}
