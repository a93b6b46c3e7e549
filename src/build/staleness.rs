use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::BuildError;

/// Whether a compiled artifact still reflects its sources
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// The artifact exists and no source is newer
    Fresh,
    /// The artifact is missing
    Missing,
    /// This source was modified after the artifact was built
    Outdated(PathBuf),
}

impl Staleness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Staleness::Fresh)
    }
}

/// Timestamps relevant to one build, read from the filesystem on every query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildRecord {
    pub sources: Vec<(PathBuf, SystemTime)>,
    pub generated: Option<SystemTime>,
    pub artifact: PathBuf,
    pub artifact_modified: Option<SystemTime>,
}

impl BuildRecord {
    /// Read the modification times of `sources`, the generated file and the artifact
    ///
    /// Every source must exist. The generated file and the artifact may be absent.
    pub fn collect(
        sources: &[PathBuf],
        generated: &Path,
        artifact: &Path,
    ) -> Result<Self, BuildError> {
        let sources = sources
            .iter()
            .map(|path| {
                let modified = fs::metadata(path)
                    .and_then(|m| m.modified())
                    .map_err(|e| BuildError::io(path, e))?;
                Ok((path.clone(), modified))
            })
            .collect::<Result<Vec<_>, BuildError>>()?;

        Ok(Self {
            sources,
            generated: modified_if_exists(generated)?,
            artifact: artifact.to_path_buf(),
            artifact_modified: modified_if_exists(artifact)?,
        })
    }

    pub fn staleness(&self) -> Staleness {
        let Some(built) = self.artifact_modified else {
            return Staleness::Missing;
        };
        match self.sources.iter().find(|(_, modified)| *modified > built) {
            Some((path, _)) => Staleness::Outdated(path.clone()),
            None => Staleness::Fresh,
        }
    }
}

fn modified_if_exists(path: &Path) -> Result<Option<SystemTime>, BuildError> {
    match fs::metadata(path) {
        Ok(meta) => meta
            .modified()
            .map(Some)
            .map_err(|e| BuildError::io(path, e)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(BuildError::io(path, e)),
    }
}
