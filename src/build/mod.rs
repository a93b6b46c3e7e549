//! Keeping compiled models up to date
//!
//! A [ModelBuild] ties a descriptor to the source files that define the
//! model and to fixed paths for the generated crate and the artifact.
//! [ModelBuild::ensure_up_to_date] checks staleness and, when needed,
//! regenerates the source, compiles it with a [Toolchain] and moves the
//! native library into place. Builds for the same artifact are serialized
//! process-wide; builds for different artifacts may run in parallel with
//! [ensure_all_up_to_date].

mod driver;
mod locks;
mod staleness;

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::info;

use crate::codegen::{BuildMode, CodeGenerator, CodegenOptions};
use crate::descriptor::ModelDescriptor;
use crate::error::BuildError;

pub use driver::{
    find_artifact, manifest, relocate, write_manifest, ArtifactPattern, Cargo, Toolchain,
    LOCAL_ENV,
};
pub use staleness::{BuildRecord, Staleness};

/// Fixed locations of one model's generated crate and artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    /// Name of the generated crate, `<model>_native`, or
    /// `<model>_native_safety` for [BuildMode::Safety]
    pub module: String,
    pub crate_dir: PathBuf,
    pub source: PathBuf,
    pub manifest: PathBuf,
    pub target_dir: PathBuf,
    /// Canonical location of the compiled library
    pub artifact: PathBuf,
}

impl BuildPaths {
    pub fn new(root: impl AsRef<Path>, model: &str, mode: BuildMode) -> Self {
        let root = root.as_ref();
        let module = match mode {
            BuildMode::Performance => format!("{}_native", model),
            BuildMode::Safety => format!("{}_native_safety", model),
        };
        let crate_dir = root.join(&module);
        Self {
            source: crate_dir.join("src").join("lib.rs"),
            manifest: crate_dir.join("Cargo.toml"),
            target_dir: crate_dir.join("target"),
            artifact: root.join(format!("{}{}", module, std::env::consts::DLL_SUFFIX)),
            crate_dir,
            module,
        }
    }
}

/// Result of a successful [ModelBuild::ensure_up_to_date]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    /// The existing artifact was reused
    Fresh,
    /// Source was regenerated and compiled
    Rebuilt,
}

/// One model kind and everything needed to rebuild it
#[derive(Debug, Clone)]
pub struct ModelBuild {
    descriptor: ModelDescriptor,
    sources: Vec<PathBuf>,
    root: PathBuf,
    paths: BuildPaths,
    options: CodegenOptions,
}

impl ModelBuild {
    /// Build `descriptor` below `root` in the default mode, with no tracked sources
    pub fn new(descriptor: ModelDescriptor, root: impl AsRef<Path>) -> Self {
        let options = CodegenOptions::default();
        let root = root.as_ref().to_path_buf();
        Self {
            paths: BuildPaths::new(&root, &descriptor.name, options.mode),
            descriptor,
            sources: Vec::new(),
            root,
            options,
        }
    }

    /// Files defining the model, compared against the artifact
    pub fn sources(mut self, sources: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.sources = sources.into_iter().map(Into::into).collect();
        self
    }

    /// Each build mode compiles into its own crate and artifact
    pub fn options(mut self, options: CodegenOptions) -> Self {
        self.options = options;
        self.paths = BuildPaths::new(&self.root, &self.descriptor.name, self.options.mode);
        self
    }

    pub fn paths(&self) -> &BuildPaths {
        &self.paths
    }

    pub fn record(&self) -> Result<BuildRecord, BuildError> {
        BuildRecord::collect(&self.sources, &self.paths.source, &self.paths.artifact)
    }

    /// Generate the source unit without touching the filesystem
    pub fn generate(&self) -> Result<String, BuildError> {
        let descriptor = self.descriptor.clone().validate()?;
        let source = CodeGenerator::new(&descriptor, self.options).generate()?;
        Ok(source.render())
    }

    /// Reuse the artifact if fresh, otherwise regenerate, compile and relocate it
    pub fn ensure_up_to_date(&self, toolchain: &dyn Toolchain) -> Result<BuildOutcome, BuildError> {
        let lock = locks::artifact_lock(&self.paths.artifact);
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let model = self.descriptor.name.as_str();
        match self.record()?.staleness() {
            Staleness::Fresh => {
                info!(model, artifact = %self.paths.artifact.display(), "compiled model is fresh");
                return Ok(BuildOutcome::Fresh);
            }
            Staleness::Missing => info!(model, "no compiled model yet"),
            Staleness::Outdated(source) => {
                info!(model, source = %source.display(), "compiled model is stale")
            }
        }

        let text = self.generate()?;
        let src_dir = self.paths.crate_dir.join("src");
        fs::create_dir_all(&src_dir).map_err(|e| BuildError::io(&src_dir, e))?;
        fs::write(&self.paths.source, text).map_err(|e| BuildError::io(&self.paths.source, e))?;
        write_manifest(&self.paths.manifest, &self.paths.module, self.options)?;
        info!(model, source = %self.paths.source.display(), "wrote generated crate");

        toolchain.build(&self.paths.crate_dir, &self.paths.target_dir, &self.paths.module)?;
        let pattern = ArtifactPattern::native(&self.paths.module);
        let built = find_artifact(&self.paths.target_dir, &self.paths.module, &pattern)?;
        relocate(&built, &self.paths.artifact)?;
        Ok(BuildOutcome::Rebuilt)
    }
}

/// Bring several models up to date in parallel, one result per build in input order
pub fn ensure_all_up_to_date(
    builds: &[ModelBuild],
    toolchain: &dyn Toolchain,
) -> Vec<Result<BuildOutcome, BuildError>> {
    builds
        .par_iter()
        .map(|build| build.ensure_up_to_date(toolchain))
        .collect()
}
