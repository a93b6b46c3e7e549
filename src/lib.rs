//! Generate, compile and keep up to date native implementations of
//! hydrological models.
//!
//! A [ModelDescriptor] declares a model's parameter and sequence groups,
//! its constants and its routines. [CodeGenerator] turns a validated
//! descriptor into the source of a Rust `cdylib`, translating the routines
//! into methods of a generated `Model` type. [ModelBuild] detects whether a
//! previously compiled artifact is stale and, if so, regenerates and
//! compiles it.
//!
//! ```ignore
//! use hydrocomp::*;
//!
//! let descriptor = ModelDescriptor::from_json(&std::fs::read_to_string("lland.json")?)?;
//! let build = ModelBuild::new(descriptor, "build/models").sources(["models/lland.py"]);
//! match build.ensure_up_to_date(&Cargo::locate())? {
//!     BuildOutcome::Fresh => println!("reusing {}", build.paths().artifact.display()),
//!     BuildOutcome::Rebuilt => println!("rebuilt {}", build.paths().artifact.display()),
//! }
//! ```
//!
//! Generated crates depend on this crate for the [runtime] support types.

pub mod build;
pub mod codegen;
pub mod descriptor;
pub mod error;
#[cfg(feature = "load")]
pub mod load;
pub mod runtime;
pub mod translate;

pub use build::{ensure_all_up_to_date, BuildOutcome, BuildPaths, Cargo, ModelBuild, Toolchain};
pub use codegen::{BuildMode, CodeGenerator, CodegenOptions, GeneratedSource};
pub use descriptor::{
    ConstValue, ElementKind, Field, Group, GroupKind, ModelDescriptor, Ndim, ValidatedDescriptor,
};
pub use error::{ArtifactError, BuildError, DescriptorError, ToolchainError, TranslateError};
#[cfg(feature = "load")]
pub use load::{CompiledModel, LoadError};
pub use translate::{FunctionTranslator, TranslatedRoutine};
