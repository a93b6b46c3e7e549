//! Error types for descriptor validation, translation and building
//!
//! Every error here is fatal for the current `ensure_up_to_date` call. The
//! pipeline keeps no partial state, so callers may retry from scratch.

use std::path::PathBuf;

use thiserror::Error;

/// A malformed or internally inconsistent model descriptor
#[derive(Debug, Error)]
pub enum DescriptorError {
    /// Failed to parse JSON
    #[error("Failed to parse model descriptor: {0}")]
    ParseError(#[from] serde_json::Error),

    /// Dimensionality outside 0..=3
    #[error("Invalid dimensionality {0}, expected a value between 0 and 3")]
    InvalidDimensionality(u8),

    /// Group name is not of the form `parameters.<name>` or `sequences.<name>`
    #[error("Invalid group name '{0}', expected 'parameters.<name>' or 'sequences.<name>'")]
    InvalidGroupName(String),

    /// Two groups share the same category name
    #[error("Duplicate group '{0}'")]
    DuplicateGroup(String),

    /// Field names must be unique within their group
    #[error("Duplicate field '{field}' in group '{group}'")]
    DuplicateField { group: String, field: String },

    /// Identifier unusable in generated code
    #[error("'{0}' is not a valid identifier for generated code")]
    InvalidIdentifier(String),

    /// Link fields only support dimensionality 0 and 1
    #[error("Link field '{field}' in group '{group}' has dimensionality {ndim}, expected 0 or 1")]
    LinkDimensionality {
        group: String,
        field: String,
        ndim: usize,
    },

    /// The link flag of a field disagrees with the category of its group
    #[error("Field '{field}' in group '{group}' has a link flag inconsistent with its group")]
    LinkFlagMismatch { group: String, field: String },

    /// Sequence values are always real numbers
    #[error("Sequence field '{field}' in group '{group}' must be of kind 'real'")]
    NonRealSequence { group: String, field: String },

    /// Flag set on a field whose group does not support it
    #[error("Field '{field}' in group '{group}' cannot be {flag}")]
    UnsupportedFlag {
        group: String,
        field: String,
        flag: &'static str,
    },

    /// Two groups resolve to the same shorthand
    #[error("Groups '{first}' and '{second}' share the shorthand '{shorthand}'")]
    ShorthandCollision {
        shorthand: String,
        first: String,
        second: String,
    },

    /// A method list names a routine that is not declared
    #[error("Method list '{list}' references unknown routine '{routine}'")]
    UnknownMethod { list: String, routine: String },

    /// Routine names must be unique
    #[error("Duplicate routine '{0}'")]
    DuplicateRoutine(String),

    /// Routine name collides with a generated routine
    #[error("Routine name '{0}' is reserved for generated code")]
    ReservedName(String),

    /// Duplicate constant
    #[error("Duplicate constant '{0}'")]
    DuplicateConstant(String),
}

/// Failure to translate a user-authored routine
#[derive(Debug, Error)]
pub enum TranslateError {
    /// Shorthand without a matching declared group
    #[error("Routine '{routine}' references unknown shorthand '{shorthand}'")]
    UnknownShorthand { routine: String, shorthand: String },

    /// Field not declared in the referenced group
    #[error("Routine '{routine}' references unknown field '{field}' of group '{group}'")]
    UnknownField {
        routine: String,
        group: String,
        field: String,
    },

    /// Model routine call that matches no declared or generated routine
    #[error("Routine '{routine}' calls unknown model routine '{callee}'")]
    UnknownRoutine { routine: String, callee: String },

    /// Bracket nesting does not balance
    #[error("Routine '{routine}' has unbalanced brackets near line {line}")]
    UnbalancedBrackets { routine: String, line: usize },

    /// Anything the parser does not understand
    #[error("Syntax error in routine '{routine}' at line {line}: {message}")]
    Syntax {
        routine: String,
        line: usize,
        message: String,
    },
}

impl TranslateError {
    /// Create a syntax error
    pub fn syntax(routine: impl Into<String>, line: usize, message: impl Into<String>) -> Self {
        Self::Syntax {
            routine: routine.into(),
            line,
            message: message.into(),
        }
    }
}

/// Failure of the external compiler
#[derive(Debug, Error)]
pub enum ToolchainError {
    /// The compiler could not be started
    #[error("Failed to launch '{program}': {source}")]
    Launch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The compiler ran and reported failure, diagnostics verbatim
    #[error("Compilation of '{module}' failed ({status}):\n{diagnostics}")]
    Failed {
        module: String,
        status: String,
        diagnostics: String,
    },
}

/// The compiled artifact could not be located or moved into place
#[derive(Debug, Error)]
pub enum ArtifactError {
    /// No file matched the expected prefix and suffix
    #[error(
        "After compiling module '{module}', no file starting with '{prefix}' and ending with \
         '{suffix}' was found in '{root}' or its subdirectories. The compiler output should \
         tell whether the file was stored elsewhere, named differently, or not built at all."
    )]
    NotFound {
        module: String,
        prefix: String,
        suffix: String,
        root: PathBuf,
    },

    /// The destination could not be replaced
    #[error(
        "Failed to move compiled module '{from}' to '{to}': {source}. A likely cause is that \
         the previous artifact is still loaded by another process. Close all processes using \
         it and build again."
    )]
    RelocationBlocked {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Aggregate error of an `ensure_up_to_date` call
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error(transparent)]
    Translate(#[from] TranslateError),

    #[error(transparent)]
    Toolchain(#[from] ToolchainError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    /// Filesystem failure on a specific path
    #[error("I/O error on '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_error_names_routine() {
        let err = TranslateError::UnknownShorthand {
            routine: "calc_q_v1".into(),
            shorthand: "xyz".into(),
        };
        let message = err.to_string();
        assert!(message.contains("calc_q_v1"));
        assert!(message.contains("xyz"));
    }

    #[test]
    fn test_relocation_error_carries_hint() {
        let err = ArtifactError::RelocationBlocked {
            from: PathBuf::from("/tmp/build/libm.so"),
            to: PathBuf::from("/tmp/m.so"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let message = err.to_string();
        assert!(message.contains("/tmp/m.so"));
        assert!(message.contains("Close all processes"));
    }

    #[test]
    fn test_build_error_from_conversions() {
        let err: BuildError = DescriptorError::DuplicateGroup("fluxes".into()).into();
        assert!(matches!(err, BuildError::Descriptor(_)));
        let err: BuildError = ArtifactError::NotFound {
            module: "m".into(),
            prefix: "libm".into(),
            suffix: ".so".into(),
            root: PathBuf::from("/tmp"),
        }
        .into();
        assert!(err.to_string().contains("/tmp"));
    }
}
