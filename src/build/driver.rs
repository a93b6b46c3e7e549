use std::collections::VecDeque;
use std::env;
use std::fs;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use tracing::{debug, info, warn};

use crate::codegen::{BuildMode, CodegenOptions};
use crate::error::{ArtifactError, BuildError, ToolchainError};

/// Environment variable selecting a path dependency on this crate in generated manifests
pub const LOCAL_ENV: &str = "HYDROCOMP_LOCAL";

/// Compiles a generated crate
///
/// Implementations must leave the native library somewhere below `target_dir`.
pub trait Toolchain: Send + Sync {
    fn build(&self, crate_dir: &Path, target_dir: &Path, module: &str)
        -> Result<(), ToolchainError>;
}

/// The cargo executable of the current user
#[derive(Debug, Clone)]
pub struct Cargo {
    program: String,
}

impl Cargo {
    pub fn locate() -> Self {
        Self {
            program: find_cargo(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }
}

impl Toolchain for Cargo {
    fn build(
        &self,
        crate_dir: &Path,
        target_dir: &Path,
        module: &str,
    ) -> Result<(), ToolchainError> {
        info!(module, program = %self.program, "compiling");
        let mut child = Command::new(&self.program)
            .arg("build")
            .arg("--release")
            .arg("--target-dir")
            .arg(target_dir)
            .current_dir(crate_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ToolchainError::Launch {
                program: self.program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(stream_output);
        let stderr = child.stderr.take().map(stream_output);

        let status = child.wait().map_err(|source| ToolchainError::Launch {
            program: self.program.clone(),
            source,
        })?;
        if let Some(handle) = stdout {
            handle.join().unwrap_or_default();
        }
        let diagnostics = stderr
            .map(|handle| handle.join().unwrap_or_default())
            .unwrap_or_default();

        if !status.success() {
            return Err(ToolchainError::Failed {
                module: module.to_string(),
                status: status.to_string(),
                diagnostics,
            });
        }
        Ok(())
    }
}

/// Forward compiler output to the log line by line, returning everything read
fn stream_output<R: Read + Send + 'static>(reader: R) -> thread::JoinHandle<String> {
    thread::spawn(move || {
        let mut captured = String::new();
        for line in BufReader::new(reader).lines() {
            let Ok(line) = line else {
                break;
            };
            debug!(target: "hydrocomp::compiler", "{}", line);
            captured.push_str(&line);
            captured.push('\n');
        }
        captured
    })
}

/// Finds the cargo executable, checking common installation locations.
///
/// Processes started outside a login shell may not see the user's `PATH`.
/// Checks in order:
/// 1. `cargo` on `PATH`
/// 2. `CARGO_HOME/bin/cargo`
/// 3. `~/.cargo/bin/cargo`
/// 4. Platform-specific fallback locations
fn find_cargo() -> String {
    if let Ok(output) = Command::new("cargo").arg("--version").output() {
        if output.status.success() {
            return "cargo".to_string();
        }
    }

    if let Ok(cargo_home) = env::var("CARGO_HOME") {
        let cargo_path = PathBuf::from(&cargo_home)
            .join("bin")
            .join(cargo_exe_name());
        if cargo_path.exists() {
            return cargo_path.to_string_lossy().to_string();
        }
    }

    let home = env::var("HOME")
        .or_else(|_| env::var("USERPROFILE"))
        .unwrap_or_default();
    if !home.is_empty() {
        let standard_path = PathBuf::from(&home)
            .join(".cargo")
            .join("bin")
            .join(cargo_exe_name());
        if standard_path.exists() {
            return standard_path.to_string_lossy().to_string();
        }
    }

    #[cfg(target_os = "windows")]
    let candidates: &[&str] = &[
        "C:\\Program Files\\Rust stable MSVC\\bin\\cargo.exe",
        "C:\\Program Files\\Rust stable GNU\\bin\\cargo.exe",
    ];
    #[cfg(target_os = "macos")]
    let candidates: &[&str] = &["/opt/homebrew/bin/cargo", "/usr/local/bin/cargo"];
    #[cfg(not(any(target_os = "windows", target_os = "macos")))]
    let candidates: &[&str] = &["/usr/local/bin/cargo", "/usr/bin/cargo", "/snap/bin/cargo"];

    for candidate in candidates {
        if PathBuf::from(candidate).exists() {
            return candidate.to_string();
        }
    }

    // Let the launch fail with a clear error
    "cargo".to_string()
}

#[inline]
fn cargo_exe_name() -> &'static str {
    if cfg!(target_os = "windows") {
        "cargo.exe"
    } else {
        "cargo"
    }
}

/// Manifest of a generated model crate
pub fn manifest(module: &str, options: CodegenOptions) -> String {
    let dependency = match env::var(LOCAL_ENV) {
        Ok(_) => {
            let manifest_dir = env!("CARGO_MANIFEST_DIR");
            let path = fs::canonicalize(manifest_dir).unwrap_or_else(|_| PathBuf::from(manifest_dir));
            let escaped = path
                .to_string_lossy()
                .replace('\\', "\\\\")
                .replace('"', "\\\"");
            format!(r#"hydrocomp = {{ path = "{}" }}"#, escaped)
        }
        Err(_) => format!(r#"hydrocomp = {{ version = "{}" }}"#, env!("CARGO_PKG_VERSION")),
    };
    let checks = options.mode == BuildMode::Safety;

    format!(
        r#"[package]
name = "{module}"
version = "0.1.0"
edition = "2021"

[lib]
crate-type = ["cdylib"]
path = "src/lib.rs"

[dependencies]
{dependency}

[profile.release]
overflow-checks = {checks}
debug-assertions = {checks}

[workspace]
"#
    )
}

pub fn write_manifest(path: &Path, module: &str, options: CodegenOptions) -> Result<(), BuildError> {
    fs::write(path, manifest(module, options)).map_err(|e| BuildError::io(path, e))
}

/// Name shape of a native library produced for `module`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPattern {
    pub prefix: String,
    pub suffix: String,
}

impl ArtifactPattern {
    /// The platform's library naming, e.g. `lib<module>` and `.so`
    pub fn native(module: &str) -> Self {
        Self {
            prefix: format!("{}{}", env::consts::DLL_PREFIX, module),
            suffix: env::consts::DLL_SUFFIX.to_string(),
        }
    }

    /// Toolchains may append platform tags between module name and extension
    pub fn matches(&self, file_name: &str) -> bool {
        file_name.len() >= self.prefix.len() + self.suffix.len()
            && file_name.starts_with(&self.prefix)
            && file_name.ends_with(&self.suffix)
    }
}

/// Search `root` breadth-first, entries sorted by name, for the first file matching `pattern`
pub fn find_artifact(
    root: &Path,
    module: &str,
    pattern: &ArtifactPattern,
) -> Result<PathBuf, BuildError> {
    let mut queue = VecDeque::from([root.to_path_buf()]);
    while let Some(dir) = queue.pop_front() {
        let mut entries = fs::read_dir(&dir)
            .map_err(|e| BuildError::io(&dir, e))?
            .map(|entry| entry.map(|e| e.path()))
            .collect::<io::Result<Vec<_>>>()
            .map_err(|e| BuildError::io(&dir, e))?;
        entries.sort();

        for path in entries {
            if path.is_dir() {
                queue.push_back(path);
            } else if path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| pattern.matches(n))
            {
                debug!(artifact = %path.display(), "found compiled module");
                return Ok(path);
            }
        }
    }
    Err(ArtifactError::NotFound {
        module: module.to_string(),
        prefix: pattern.prefix.clone(),
        suffix: pattern.suffix.clone(),
        root: root.to_path_buf(),
    }
    .into())
}

/// Move `from` to `to`, replacing any previous artifact
pub fn relocate(from: &Path, to: &Path) -> Result<(), BuildError> {
    if fs::rename(from, to).is_ok() {
        info!(artifact = %to.display(), "relocated compiled module");
        return Ok(());
    }
    warn!(
        from = %from.display(),
        to = %to.display(),
        "rename failed, copying compiled module instead"
    );
    let blocked = |source| ArtifactError::RelocationBlocked {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    };
    fs::copy(from, to).map_err(blocked)?;
    fs::remove_file(from).map_err(|e| BuildError::io(from, e))?;
    info!(artifact = %to.display(), "relocated compiled module");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manifest_follows_mode() {
        let text = manifest("hland_native", CodegenOptions::performance());
        assert!(text.contains("name = \"hland_native\""));
        assert!(text.contains("crate-type = [\"cdylib\"]"));
        assert!(text.contains("overflow-checks = false"));
        assert!(text.contains("hydrocomp = {"));

        let text = manifest("hland_native", CodegenOptions::safety());
        assert!(text.contains("overflow-checks = true"));
        assert!(text.contains("debug-assertions = true"));
    }

    #[test]
    fn test_pattern_accepts_platform_tags() {
        let pattern = ArtifactPattern {
            prefix: "libm_native".into(),
            suffix: ".so".into(),
        };
        assert!(pattern.matches("libm_native.so"));
        assert!(pattern.matches("libm_native.cpython-312-x86_64-linux-gnu.so"));
        assert!(!pattern.matches("libm_native.d"));
        assert!(!pattern.matches("libother.so"));
    }

    #[test]
    fn test_find_artifact_prefers_shallow_matches() {
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("release").join("deps");
        fs::create_dir_all(&deep).unwrap();
        fs::write(deep.join("libm.so"), b"deep").unwrap();
        fs::write(dir.path().join("release").join("libm.so"), b"shallow").unwrap();

        let pattern = ArtifactPattern {
            prefix: "libm".into(),
            suffix: ".so".into(),
        };
        let found = find_artifact(dir.path(), "m", &pattern).unwrap();
        assert_eq!(found, dir.path().join("release").join("libm.so"));
    }

    #[test]
    fn test_find_artifact_reports_search_root() {
        let dir = tempfile::tempdir().unwrap();
        let pattern = ArtifactPattern::native("m");
        let err = find_artifact(dir.path(), "m", &pattern).unwrap_err();
        assert!(matches!(
            err,
            BuildError::Artifact(ArtifactError::NotFound { ref root, .. }) if root == dir.path()
        ));
    }

    #[test]
    fn test_relocate_replaces_destination() {
        let dir = tempfile::tempdir().unwrap();
        let from = dir.path().join("new.so");
        let to = dir.path().join("m.so");
        fs::write(&from, b"new").unwrap();
        fs::write(&to, b"old").unwrap();
        relocate(&from, &to).unwrap();
        assert_eq!(fs::read(&to).unwrap(), b"new");
        assert!(!from.exists());
    }
}
