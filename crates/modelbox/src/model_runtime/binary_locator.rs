//! Locates the `llama-server` executable for managed models.
//!
//! Release archives of llama.cpp unpack into build directories whose names
//! differ by platform, architecture, and release, so resolution walks a
//! fixed precedence chain: environment override, per-model config path,
//! flat layout, architecture-keyed build-directory scan, unscoped scan.
//! When nothing is found the flat expected path is returned anyway so the
//! failure surfaces at spawn time with a concrete path.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::catalog::ModelSpec;

/// Environment override consulted before any other source.
pub const ENV_SERVER_PATH: &str = "MODELBOX_LLAMA_SERVER_PATH";

/// Directory under the project root where runtime archives are unpacked.
const RUNTIME_ASSETS_DIR: &str = "runtimes/llama.cpp";

#[cfg(windows)]
pub const SERVER_BINARY: &str = "llama-server.exe";
#[cfg(not(windows))]
pub const SERVER_BINARY: &str = "llama-server";

pub struct BinaryLocator {
    project_root: PathBuf,
    override_path: Option<PathBuf>,
}

impl BinaryLocator {
    /// Captures the environment override once at construction; `locate`
    /// itself is then a pure function of the spec and the platform.
    pub fn from_env(project_root: PathBuf) -> Self {
        let override_path = env::var(ENV_SERVER_PATH).ok().map(PathBuf::from);
        Self::with_override(project_root, override_path)
    }

    pub fn with_override(project_root: PathBuf, override_path: Option<PathBuf>) -> Self {
        Self {
            project_root,
            override_path,
        }
    }

    pub fn locate(&self, spec: &ModelSpec) -> PathBuf {
        if let Some(path) = &self.override_path {
            info!("llama-server selected (override): {}", path.display());
            return path.clone();
        }

        if let Some(config_path) = &spec.server_path {
            let mut resolved = PathBuf::from(config_path);
            if resolved.is_relative() {
                resolved = self.project_root.join(resolved);
            }
            info!("llama-server selected (model config): {}", resolved.display());
            return resolved;
        }

        let base_dir = self.project_root.join(RUNTIME_ASSETS_DIR);

        let flat = base_dir.join(SERVER_BINARY);
        if flat.exists() {
            info!("llama-server selected (flat layout): {}", flat.display());
            return flat;
        }

        for suffix in pattern_order(env::consts::OS, env::consts::ARCH) {
            for build_dir in matching_build_dirs(&base_dir, suffix) {
                if let Some(found) = find_file(&build_dir, SERVER_BINARY) {
                    info!(
                        "llama-server selected (build match {}): {}",
                        build_dir
                            .file_name()
                            .map(|n| n.to_string_lossy().into_owned())
                            .unwrap_or_default(),
                        found.display()
                    );
                    return found;
                }
            }
        }

        if let Some(found) = find_file(&base_dir, SERVER_BINARY) {
            info!("llama-server selected (fallback scan): {}", found.display());
            return found;
        }

        // Spawn will fail with this exact path in the error, which tells
        // the operator where the binary was expected.
        debug!(
            "no llama-server found under {}; deferring failure to spawn",
            base_dir.display()
        );
        flat
    }
}

/// Build-directory name suffixes for (os, arch), preferred first. The
/// native architecture's pattern always comes before the alternate so a
/// wrong-architecture build is never picked while a right one exists.
fn pattern_order(os: &str, arch: &str) -> &'static [&'static str] {
    let arm = matches!(arch, "aarch64" | "arm64");
    match os {
        "windows" => &["-bin-win-cpu-x64"],
        "macos" if arm => &["-bin-macos-arm64", "-bin-macos-x64"],
        "macos" => &["-bin-macos-x64", "-bin-macos-arm64"],
        "linux" => &["-bin-ubuntu-x64"],
        _ => &[],
    }
}

/// Top-level directories of `base` whose name ends with `suffix`, sorted
/// lexicographically for deterministic selection.
fn matching_build_dirs(base: &Path, suffix: &str) -> Vec<PathBuf> {
    let entries = match fs::read_dir(base) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    let mut dirs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_dir()
                && path
                    .file_name()
                    .and_then(|name| name.to_str())
                    .map(|name| name.ends_with(suffix))
                    .unwrap_or(false)
        })
        .collect();
    dirs.sort();
    dirs
}

/// Depth-first search for a file named `name`, visiting entries in sorted
/// order so the result is stable across platforms.
fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    entries.sort();

    for entry in &entries {
        if entry.is_file() && entry.file_name() == Some(std::ffi::OsStr::new(name)) {
            return Some(entry.clone());
        }
    }
    for entry in &entries {
        if entry.is_dir() {
            if let Some(found) = find_file(entry, name) {
                return Some(found);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RuntimeKind;
    use std::fs::File;

    fn managed_spec(server_path: Option<&str>) -> ModelSpec {
        ModelSpec {
            id: "m1".to_string(),
            name: "M1".to_string(),
            runtime: RuntimeKind::LlamaCpp,
            artifact: Some("models/m1.gguf".to_string()),
            server_path: server_path.map(str::to_string),
            ..Default::default()
        }
    }

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        File::create(path).unwrap();
    }

    // ===== Precedence Tests =====

    #[test]
    fn test_override_wins_over_spec_path() {
        let root = tempfile::tempdir().unwrap();
        let locator = BinaryLocator::with_override(
            root.path().to_path_buf(),
            Some(PathBuf::from("/opt/custom/llama-server")),
        );

        let selected = locator.locate(&managed_spec(Some("bin/other-server")));
        assert_eq!(selected, PathBuf::from("/opt/custom/llama-server"));
    }

    #[test]
    fn test_spec_path_wins_over_flat_layout() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join(RUNTIME_ASSETS_DIR).join(SERVER_BINARY));

        let locator = BinaryLocator::with_override(root.path().to_path_buf(), None);
        let selected = locator.locate(&managed_spec(Some("bin/custom-server")));
        assert_eq!(selected, root.path().join("bin/custom-server"));
    }

    #[test]
    fn test_absolute_spec_path_is_kept_verbatim() {
        let root = tempfile::tempdir().unwrap();
        let locator = BinaryLocator::with_override(root.path().to_path_buf(), None);

        let selected = locator.locate(&managed_spec(Some("/usr/local/bin/llama-server")));
        assert_eq!(selected, PathBuf::from("/usr/local/bin/llama-server"));
    }

    #[test]
    fn test_flat_layout_found() {
        let root = tempfile::tempdir().unwrap();
        let flat = root.path().join(RUNTIME_ASSETS_DIR).join(SERVER_BINARY);
        touch(&flat);

        let locator = BinaryLocator::with_override(root.path().to_path_buf(), None);
        assert_eq!(locator.locate(&managed_spec(None)), flat);
    }

    #[test]
    fn test_build_dir_match_on_native_platform() {
        let patterns = pattern_order(env::consts::OS, env::consts::ARCH);
        if patterns.is_empty() {
            return;
        }

        let root = tempfile::tempdir().unwrap();
        let build_dir = root
            .path()
            .join(RUNTIME_ASSETS_DIR)
            .join(format!("b4521{}", patterns[0]));
        let binary = build_dir.join("build").join("bin").join(SERVER_BINARY);
        touch(&binary);

        let locator = BinaryLocator::with_override(root.path().to_path_buf(), None);
        assert_eq!(locator.locate(&managed_spec(None)), binary);
    }

    #[test]
    fn test_fallback_scan_ignores_directory_naming() {
        let root = tempfile::tempdir().unwrap();
        let binary = root
            .path()
            .join(RUNTIME_ASSETS_DIR)
            .join("hand-built")
            .join(SERVER_BINARY);
        touch(&binary);

        let locator = BinaryLocator::with_override(root.path().to_path_buf(), None);
        assert_eq!(locator.locate(&managed_spec(None)), binary);
    }

    #[test]
    fn test_nothing_found_returns_expected_flat_path() {
        let root = tempfile::tempdir().unwrap();
        let locator = BinaryLocator::with_override(root.path().to_path_buf(), None);

        let selected = locator.locate(&managed_spec(None));
        assert_eq!(
            selected,
            root.path().join(RUNTIME_ASSETS_DIR).join(SERVER_BINARY)
        );
        assert!(!selected.exists());
    }

    // ===== Pattern Table Tests =====

    #[test]
    fn test_macos_arm_prefers_arm_builds() {
        let order = pattern_order("macos", "aarch64");
        assert_eq!(order, ["-bin-macos-arm64", "-bin-macos-x64"]);
    }

    #[test]
    fn test_macos_x64_prefers_x64_builds() {
        let order = pattern_order("macos", "x86_64");
        assert_eq!(order, ["-bin-macos-x64", "-bin-macos-arm64"]);
    }

    #[test]
    fn test_linux_and_windows_have_single_pattern() {
        assert_eq!(pattern_order("linux", "x86_64"), ["-bin-ubuntu-x64"]);
        assert_eq!(pattern_order("windows", "x86_64"), ["-bin-win-cpu-x64"]);
    }

    #[test]
    fn test_unknown_os_has_no_patterns() {
        assert!(pattern_order("freebsd", "x86_64").is_empty());
    }

    // ===== Directory Scan Tests =====

    #[test]
    fn test_matching_build_dirs_sorted_and_filtered() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("b200-bin-ubuntu-x64")).unwrap();
        fs::create_dir_all(root.path().join("b100-bin-ubuntu-x64")).unwrap();
        fs::create_dir_all(root.path().join("b300-bin-win-cpu-x64")).unwrap();

        let dirs = matching_build_dirs(root.path(), "-bin-ubuntu-x64");
        assert_eq!(dirs.len(), 2);
        assert!(dirs[0].ends_with("b100-bin-ubuntu-x64"));
        assert!(dirs[1].ends_with("b200-bin-ubuntu-x64"));
    }

    #[test]
    fn test_matching_build_dirs_missing_base_is_empty() {
        let dirs = matching_build_dirs(Path::new("/nonexistent/base"), "-bin-ubuntu-x64");
        assert!(dirs.is_empty());
    }

    #[test]
    fn test_find_file_recurses_into_subdirectories() {
        let root = tempfile::tempdir().unwrap();
        let target = root.path().join("a").join("b").join("needle");
        touch(&target);
        touch(&root.path().join("z-other-file"));

        assert_eq!(find_file(root.path(), "needle"), Some(target));
        assert_eq!(find_file(root.path(), "absent"), None);
    }
}
