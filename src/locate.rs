//! Artifact discovery and path resolution
//!
//! Directory layout:
//!
//! ```text
//! <root>/
//! ├── datasets/                    reference text + schema pairs
//! │   ├── customer.csv
//! │   └── customer.schema
//! ├── release-1.0.0/               artifacts written by release 1.0.0
//! │   ├── customer.plain.col
//! │   └── customer.dict.col
//! ├── release-1.1.0-SNAPSHOT/
//! └── external/<producer>/<release>/customer.<producer>.col
//! ```
//!
//! Artifact names are `<dataset>[.<variant>].<extension>`; the dataset name is
//! everything before the first dot.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{CompatError, Result};
use crate::version::VersionId;

/// What an artifact is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactRole {
    /// Reference text rows
    SourceText,
    /// Columnar artifact written by some producer
    GeneratedColumnar,
    /// Text rows decoded from a columnar artifact
    GeneratedText,
}

/// File naming conventions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactLayout {
    pub text_extension: String,
    pub schema_extension: String,
    pub columnar_extension: String,
    /// Prefix of per-release directory names
    pub version_prefix: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        Self {
            text_extension: "csv".to_string(),
            schema_extension: "schema".to_string(),
            columnar_extension: "col".to_string(),
            version_prefix: "release-".to_string(),
        }
    }
}

impl ArtifactLayout {
    pub fn extension_for(&self, role: ArtifactRole) -> &str {
        match role {
            ArtifactRole::SourceText | ArtifactRole::GeneratedText => &self.text_extension,
            ArtifactRole::GeneratedColumnar => &self.columnar_extension,
        }
    }

    /// `<dataset>[.<variant>].<extension>`
    pub fn file_name(&self, dataset: &str, variant: Option<&str>, role: ArtifactRole) -> String {
        match variant {
            Some(variant) => format!("{}.{}.{}", dataset, variant, self.extension_for(role)),
            None => format!("{}.{}", dataset, self.extension_for(role)),
        }
    }

    /// Directory name used for a release's artifacts
    pub fn version_dir_name(&self, version: &VersionId) -> String {
        format!("{}{}", self.version_prefix, version)
    }
}

/// A reference dataset: text rows plus sibling schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetRef {
    pub name: String,
    pub text_path: PathBuf,
    pub schema_path: PathBuf,
}

/// A release directory whose name parsed as a version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionDir {
    pub name: String,
    pub path: PathBuf,
    pub version: VersionId,
}

/// A resolved artifact location
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub path: PathBuf,
    pub role: ArtifactRole,
    pub dataset: String,
    pub version: Option<VersionId>,
    pub variant: Option<String>,
    /// Whether the file existed at resolution time
    pub exists: bool,
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.path.display())
    }
}

/// Logical dataset name of a file: its name up to the first dot.
pub fn dataset_name(path: &Path) -> Result<String> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| CompatError::InvalidArtifactName {
            path: path.to_path_buf(),
            reason: "no UTF-8 file name".to_string(),
        })?;
    let name = file_name.split('.').next().unwrap_or_default();
    if name.is_empty() {
        return Err(CompatError::InvalidArtifactName {
            path: path.to_path_buf(),
            reason: "empty dataset name".to_string(),
        });
    }
    Ok(name.to_string())
}

/// Sibling file with the same base name and a different extension
pub fn sibling_with_extension(path: &Path, extension: &str) -> PathBuf {
    path.with_extension(extension)
}

fn is_hidden(name: &str) -> bool {
    name.starts_with('.')
}

/// Immediate children of `dir`, sorted by name. A missing directory is empty.
fn children(dir: &Path) -> impl Iterator<Item = walkdir::DirEntry> {
    WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
}

/// Lazily list `<dir>/<prefix><version>` subdirectories.
///
/// Hidden entries and names that do not parse as a version are skipped.
pub fn list_version_dirs<'a>(dir: &Path, prefix: &'a str) -> impl Iterator<Item = VersionDir> + 'a {
    children(dir).filter_map(move |entry| {
        if !entry.file_type().is_dir() {
            return None;
        }
        let name = entry.file_name().to_str()?.to_string();
        if is_hidden(&name) {
            return None;
        }
        let suffix = name.strip_prefix(prefix)?;
        match VersionId::parse(suffix) {
            Ok(version) => Some(VersionDir {
                path: entry.path().to_path_buf(),
                name,
                version,
            }),
            Err(e) => {
                warn!(directory = %name, error = %e, "skipping directory with unparseable version");
                None
            }
        }
    })
}

/// Resolves artifact paths under a fixed layout.
#[derive(Debug, Clone, Default)]
pub struct ArtifactLocator {
    layout: ArtifactLayout,
}

impl ArtifactLocator {
    pub fn new(layout: ArtifactLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    /// Every reference text file in `base_dir`, sorted by file name.
    pub fn resolve_datasets(&self, base_dir: &Path) -> Result<Vec<DatasetRef>> {
        if !base_dir.is_dir() {
            return Err(CompatError::ArtifactNotFound {
                path: base_dir.to_path_buf(),
            });
        }
        let suffix = format!(".{}", self.layout.text_extension);
        let mut datasets = Vec::new();
        for entry in children(base_dir) {
            if !entry.file_type().is_file() {
                continue;
            }
            let Some(file_name) = entry.file_name().to_str() else { continue };
            if is_hidden(file_name) || !file_name.ends_with(&suffix) {
                continue;
            }
            let text_path = entry.path().to_path_buf();
            let name = dataset_name(&text_path)?;
            let schema_path = sibling_with_extension(&text_path, &self.layout.schema_extension);
            debug!(dataset = %name, path = %text_path.display(), "found dataset");
            datasets.push(DatasetRef {
                name,
                text_path,
                schema_path,
            });
        }
        Ok(datasets)
    }

    /// Release directories strictly older than `current`, ascending.
    pub fn discover_prior_versions(&self, base_dir: &Path, current: &VersionId) -> Vec<VersionDir> {
        let mut prior: Vec<VersionDir> = list_version_dirs(base_dir, &self.layout.version_prefix)
            .filter(|dir| dir.version.compare_full(current).is_lt())
            .collect();
        prior.sort_by(|a, b| a.version.compare_full(&b.version));
        prior
    }

    /// Unprefixed release directories on the same major.minor line as `current`, ascending.
    pub fn discover_same_line_versions(&self, base_dir: &Path, current: &VersionId) -> Vec<VersionDir> {
        let mut matching: Vec<VersionDir> = list_version_dirs(base_dir, "")
            .filter(|dir| dir.version.same_line_as(current))
            .collect();
        matching.sort_by(|a, b| a.version.compare_full(&b.version));
        matching
    }

    /// Resolve `<dir>/<dataset>[.<variant>].<ext>`, where `dir` is the
    /// release directory when given and `base_dir` otherwise.
    ///
    /// A missing file is an error when `must_exist`; otherwise it is logged
    /// and returned so the caller can skip it.
    pub fn resolve_artifact(
        &self,
        base_dir: &Path,
        dataset: &str,
        version: Option<&VersionDir>,
        variant: Option<&str>,
        role: ArtifactRole,
        must_exist: bool,
    ) -> Result<ArtifactRef> {
        let dir = version.map(|v| v.path.as_path()).unwrap_or(base_dir);
        let path = dir.join(self.layout.file_name(dataset, variant, role));
        let exists = path.is_file();
        if !exists {
            if must_exist {
                return Err(CompatError::ArtifactNotFound { path });
            }
            warn!(path = %path.display(), "artifact does not exist");
        }
        Ok(ArtifactRef {
            path,
            role,
            dataset: dataset.to_string(),
            version: version.map(|v| v.version.clone()),
            variant: variant.map(str::to_string),
            exists,
        })
    }

    /// Resolve an output location in `dir`, creating `dir` if needed.
    ///
    /// An existing file is deleted only when `replace` is set; otherwise the
    /// call fails with `ArtifactAlreadyExists`.
    pub fn prepare_output(
        &self,
        dir: &Path,
        dataset: &str,
        version: Option<&VersionId>,
        variant: Option<&str>,
        role: ArtifactRole,
        replace: bool,
    ) -> Result<ArtifactRef> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.layout.file_name(dataset, variant, role));
        if path.exists() {
            if !replace {
                return Err(CompatError::ArtifactAlreadyExists { path });
            }
            info!(path = %path.display(), "removing previous output");
            fs::remove_file(&path)?;
        }
        Ok(ArtifactRef {
            path,
            role,
            dataset: dataset.to_string(),
            version: version.cloned(),
            variant: variant.map(str::to_string),
            exists: false,
        })
    }
}

/// Fail with `ArtifactAlreadyExists` if `path` is present.
pub fn ensure_absent(path: &Path) -> Result<()> {
    if path.exists() {
        return Err(CompatError::ArtifactAlreadyExists {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, "").unwrap();
    }

    #[test]
    fn test_dataset_name_stops_at_first_dot() {
        assert_eq!(dataset_name(Path::new("/x/customer.plain.csv")).unwrap(), "customer");
        assert!(dataset_name(Path::new("/x/.csv")).is_err());
    }

    #[test]
    fn test_resolve_datasets() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("orders.csv"));
        touch(&dir.path().join("customer.csv"));
        touch(&dir.path().join("customer.schema"));
        touch(&dir.path().join("notes.txt"));
        touch(&dir.path().join(".hidden.csv"));

        let locator = ArtifactLocator::default();
        let datasets = locator.resolve_datasets(dir.path()).unwrap();
        let names: Vec<_> = datasets.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["customer", "orders"]);
        assert_eq!(datasets[0].schema_path, dir.path().join("customer.schema"));
    }

    #[test]
    fn test_discover_prior_versions_sorted() {
        let dir = tempdir().unwrap();
        for name in [
            "release-1.2.0",
            "release-1.0.0",
            "release-1.1.0-SNAPSHOT",
            "release-1.1.0",
            "release-2.0.0",
            "release-garbage",
            "other-0.1.0",
        ] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        touch(&dir.path().join("release-0.9.0"));

        let locator = ArtifactLocator::default();
        let current = VersionId::parse("1.2.0").unwrap();
        let prior = locator.discover_prior_versions(dir.path(), &current);
        let names: Vec<_> = prior.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["release-1.0.0", "release-1.1.0-SNAPSHOT", "release-1.1.0"]
        );
    }

    #[test]
    fn test_snapshot_of_current_is_prior() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("release-1.2.0-SNAPSHOT")).unwrap();
        let locator = ArtifactLocator::default();
        let prior = locator.discover_prior_versions(dir.path(), &VersionId::parse("1.2.0").unwrap());
        assert_eq!(prior.len(), 1);
    }

    #[test]
    fn test_same_line_versions() {
        let dir = tempdir().unwrap();
        for name in ["1.2.0", "1.2.7", "1.3.0", ".git"] {
            fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        let locator = ArtifactLocator::default();
        let found = locator.discover_same_line_versions(dir.path(), &VersionId::parse("1.2.3").unwrap());
        let names: Vec<_> = found.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["1.2.0", "1.2.7"]);
    }

    #[test]
    fn test_resolve_artifact_missing() {
        let dir = tempdir().unwrap();
        let locator = ArtifactLocator::default();

        let err = locator
            .resolve_artifact(dir.path(), "customer", None, Some("plain"), ArtifactRole::GeneratedColumnar, true)
            .unwrap_err();
        assert!(err.is_recoverable());

        let found = locator
            .resolve_artifact(dir.path(), "customer", None, Some("plain"), ArtifactRole::GeneratedColumnar, false)
            .unwrap();
        assert!(!found.exists);
        assert_eq!(found.path, dir.path().join("customer.plain.col"));
    }

    #[test]
    fn test_prepare_output_never_silently_overwrites() {
        let dir = tempdir().unwrap();
        let out_dir = dir.path().join("nested/out");
        let locator = ArtifactLocator::default();

        let first = locator
            .prepare_output(&out_dir, "customer", None, Some("dict"), ArtifactRole::GeneratedColumnar, false)
            .unwrap();
        fs::write(&first.path, "x").unwrap();

        let err = locator
            .prepare_output(&out_dir, "customer", None, Some("dict"), ArtifactRole::GeneratedColumnar, false)
            .unwrap_err();
        assert!(matches!(err, CompatError::ArtifactAlreadyExists { .. }));

        let replaced = locator
            .prepare_output(&out_dir, "customer", None, Some("dict"), ArtifactRole::GeneratedColumnar, true)
            .unwrap();
        assert!(!replaced.path.exists());
    }
}
