//! Package asset lookup
//!
//! Packages are expected to be pre-fetched into a local store laid out as
//! `<root>/<id>/<version>/lib/<tfm>/*.dll` (the layout of an extracted
//! package cache). Fetching from a remote index is not done here.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Result, ScriptpadError};
use crate::scripts::FrameworkVersion;

use super::reference::Asset;

/// Lowest `netX.0` framework folder considered compatible
const MIN_NET_MAJOR: u32 = 5;

/// Fallback framework folders tried after every `netX.0`
const NETSTANDARD_FALLBACKS: &[&str] = &["netstandard2.1", "netstandard2.0"];

/// Source of concrete files for a package reference
pub trait PackageProvider: Send + Sync {
    fn package_assets(
        &self,
        id: &str,
        version: &str,
        framework: FrameworkVersion,
    ) -> Result<Vec<Asset>>;
}

/// Reads packages from a local directory
#[derive(Debug, Clone)]
pub struct LocalPackageProvider {
    root: PathBuf,
}

impl LocalPackageProvider {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Package folder, matching the id exactly or lowercased
    fn package_dir(&self, id: &str, version: &str) -> Option<PathBuf> {
        [id.to_string(), id.to_ascii_lowercase()]
            .into_iter()
            .map(|name| self.root.join(name).join(version))
            .find(|dir| dir.is_dir())
    }
}

/// Framework folder names in preference order for the target
fn framework_candidates(framework: FrameworkVersion) -> Vec<String> {
    let mut candidates: Vec<String> = (MIN_NET_MAJOR..=framework.major())
        .rev()
        .map(|major| FrameworkVersion(major).moniker())
        .collect();
    candidates.extend(NETSTANDARD_FALLBACKS.iter().map(|s| s.to_string()));
    candidates
}

fn dll_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| ScriptpadError::io(dir, e))?;
    let mut files: Vec<PathBuf> = entries
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
        })
        .collect();
    files.sort();
    Ok(files)
}

impl PackageProvider for LocalPackageProvider {
    fn package_assets(
        &self,
        id: &str,
        version: &str,
        framework: FrameworkVersion,
    ) -> Result<Vec<Asset>> {
        let package_dir =
            self.package_dir(id, version)
                .ok_or_else(|| ScriptpadError::DependencyResolution {
                    reference: format!("{}@{}", id, version),
                    message: format!("not found in {}", self.root.display()),
                })?;

        let lib_dir = package_dir.join("lib");
        if !lib_dir.is_dir() {
            debug!(package = id, version, "Package has no lib folder");
            return Ok(Vec::new());
        }

        for tfm in framework_candidates(framework) {
            let tfm_dir = lib_dir.join(&tfm);
            if tfm_dir.is_dir() {
                debug!(package = id, version, tfm = %tfm, "Using package framework folder");
                return Ok(dll_files(&tfm_dir)?
                    .into_iter()
                    .map(Asset::from_file)
                    .collect());
            }
        }

        Err(ScriptpadError::DependencyResolution {
            reference: format!("{}@{}", id, version),
            message: format!("no assets compatible with {}", framework),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dependencies::AssemblyVersion;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"MZ").unwrap();
    }

    #[test]
    fn test_framework_candidates_order() {
        let candidates = framework_candidates(FrameworkVersion(7));
        assert_eq!(
            candidates,
            vec!["net7.0", "net6.0", "net5.0", "netstandard2.1", "netstandard2.0"]
        );
    }

    #[test]
    fn test_picks_closest_compatible_framework() {
        let root = tempfile::tempdir().unwrap();
        let pkg = root.path().join("humanizer").join("2.14.1").join("lib");
        touch(&pkg.join("net6.0").join("Humanizer.dll"));
        touch(&pkg.join("netstandard2.0").join("Humanizer.dll"));
        touch(&pkg.join("net6.0").join("Humanizer.xml"));

        let provider = LocalPackageProvider::new(root.path());
        let assets = provider
            .package_assets("Humanizer", "2.14.1", FrameworkVersion(8))
            .unwrap();

        assert_eq!(assets.len(), 1);
        assert!(assets[0].path.ends_with("net6.0/Humanizer.dll"));
        assert_eq!(assets[0].version, Some(AssemblyVersion::new(2, 14, 1, 0)));
    }

    #[test]
    fn test_netstandard_fallback() {
        let root = tempfile::tempdir().unwrap();
        touch(
            &root
                .path()
                .join("Dapper/2.1.0/lib/netstandard2.0/Dapper.dll"),
        );
        let provider = LocalPackageProvider::new(root.path());
        let assets = provider
            .package_assets("Dapper", "2.1.0", FrameworkVersion(8))
            .unwrap();
        assert_eq!(assets.len(), 1);
    }

    #[test]
    fn test_missing_package_is_resolution_error() {
        let root = tempfile::tempdir().unwrap();
        let provider = LocalPackageProvider::new(root.path());
        let err = provider
            .package_assets("Nope", "1.0.0", FrameworkVersion(8))
            .unwrap_err();
        assert!(matches!(err, ScriptpadError::DependencyResolution { .. }));
    }

    #[test]
    fn test_incompatible_framework_is_resolution_error() {
        let root = tempfile::tempdir().unwrap();
        touch(&root.path().join("Future/1.0.0/lib/net9.0/Future.dll"));
        let provider = LocalPackageProvider::new(root.path());
        assert!(provider
            .package_assets("Future", "1.0.0", FrameworkVersion(8))
            .is_err());
    }
}
