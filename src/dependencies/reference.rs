//! Reference and asset types
//!
//! A `Reference` is what a script asks for; an `Asset` is a concrete file
//! that satisfies it. A `ReferenceDependency` pairs a reference with who
//! needs it and how it gets loaded at run time.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

use crate::error::{Result, ScriptpadError};

/// Four-part assembly version (`major.minor.build.revision`)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct AssemblyVersion(pub [u32; 4]);

impl AssemblyVersion {
    pub fn new(major: u32, minor: u32, build: u32, revision: u32) -> Self {
        Self([major, minor, build, revision])
    }
}

impl FromStr for AssemblyVersion {
    type Err = ScriptpadError;

    /// Accepts one to four numeric parts; missing parts are zero.
    /// Pre-release suffixes (`1.2.3-beta`) are ignored.
    fn from_str(s: &str) -> Result<Self> {
        let core = s.trim().split(['-', '+']).next().unwrap_or_default();
        let parts: Vec<&str> = core.split('.').collect();
        if core.is_empty() || parts.len() > 4 {
            return Err(ScriptpadError::Configuration(format!(
                "Invalid assembly version '{}'",
                s
            )));
        }

        let mut version = [0u32; 4];
        for (slot, part) in version.iter_mut().zip(parts) {
            *slot = part.parse().map_err(|_| {
                ScriptpadError::Configuration(format!("Invalid assembly version '{}'", s))
            })?;
        }
        Ok(Self(version))
    }
}

impl fmt::Display for AssemblyVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{}.{}.{}.{}", a, b, c, d)
    }
}

/// An in-memory compiled assembly
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssemblyImage {
    pub name: String,
    pub version: Option<AssemblyVersion>,
    pub bytes: Arc<Vec<u8>>,
}

impl AssemblyImage {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            version: None,
            bytes: Arc::new(bytes),
        }
    }

    /// File name used when the image is written to disk
    pub fn file_name(&self) -> String {
        format!("{}.dll", self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reference {
    /// An assembly on disk
    AssemblyFile { path: PathBuf },
    /// An assembly held in memory
    AssemblyImage(AssemblyImage),
    /// A package from the local package store
    Package { id: String, version: String },
}

impl Reference {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self::AssemblyFile { path: path.into() }
    }

    pub fn package(id: impl Into<String>, version: impl Into<String>) -> Self {
        Self::Package {
            id: id.into(),
            version: version.into(),
        }
    }

    pub fn ensure_valid(&self) -> Result<()> {
        match self {
            Self::AssemblyFile { path } if path.as_os_str().is_empty() => Err(
                ScriptpadError::Configuration("Assembly reference path is empty".to_string()),
            ),
            Self::AssemblyImage(image) if image.name.trim().is_empty() => Err(
                ScriptpadError::Configuration("Assembly image has no name".to_string()),
            ),
            Self::AssemblyImage(image) if image.bytes.is_empty() => Err(
                ScriptpadError::Configuration(format!("Assembly image '{}' is empty", image.name)),
            ),
            Self::Package { id, version } if id.trim().is_empty() || version.trim().is_empty() => {
                Err(ScriptpadError::Configuration(format!(
                    "Package reference '{}@{}' needs both an id and a version",
                    id, version
                )))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AssemblyFile { path } => write!(f, "{}", path.display()),
            Self::AssemblyImage(image) => write!(f, "{} (in memory)", image.name),
            Self::Package { id, version } => write!(f, "{}@{}", id, version),
        }
    }
}

/// A concrete file that satisfies a reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub path: PathBuf,
    /// Logical assembly name (file stem)
    pub name: String,
    pub version: Option<AssemblyVersion>,
}

impl Asset {
    pub fn new(path: impl Into<PathBuf>, version: Option<AssemblyVersion>) -> Self {
        let path = path.into();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            path,
            name,
            version,
        }
    }

    /// Asset for a file on disk, with the version guessed from its path
    pub fn from_file(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let version = infer_version_from_path(&path);
        Self::new(path, version)
    }

    /// Managed assemblies are the ones the compiler can reference
    pub fn is_managed(&self) -> bool {
        self.path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("dll"))
    }
}

/// Finds the nearest ancestor directory that looks like a version
/// (`packages/Foo/1.2.3/lib/net8.0/Foo.dll` -> 1.2.3).
fn infer_version_from_path(path: &Path) -> Option<AssemblyVersion> {
    path.parent()?
        .components()
        .rev()
        .filter_map(|c| c.as_os_str().to_str())
        .filter(|s| s.contains('.') && s.starts_with(|c: char| c.is_ascii_digit()))
        .find_map(|s| s.parse().ok())
}

/// Who needs a dependency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dependant {
    Script,
    Host,
    Shared,
}

/// How a dependency is made available at run time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoadStrategy {
    /// Copied next to the script assembly before it starts
    DeployAndLoad,
    /// Loaded from wherever it already lives
    LoadInPlace,
}

/// A reference plus its resolved assets.
///
/// Assets are filled in exactly once by the resolver; until then (or when
/// resolution failed) the asset list is empty.
#[derive(Debug)]
pub struct ReferenceDependency {
    pub reference: Reference,
    pub dependant: Dependant,
    pub load_strategy: LoadStrategy,
    assets: OnceLock<Vec<Asset>>,
}

impl ReferenceDependency {
    pub fn new(reference: Reference, dependant: Dependant, load_strategy: LoadStrategy) -> Self {
        Self {
            reference,
            dependant,
            load_strategy,
            assets: OnceLock::new(),
        }
    }

    pub fn assets(&self) -> &[Asset] {
        self.assets.get().map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_resolved(&self) -> bool {
        self.assets.get().is_some()
    }

    /// Returns false if assets were already set
    pub(crate) fn set_assets(&self, assets: Vec<Asset>) -> bool {
        self.assets.set(assets).is_ok()
    }
}

/// Keeps a single asset per logical assembly name (case-insensitive),
/// preferring the highest version. An unversioned asset loses to any
/// versioned one. First-seen order is preserved.
///
/// Versions come from the package store layout only (see
/// [`Asset::from_file`]); assembly metadata is never read. Explicit file
/// references and builtins outside a versioned directory are therefore
/// unversioned, and a package copy of the same assembly replaces them.
pub fn dedupe_by_version(assets: Vec<Asset>) -> Vec<Asset> {
    let mut kept: Vec<Asset> = Vec::with_capacity(assets.len());
    for asset in assets {
        let existing = kept
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(&asset.name));
        match existing {
            Some(current) => {
                if asset.version.cmp(&current.version) == Ordering::Greater {
                    *current = asset;
                }
            }
            None => kept.push(asset),
        }
    }
    kept
}

/// Drops assets whose path was already seen
pub fn dedupe_by_path(assets: Vec<Asset>) -> Vec<Asset> {
    let mut seen = HashSet::new();
    assets
        .into_iter()
        .filter(|a| seen.insert(a.path.clone()))
        .collect()
}
