//! Data connection and resource kind types

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use uuid::Uuid;

use crate::dependencies::{AssemblyImage, Reference, SourceCodeCollection};

/// An external data source whose access code is generated per framework
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataConnection {
    pub id: Uuid,
    pub name: String,
    /// Directory holding pre-scaffolded sources and `references.json`
    pub resources_dir: PathBuf,
}

impl DataConnection {
    /// The id is derived from the resources directory, so every script
    /// naming the same directory shares one cache entry.
    pub fn new(name: impl Into<String>, resources_dir: impl Into<PathBuf>) -> Self {
        let resources_dir = resources_dir.into();
        Self {
            id: connection_id(&resources_dir),
            name: name.into(),
            resources_dir,
        }
    }
}

/// Stable id for a resources directory. Canonicalizes when the directory
/// exists so `./db` and `/abs/path/db` agree.
fn connection_id(resources_dir: &Path) -> Uuid {
    let dir = std::fs::canonicalize(resources_dir).unwrap_or_else(|_| resources_dir.to_path_buf());
    let url = format!("file://{}", dir.display());
    Uuid::new_v5(&Uuid::NAMESPACE_URL, url.as_bytes())
}

/// The three independently cached resources of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    SourceCode,
    Assembly,
    RequiredReferences,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::SourceCode => "source code",
            Self::Assembly => "assembly",
            Self::RequiredReferences => "required references",
        };
        f.write_str(name)
    }
}

/// Everything generated for one (connection, framework) key
#[derive(Debug, Clone)]
pub struct ConnectionResources {
    pub source_code: Arc<SourceCodeCollection>,
    /// None when the generator produced no compiled assembly
    pub assembly: Arc<Option<AssemblyImage>>,
    pub required_references: Arc<Vec<Reference>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_directory_gives_same_id() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("northwind")).unwrap();

        let direct = DataConnection::new("northwind", dir.path().join("northwind"));
        let dotted = DataConnection::new("nw", dir.path().join(".").join("northwind"));
        assert_eq!(direct.id, dotted.id);
    }

    #[test]
    fn test_different_directories_differ() {
        let a = DataConnection::new("a", "/nowhere/a");
        let b = DataConnection::new("b", "/nowhere/b");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id, DataConnection::new("a", "/nowhere/a").id);
    }
}
