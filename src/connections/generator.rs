//! Connection resource generation
//!
//! Scaffolding data-access code from a live database is outside this
//! crate. `DirectoryResourcesGenerator` consumes what a scaffolding tool
//! left on disk:
//!
//! ```text
//! <resources_dir>/
//!   *.cs              generated data-access sources
//!   references.json   {"files": ["lib/Driver.dll"], "packages": [{"id": "...", "version": "..."}]}
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use tracing::{debug, instrument};

use crate::compilation::{CodeCompiler, CompilationInput, OutputKind};
use crate::dependencies::{
    AssemblyImage, PackageProvider, Reference, SourceCode, SourceCodeCollection,
};
use crate::error::{Result, ScriptpadError};
use crate::scripts::{FrameworkVersion, OptimizationLevel};

use super::types::DataConnection;

const REFERENCES_FILE: &str = "references.json";

/// Produces the cached resources of a data connection
pub trait ConnectionResourcesGenerator: Send + Sync {
    fn generate_source_code(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Result<SourceCodeCollection>;

    /// Compile the generated code. `None` means there is nothing to compile.
    fn generate_assembly(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
        code: &SourceCodeCollection,
    ) -> Result<Option<AssemblyImage>>;

    fn required_references(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
    ) -> Result<Vec<Reference>>;
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReferencesFile {
    #[serde(default)]
    files: Vec<PathBuf>,
    #[serde(default)]
    packages: Vec<PackageEntry>,
}

#[derive(Debug, Deserialize)]
struct PackageEntry {
    id: String,
    version: String,
}

/// Reads pre-scaffolded resources from the connection's directory
pub struct DirectoryResourcesGenerator {
    compiler: Arc<dyn CodeCompiler>,
    packages: Arc<dyn PackageProvider>,
}

impl DirectoryResourcesGenerator {
    pub fn new(compiler: Arc<dyn CodeCompiler>, packages: Arc<dyn PackageProvider>) -> Self {
        Self { compiler, packages }
    }

    fn read_references_file(dir: &Path) -> Result<ReferencesFile> {
        let path = dir.join(REFERENCES_FILE);
        if !path.is_file() {
            return Ok(ReferencesFile::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| ScriptpadError::io(&path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Assembly file paths for compiling the connection's own code
    fn compile_paths(&self, references: &[Reference], framework: FrameworkVersion) -> Result<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for reference in references {
            match reference {
                Reference::AssemblyFile { path } => paths.push(path.clone()),
                Reference::Package { id, version } => paths.extend(
                    self.packages
                        .package_assets(id, version, framework)?
                        .into_iter()
                        .filter(|a| a.is_managed())
                        .map(|a| a.path),
                ),
                Reference::AssemblyImage(_) => {}
            }
        }
        Ok(paths)
    }
}

/// Renders a collection as one compilation unit
fn render_collection(code: &SourceCodeCollection) -> String {
    let mut program = String::new();
    for namespace in code.namespaces() {
        program.push_str(&format!("using {};\n", namespace));
    }
    for source in &code.sources {
        program.push('\n');
        program.push_str(&source.code);
        program.push('\n');
    }
    program
}

impl ConnectionResourcesGenerator for DirectoryResourcesGenerator {
    #[instrument(skip_all, fields(connection = %connection.name))]
    fn generate_source_code(
        &self,
        connection: &DataConnection,
        _framework: FrameworkVersion,
    ) -> Result<SourceCodeCollection> {
        let dir = &connection.resources_dir;
        let entries = std::fs::read_dir(dir).map_err(|e| ScriptpadError::io(dir, e))?;

        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "cs"))
            .collect();
        files.sort();

        let mut sources = Vec::with_capacity(files.len());
        for file in files {
            let text = std::fs::read_to_string(&file).map_err(|e| ScriptpadError::io(&file, e))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            sources.push(SourceCode::parse(name, &text));
        }

        debug!(files = sources.len(), "Read connection sources");
        Ok(SourceCodeCollection::new(sources))
    }

    #[instrument(skip_all, fields(connection = %connection.name))]
    fn generate_assembly(
        &self,
        connection: &DataConnection,
        framework: FrameworkVersion,
        code: &SourceCodeCollection,
    ) -> Result<Option<AssemblyImage>> {
        if code.is_empty() {
            return Ok(None);
        }

        let references = self.required_references(connection, framework)?;
        let assembly_name = format!("Connection_{}", connection.id.simple());
        let input = CompilationInput {
            program: render_collection(code),
            assembly_name: assembly_name.clone(),
            output_kind: OutputKind::Library,
            optimization: OptimizationLevel::Release,
            file_references: self.compile_paths(&references, framework)?,
            image_references: Vec::new(),
        };

        let result = self.compiler.compile(&input)?;
        if !result.success {
            return Err(ScriptpadError::Compilation(result.error_summary()));
        }
        Ok(Some(AssemblyImage::new(assembly_name, result.assembly_bytes)))
    }

    fn required_references(
        &self,
        connection: &DataConnection,
        _framework: FrameworkVersion,
    ) -> Result<Vec<Reference>> {
        let dir = &connection.resources_dir;
        let file = Self::read_references_file(dir)?;

        let mut references: Vec<Reference> = file
            .files
            .into_iter()
            .map(|p| Reference::file(if p.is_absolute() { p } else { dir.join(p) }))
            .collect();
        references.extend(
            file.packages
                .into_iter()
                .map(|p| Reference::package(p.id, p.version)),
        );
        Ok(references)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::CompilationResult;
    use crate::dependencies::LocalPackageProvider;
    use parking_lot::Mutex;

    struct RecordingCompiler {
        seen: Mutex<Vec<CompilationInput>>,
        succeed: bool,
    }

    impl CodeCompiler for RecordingCompiler {
        fn compile(&self, input: &CompilationInput) -> Result<CompilationResult> {
            self.seen.lock().push(input.clone());
            if self.succeed {
                Ok(CompilationResult::succeeded(&input.assembly_name, vec![1, 2, 3]))
            } else {
                Ok(CompilationResult::failed(
                    &input.assembly_name,
                    vec![crate::compilation::Diagnostic::error("CS0246", "Type not found")],
                ))
            }
        }
    }

    fn generator(succeed: bool) -> (DirectoryResourcesGenerator, Arc<RecordingCompiler>) {
        let compiler = Arc::new(RecordingCompiler {
            seen: Mutex::new(Vec::new()),
            succeed,
        });
        let packages = Arc::new(LocalPackageProvider::new("/nonexistent/packages"));
        (
            DirectoryResourcesGenerator::new(compiler.clone(), packages),
            compiler,
        )
    }

    fn connection_dir() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("Customer.cs"),
            "using System;\n\npublic class Customer { public int Id { get; set; } }\n",
        )
        .unwrap();
        std::fs::write(
            dir.path().join("Order.cs"),
            "using System.Collections.Generic;\n\npublic class Order { }\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();
        std::fs::write(
            dir.path().join(REFERENCES_FILE),
            r#"{"files": ["lib/Driver.dll"], "packages": [{"id": "Dapper", "version": "2.1.0"}]}"#,
        )
        .unwrap();
        dir
    }

    #[test]
    fn test_reads_sources_sorted() {
        let dir = connection_dir();
        let (generator, _) = generator(true);
        let connection = DataConnection::new("northwind", dir.path());

        let code = generator
            .generate_source_code(&connection, FrameworkVersion(8))
            .unwrap();
        let names: Vec<_> = code.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Customer.cs", "Order.cs"]);
        assert_eq!(code.sources[0].namespaces, vec!["System"]);
    }

    #[test]
    fn test_reads_required_references() {
        let dir = connection_dir();
        let (generator, _) = generator(true);
        let connection = DataConnection::new("northwind", dir.path());

        let references = generator
            .required_references(&connection, FrameworkVersion(8))
            .unwrap();
        assert_eq!(
            references,
            vec![
                Reference::file(dir.path().join("lib/Driver.dll")),
                Reference::package("Dapper", "2.1.0"),
            ]
        );
    }

    #[test]
    fn test_missing_references_file_means_none() {
        let dir = tempfile::tempdir().unwrap();
        let (generator, _) = generator(true);
        let connection = DataConnection::new("empty", dir.path());
        assert!(generator
            .required_references(&connection, FrameworkVersion(8))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_assembly_compiled_as_library() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.cs"), "using System;\npublic class A { }").unwrap();
        let (generator, compiler) = generator(true);
        let connection = DataConnection::new("db", dir.path());

        let code = generator
            .generate_source_code(&connection, FrameworkVersion(8))
            .unwrap();
        let image = generator
            .generate_assembly(&connection, FrameworkVersion(8), &code)
            .unwrap()
            .unwrap();

        assert_eq!(image.bytes.as_slice(), &[1, 2, 3]);
        let seen = compiler.seen.lock();
        assert_eq!(seen[0].output_kind, OutputKind::Library);
        assert!(seen[0].program.starts_with("using System;\n"));
        assert!(seen[0].program.contains("public class A { }"));
    }

    #[test]
    fn test_failed_compile_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("A.cs"), "public class A { Foo f; }").unwrap();
        let (generator, _) = generator(false);
        let connection = DataConnection::new("db", dir.path());
        let code = generator
            .generate_source_code(&connection, FrameworkVersion(8))
            .unwrap();

        let err = generator
            .generate_assembly(&connection, FrameworkVersion(8), &code)
            .unwrap_err();
        assert!(err.to_string().contains("CS0246"));
    }

    #[test]
    fn test_empty_code_has_no_assembly() {
        let (generator, compiler) = generator(true);
        let connection = DataConnection::new("db", "/nowhere");
        let assembly = generator
            .generate_assembly(&connection, FrameworkVersion(8), &SourceCodeCollection::default())
            .unwrap();
        assert!(assembly.is_none());
        assert!(compiler.seen.lock().is_empty());
    }
}
