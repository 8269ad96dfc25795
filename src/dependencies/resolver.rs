//! Dependency resolution
//!
//! Collects everything a script needs to compile and run: its own
//! references, resources generated for its data connection, and the
//! built-in assemblies the host exposes. Concrete assets are then resolved
//! for every reference in parallel.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::connections::ResourceCache;
use crate::error::{Result, ScriptpadError};
use crate::scripts::{FrameworkVersion, Script};

use super::code::{CodeDependency, SourceCode};
use super::packages::PackageProvider;
use super::reference::{
    dedupe_by_path, dedupe_by_version, AssemblyImage, Asset, Dependant, LoadStrategy, Reference,
    ReferenceDependency,
};

/// Everything a single compile attempt depends on. Rebuilt per attempt.
#[derive(Debug, Default)]
pub struct ScriptDependencies {
    pub references: Vec<ReferenceDependency>,
    pub code: Vec<CodeDependency>,
}

impl ScriptDependencies {
    /// Generated code compiled alongside the script
    pub fn additional_code(&self) -> Vec<SourceCode> {
        self.code
            .iter()
            .filter(|c| c.dependant != Dependant::Host)
            .flat_map(|c| c.code.sources.iter().cloned())
            .collect()
    }

    /// Assembly files passed to the compiler: managed assets of everything
    /// the script can see, one per logical assembly name.
    pub fn compile_file_references(&self) -> Vec<PathBuf> {
        let assets: Vec<Asset> = self
            .references
            .iter()
            .filter(|d| d.dependant != Dependant::Host)
            .flat_map(|d| d.assets().iter().filter(|a| a.is_managed()).cloned())
            .collect();
        dedupe_by_version(dedupe_by_path(assets))
            .into_iter()
            .map(|a| a.path)
            .collect()
    }

    /// In-memory assemblies passed to the compiler
    pub fn compile_image_references(&self) -> Vec<AssemblyImage> {
        self.images(|d| d.dependant != Dependant::Host)
    }

    /// Files copied next to the script assembly before it starts
    pub fn deploy_assets(&self) -> Vec<Asset> {
        let assets: Vec<Asset> = self
            .references
            .iter()
            .filter(|d| d.load_strategy == LoadStrategy::DeployAndLoad)
            .flat_map(|d| d.assets().iter().cloned())
            .collect();
        dedupe_by_version(dedupe_by_path(assets))
    }

    /// In-memory assemblies written next to the script assembly
    pub fn deploy_images(&self) -> Vec<AssemblyImage> {
        self.images(|d| d.load_strategy == LoadStrategy::DeployAndLoad)
    }

    fn images(&self, keep: impl Fn(&ReferenceDependency) -> bool) -> Vec<AssemblyImage> {
        self.references
            .iter()
            .filter(|d| keep(d))
            .filter_map(|d| match &d.reference {
                Reference::AssemblyImage(image) => Some(image.clone()),
                _ => None,
            })
            .collect()
    }
}

pub trait DependencyResolver: Send + Sync {
    /// Gather the dependencies of `script`. A cancelled resolve returns
    /// whatever was gathered before the cancellation was noticed.
    fn resolve(&self, script: &Script, cancel: &CancellationToken) -> Result<ScriptDependencies>;
}

pub struct ScriptDependencyResolver {
    cache: ResourceCache,
    packages: Arc<dyn PackageProvider>,
    builtin_assemblies: Vec<PathBuf>,
}

impl ScriptDependencyResolver {
    pub fn new(
        cache: ResourceCache,
        packages: Arc<dyn PackageProvider>,
        builtin_assemblies: Vec<PathBuf>,
    ) -> Self {
        Self {
            cache,
            packages,
            builtin_assemblies,
        }
    }

    fn assets_for(&self, reference: &Reference, framework: FrameworkVersion) -> Result<Vec<Asset>> {
        match reference {
            Reference::AssemblyFile { path } => {
                if path.is_file() {
                    Ok(vec![Asset::from_file(path)])
                } else {
                    Err(ScriptpadError::DependencyResolution {
                        reference: reference.to_string(),
                        message: "file does not exist".to_string(),
                    })
                }
            }
            Reference::Package { id, version } => {
                self.packages.package_assets(id, version, framework)
            }
            Reference::AssemblyImage(_) => Ok(Vec::new()),
        }
    }

    /// Resolve assets for every unresolved dependency on scoped threads.
    /// Failures are logged and leave the dependency with no assets.
    fn resolve_assets(&self, dependencies: &[ReferenceDependency], framework: FrameworkVersion) {
        std::thread::scope(|scope| {
            for dependency in dependencies.iter().filter(|d| !d.is_resolved()) {
                scope.spawn(move || {
                    let assets = match self.assets_for(&dependency.reference, framework) {
                        Ok(assets) => assets,
                        Err(e) => {
                            warn!(
                                reference = %dependency.reference,
                                error = %e,
                                "Dependency resolution failed, continuing without its assets"
                            );
                            Vec::new()
                        }
                    };
                    dependency.set_assets(assets);
                });
            }
        });
    }
}

impl DependencyResolver for ScriptDependencyResolver {
    #[instrument(skip_all, fields(script_id = %script.id(), script = script.name()))]
    fn resolve(&self, script: &Script, cancel: &CancellationToken) -> Result<ScriptDependencies> {
        let framework = script.config().target_framework;
        let mut dependencies = ScriptDependencies::default();

        dependencies.references.extend(
            script.config().references().iter().map(|reference| {
                ReferenceDependency::new(
                    reference.clone(),
                    Dependant::Script,
                    LoadStrategy::LoadInPlace,
                )
            }),
        );

        if cancel.is_cancelled() {
            return Ok(dependencies);
        }

        if let Some(connection) = script.data_connection() {
            let resources = match self.cache.get_resources(connection, framework, cancel) {
                Ok(resources) => resources,
                Err(ScriptpadError::Cancelled) => return Ok(dependencies),
                Err(e) => return Err(e),
            };

            // A compiled assembly already carries these types
            if resources.assembly.is_none() && !resources.source_code.is_empty() {
                dependencies.code.push(CodeDependency {
                    dependant: Dependant::Shared,
                    code: (*resources.source_code).clone(),
                });
            }

            let shared = resources
                .required_references
                .iter()
                .cloned()
                .chain((*resources.assembly).clone().map(Reference::AssemblyImage))
                .map(|reference| {
                    ReferenceDependency::new(
                        reference,
                        Dependant::Shared,
                        LoadStrategy::DeployAndLoad,
                    )
                });
            dependencies.references.extend(shared);
        }

        if cancel.is_cancelled() {
            return Ok(dependencies);
        }

        dependencies
            .references
            .extend(self.builtin_assemblies.iter().map(|path| {
                ReferenceDependency::new(
                    Reference::file(path),
                    Dependant::Shared,
                    LoadStrategy::DeployAndLoad,
                )
            }));

        if cancel.is_cancelled() {
            return Ok(dependencies);
        }

        self.resolve_assets(&dependencies.references, framework);

        info!(
            references = dependencies.references.len(),
            code_dependencies = dependencies.code.len(),
            "Resolved script dependencies"
        );
        debug!(
            compile_references = ?dependencies.compile_file_references(),
            "Compile references"
        );
        Ok(dependencies)
    }
}
