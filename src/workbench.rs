//! Wiring of the execution core
//!
//! Builds the shared pieces once per host (resource cache, process
//! registry, script compiler) and hands out runners that use them.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::info;

use crate::compilation::{CSharpParser, CodeCompiler, CommandCompiler, ScriptCompiler};
use crate::config::Config;
use crate::connections::{DirectoryResourcesGenerator, ResourceCache};
use crate::dependencies::{LocalPackageProvider, PackageProvider, ScriptDependencyResolver};
use crate::executor::{RunnerSettings, ScriptRunner};
use crate::process_manager::ProcessRegistry;
use crate::scripts::Script;

pub struct Workbench {
    config: Config,
    cache: ResourceCache,
    compiler: Arc<ScriptCompiler>,
    processes: ProcessRegistry,
}

impl Workbench {
    /// Workbench using the configured external compiler
    pub fn new(config: Config) -> Self {
        let code_compiler: Arc<dyn CodeCompiler> = Arc::new(CommandCompiler::new(&config.compiler));
        Self::with_compiler(config, code_compiler)
    }

    pub fn with_compiler(config: Config, code_compiler: Arc<dyn CodeCompiler>) -> Self {
        let packages: Arc<dyn PackageProvider> =
            Arc::new(LocalPackageProvider::new(config.packages_dir()));
        let cache = ResourceCache::new(Arc::new(DirectoryResourcesGenerator::new(
            code_compiler.clone(),
            packages.clone(),
        )));
        let resolver = ScriptDependencyResolver::new(
            cache.clone(),
            packages,
            config.builtin_assembly_paths(),
        );
        let compiler = Arc::new(ScriptCompiler::new(
            Arc::new(resolver),
            Arc::new(CSharpParser::default()),
            code_compiler,
        ));
        let processes = ProcessRegistry::new(config.working_dir());

        Self {
            config,
            cache,
            compiler,
            processes,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn compiler(&self) -> &Arc<ScriptCompiler> {
        &self.compiler
    }

    pub fn processes(&self) -> &ProcessRegistry {
        &self.processes
    }

    /// A runner for `script`. The returned lock is shared with the runner,
    /// so edits made through it apply to the next run.
    pub fn runner(&self, script: Script) -> (Arc<RwLock<Script>>, ScriptRunner) {
        let script = Arc::new(RwLock::new(script));
        let runner = ScriptRunner::new(
            script.clone(),
            self.compiler.clone(),
            self.processes.clone(),
            RunnerSettings::from_config(&self.config),
        );
        (script, runner)
    }

    /// Kill processes left over from a previous session
    pub fn cleanup_orphans(&self) -> usize {
        self.processes.cleanup_orphans()
    }

    /// Release cache waiters and kill every script still running
    pub fn shutdown(&self) {
        self.cache.shutdown();
        let killed = self.processes.kill_all();
        info!(killed, "Workbench shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compilation::{CompilationInput, CompilationResult};
    use crate::error::Result;
    use crate::scripts::{FrameworkVersion, ScriptConfig, ScriptKind};
    use tempfile::TempDir;
    use tokio_util::sync::CancellationToken;

    struct AcceptAll;

    impl CodeCompiler for AcceptAll {
        fn compile(&self, input: &CompilationInput) -> Result<CompilationResult> {
            Ok(CompilationResult::succeeded(&input.assembly_name, vec![1, 2, 3]))
        }
    }

    fn config(dir: &TempDir) -> Config {
        Config {
            working_dir: Some(dir.path().join("runs").display().to_string()),
            packages_dir: Some(dir.path().join("packages").display().to_string()),
            ..Config::default()
        }
    }

    #[test]
    fn test_compiles_through_the_wired_pipeline() {
        let dir = TempDir::new().unwrap();
        let workbench = Workbench::with_compiler(config(&dir), Arc::new(AcceptAll));
        let script = Script::new(
            "Wired",
            ScriptConfig::new(ScriptKind::Expression, FrameworkVersion(8)),
        );

        let result = workbench
            .compiler()
            .parse_and_compile("1 + 1", &script, &CancellationToken::new())
            .unwrap()
            .unwrap();
        assert!(result.compilation.success);
        assert_eq!(result.compilation.assembly_name, "Wired__");
    }

    #[test]
    fn test_runner_shares_the_script() {
        let dir = TempDir::new().unwrap();
        let workbench = Workbench::with_compiler(config(&dir), Arc::new(AcceptAll));
        let script = Script::new(
            "Shared",
            ScriptConfig::new(ScriptKind::Statements, FrameworkVersion(8)),
        );
        let id = script.id();

        let (shared, runner) = workbench.runner(script);
        assert_eq!(runner.script_id(), id);
        shared.write().update_code("var x = 1;");
        assert!(shared.read().is_dirty());

        assert_eq!(workbench.cleanup_orphans(), 0);
        workbench.shutdown();
        assert_eq!(workbench.processes().active_count(), 0);
    }
}
