//! Tests for permutation compilation

use super::*;
use crate::compilation::{CSharpParser, CompilationResult};
use crate::dependencies::{Asset, Dependant, LoadStrategy, Reference, ReferenceDependency};
use crate::error::ScriptpadError;
use crate::scripts::{FrameworkVersion, ScriptConfig, ScriptKind};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Resolver returning one pre-resolved file reference, or an error
struct FakeResolver {
    fail: bool,
    calls: AtomicUsize,
}

impl FakeResolver {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }
}

impl DependencyResolver for FakeResolver {
    fn resolve(&self, _script: &Script, _cancel: &CancellationToken) -> Result<ScriptDependencies> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ScriptpadError::DependencyResolution {
                reference: "Broken@1.0.0".into(),
                message: "package store unavailable".into(),
            });
        }
        let dependency = ReferenceDependency::new(
            Reference::file("/lib/Humanizer.dll"),
            Dependant::Script,
            LoadStrategy::LoadInPlace,
        );
        dependency.set_assets(vec![Asset::new("/lib/Humanizer.dll", None)]);
        Ok(ScriptDependencies {
            references: vec![dependency],
            code: vec![],
        })
    }
}

/// Compiler that succeeds when `accept` says so. Failures carry
/// "attempt N" and point at the line containing `BAD` if there is one.
struct FakeCompiler {
    accept: fn(&str) -> bool,
    inputs: Mutex<Vec<CompilationInput>>,
    on_compile: Option<CancellationToken>,
}

impl FakeCompiler {
    fn new(accept: fn(&str) -> bool) -> Arc<Self> {
        Arc::new(Self {
            accept,
            inputs: Mutex::new(Vec::new()),
            on_compile: None,
        })
    }
}

impl CodeCompiler for FakeCompiler {
    fn compile(&self, input: &CompilationInput) -> Result<CompilationResult> {
        let attempt = {
            let mut inputs = self.inputs.lock();
            inputs.push(input.clone());
            inputs.len()
        };
        if let Some(token) = &self.on_compile {
            token.cancel();
        }
        if (self.accept)(&input.program) {
            return Ok(CompilationResult::succeeded(&input.assembly_name, vec![0x4d, 0x5a]));
        }
        let line = input
            .program
            .lines()
            .position(|l| l.contains("BAD"))
            .map(|i| i + 1)
            .unwrap_or(1);
        Ok(CompilationResult::failed(
            &input.assembly_name,
            vec![Diagnostic::error("CS1002", format!("attempt {}", attempt)).at(line, 5)],
        ))
    }
}

fn script(kind: ScriptKind) -> Script {
    Script::new("Sum It", ScriptConfig::new(kind, FrameworkVersion(8)))
}

fn compiler_with(resolver: Arc<FakeResolver>, compiler: Arc<FakeCompiler>) -> ScriptCompiler {
    ScriptCompiler::new(resolver, Arc::new(CSharpParser::default()), compiler)
}

#[test]
fn test_bare_expression_compiles_as_dump() {
    let fake = FakeCompiler::new(|program| program.contains("(4+7).Dump();"));
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());

    let result = compiler
        .parse_and_compile("4+7", &script(ScriptKind::Statements), &CancellationToken::new())
        .unwrap()
        .unwrap();

    assert!(result.compilation.success);
    assert!(result.parsing.user_program.contains("(4+7).Dump();"));
    assert_eq!(fake.inputs.lock().len(), 2);
}

#[test]
fn test_terminated_statement_reports_as_is_diagnostics() {
    let fake = FakeCompiler::new(|_| false);
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());

    let result = compiler
        .parse_and_compile("x = 4+7;", &script(ScriptKind::Statements), &CancellationToken::new())
        .unwrap()
        .unwrap();

    assert!(!result.compilation.success);
    // Ends with ';' so the other permutations do not apply
    assert_eq!(fake.inputs.lock().len(), 1);
    assert_eq!(result.compilation.diagnostics[0].message, "attempt 1");
}

#[test]
fn test_all_permutations_fail_returns_first() {
    let fake = FakeCompiler::new(|_| false);
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());

    let result = compiler
        .parse_and_compile("foo bar", &script(ScriptKind::Statements), &CancellationToken::new())
        .unwrap()
        .unwrap();

    let programs: Vec<String> = fake.inputs.lock().iter().map(|i| i.program.clone()).collect();
    assert_eq!(programs.len(), 3);
    assert!(programs[1].contains("(foo bar).Dump();"));
    assert!(programs[2].contains("foo bar;"));
    assert_eq!(result.compilation.diagnostics[0].message, "attempt 1");
    assert!(result.parsing.user_program.contains("foo bar\n"));
}

#[test]
fn test_explicit_dump_is_only_terminated() {
    let fake = FakeCompiler::new(|program| program.contains("x.Dump();"));
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());

    let result = compiler
        .parse_and_compile("x.Dump()  \n", &script(ScriptKind::Statements), &CancellationToken::new())
        .unwrap()
        .unwrap();

    assert!(result.compilation.success);
    assert_eq!(fake.inputs.lock().len(), 2);
}

#[test]
fn test_compile_input_carries_dependencies() {
    let fake = FakeCompiler::new(|_| true);
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());
    let mut script = script(ScriptKind::Statements);
    let mut config = script.config().clone();
    config.optimization_level = crate::scripts::OptimizationLevel::Release;
    script.update_config(config);

    let result = compiler
        .parse_and_compile("1.Dump();", &script, &CancellationToken::new())
        .unwrap()
        .unwrap();

    let inputs = fake.inputs.lock();
    assert_eq!(inputs[0].file_references, vec![PathBuf::from("/lib/Humanizer.dll")]);
    assert_eq!(inputs[0].assembly_name, "Sum_It__");
    assert_eq!(inputs[0].output_kind, OutputKind::ConsoleApplication);
    assert_eq!(inputs[0].optimization, crate::scripts::OptimizationLevel::Release);
    assert_eq!(result.dependencies.references.len(), 1);
}

#[test]
fn test_user_diagnostics_are_relative_to_user_code() {
    let fake = FakeCompiler::new(|_| false);
    let compiler = compiler_with(FakeResolver::ok(), fake);

    let result = compiler
        .parse_and_compile(
            "var ok = 1;\nBAD;",
            &script(ScriptKind::Statements),
            &CancellationToken::new(),
        )
        .unwrap()
        .unwrap();

    assert!(result.compilation.diagnostics[0].line.unwrap() > 2);
    assert_eq!(result.user_diagnostics()[0].line, Some(2));
}

#[test]
fn test_resolver_error_propagates() {
    let resolver = Arc::new(FakeResolver {
        fail: true,
        calls: AtomicUsize::new(0),
    });
    let fake = FakeCompiler::new(|_| true);
    let compiler = compiler_with(resolver, fake.clone());

    let err = compiler
        .parse_and_compile("1;", &script(ScriptKind::Statements), &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ScriptpadError::DependencyResolution { .. }));
    assert!(fake.inputs.lock().is_empty());
}

#[test]
fn test_cancelled_before_start_returns_none() {
    let resolver = FakeResolver::ok();
    let compiler = compiler_with(resolver.clone(), FakeCompiler::new(|_| true));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = compiler
        .parse_and_compile("1;", &script(ScriptKind::Statements), &cancel)
        .unwrap();
    assert!(result.is_none());
    assert_eq!(resolver.calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_cancellation_between_permutations_returns_none() {
    let cancel = CancellationToken::new();
    let fake = Arc::new(FakeCompiler {
        accept: |_| false,
        inputs: Mutex::new(Vec::new()),
        on_compile: Some(cancel.clone()),
    });
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());

    let result = compiler
        .parse_and_compile("4+7", &script(ScriptKind::Statements), &cancel)
        .unwrap();
    assert!(result.is_none());
    assert_eq!(fake.inputs.lock().len(), 1);
}

#[test]
fn test_parser_configuration_error_is_fatal() {
    let fake = FakeCompiler::new(|_| true);
    let compiler = compiler_with(FakeResolver::ok(), fake.clone());
    let mut script = script(ScriptKind::Statements);
    let mut config = script.config().clone();
    config.set_namespaces(["Bad Namespace"]).unwrap();
    script.update_config(config);

    let err = compiler
        .parse_and_compile("1;", &script, &CancellationToken::new())
        .unwrap_err();
    assert!(matches!(err, ScriptpadError::Configuration(_)));
    assert!(fake.inputs.lock().is_empty());
}
