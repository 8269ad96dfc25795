//! Script compilation with permutations
//!
//! Users type bare expressions (`4 + 7`) as often as statements. Rather
//! than asking which one they meant, the code is tried in a few shapes
//! and the first one that compiles wins. If none compile, the first
//! attempt's diagnostics are reported since that is the most literal
//! reading of what was typed.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::dependencies::{DependencyResolver, ScriptDependencies};
use crate::error::Result;
use crate::scripts::Script;

use super::compiler::{CodeCompiler, CompilationInput, CompilationResult, Diagnostic, OutputKind};
use super::parser::{CodeParser, CodeParsingResult, FullProgram, ParseOptions};

/// A text transform of the user's code; `None` when it does not apply
type Permutation = fn(&str) -> Option<String>;

const PERMUTATIONS: &[Permutation] = &[as_is, dump_expression, terminate_statement];

fn as_is(code: &str) -> Option<String> {
    Some(code.to_string())
}

/// `4 + 7` -> `(4 + 7).Dump();`
fn dump_expression(code: &str) -> Option<String> {
    let trimmed = code.trim_end();
    if trimmed.ends_with(';') || trimmed.ends_with(".Dump()") {
        return None;
    }
    Some(format!("({}).Dump();", trimmed))
}

/// `x.Dump()` -> `x.Dump();`
fn terminate_statement(code: &str) -> Option<String> {
    let trimmed = code.trim_end();
    if trimmed.ends_with(';') {
        return None;
    }
    Some(format!("{};", trimmed))
}

#[derive(Debug)]
pub struct ParseAndCompileResult {
    pub parsing: CodeParsingResult,
    pub program: FullProgram,
    pub compilation: CompilationResult,
    pub dependencies: ScriptDependencies,
}

impl ParseAndCompileResult {
    /// Diagnostics with line numbers relative to the user's code
    pub fn user_diagnostics(&self) -> Vec<Diagnostic> {
        self.compilation
            .diagnostics
            .iter()
            .map(|d| d.relative_to(self.program.user_program_start_line))
            .collect()
    }
}

struct Attempt {
    parsing: CodeParsingResult,
    program: FullProgram,
    compilation: CompilationResult,
}

pub struct ScriptCompiler {
    resolver: Arc<dyn DependencyResolver>,
    parser: Arc<dyn CodeParser>,
    compiler: Arc<dyn CodeCompiler>,
}

impl ScriptCompiler {
    pub fn new(
        resolver: Arc<dyn DependencyResolver>,
        parser: Arc<dyn CodeParser>,
        compiler: Arc<dyn CodeCompiler>,
    ) -> Self {
        Self {
            resolver,
            parser,
            compiler,
        }
    }

    /// Resolve dependencies, then compile `code` under each permutation.
    ///
    /// Returns `Ok(None)` when cancelled. Compile errors are not `Err`:
    /// they come back in `compilation.diagnostics`.
    #[instrument(skip_all, fields(script_id = %script.id(), kind = %script.config().kind))]
    pub fn parse_and_compile(
        &self,
        code: &str,
        script: &Script,
        cancel: &CancellationToken,
    ) -> Result<Option<ParseAndCompileResult>> {
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let dependencies = self.resolver.resolve(script, cancel)?;
        if cancel.is_cancelled() {
            return Ok(None);
        }

        let file_references = dependencies.compile_file_references();
        let image_references = dependencies.compile_image_references();
        let options = ParseOptions::for_script(script, dependencies.additional_code());

        let mut first: Option<Attempt> = None;
        for (index, permutation) in PERMUTATIONS.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            let Some(candidate) = permutation(code) else {
                continue;
            };

            let parsing = self.parser.parse(
                &candidate,
                script.config().kind,
                script.config().namespaces(),
                &options,
            )?;
            if cancel.is_cancelled() {
                return Ok(None);
            }

            let program = parsing.full_program();
            let input = CompilationInput {
                program: program.code.clone(),
                assembly_name: assembly_name(script),
                output_kind: OutputKind::ConsoleApplication,
                optimization: script.config().optimization_level,
                file_references: file_references.clone(),
                image_references: image_references.clone(),
            };
            let compilation = self.compiler.compile(&input)?;

            let attempt = Attempt {
                parsing,
                program,
                compilation,
            };
            if attempt.compilation.success {
                info!(permutation = index, "Script compiled");
                return Ok(Some(attempt.into_result(dependencies)));
            }

            debug!(
                permutation = index,
                errors = attempt.compilation.errors().count(),
                "Permutation did not compile"
            );
            first.get_or_insert(attempt);
        }

        Ok(first.map(|attempt| attempt.into_result(dependencies)))
    }
}

impl Attempt {
    fn into_result(self, dependencies: ScriptDependencies) -> ParseAndCompileResult {
        ParseAndCompileResult {
            parsing: self.parsing,
            program: self.program,
            compilation: self.compilation,
            dependencies,
        }
    }
}

/// Name of the compiled script assembly (and its file stem)
pub fn assembly_name(script: &Script) -> String {
    format!("{}__", script.safe_name())
}

#[cfg(test)]
#[path = "script_compiler_tests.rs"]
mod tests;
