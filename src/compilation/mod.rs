//! Compilation module - from user text to a compiled assembly
//!
//! # Module Structure
//!
//! - `rewrite` - Console call redirection behind `OutputRewriter`
//! - `parser` - Wraps user code and the runtime bootstrap into a program
//! - `compiler` - The compiler boundary, diagnostics and the command-line compiler
//! - `script_compiler` - Resolve + parse + compile with permutations

mod compiler;
mod parser;
mod rewrite;
mod script_compiler;

pub use compiler::{
    parse_diagnostics, CodeCompiler, CommandCompiler, CompilationInput, CompilationResult,
    Diagnostic, DiagnosticSeverity, OutputKind,
};
pub use parser::{CSharpParser, CodeParser, CodeParsingResult, FullProgram, ParseOptions};
pub use rewrite::{ConsoleRedirect, NoRewrite, OutputRewriter};
pub use script_compiler::{assembly_name, ParseAndCompileResult, ScriptCompiler};
