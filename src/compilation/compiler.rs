//! Program compilation
//!
//! `CodeCompiler` is the toolchain boundary. Ordinary source errors come
//! back as a failed `CompilationResult` with diagnostics; `Err` is reserved
//! for infrastructure failures (missing compiler, unreadable reference,
//! temp-dir I/O).

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, instrument, warn};

use crate::config::CompilerConfig;
use crate::dependencies::AssemblyImage;
use crate::error::{Result, ScriptpadError};
use crate::scripts::OptimizationLevel;

const PROGRAM_FILE: &str = "program.cs";
const IMAGE_REFERENCES_DIR: &str = "refs";

/// `program.cs(12,5): error CS0103: The name 'x' does not exist`
static DIAGNOSTIC_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:[^(]*\((?P<line>\d+),(?P<col>\d+)\):\s*)?(?P<severity>error|warning|info|hidden)\s+(?P<code>[A-Za-z]+\d+)\s*:\s*(?P<message>.*?)\s*(?:\[[^\]]*\])?$",
    )
    .expect("Invalid diagnostic regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum DiagnosticSeverity {
    Hidden,
    Info,
    Warning,
    Error,
}

impl DiagnosticSeverity {
    fn parse(s: &str) -> Self {
        match s {
            "error" => Self::Error,
            "warning" => Self::Warning,
            "info" => Self::Info,
            _ => Self::Hidden,
        }
    }
}

impl fmt::Display for DiagnosticSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Hidden => "hidden",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: DiagnosticSeverity,
    pub code: String,
    pub message: String,
    /// 1-based line in the compiled program
    pub line: Option<usize>,
    pub column: Option<usize>,
}

impl Diagnostic {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: DiagnosticSeverity::Error,
            code: code.into(),
            message: message.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = Some(line);
        self.column = Some(column);
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == DiagnosticSeverity::Error
    }

    /// Re-number the line so that `user_start_line` becomes line 1.
    /// Locations outside the user's code are left as they are.
    pub fn relative_to(&self, user_start_line: usize) -> Self {
        let mut shifted = self.clone();
        if let Some(line) = self.line {
            if user_start_line > 0 && line >= user_start_line {
                shifted.line = Some(line - user_start_line + 1);
            }
        }
        shifted
    }

    /// Parse one line of compiler output
    pub fn parse_line(line: &str) -> Option<Self> {
        let caps = DIAGNOSTIC_LINE.captures(line.trim())?;
        let position = |name: &str| caps.name(name).and_then(|m| m.as_str().parse().ok());
        Some(Self {
            severity: DiagnosticSeverity::parse(&caps["severity"]),
            code: caps["code"].to_string(),
            message: caps["message"].to_string(),
            line: position("line"),
            column: position("col"),
        })
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let (Some(line), Some(column)) = (self.line, self.column) {
            write!(f, "({},{}): ", line, column)?;
        }
        if self.code.is_empty() {
            write!(f, "{}: {}", self.severity, self.message)
        } else {
            write!(f, "{} {}: {}", self.severity, self.code, self.message)
        }
    }
}

/// Extract diagnostics from compiler output, dropping duplicates
pub fn parse_diagnostics(output: &str) -> Vec<Diagnostic> {
    let mut diagnostics: Vec<Diagnostic> = Vec::new();
    for diagnostic in output.lines().filter_map(Diagnostic::parse_line) {
        if !diagnostics.contains(&diagnostic) {
            diagnostics.push(diagnostic);
        }
    }
    diagnostics
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    #[default]
    ConsoleApplication,
    Library,
}

impl OutputKind {
    fn target_arg(self) -> &'static str {
        match self {
            Self::ConsoleApplication => "-target:exe",
            Self::Library => "-target:library",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompilationInput {
    pub program: String,
    pub assembly_name: String,
    pub output_kind: OutputKind,
    pub optimization: OptimizationLevel,
    pub file_references: Vec<PathBuf>,
    pub image_references: Vec<AssemblyImage>,
}

#[derive(Debug, Clone)]
pub struct CompilationResult {
    pub success: bool,
    pub assembly_name: String,
    pub assembly_bytes: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
}

impl CompilationResult {
    pub fn succeeded(assembly_name: &str, assembly_bytes: Vec<u8>) -> Self {
        Self {
            success: true,
            assembly_name: assembly_name.to_string(),
            assembly_bytes,
            diagnostics: Vec::new(),
        }
    }

    pub fn failed(assembly_name: &str, diagnostics: Vec<Diagnostic>) -> Self {
        Self {
            success: false,
            assembly_name: assembly_name.to_string(),
            assembly_bytes: Vec::new(),
            diagnostics,
        }
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter().filter(|d| d.is_error())
    }

    /// Error diagnostics, one per line
    pub fn error_summary(&self) -> String {
        self.errors()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

pub trait CodeCompiler: Send + Sync {
    fn compile(&self, input: &CompilationInput) -> Result<CompilationResult>;
}

/// Compiles by running an external compiler command
#[derive(Debug, Clone)]
pub struct CommandCompiler {
    command: String,
    args: Vec<String>,
}

impl CommandCompiler {
    pub fn new(config: &CompilerConfig) -> Self {
        Self {
            command: config.command.clone(),
            args: config.args.clone(),
        }
    }

    fn executable(&self) -> Result<PathBuf> {
        which::which(&self.command).map_err(|e| {
            ScriptpadError::Configuration(format!(
                "compiler '{}' not found: {}",
                self.command, e
            ))
        })
    }

    fn check_readable(path: &Path) -> Result<()> {
        std::fs::File::open(path)
            .map(|_| ())
            .map_err(|e| ScriptpadError::io(path, e))
    }

    fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
        std::fs::write(path, bytes).map_err(|e| ScriptpadError::io(path, e))
    }
}

impl CodeCompiler for CommandCompiler {
    #[instrument(skip_all, fields(assembly = %input.assembly_name))]
    fn compile(&self, input: &CompilationInput) -> Result<CompilationResult> {
        let executable = self.executable()?;
        for path in &input.file_references {
            Self::check_readable(path)?;
        }

        let dir = tempfile::tempdir().map_err(|e| ScriptpadError::io(std::env::temp_dir(), e))?;
        let program_path = dir.path().join(PROGRAM_FILE);
        Self::write_file(&program_path, input.program.as_bytes())?;

        let mut references = input.file_references.clone();
        if !input.image_references.is_empty() {
            let images_dir = dir.path().join(IMAGE_REFERENCES_DIR);
            std::fs::create_dir_all(&images_dir).map_err(|e| ScriptpadError::io(&images_dir, e))?;
            for image in &input.image_references {
                let path = images_dir.join(image.file_name());
                Self::write_file(&path, &image.bytes)?;
                references.push(path);
            }
        }

        let out_path = dir.path().join(format!("{}.dll", input.assembly_name));
        let optimize = match input.optimization {
            OptimizationLevel::Debug => "-optimize-",
            OptimizationLevel::Release => "-optimize+",
        };

        let mut command = Command::new(&executable);
        command
            .current_dir(dir.path())
            .args(&self.args)
            .arg(input.output_kind.target_arg())
            .arg(optimize)
            .arg(format!("-out:{}", out_path.display()));
        for reference in &references {
            command.arg(format!("-r:{}", reference.display()));
        }
        command.arg(&program_path);

        debug!(
            command = %executable.display(),
            references = references.len(),
            "Running compiler"
        );
        let output = command
            .output()
            .map_err(|e| ScriptpadError::Compilation(format!("failed to run compiler: {}", e)))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let mut diagnostics = parse_diagnostics(&format!("{}\n{}", stdout, stderr));
        let has_errors = diagnostics.iter().any(Diagnostic::is_error);

        if !output.status.success() && !has_errors {
            // Compiler died without telling us why in a parseable form
            let detail = stderr.trim();
            let detail = if detail.is_empty() { stdout.trim() } else { detail };
            diagnostics.push(Diagnostic::error(
                "",
                format!("compiler exited with {}: {}", output.status, detail),
            ));
        }

        if !output.status.success() || has_errors || !out_path.is_file() {
            warn!(
                errors = diagnostics.iter().filter(|d| d.is_error()).count(),
                "Compilation failed"
            );
            return Ok(CompilationResult::failed(&input.assembly_name, diagnostics));
        }

        let bytes = std::fs::read(&out_path).map_err(|e| ScriptpadError::io(&out_path, e))?;
        debug!(bytes = bytes.len(), warnings = diagnostics.len(), "Compilation succeeded");
        Ok(CompilationResult {
            success: true,
            assembly_name: input.assembly_name.clone(),
            assembly_bytes: bytes,
            diagnostics,
        })
    }
}
