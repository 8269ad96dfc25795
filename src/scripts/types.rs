//! Script type definitions
//!
//! `Script` is the unit of user-authored source plus its run configuration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use uuid::Uuid;

use crate::connections::DataConnection;
use crate::dependencies::Reference;
use crate::error::{Result, ScriptpadError};

/// Namespaces every script gets without asking
pub const DEFAULT_NAMESPACES: &[&str] = &[
    "System",
    "System.Collections",
    "System.Collections.Generic",
    "System.Data",
    "System.Diagnostics",
    "System.IO",
    "System.Linq",
    "System.Linq.Expressions",
    "System.Net.Http",
    "System.Reflection",
    "System.Text",
    "System.Text.RegularExpressions",
    "System.Threading",
    "System.Threading.Tasks",
    "System.Xml",
    "System.Xml.Linq",
    "System.Xml.XPath",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ScriptKind {
    /// A single expression whose value is dumped
    Expression,
    /// Statements wrapped in an implicit entry method
    #[default]
    Statements,
    /// A full program with its own entry point
    Program,
}

impl FromStr for ScriptKind {
    type Err = ScriptpadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "expression" => Ok(Self::Expression),
            "statements" => Ok(Self::Statements),
            "program" => Ok(Self::Program),
            other => Err(ScriptpadError::Configuration(format!(
                "Unknown script kind '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for ScriptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Expression => "expression",
            Self::Statements => "statements",
            Self::Program => "program",
        };
        f.write_str(name)
    }
}

/// Target framework, rendered as `net<major>.0`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameworkVersion(pub u32);

impl FrameworkVersion {
    pub fn major(&self) -> u32 {
        self.0
    }

    /// Target framework moniker (`net8.0`)
    pub fn moniker(&self) -> String {
        format!("net{}.0", self.0)
    }
}

impl Default for FrameworkVersion {
    fn default() -> Self {
        Self(8)
    }
}

impl FromStr for FrameworkVersion {
    type Err = ScriptpadError;

    fn from_str(s: &str) -> Result<Self> {
        let trimmed = s.trim().to_ascii_lowercase();
        let digits = trimmed
            .strip_prefix("net")
            .unwrap_or(&trimmed)
            .trim_end_matches(".0");
        match digits.parse::<u32>() {
            Ok(major) if major >= 5 => Ok(Self(major)),
            _ => Err(ScriptpadError::Configuration(format!(
                "Unsupported target framework '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for FrameworkVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.moniker())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum OptimizationLevel {
    #[default]
    Debug,
    Release,
}

impl FromStr for OptimizationLevel {
    type Err = ScriptpadError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" => Ok(Self::Debug),
            "release" => Ok(Self::Release),
            other => Err(ScriptpadError::Configuration(format!(
                "Unknown optimization level '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ScriptConfig {
    pub kind: ScriptKind,
    pub target_framework: FrameworkVersion,
    pub optimization_level: OptimizationLevel,
    namespaces: Vec<String>,
    references: Vec<Reference>,
}

impl ScriptConfig {
    pub fn new(kind: ScriptKind, target_framework: FrameworkVersion) -> Self {
        Self {
            kind,
            target_framework,
            ..Self::default()
        }
    }

    pub fn namespaces(&self) -> &[String] {
        &self.namespaces
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    /// Trims, drops blanks and duplicates. Entries written as directives
    /// (`using X` or `X;`) are rejected.
    pub fn set_namespaces<I, S>(&mut self, namespaces: I) -> Result<()>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut clean: Vec<String> = Vec::new();
        for ns in namespaces {
            let ns = ns.as_ref().trim();
            if ns.is_empty() || clean.iter().any(|c| c == ns) {
                continue;
            }
            if ns.starts_with("using ") || ns.ends_with(';') {
                return Err(ScriptpadError::Configuration(format!(
                    "Namespace '{}' should not start with 'using ' or end with ';'",
                    ns
                )));
            }
            clean.push(ns.to_string());
        }
        self.namespaces = clean;
        Ok(())
    }

    pub fn set_references(&mut self, references: Vec<Reference>) -> Result<()> {
        for reference in &references {
            reference.ensure_valid()?;
        }
        self.references = references;
        Ok(())
    }
}

/// A unit of user-authored source plus run configuration.
///
/// State changes go through the `update_*`/`set_*` methods so the dirty
/// flag stays accurate.
#[derive(Debug, Clone)]
pub struct Script {
    id: Uuid,
    name: String,
    path: Option<PathBuf>,
    code: String,
    config: ScriptConfig,
    data_connection: Option<DataConnection>,
    dirty: bool,
}

impl Script {
    pub fn new(name: impl Into<String>, config: ScriptConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: None,
            code: String::new(),
            config,
            data_connection: None,
            dirty: false,
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn config(&self) -> &ScriptConfig {
        &self.config
    }

    pub fn data_connection(&self) -> Option<&DataConnection> {
        self.data_connection.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn update_code(&mut self, code: impl Into<String>) {
        let code = code.into();
        if code != self.code {
            self.code = code;
            self.dirty = true;
        }
    }

    pub fn update_config(&mut self, config: ScriptConfig) {
        if config != self.config {
            self.config = config;
            self.dirty = true;
        }
    }

    pub fn set_data_connection(&mut self, connection: Option<DataConnection>) {
        if connection != self.data_connection {
            self.data_connection = connection;
            self.dirty = true;
        }
    }

    pub fn mark_saved(&mut self) {
        self.dirty = false;
    }

    /// Name reduced to characters safe for file and assembly names
    pub fn safe_name(&self) -> String {
        let safe: String = self
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        if safe.is_empty() {
            "script".to_string()
        } else {
            safe
        }
    }
}
