//! Script loading from the file system
//!
//! A script file is source text preceded by optional comment headers:
//!
//! ```text
//! // Name: Top customers
//! // Kind: statements
//! // Framework: net8.0
//! // Optimize: release
//! // Namespace: System.Globalization
//! // Reference: ./lib/Helpers.dll
//! // Package: Humanizer@2.14.1
//! // Connection: ~/.scriptpad/connections/northwind
//! ```
//!
//! Headers end at the first line that is not a `//` comment or blank.

use std::path::{Path, PathBuf};

use tracing::{debug, instrument, warn};

use crate::connections::DataConnection;
use crate::dependencies::Reference;
use crate::error::{Result, ScriptpadError};

use super::types::{Script, ScriptConfig};

/// Header values found at the top of a script file
#[derive(Debug, Default, PartialEq)]
pub(crate) struct ScriptHeaders {
    pub name: Option<String>,
    pub kind: Option<String>,
    pub framework: Option<String>,
    pub optimize: Option<String>,
    pub namespaces: Vec<String>,
    pub references: Vec<String>,
    pub packages: Vec<String>,
    pub connection: Option<String>,
}

/// Parse a single `// Key: value` line. Returns None for other lines.
pub(crate) fn parse_header_line(line: &str) -> Option<(String, String)> {
    let rest = line.trim().strip_prefix("//")?;
    let (key, value) = rest.split_once(':')?;
    let key = key.trim();
    if key.is_empty() || key.contains(char::is_whitespace) {
        return None;
    }
    Some((key.to_ascii_lowercase(), value.trim().to_string()))
}

/// Split file contents into headers and the code that follows them
pub(crate) fn split_headers(contents: &str) -> (ScriptHeaders, String) {
    let mut headers = ScriptHeaders::default();
    let mut body_start = 0;

    for line in contents.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            body_start += line.len();
            continue;
        }
        if !trimmed.starts_with("//") {
            break;
        }
        if let Some((key, value)) = parse_header_line(trimmed) {
            match key.as_str() {
                "name" => headers.name = Some(value),
                "kind" => headers.kind = Some(value),
                "framework" => headers.framework = Some(value),
                "optimize" => headers.optimize = Some(value),
                "namespace" => headers.namespaces.push(value),
                "reference" => headers.references.push(value),
                "package" => headers.packages.push(value),
                "connection" => headers.connection = Some(value),
                other => debug!(key = other, "Ignoring unknown script header"),
            }
        }
        body_start += line.len();
    }

    (headers, contents[body_start..].to_string())
}

fn resolve_relative(base_dir: &Path, raw: &str) -> PathBuf {
    let expanded = PathBuf::from(shellexpand::tilde(raw).as_ref());
    if expanded.is_absolute() {
        expanded
    } else {
        base_dir.join(expanded)
    }
}

fn parse_package(raw: &str) -> Result<Reference> {
    let (id, version) = raw.split_once('@').ok_or_else(|| {
        ScriptpadError::Configuration(format!(
            "Package header '{}' must look like 'Id@Version'",
            raw
        ))
    })?;
    Ok(Reference::package(id.trim(), version.trim()))
}

/// Build a script from file contents.
///
/// `default_framework` applies when the file has no `Framework:` header.
pub fn script_from_source(
    path: &Path,
    contents: &str,
    default_framework: &str,
) -> Result<Script> {
    let (headers, code) = split_headers(contents);
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));

    let kind = headers.kind.as_deref().unwrap_or("statements").parse()?;
    let framework = headers
        .framework
        .as_deref()
        .unwrap_or(default_framework)
        .parse()?;

    let mut config = ScriptConfig::new(kind, framework);
    if let Some(level) = &headers.optimize {
        config.optimization_level = level.parse()?;
    }
    config.set_namespaces(&headers.namespaces)?;

    let mut references: Vec<Reference> = headers
        .references
        .iter()
        .map(|r| Reference::file(resolve_relative(base_dir, r)))
        .collect();
    for package in &headers.packages {
        references.push(parse_package(package)?);
    }
    config.set_references(references)?;

    let name = headers.name.unwrap_or_else(|| {
        path.file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "script".to_string())
    });

    let mut script = Script::new(name, config)
        .with_code(code)
        .with_path(path);

    if let Some(dir) = headers.connection {
        let dir = resolve_relative(base_dir, &dir);
        let connection_name = dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "connection".to_string());
        script.set_data_connection(Some(DataConnection::new(connection_name, dir)));
    }

    script.mark_saved();
    Ok(script)
}

/// Read a script file from disk
#[instrument(level = "debug", skip_all, fields(path = %path.display()))]
pub fn load_script(path: &Path, default_framework: &str) -> Result<Script> {
    if !path.is_file() {
        warn!("Script file not found");
        return Err(ScriptpadError::Configuration(format!(
            "Script file '{}' does not exist",
            path.display()
        )));
    }
    let contents = std::fs::read_to_string(path).map_err(|e| ScriptpadError::io(path, e))?;
    let script = script_from_source(path, &contents, default_framework)?;
    debug!(
        name = script.name(),
        kind = %script.config().kind,
        framework = %script.config().target_framework,
        "Loaded script"
    );
    Ok(script)
}
