//! Generated source code that gets compiled together with a script

use std::collections::BTreeSet;

use super::reference::Dependant;

/// One source file: its `using` namespaces and the remaining code
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceCode {
    pub name: String,
    pub namespaces: Vec<String>,
    pub code: String,
}

impl SourceCode {
    /// Splits leading `using X;` directives off a source file.
    ///
    /// Only top-of-file directives are lifted. `using static` and alias
    /// directives are left in the code body.
    pub fn parse(name: impl Into<String>, text: &str) -> Self {
        let mut namespaces = Vec::new();
        let mut body_start = 0;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim();
            let namespace = trimmed
                .strip_prefix("using ")
                .and_then(|rest| rest.strip_suffix(';'))
                .map(str::trim)
                .filter(|ns| !ns.starts_with("static ") && !ns.contains('='));

            if let Some(ns) = namespace {
                namespaces.push(ns.to_string());
            } else if !trimmed.is_empty() && !trimmed.starts_with("//") {
                break;
            }
            body_start += line.len();
        }

        let code = &text[body_start..];
        Self {
            name: name.into(),
            namespaces,
            code: code.trim_end().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SourceCodeCollection {
    pub sources: Vec<SourceCode>,
}

impl SourceCodeCollection {
    pub fn new(sources: Vec<SourceCode>) -> Self {
        Self { sources }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.iter().all(|s| s.code.trim().is_empty())
    }

    /// All namespaces used by the collection, sorted and unique
    pub fn namespaces(&self) -> BTreeSet<String> {
        self.sources
            .iter()
            .flat_map(|s| s.namespaces.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeDependency {
    pub dependant: Dependant,
    pub code: SourceCodeCollection,
}
