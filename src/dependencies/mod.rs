//! Dependencies module - what a script needs to compile and run
//!
//! # Module Structure
//!
//! - `reference` - References, assets, versions and version deduplication
//! - `code` - Generated source code compiled alongside a script
//! - `packages` - Package asset lookup in the local package store
//! - `resolver` - The resolver that gathers and resolves everything

mod code;
mod packages;
mod reference;
mod resolver;

pub use code::{CodeDependency, SourceCode, SourceCodeCollection};
pub use packages::{LocalPackageProvider, PackageProvider};
pub use reference::{
    dedupe_by_path, dedupe_by_version, AssemblyImage, AssemblyVersion, Asset, Dependant,
    LoadStrategy, Reference, ReferenceDependency,
};
pub use resolver::{DependencyResolver, ScriptDependencies, ScriptDependencyResolver};
