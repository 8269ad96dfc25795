//! Per-run deployment directories
//!
//! Each run gets `<working_dir>/<script-id>/run-<n>` holding the compiled
//! assembly and everything it loads at runtime. Runs never share a
//! directory, so a slow-to-exit host cannot lock files the next run needs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::dependencies::{AssemblyImage, Asset};
use crate::error::{Result, ScriptpadError};

const RUN_DIR_PREFIX: &str = "run-";

#[derive(Debug)]
pub struct RunDirectory {
    path: PathBuf,
    run_number: u64,
}

impl RunDirectory {
    /// Claim the next free `run-<n>` directory for `script_id`
    pub fn create(working_dir: &Path, script_id: Uuid) -> Result<Self> {
        let script_dir = working_dir.join(script_id.to_string());
        fs::create_dir_all(&script_dir).map_err(|e| ScriptpadError::io(&script_dir, e))?;

        let mut run_number = last_run_number(&script_dir) + 1;
        loop {
            let path = script_dir.join(format!("{}{}", RUN_DIR_PREFIX, run_number));
            match fs::create_dir(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "Created run directory");
                    return Ok(Self { path, run_number });
                }
                // Another run claimed it first
                Err(e) if e.kind() == ErrorKind::AlreadyExists => run_number += 1,
                Err(e) => return Err(ScriptpadError::io(&path, e)),
            }
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn run_number(&self) -> u64 {
        self.run_number
    }

    /// Write the script assembly and copy its runtime dependencies next to
    /// it. Returns the assembly path.
    pub fn deploy(
        &self,
        assembly_name: &str,
        assembly_bytes: &[u8],
        assets: &[Asset],
        images: &[AssemblyImage],
    ) -> Result<PathBuf> {
        let assembly_path = self.path.join(format!("{}.dll", assembly_name));

        for asset in assets {
            let Some(file_name) = asset.path.file_name() else {
                continue;
            };
            let target = self.path.join(file_name);
            if target == assembly_path {
                warn!(asset = %asset.path.display(), "Asset would overwrite the script assembly, skipping");
                continue;
            }
            fs::copy(&asset.path, &target).map_err(|e| ScriptpadError::io(&asset.path, e))?;
        }

        for image in images {
            let target = self.path.join(image.file_name());
            fs::write(&target, image.bytes.as_slice()).map_err(|e| ScriptpadError::io(&target, e))?;
        }

        fs::write(&assembly_path, assembly_bytes)
            .map_err(|e| ScriptpadError::io(&assembly_path, e))?;

        debug!(
            assembly = %assembly_path.display(),
            assets = assets.len(),
            images = images.len(),
            "Deployed script"
        );
        Ok(assembly_path)
    }

    /// Best-effort removal once the run is over
    pub fn remove(self) {
        if let Err(e) = fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), error = %e, "Failed to remove run directory");
        }
    }
}

fn last_run_number(script_dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(script_dir) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| {
            entry
                .file_name()
                .to_str()
                .and_then(|name| name.strip_prefix(RUN_DIR_PREFIX))
                .and_then(|n| n.parse::<u64>().ok())
        })
        .max()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_run_numbers_increase_per_script() {
        let working = TempDir::new().unwrap();
        let script_id = Uuid::new_v4();

        let first = RunDirectory::create(working.path(), script_id).unwrap();
        let second = RunDirectory::create(working.path(), script_id).unwrap();
        assert_eq!(first.run_number(), 1);
        assert_eq!(second.run_number(), 2);
        assert!(second.path().ends_with(format!("{}/run-2", script_id)));

        let other = RunDirectory::create(working.path(), Uuid::new_v4()).unwrap();
        assert_eq!(other.run_number(), 1);
    }

    #[test]
    fn test_numbering_continues_after_removed_runs() {
        let working = TempDir::new().unwrap();
        let script_id = Uuid::new_v4();
        let first = RunDirectory::create(working.path(), script_id).unwrap();
        let second = RunDirectory::create(working.path(), script_id).unwrap();
        first.remove();

        let third = RunDirectory::create(working.path(), script_id).unwrap();
        assert_eq!(third.run_number(), 3);
        assert!(second.path().is_dir());
    }

    #[test]
    fn test_deploy_writes_assembly_assets_and_images() {
        let working = TempDir::new().unwrap();
        let libs = TempDir::new().unwrap();
        let lib = libs.path().join("Humanizer.dll");
        fs::write(&lib, b"lib").unwrap();

        let run = RunDirectory::create(working.path(), Uuid::new_v4()).unwrap();
        let assembly = run
            .deploy(
                "Sum_It__",
                b"assembly",
                &[Asset::from_file(&lib)],
                &[AssemblyImage::new("Connection", b"image".to_vec())],
            )
            .unwrap();

        assert_eq!(assembly, run.path().join("Sum_It__.dll"));
        assert_eq!(fs::read(&assembly).unwrap(), b"assembly");
        assert_eq!(fs::read(run.path().join("Humanizer.dll")).unwrap(), b"lib");
        assert_eq!(fs::read(run.path().join("Connection.dll")).unwrap(), b"image");

        let path = run.path().to_path_buf();
        run.remove();
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_asset_is_io_error() {
        let working = TempDir::new().unwrap();
        let run = RunDirectory::create(working.path(), Uuid::new_v4()).unwrap();
        let err = run
            .deploy("x__", b"", &[Asset::from_file("/no/such/lib.dll")], &[])
            .unwrap_err();
        assert!(matches!(err, ScriptpadError::Io { .. }));
    }
}
