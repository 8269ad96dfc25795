//! Process Registry
//!
//! Tracks the script host processes this session started so they can be
//! killed on shutdown, and so a crashed session's leftovers can be found
//! and killed on the next startup.
//!
//! - Active pids are persisted to `<working_dir>/active-pids.json`, shared
//!   by every session using that working directory. Each entry records the
//!   session that owns it and each session only rewrites its own entries.
//! - Every tracked pid is also a process group id (hosts are spawned with
//!   `process_group(0)`), so kills take the whole group down
//!
//! The registry is a cheap-to-clone handle passed to whoever spawns
//! processes; there is no global instance.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sysinfo::{Pid, ProcessesToUpdate, System};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Result, ScriptpadError};

const ACTIVE_PIDS_FILE: &str = "active-pids.json";

/// A process that started this long after its entry was recorded is a
/// different process reusing the pid
const START_TIME_SLACK_SECS: i64 = 2;

/// A tracked script host process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessInfo {
    pub pid: u32,
    pub script_id: Uuid,
    pub script_name: String,
    pub started_at: DateTime<Utc>,
    /// Pid of the session that spawned it; 0 when unknown
    #[serde(default)]
    pub owner_pid: u32,
}

#[derive(Debug)]
struct RegistryInner {
    active: RwLock<HashMap<u32, ProcessInfo>>,
    active_pids_path: PathBuf,
    /// Serializes read-merge-write of the pid file within this session
    file_lock: Mutex<()>,
}

#[derive(Debug, Clone)]
pub struct ProcessRegistry {
    inner: Arc<RegistryInner>,
}

impl ProcessRegistry {
    /// Registry persisting into `working_dir`
    pub fn new(working_dir: impl AsRef<Path>) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                active: RwLock::new(HashMap::new()),
                active_pids_path: working_dir.as_ref().join(ACTIVE_PIDS_FILE),
                file_lock: Mutex::new(()),
            }),
        }
    }

    pub fn active_pids_path(&self) -> &Path {
        &self.inner.active_pids_path
    }

    pub fn register(&self, pid: u32, script_id: Uuid, script_name: &str) {
        info!(pid, %script_id, script_name, "Registering script process");
        self.inner.active.write().insert(
            pid,
            ProcessInfo {
                pid,
                script_id,
                script_name: script_name.to_string(),
                started_at: Utc::now(),
                owner_pid: std::process::id(),
            },
        );
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist active pids");
        }
    }

    pub fn unregister(&self, pid: u32) {
        let removed = self.inner.active.write().remove(&pid).is_some();
        if !removed {
            return;
        }
        debug!(pid, "Unregistered script process");
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist active pids");
        }
    }

    pub fn active_processes(&self) -> Vec<ProcessInfo> {
        let mut processes: Vec<ProcessInfo> = self.inner.active.read().values().cloned().collect();
        processes.sort_by_key(|p| p.started_at);
        processes
    }

    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    pub fn is_tracked(&self, pid: u32) -> bool {
        self.inner.active.read().contains_key(&pid)
    }

    /// SIGKILL every process group this session tracks and forget them.
    /// Entries of other sessions stay in the pid file. Used on shutdown.
    pub fn kill_all(&self) -> usize {
        let processes: Vec<ProcessInfo> = self.inner.active.write().drain().map(|(_, p)| p).collect();
        if processes.is_empty() {
            debug!("No active processes to kill");
        } else {
            info!(count = processes.len(), "Killing active script processes");
            for process in &processes {
                kill_process(process.pid);
            }
        }
        if let Err(e) = self.persist() {
            warn!(error = %e, "Failed to persist active pids");
        }
        processes.len()
    }

    /// Kill processes left behind by sessions that are no longer running,
    /// then drop them from the pid file. Entries owned by a live session
    /// are left alone, and so are pids now used by a newer process.
    /// Returns how many were killed.
    pub fn cleanup_orphans(&self) -> usize {
        let _file = self.inner.file_lock.lock();
        let persisted = self.load_persisted();
        if persisted.is_empty() {
            debug!("No orphaned script processes");
            return 0;
        }

        let session = std::process::id();
        let system = process_snapshot();
        let mut kept = Vec::new();
        let mut killed = 0;
        for entry in persisted {
            if entry.owner_pid == session && self.is_tracked(entry.pid) {
                continue;
            }
            if entry.owner_pid != 0
                && entry.owner_pid != session
                && system.process(Pid::from_u32(entry.owner_pid)).is_some()
            {
                debug!(pid = entry.pid, owner = entry.owner_pid, "Process belongs to a live session");
                kept.push(entry);
                continue;
            }

            match system.process(Pid::from_u32(entry.pid)) {
                None => debug!(pid = entry.pid, "Orphan already exited"),
                Some(process) if !started_by_then(process.start_time(), entry.started_at) => {
                    debug!(pid = entry.pid, "Pid now belongs to another process, leaving it alone");
                }
                Some(_) => {
                    warn!(
                        pid = entry.pid,
                        script = %entry.script_name,
                        started_at = %entry.started_at,
                        "Killing orphaned script process"
                    );
                    kill_process(entry.pid);
                    killed += 1;
                }
            }
        }

        kept.extend(self.active_processes());
        if let Err(e) = self.write_persisted(&kept) {
            warn!(error = %e, "Failed to persist active pids");
        }

        if killed > 0 {
            info!(killed, "Cleaned up orphaned script processes");
        }
        killed
    }

    /// Replace this session's entries in the pid file with the live table
    fn persist(&self) -> Result<()> {
        let _file = self.inner.file_lock.lock();
        let session = std::process::id();
        let mut merged: Vec<ProcessInfo> = self
            .load_persisted()
            .into_iter()
            .filter(|p| p.owner_pid != session)
            .collect();
        merged.extend(self.active_processes());
        self.write_persisted(&merged)
    }

    fn write_persisted(&self, processes: &[ProcessInfo]) -> Result<()> {
        let path = &self.inner.active_pids_path;
        if processes.is_empty() {
            self.remove_pid_file();
            return Ok(());
        }
        let parent = path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent).map_err(|e| ScriptpadError::io(parent, e))?;

        let json = serde_json::to_string_pretty(processes)?;
        // Write then rename so readers never see a half-written file
        let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(|e| ScriptpadError::io(parent, e))?;
        tmp.write_all(json.as_bytes())
            .map_err(|e| ScriptpadError::io(tmp.path(), e))?;
        tmp.persist(path)
            .map_err(|e| ScriptpadError::io(path, e.error))?;
        Ok(())
    }

    fn load_persisted(&self) -> Vec<ProcessInfo> {
        let path = &self.inner.active_pids_path;
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read active pids");
                return Vec::new();
            }
        };
        serde_json::from_str(&contents).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "Failed to parse active pids");
            Vec::new()
        })
    }

    fn remove_pid_file(&self) {
        let path = &self.inner.active_pids_path;
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove active pids file"),
        }
    }
}

/// Whether a process started at `start_secs` (Unix time) could be the one
/// recorded at `recorded_at`
fn started_by_then(start_secs: u64, recorded_at: DateTime<Utc>) -> bool {
    i64::try_from(start_secs).is_ok_and(|start| start <= recorded_at.timestamp() + START_TIME_SLACK_SECS)
}

fn process_snapshot() -> System {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);
    system
}

fn kill_process(pid: u32) {
    #[cfg(unix)]
    {
        use crate::executor::unix_process::{kill_process_group, SIGKILL};
        match kill_process_group(pid, SIGKILL) {
            Ok(()) => debug!(pid, "Killed process group"),
            Err(e) => debug!(pid, error = e, "Process group kill failed"),
        }
    }

    #[cfg(not(unix))]
    {
        warn!(pid, "Killing process groups is not supported on this platform");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry() -> (ProcessRegistry, TempDir) {
        let dir = TempDir::new().unwrap();
        (ProcessRegistry::new(dir.path()), dir)
    }

    #[test]
    fn test_register_persists_and_unregister_updates() {
        let (registry, _dir) = registry();
        let script_id = Uuid::new_v4();

        registry.register(4_000_001, script_id, "first");
        registry.register(4_000_002, script_id, "second");
        assert_eq!(registry.active_count(), 2);

        let persisted: Vec<ProcessInfo> =
            serde_json::from_str(&fs::read_to_string(registry.active_pids_path()).unwrap())
                .unwrap();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().all(|p| p.script_id == script_id));

        registry.unregister(4_000_001);
        let persisted: Vec<ProcessInfo> =
            serde_json::from_str(&fs::read_to_string(registry.active_pids_path()).unwrap())
                .unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].script_name, "second");

        // Unknown pids are ignored
        registry.unregister(12);
        assert_eq!(registry.active_count(), 1);
    }

    #[test]
    fn test_clones_share_state() {
        let (registry, _dir) = registry();
        let clone = registry.clone();
        clone.register(4_000_003, Uuid::new_v4(), "shared");
        assert!(registry.is_tracked(4_000_003));
    }

    #[test]
    fn test_cleanup_orphans_clears_file_of_dead_pids() {
        let (registry, dir) = registry();
        let stale = vec![ProcessInfo {
            pid: 4_000_004,
            script_id: Uuid::new_v4(),
            script_name: "gone".into(),
            started_at: Utc::now(),
            owner_pid: 4_000_005,
        }];
        fs::write(
            dir.path().join(ACTIVE_PIDS_FILE),
            serde_json::to_string(&stale).unwrap(),
        )
        .unwrap();

        assert_eq!(registry.cleanup_orphans(), 0);
        assert!(!registry.active_pids_path().exists());
    }

    #[test]
    fn test_cleanup_with_no_file_or_bad_json() {
        let (registry, dir) = registry();
        assert_eq!(registry.cleanup_orphans(), 0);

        fs::write(dir.path().join(ACTIVE_PIDS_FILE), "not json").unwrap();
        assert_eq!(registry.cleanup_orphans(), 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_kill_all_kills_tracked_groups() {
        use std::os::unix::process::CommandExt;
        use std::time::{Duration, Instant};

        let (registry, _dir) = registry();
        let mut child = std::process::Command::new("sh")
            .args(["-c", "sleep 30"])
            .process_group(0)
            .spawn()
            .unwrap();
        registry.register(child.id(), Uuid::new_v4(), "sleeper");

        assert_eq!(registry.kill_all(), 1);
        assert_eq!(registry.active_count(), 0);
        assert!(!registry.active_pids_path().exists());

        let start = Instant::now();
        let status = loop {
            if let Some(status) = child.try_wait().unwrap() {
                break Some(status);
            }
            if start.elapsed() > Duration::from_secs(5) {
                break None;
            }
            std::thread::sleep(Duration::from_millis(20));
        };
        assert!(status.is_some_and(|s| !s.success()));
    }

    #[cfg(unix)]
    fn spawn_group(script: &str) -> std::process::Child {
        use std::os::unix::process::CommandExt;
        std::process::Command::new("sh")
            .args(["-c", script])
            .process_group(0)
            .spawn()
            .unwrap()
    }

    #[cfg(unix)]
    fn exited_within(child: &mut std::process::Child, timeout: std::time::Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if child.try_wait().unwrap().is_some() {
                return true;
            }
            std::thread::sleep(std::time::Duration::from_millis(20));
        }
        false
    }

    fn write_entries(dir: &TempDir, entries: &[ProcessInfo]) {
        fs::write(
            dir.path().join(ACTIVE_PIDS_FILE),
            serde_json::to_string(entries).unwrap(),
        )
        .unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_spares_processes_of_a_live_session() {
        let (registry, dir) = registry();
        let mut other_session = spawn_group("sleep 30");
        let mut script = spawn_group("sleep 30");
        write_entries(
            &dir,
            &[ProcessInfo {
                pid: script.id(),
                script_id: Uuid::new_v4(),
                script_name: "theirs".into(),
                started_at: Utc::now(),
                owner_pid: other_session.id(),
            }],
        );

        assert_eq!(registry.cleanup_orphans(), 0);
        assert!(script.try_wait().unwrap().is_none());
        assert_eq!(registry.load_persisted().len(), 1);

        // Registering our own process keeps their entry in the file
        registry.register(4_000_006, Uuid::new_v4(), "ours");
        let persisted = registry.load_persisted();
        assert_eq!(persisted.len(), 2);
        assert!(persisted.iter().any(|p| p.pid == script.id()));

        registry.unregister(4_000_006);
        assert_eq!(registry.load_persisted().len(), 1);

        for child in [&mut script, &mut other_session] {
            let _ = child.kill();
            let _ = child.wait();
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_kills_processes_of_a_dead_session() {
        let (registry, dir) = registry();
        let mut script = spawn_group("sleep 30");
        write_entries(
            &dir,
            &[ProcessInfo {
                pid: script.id(),
                script_id: Uuid::new_v4(),
                script_name: "left behind".into(),
                started_at: Utc::now(),
                owner_pid: 4_000_007,
            }],
        );

        assert_eq!(registry.cleanup_orphans(), 1);
        assert!(exited_within(&mut script, std::time::Duration::from_secs(5)));
        assert!(!registry.active_pids_path().exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_cleanup_leaves_reused_pids_alone() {
        let (registry, dir) = registry();
        let mut newer = spawn_group("sleep 30");
        write_entries(
            &dir,
            &[ProcessInfo {
                pid: newer.id(),
                script_id: Uuid::new_v4(),
                script_name: "long gone".into(),
                started_at: Utc::now() - chrono::Duration::hours(1),
                owner_pid: 4_000_008,
            }],
        );

        assert_eq!(registry.cleanup_orphans(), 0);
        assert!(newer.try_wait().unwrap().is_none());
        let _ = newer.kill();
        let _ = newer.wait();
    }

    #[test]
    fn test_started_by_then_allows_clock_slack() {
        let recorded = Utc::now();
        let secs = recorded.timestamp() as u64;
        assert!(started_by_then(secs - 10, recorded));
        assert!(started_by_then(secs + 1, recorded));
        assert!(!started_by_then(secs + 60, recorded));
    }
}
