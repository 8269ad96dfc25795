//! Script host process spawning and teardown

use std::path::Path;
use std::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::HostConfig;
use crate::error::{Result, ScriptpadError};
use crate::process_manager::ProcessRegistry;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

#[cfg(unix)]
pub(crate) mod unix_process {
    use libc::{c_int, pid_t, ESRCH};

    /// Send a signal to a process group (negative pid targets the group)
    pub fn kill_process_group(pgid: u32, signal: c_int) -> Result<(), &'static str> {
        // Safety: kill() takes plain integers and touches no memory
        let rc = unsafe { libc::kill(-(pgid as pid_t), signal) };
        if rc == 0 {
            Ok(())
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::ESRCH => Err("No such process group"),
                libc::EPERM => Err("Permission denied"),
                libc::EINVAL => Err("Invalid signal"),
                _ => Err("Unknown error"),
            }
        }
    }

    /// Whether any process in the group is alive.
    /// EPERM means it exists but belongs to someone else: still alive.
    pub fn process_group_alive(pgid: u32) -> bool {
        // Safety: signal 0 only checks for existence
        let rc = unsafe { libc::kill(-(pgid as pid_t), 0) };
        if rc == 0 {
            true
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            errno != ESRCH
        }
    }

    pub const SIGTERM: c_int = libc::SIGTERM;
    pub const SIGKILL: c_int = libc::SIGKILL;
}

const KILL_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Owns the lifetime of a spawned host's process group.
///
/// Registers the pid on creation; on drop it unregisters and kills the
/// group, so it must live until the run is over.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    grace_period: Duration,
    registry: ProcessRegistry,
    killed: AtomicBool,
}

impl ProcessHandle {
    pub fn new(
        pid: u32,
        script_id: Uuid,
        script_name: &str,
        grace_period: Duration,
        registry: ProcessRegistry,
    ) -> Self {
        registry.register(pid, script_id, script_name);
        Self {
            pid,
            grace_period,
            registry,
            killed: AtomicBool::new(false),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn grace_period(&self) -> Duration {
        self.grace_period
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::SeqCst)
    }

    /// SIGTERM the group, wait up to the grace period for it to go away,
    /// then SIGKILL. Only the first call does anything.
    pub fn kill(&self) {
        if self.killed.swap(true, Ordering::SeqCst) {
            debug!(pid = self.pid, "Process already killed, skipping");
            return;
        }

        #[cfg(unix)]
        {
            use unix_process::{kill_process_group, process_group_alive, SIGKILL, SIGTERM};

            // Spawned with process_group(0), so pgid == pid
            let pgid = self.pid;
            match kill_process_group(pgid, SIGTERM) {
                Ok(()) => debug!(pgid, "SIGTERM sent"),
                Err("No such process group") => {
                    debug!(pgid, "Process group already exited");
                    return;
                }
                Err(e) => warn!(pgid, error = e, "SIGTERM failed, escalating"),
            }

            let start = Instant::now();
            while start.elapsed() < self.grace_period {
                if !process_group_alive(pgid) {
                    info!(pgid, elapsed_ms = start.elapsed().as_millis() as u64, "Process group exited after SIGTERM");
                    return;
                }
                std::thread::sleep(KILL_POLL_INTERVAL);
            }

            warn!(
                pgid,
                grace_ms = self.grace_period.as_millis() as u64,
                "Process group ignored SIGTERM, sending SIGKILL"
            );
            match kill_process_group(pgid, SIGKILL) {
                Ok(()) => info!(pgid, "Process group killed"),
                Err("No such process group") => debug!(pgid, "Process group exited before SIGKILL"),
                Err(e) => warn!(pgid, error = e, "SIGKILL failed"),
            }
        }

        #[cfg(not(unix))]
        {
            // The runner falls back to Child::kill on these platforms
            debug!(pid = self.pid, "Process marked as killed");
        }
    }

}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.registry.unregister(self.pid);
        // Reaps stragglers the script may have started in its group
        self.kill();
    }
}

/// A freshly spawned host with its pipes taken out
pub struct SpawnedHost {
    pub child: Child,
    pub stdin: ChildStdin,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Start `host` on `assembly` inside `working_dir`, in a new process group,
/// with all three standard streams piped.
pub fn spawn_host(host: &HostConfig, assembly: &Path, working_dir: &Path) -> Result<SpawnedHost> {
    let program = which::which(&host.command).map_err(|e| {
        ScriptpadError::Configuration(format!(
            "Script host '{}' was not found: {}",
            host.command, e
        ))
    })?;

    let mut command = Command::new(&program);
    command
        .args(&host.args)
        .arg(assembly)
        .current_dir(working_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    // Own process group so stop() can signal everything the script started
    #[cfg(unix)]
    command.process_group(0);

    let mut child = command.spawn().map_err(|e| {
        ScriptpadError::Process(format!("Failed to start '{}': {}", program.display(), e))
    })?;

    let (Some(stdin), Some(stdout), Some(stderr)) =
        (child.stdin.take(), child.stdout.take(), child.stderr.take())
    else {
        let _ = child.kill();
        let _ = child.wait();
        return Err(ScriptpadError::Process(
            "Script host started without piped stdio".into(),
        ));
    };

    info!(pid = child.id(), host = %program.display(), assembly = %assembly.display(), "Script host started");
    Ok(SpawnedHost {
        child,
        stdin,
        stdout,
        stderr,
    })
}
