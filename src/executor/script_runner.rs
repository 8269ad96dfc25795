//! Runs a script end to end
//!
//! A run compiles the script, deploys the assembly into a fresh run
//! directory, starts the host in its own process group and pumps its
//! stdout through the IPC listener until it exits or is stopped.
//!
//! One run at a time per runner. `stop()` may be called from any thread.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::compilation::ScriptCompiler;
use crate::config::{Config, HostConfig, ProcessLimits};
use crate::error::{Result, ScriptpadError};
use crate::ipc::{HandlerRegistry, IpcListener, IpcWriter, ListenerOptions, RawLineHandler};
use crate::process_manager::ProcessRegistry;
use crate::protocol::{OutputMessage, RequestInput, RunComplete, UserInput};
use crate::scripts::Script;

use super::deploy::RunDirectory;
use super::output::{correct_stack_trace_lines, InputReader, OutputWriter, ScriptOutput, Subscribers};
use super::process::{spawn_host, ProcessHandle, SpawnedHost};
use super::run_result::{RunOptions, RunResult};
use super::stderr_buffer::{spawn_stderr_reader, StderrLineHandler};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(20);
/// Slack on top of the stop grace period before the run thread kills the host itself
const CANCEL_KILL_MARGIN: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunnerState {
    #[default]
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
    Faulted,
}

impl RunnerState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Starting | Self::Running | Self::Stopping)
    }
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// Everything a runner needs from configuration
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub host: HostConfig,
    pub working_dir: PathBuf,
    pub limits: ProcessLimits,
    pub ipc: ListenerOptions,
}

impl RunnerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.host.clone(),
            working_dir: config.working_dir(),
            limits: config.process_limits.clone(),
            ipc: ListenerOptions::from(&config.ipc),
        }
    }
}

struct ActiveRun {
    cancel: CancellationToken,
    process: Option<Arc<ProcessHandle>>,
}

enum Exit {
    Exited(ExitStatus),
    Cancelled,
    TimedOut(Duration),
    WaitFailed(std::io::Error),
}

pub struct ScriptRunner {
    script: Arc<RwLock<Script>>,
    compiler: Arc<ScriptCompiler>,
    processes: ProcessRegistry,
    settings: RunnerSettings,
    state: Mutex<RunnerState>,
    active: Mutex<Option<ActiveRun>>,
    inputs: Arc<Subscribers<dyn InputReader>>,
    outputs: Arc<Subscribers<dyn OutputWriter>>,
}

impl ScriptRunner {
    pub fn new(
        script: Arc<RwLock<Script>>,
        compiler: Arc<ScriptCompiler>,
        processes: ProcessRegistry,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            script,
            compiler,
            processes,
            settings,
            state: Mutex::new(RunnerState::Idle),
            active: Mutex::new(None),
            inputs: Arc::default(),
            outputs: Arc::default(),
        }
    }

    pub fn state(&self) -> RunnerState {
        *self.state.lock()
    }

    pub fn script_id(&self) -> Uuid {
        self.script.read().id()
    }

    pub fn add_input(&self, reader: Arc<dyn InputReader>) {
        self.inputs.add(reader);
    }

    pub fn remove_input(&self, reader: &Arc<dyn InputReader>) -> bool {
        self.inputs.remove(reader)
    }

    pub fn add_output(&self, writer: Arc<dyn OutputWriter>) {
        self.outputs.add(writer);
    }

    pub fn remove_output(&self, writer: &Arc<dyn OutputWriter>) -> bool {
        self.outputs.remove(writer)
    }

    /// Compile and run the script, blocking until it finishes or is stopped
    #[instrument(skip_all, fields(script_id = %self.script_id()))]
    pub fn run(&self, options: RunOptions) -> RunResult {
        let cancel = match self.begin_run() {
            Ok(cancel) => cancel,
            Err(e) => {
                warn!(error = %e, "Run rejected");
                self.outputs.write_all(&ScriptOutput::error(e.user_message()));
                return RunResult::attempt_failure();
            }
        };

        let start = Instant::now();
        let result = self.execute(options, &cancel, start);

        *self.active.lock() = None;
        let final_state = if result.cancelled || result.completed_successfully {
            RunnerState::Stopped
        } else {
            RunnerState::Faulted
        };
        self.set_state(final_state);
        info!(
            state = %final_state,
            attempt_succeeded = result.attempt_succeeded,
            completed = result.completed_successfully,
            cancelled = result.cancelled,
            duration_ms = result.duration_ms,
            "Run finished"
        );
        result
    }

    /// Cancel the current run and take its process group down:
    /// SIGTERM, then SIGKILL after the grace period. Safe to call at any
    /// time and more than once.
    pub fn stop(&self) {
        let (cancel, process) = match self.active.lock().as_ref() {
            Some(run) => (run.cancel.clone(), run.process.clone()),
            None => {
                debug!("Stop requested with no run in progress");
                return;
            }
        };

        {
            let mut state = self.state.lock();
            if matches!(*state, RunnerState::Starting | RunnerState::Running) {
                *state = RunnerState::Stopping;
            }
        }
        info!(script_id = %self.script_id(), "Stopping script");
        cancel.cancel();
        if let Some(process) = process {
            process.kill();
        }
    }

    fn begin_run(&self) -> Result<CancellationToken> {
        let mut active = self.active.lock();
        if active.is_some() {
            return Err(ScriptpadError::Configuration(
                "Script is already running".into(),
            ));
        }
        let cancel = CancellationToken::new();
        *active = Some(ActiveRun {
            cancel: cancel.clone(),
            process: None,
        });
        self.set_state(RunnerState::Starting);
        Ok(cancel)
    }

    fn set_state(&self, state: RunnerState) {
        let mut current = self.state.lock();
        if *current != state {
            let from = *current;
            debug!(%from, to = %state, "Runner state changed");
            *current = state;
        }
    }

    fn report_error(&self, error: &ScriptpadError) {
        error!(error = %error, severity = ?error.severity(), "Run attempt failed");
        self.outputs.write_all(&ScriptOutput::error(error.user_message()));
    }

    fn execute(&self, options: RunOptions, cancel: &CancellationToken, start: Instant) -> RunResult {
        let script = self.script.read().clone();
        let code = options
            .specific_code
            .unwrap_or_else(|| script.code().to_string());

        let compiled = match self.compiler.parse_and_compile(&code, &script, cancel) {
            Ok(Some(compiled)) => compiled,
            Ok(None) => return RunResult::cancelled(),
            Err(e) => {
                self.report_error(&e);
                return RunResult::attempt_failure();
            }
        };

        if !compiled.compilation.success {
            let errors: Vec<String> = compiled
                .user_diagnostics()
                .iter()
                .filter(|d| d.is_error())
                .map(ToString::to_string)
                .collect();
            warn!(errors = errors.len(), "Script did not compile");
            self.outputs.write_all(
                &ScriptOutput::error(errors.join("\n")).with_title("Compilation failed"),
            );
            return RunResult::attempt_failure();
        }
        if cancel.is_cancelled() {
            return RunResult::cancelled();
        }

        let run_dir = match RunDirectory::create(&self.settings.working_dir, script.id()) {
            Ok(dir) => dir,
            Err(e) => {
                self.report_error(&e);
                return RunResult::attempt_failure();
            }
        };
        let deployed = run_dir.deploy(
            &compiled.compilation.assembly_name,
            &compiled.compilation.assembly_bytes,
            &compiled.dependencies.deploy_assets(),
            &compiled.dependencies.deploy_images(),
        );

        let result = match deployed {
            Ok(assembly) => self.run_process(
                &script,
                &assembly,
                run_dir.path(),
                compiled.program.user_program_start_line,
                cancel,
                start,
            ),
            Err(e) => {
                self.report_error(&e);
                RunResult::attempt_failure()
            }
        };
        run_dir.remove();
        result
    }

    fn run_process(
        &self,
        script: &Script,
        assembly: &Path,
        run_dir: &Path,
        user_program_start_line: usize,
        cancel: &CancellationToken,
        start: Instant,
    ) -> RunResult {
        if cancel.is_cancelled() {
            return RunResult::cancelled();
        }

        let SpawnedHost {
            mut child,
            stdin,
            stdout,
            stderr,
        } = match spawn_host(&self.settings.host, assembly, run_dir) {
            Ok(host) => host,
            Err(e) => {
                self.report_error(&e);
                return RunResult::attempt_failure();
            }
        };

        let process = Arc::new(ProcessHandle::new(
            child.id(),
            script.id(),
            script.name(),
            self.settings.limits.stop_grace_period(),
            self.processes.clone(),
        ));
        if let Some(run) = self.active.lock().as_mut() {
            run.process = Some(process.clone());
        }
        // stop() may have run before the handle was published
        if cancel.is_cancelled() {
            process.kill();
        }

        let writer = Arc::new(IpcWriter::new(stdin));
        let completion = Arc::new(Mutex::new(None::<RunComplete>));
        let registry = self.message_handlers(writer, completion.clone(), user_program_start_line);

        let raw_outputs = self.outputs.clone();
        let raw_handler: RawLineHandler =
            Arc::new(move |line: &str| raw_outputs.write_all(&ScriptOutput::raw(line)));
        let mut listener = IpcListener::listen(stdout, registry, raw_handler, self.settings.ipc);

        let stderr_outputs = self.outputs.clone();
        let on_stderr: StderrLineHandler =
            Arc::new(move |line: &str| stderr_outputs.write_all(&ScriptOutput::error(line)));
        let mut stderr_capture =
            spawn_stderr_reader(stderr, script.name().to_string(), Some(on_stderr));

        {
            let mut state = self.state.lock();
            if *state == RunnerState::Starting {
                *state = RunnerState::Running;
            }
        }

        let exit = self.wait_for_exit(&mut child, &process, cancel, start);

        // Let the pipes drain before judging the run
        let join_timeout = self.settings.ipc.join_timeout;
        if !listener.wait_until_drained(join_timeout) {
            debug!("Script stdout still open after exit");
        }
        listener.shutdown();
        stderr_capture.wait_with_timeout(join_timeout);
        let duration_ms = start.elapsed().as_millis() as u64;

        match exit {
            Exit::Cancelled => RunResult::cancelled(),
            Exit::TimedOut(limit) => {
                warn!(limit_secs = limit.as_secs(), "Script exceeded its max runtime");
                self.outputs.write_all(&ScriptOutput::error(format!(
                    "Script was stopped after exceeding the maximum runtime of {}s",
                    limit.as_secs()
                )));
                RunResult::completion_failure(duration_ms)
            }
            Exit::WaitFailed(e) => {
                self.report_error(&ScriptpadError::Process(format!(
                    "Failed to wait for script host: {}",
                    e
                )));
                RunResult::completion_failure(duration_ms)
            }
            Exit::Exited(status) => {
                let reported = completion.lock().take();
                let reported_error = reported.and_then(|c| c.error);
                if status.success() && reported_error.is_none() {
                    return RunResult::success(duration_ms);
                }

                match &reported_error {
                    // The script already wrote the exception as an output
                    Some(message) => info!(error = %message, "Script reported an error"),
                    None => {
                        let stderr_tail = stderr_capture.buffer.last_lines(5).join("\n");
                        warn!(status = %status, stderr_tail = %stderr_tail, "Script host failed");
                        self.outputs.write_all(&ScriptOutput::error(format!(
                            "Script process exited with {}",
                            status
                        )));
                    }
                }
                RunResult::completion_failure(duration_ms)
            }
        }
    }

    fn message_handlers(
        &self,
        writer: Arc<IpcWriter>,
        completion: Arc<Mutex<Option<RunComplete>>>,
        user_program_start_line: usize,
    ) -> HandlerRegistry {
        let registry = HandlerRegistry::new();

        let outputs = self.outputs.clone();
        registry.on(move |message: OutputMessage| {
            let mut output = ScriptOutput::from(message);
            if output.is_error() {
                output.body = correct_stack_trace_lines(&output.body, user_program_start_line);
            }
            outputs.write_all(&output);
            Ok(())
        });

        let inputs = self.inputs.clone();
        registry.on(move |_: RequestInput| {
            let input = inputs.read_line();
            debug!(answered = input.is_some(), "Script requested input");
            writer.send(&UserInput { input }).map(|_| ())
        });

        registry.on(move |message: RunComplete| {
            *completion.lock() = Some(message);
            Ok(())
        });

        registry
    }

    fn wait_for_exit(
        &self,
        child: &mut Child,
        process: &ProcessHandle,
        cancel: &CancellationToken,
        start: Instant,
    ) -> Exit {
        let max_runtime = self.settings.limits.max_runtime();
        let mut cancelled_at: Option<Instant> = None;
        loop {
            match child.try_wait() {
                // A kill from stop() also lands here
                Ok(Some(_)) if cancel.is_cancelled() => return Exit::Cancelled,
                Ok(Some(status)) => {
                    debug!(status = %status, "Script host exited");
                    return Exit::Exited(status);
                }
                Ok(None) => {}
                Err(e) => return Exit::WaitFailed(e),
            }

            if cancel.is_cancelled() {
                // stop() owns the SIGTERM/SIGKILL sequence; only step in if
                // the host outlives it
                let since = *cancelled_at.get_or_insert_with(Instant::now);
                if since.elapsed() >= process.grace_period() + CANCEL_KILL_MARGIN {
                    warn!(pid = process.pid(), "Script host outlived its stop, killing");
                    terminate(child, process);
                    return Exit::Cancelled;
                }
            } else if let Some(limit) = max_runtime {
                if start.elapsed() >= limit {
                    terminate(child, process);
                    return Exit::TimedOut(limit);
                }
            }
            std::thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

/// Graceful stop of the process group, then a hard kill of the child
fn terminate(child: &mut Child, process: &ProcessHandle) {
    process.kill();
    // Covers platforms without process groups
    let _ = child.kill();
    if let Err(e) = child.wait() {
        warn!(error = %e, "Failed to reap script host");
    }
}

#[cfg(all(test, unix))]
#[path = "script_runner_tests.rs"]
mod tests;
