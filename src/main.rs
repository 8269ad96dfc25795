use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::info;

use scriptpad::cli::{Cli, Command};
use scriptpad::config::{self, Config};
use scriptpad::executor::{InputReader, OutputWriter, RunOptions, ScriptOutput};
use scriptpad::protocol::ScriptOutputKind;
use scriptpad::scripts::load_script;
use scriptpad::{logging, Workbench};

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => config::load_config_from(path),
        None => config::load_config(),
    };
    let _guard = logging::init(&config.log_dir());

    match dispatch(cli.command, config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn dispatch(command: Command, config: Config) -> Result<ExitCode> {
    match command {
        Command::Run { file, code } => run(&file, code, config),
        Command::Compile { file } => compile(&file, config),
        Command::Config => {
            println!("# {}", config::config_path().display());
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run(file: &Path, code: Option<String>, config: Config) -> Result<ExitCode> {
    let script = load_script(file, &config.default_framework)
        .with_context(|| format!("loading {}", file.display()))?;
    let workbench = Workbench::new(config);
    let orphans = workbench.cleanup_orphans();
    if orphans > 0 {
        info!(orphans, "Killed script processes from a previous session");
    }

    let (_script, runner) = workbench.runner(script);
    let printer: Arc<dyn OutputWriter> = Arc::new(print_output);
    let stdin: Arc<dyn InputReader> = Arc::new(read_stdin_line);
    runner.add_output(printer);
    runner.add_input(stdin);

    let options = match code {
        Some(code) => RunOptions::with_code(code),
        None => RunOptions::default(),
    };
    let result = runner.run(options);
    workbench.shutdown();

    Ok(if result.completed_successfully {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn compile(file: &Path, config: Config) -> Result<ExitCode> {
    let script = load_script(file, &config.default_framework)
        .with_context(|| format!("loading {}", file.display()))?;
    let workbench = Workbench::new(config);

    let compiled = workbench
        .compiler()
        .parse_and_compile(script.code(), &script, &CancellationToken::new())?
        .context("compilation was cancelled")?;
    for diagnostic in compiled.user_diagnostics() {
        println!("{}", diagnostic);
    }

    if compiled.compilation.success {
        println!(
            "{}: compiled {} bytes",
            compiled.compilation.assembly_name,
            compiled.compilation.assembly_bytes.len()
        );
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn print_output(output: &ScriptOutput) -> scriptpad::Result<()> {
    let mut text = String::new();
    if let Some(title) = &output.title {
        text.push_str(title);
        text.push_str(": ");
    }
    text.push_str(&output.body);

    match output.kind {
        ScriptOutputKind::Error => eprintln!("{}", text),
        ScriptOutputKind::Text => {
            // Text already carries its own newlines
            let mut stdout = std::io::stdout().lock();
            let _ = stdout.write_all(text.as_bytes());
            let _ = stdout.flush();
        }
        ScriptOutputKind::Result | ScriptOutputKind::Raw => println!("{}", text),
    }
    Ok(())
}

fn read_stdin_line() -> Option<String> {
    let mut line = String::new();
    match std::io::stdin().read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}
