mod report;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use rill::{Program, Rill, RillError};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use report::report_error;

const USAGE_EXIT: u8 = 64;
const STATIC_ERROR_EXIT: u8 = 65;
const RUNTIME_ERROR_EXIT: u8 = 70;

#[derive(Parser)]
#[command(name = "rill", version, about = "The rill scripting language")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start an interactive session
    Repl,
    /// Run a script
    Run { script: PathBuf },
    /// Check a script and write a program image next to it
    Compile {
        script: PathBuf,
        /// Where to write the image; defaults to the script path with a
        /// `.rillc` extension
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Run a compiled program image
    Execute { image: PathBuf },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            // Help and version are not usage errors
            if e.use_stderr() {
                eprintln!("{e}");
                return ExitCode::from(USAGE_EXIT);
            }
            println!("{e}");
            return ExitCode::SUCCESS;
        }
    };

    match cli.command.unwrap_or(Command::Repl) {
        Command::Repl => run_repl(),
        Command::Run { script } => run_file(&script),
        Command::Compile { script, output } => compile_file(&script, output.as_deref()),
        Command::Execute { image } => execute_image(&image),
    }
}

/// 70 when anything went wrong at runtime, 65 for everything static.
fn exit_code_for(errors: &[RillError]) -> ExitCode {
    if errors.is_empty() {
        return ExitCode::SUCCESS;
    }
    if errors
        .iter()
        .any(|e| matches!(e, RillError::Runtime { .. }))
    {
        ExitCode::from(RUNTIME_ERROR_EXIT)
    } else {
        ExitCode::from(STATIC_ERROR_EXIT)
    }
}

fn read_source(path: &Path) -> Result<String, ExitCode> {
    fs::read_to_string(path).map_err(|e| {
        eprintln!("error: cannot read {}: {}", path.display(), e);
        ExitCode::from(STATIC_ERROR_EXIT)
    })
}

fn run_file(path: &Path) -> ExitCode {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy();

    let mut rill = Rill::new();
    let errors = rill.run(&source, &mut std::io::stdout());
    for error in &errors {
        report_error(error, &source, Some(&filename), std::io::stderr());
    }
    exit_code_for(&errors)
}

fn compile_file(path: &Path, output: Option<&Path>) -> ExitCode {
    let source = match read_source(path) {
        Ok(source) => source,
        Err(code) => return code,
    };
    let filename = path.to_string_lossy();

    let statements = match Rill::parse(&source) {
        Ok(statements) => statements,
        Err(errors) => {
            for error in &errors {
                report_error(error, &source, Some(&filename), std::io::stderr());
            }
            return exit_code_for(&errors);
        }
    };

    let image_path = match output {
        Some(output) => output.to_path_buf(),
        None => path.with_extension("rillc"),
    };

    let result = Program::new(statements)
        .to_json()
        .and_then(|json| fs::write(&image_path, json).map_err(RillError::from));
    if let Err(error) = result {
        eprintln!("error: cannot write {}: {}", image_path.display(), error.detail());
        return ExitCode::from(STATIC_ERROR_EXIT);
    }
    ExitCode::SUCCESS
}

fn execute_image(path: &Path) -> ExitCode {
    let json = match read_source(path) {
        Ok(json) => json,
        Err(code) => return code,
    };

    let program = match Program::from_json(&json) {
        Ok(program) => program,
        Err(error) => {
            eprintln!("error: {}: {}", path.display(), error.detail());
            return ExitCode::from(STATIC_ERROR_EXIT);
        }
    };

    let mut rill = Rill::new();
    let errors = rill.run_program(&program, &mut std::io::stdout());
    // Images carry no source text, so errors render without a snippet
    for error in &errors {
        eprintln!("error: {}", error.detail());
    }
    exit_code_for(&errors)
}

fn run_repl() -> ExitCode {
    let mut rl = match DefaultEditor::new() {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("error: cannot start the repl: {e}");
            return ExitCode::from(STATIC_ERROR_EXIT);
        }
    };

    let mut rill = Rill::new();

    loop {
        match rl.readline("> ") {
            Ok(line) => {
                let _ = rl.add_history_entry(&line);
                let errors = rill.run(&line, &mut std::io::stdout());
                for error in &errors {
                    report_error(error, &line, None, std::io::stderr());
                }
            }
            Err(ReadlineError::Interrupted) => {
                println!();
            }
            Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("error: repl failed: {e:?}");
                break;
            }
        }
    }

    ExitCode::SUCCESS
}
