use std::io::{self, BufRead, IsTerminal, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, ValueEnum};

use nyr::compiler::CompileError;
use nyr::diagnostic::ansi::AnsiRenderer;
use nyr::diagnostic::{json, registry, Diagnostic};
use nyr::heap::GcConfig;
use nyr::{InterpretError, RuntimeFailure, Vm, VmConfig};

// sysexits(3)
const EXIT_USAGE: u8 = 64;
const EXIT_COMPILE: u8 = 65;
const EXIT_RUNTIME: u8 = 70;
const EXIT_IO: u8 = 74;

#[derive(Parser)]
#[command(name = "nyr")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a nyr script, or start a REPL when none is given", long_about = None)]
struct Cli {
    /// Script to run
    script: Option<PathBuf>,

    /// Print the compiled bytecode instead of running it
    #[arg(long)]
    disassemble: bool,

    /// Error output format
    #[arg(long, value_enum, default_value_t = DiagnosticFormat::Ansi)]
    diagnostics: DiagnosticFormat,

    /// Plain error output without ANSI colors
    #[arg(long)]
    no_color: bool,

    /// Print the explanation of an error code (e.g. NYR-R002) and exit
    #[arg(long, value_name = "CODE")]
    explain: Option<String>,

    /// Collect garbage before every allocation
    #[arg(long, env = "NYR_GC_STRESS")]
    gc_stress: bool,

    /// Bytes allocated before the first collection
    #[arg(long, env = "NYR_GC_THRESHOLD", value_name = "BYTES")]
    gc_threshold: Option<usize>,

    /// Maximum call depth
    #[arg(long, env = "NYR_MAX_FRAMES", value_name = "N", default_value_t = 64,
          value_parser = clap::value_parser!(u32).range(1..))]
    max_frames: u32,

    /// Print collector statistics as JSON to stderr on exit
    #[arg(long)]
    gc_stats: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum DiagnosticFormat {
    Ansi,
    Json,
}

impl Cli {
    fn vm_config(&self) -> VmConfig {
        let mut gc = GcConfig { stress: self.gc_stress, ..GcConfig::default() };
        if let Some(threshold) = self.gc_threshold {
            gc.initial_threshold = threshold;
        }
        VmConfig { frames_max: self.max_frames as usize, gc }
    }
}

struct Reporter {
    format: DiagnosticFormat,
    use_color: bool,
}

impl Reporter {
    fn emit(&self, d: &Diagnostic) {
        match self.format {
            DiagnosticFormat::Ansi => eprint!("{}", AnsiRenderer { use_color: self.use_color }.render(d)),
            DiagnosticFormat::Json => eprintln!("{}", json::render(d)),
        }
    }

    fn compile_errors(&self, errors: &[CompileError], source: &str) {
        for error in errors {
            self.emit(&Diagnostic::from(error).with_source(source));
        }
    }

    fn runtime_failure(&self, failure: &RuntimeFailure) {
        self.emit(&Diagnostic::from(failure));
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return if e.use_stderr() { ExitCode::from(EXIT_USAGE) } else { ExitCode::SUCCESS };
        }
    };

    if let Some(code) = &cli.explain {
        return explain(code);
    }

    let reporter = Reporter {
        format: cli.diagnostics,
        use_color: !cli.no_color
            && std::env::var_os("NO_COLOR").is_none()
            && io::stderr().is_terminal(),
    };

    let config = cli.vm_config();
    log::debug!("vm config: {config:?}");
    let mut vm = Vm::new(config);
    let status = match &cli.script {
        Some(path) => run_file(&mut vm, path, &cli, &reporter),
        None => repl(&mut vm, &cli, &reporter),
    };

    if cli.gc_stats {
        match serde_json::to_string(&vm.gc_stats()) {
            Ok(stats) => eprintln!("{stats}"),
            Err(e) => log::warn!("could not serialize gc stats: {e}"),
        }
    }
    status
}

fn explain(code: &str) -> ExitCode {
    let code = code.to_ascii_uppercase();
    match registry::lookup(&code) {
        Some(entry) => {
            print!("{}", entry.long);
            ExitCode::SUCCESS
        }
        None => {
            eprintln!("nyr: unknown error code '{code}'");
            ExitCode::from(EXIT_USAGE)
        }
    }
}

fn run_file(vm: &mut Vm, path: &Path, cli: &Cli, reporter: &Reporter) -> ExitCode {
    let source = match std::fs::read_to_string(path) {
        Ok(source) => source,
        Err(e) => {
            eprintln!("nyr: can't read {}: {e}", path.display());
            return ExitCode::from(EXIT_IO);
        }
    };
    log::info!("running {}", path.display());

    if cli.disassemble {
        return match vm.disassemble(&source) {
            Ok(listing) => {
                print!("{listing}");
                ExitCode::SUCCESS
            }
            Err(errors) => {
                reporter.compile_errors(&errors, &source);
                ExitCode::from(EXIT_COMPILE)
            }
        };
    }

    match vm.interpret(&source) {
        Ok(()) => ExitCode::SUCCESS,
        Err(InterpretError::Compile(errors)) => {
            reporter.compile_errors(&errors, &source);
            ExitCode::from(EXIT_COMPILE)
        }
        Err(InterpretError::Runtime(failure)) => {
            reporter.runtime_failure(&failure);
            ExitCode::from(EXIT_RUNTIME)
        }
    }
}

/// One line per `interpret`; globals persist across lines and errors only
/// affect the line that raised them.
fn repl(vm: &mut Vm, cli: &Cli, reporter: &Reporter) -> ExitCode {
    let mut lines = io::stdin().lock().lines();
    loop {
        print!("nyr> ");
        if io::stdout().flush().is_err() {
            return ExitCode::from(EXIT_IO);
        }
        let line = match lines.next() {
            Some(Ok(line)) => line,
            Some(Err(e)) => {
                eprintln!("nyr: can't read input: {e}");
                return ExitCode::from(EXIT_IO);
            }
            None => {
                println!();
                return ExitCode::SUCCESS;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        if cli.disassemble {
            match vm.disassemble(&line) {
                Ok(listing) => print!("{listing}"),
                Err(errors) => reporter.compile_errors(&errors, &line),
            }
            continue;
        }
        match vm.interpret(&line) {
            Ok(()) => {}
            Err(InterpretError::Compile(errors)) => reporter.compile_errors(&errors, &line),
            Err(InterpretError::Runtime(failure)) => reporter.runtime_failure(&failure),
        }
    }
}
