use anyhow::{Context, Result};
use argh::FromArgs;
use colored::Colorize;
use modsh::env::expand_home;
use modsh::signals::install_interrupt_handler;
use modsh::{Interpreter, ModuleRegistry, ModuleResolver};
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(FromArgs)]
/// Interactive runner for script modules, builtin functions and |> pipe chains.
struct Args {
    #[argh(option, default = "String::from(\"./modules\")")]
    /// directory holding the modules (default: ./modules)
    modules: String,

    #[argh(option, short = 'e')]
    /// run a single command line and exit
    exec: Option<String>,

    #[argh(switch)]
    /// start the interactive console (default when --exec is absent)
    console: bool,

    #[argh(switch)]
    /// print the version and exit
    version: bool,

    #[argh(switch)]
    /// do not print the banner
    no_banner: bool,

    #[argh(option)]
    /// shell for `$` lines (default: bash when installed, else sh)
    shell: Option<String>,

    #[argh(switch, short = 'v')]
    /// log debug output to stderr
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_env("MODSH_LOG").unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(filter)
        .init();
}

fn run(args: Args) -> Result<()> {
    let mut registry = ModuleRegistry::new(expand_home(&args.modules));
    let count = registry
        .discover()
        .with_context(|| format!("can't load modules from {}", registry.root().display()))?;
    tracing::info!(count, dir = %registry.root().display(), "modules loaded");

    let mut sh = Interpreter::new(Box::new(registry));
    if let Some(shell) = args.shell {
        sh = sh.with_shell(shell);
    }
    install_interrupt_handler(sh.execution_state()).context("can't install Ctrl+C handler")?;

    if let Some(line) = &args.exec {
        sh.execute(line);
        if !args.console {
            return Ok(());
        }
    }

    if !args.no_banner {
        sh.print_banner(env!("CARGO_PKG_VERSION"))?;
    }
    sh.repl().context("interactive console failed")?;
    Ok(())
}

fn main() -> ExitCode {
    let args: Args = argh::from_env();
    if args.version {
        println!("modsh {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }
    init_tracing(args.verbose);

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "[-]".red().bold());
            ExitCode::FAILURE
        }
    }
}
