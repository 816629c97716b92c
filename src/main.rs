use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;
use std::thread;

use anyhow::{anyhow, Context};
use clap::Parser;

use benji::config::{Config, DEFAULT_MAX_CALL_DEPTH};
use benji::video::Video;
use benji::{builtins, lexer, parser, Interpreter, Io};

#[derive(Parser)]
#[command(name = "benji")]
#[command(version = concat!(env!("CARGO_PKG_VERSION"), " (", env!("BENJI_GIT_HASH"), ")"))]
#[command(about = "benji - a scripting language for a retro graphics console")]
struct Cli {
    /// Path to a benji source file to run
    file: Option<PathBuf>,

    /// Print the parsed program as JSON instead of running it
    #[arg(long)]
    ast: bool,

    /// Maximum depth of nested function calls
    #[arg(long, default_value_t = DEFAULT_MAX_CALL_DEPTH)]
    max_depth: usize,

    /// Seed for random()
    #[arg(long)]
    seed: Option<u64>,

    /// Write the last rendered frame to this file as a PPM image
    #[arg(long)]
    frame_out: Option<PathBuf>,

    /// List the builtin functions and exit
    #[arg(long)]
    list_builtins: bool,

    /// Log more (repeat for trace output)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbose: u8) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("benji=debug"),
        _ => EnvFilter::new("benji=trace"),
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
        .with(filter)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if cli.list_builtins {
        for name in builtins::names() {
            println!("{}", name);
        }
        return Ok(ExitCode::SUCCESS);
    }
    let Some(file) = cli.file else {
        println!("benji - run a program, e.g.: benji demo.bas");
        return Ok(ExitCode::SUCCESS);
    };

    let src = fs::read_to_string(&file).with_context(|| format!("reading {}", file.display()))?;
    if cli.ast {
        let program = parser::parse(lexer::lex(&src)?)?;
        println!("{}", serde_json::to_string_pretty(&program)?);
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::default().with_max_call_depth(cli.max_depth);
    if let Some(seed) = cli.seed {
        config = config.with_seed(seed);
    }
    let video = Video::new();
    let worker_video = video.clone();

    // The AST and interpreter hold Rc handles, so both are built on the
    // interpreter thread.
    let handle = thread::Builder::new()
        .name("benji-interpreter".into())
        .spawn(move || -> benji::Result<()> {
            let program = parser::parse(lexer::lex(&src)?)?;
            tracing::debug!(file = %file.display(), items = program.items.len(), "parsed");
            let mut interp = Interpreter::new(config)
                .with_io(Io::stdio())
                .with_video(worker_video);
            interp.load(&program)?;
            interp.run()?;
            Ok(())
        })
        .context("spawning interpreter thread")?;
    let outcome = handle
        .join()
        .map_err(|_| anyhow!("interpreter thread panicked"))?;

    if let Some(path) = &cli.frame_out {
        let out = fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        video
            .lock()
            .write_ppm(std::io::BufWriter::new(out))
            .with_context(|| format!("writing {}", path.display()))?;
    }

    match outcome {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) if e.is_fatal() => {
            eprintln!("error: {}", e);
            Ok(ExitCode::from(2))
        }
        Err(e) => {
            eprintln!("error: {}", e);
            Ok(ExitCode::from(1))
        }
    }
}
