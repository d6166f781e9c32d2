use std::{path::PathBuf, process};

use anyhow::{Context as _, Result};
use clap::Parser;
use dts_analyzer::{lint, resolve_types, Config, Context, Diagnostic, TypeLoader};
use log::{info, LevelFilter};
use simplelog::{ColorChoice, TermLogger, TerminalMode};

/// Check a devicetree board file and its overlays.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Board file
    board: PathBuf,

    /// Overlays applied on top of the board, in order
    overlays: Vec<PathBuf>,

    /// Include search path
    #[arg(short = 'I', long = "include", value_name = "DIR")]
    include: Vec<PathBuf>,

    /// Binding directory, scanned recursively for .yaml files
    #[arg(short, long = "bindings", value_name = "DIR")]
    bindings: Vec<PathBuf>,

    /// Predefined macro
    #[arg(short = 'D', long = "define", value_name = "NAME[=VALUE]")]
    define: Vec<String>,

    /// Print the merged tree
    #[arg(long)]
    tree: bool,

    /// More logging, up to -vvv
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// No logging
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,
}

impl Args {
    fn log_level(&self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::Off;
        }
        match self.verbose {
            0 => LevelFilter::Warn,
            1 => LevelFilter::Info,
            2 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    }

    fn config(&self) -> Config {
        let mut config = Config::default();
        for dir in &self.include {
            config = config.include(dir);
        }
        for define in &self.define {
            config = config.define(define);
        }
        config
    }
}

fn print(diagnostic: &Diagnostic) {
    eprintln!("{}", diagnostic);
    if let Some(fix) = &diagnostic.fix {
        eprintln!("  {}: fix: replace with \"{}\"", fix.location, fix.replacement);
    }
}

fn run(args: &Args) -> Result<bool> {
    let mut loader = TypeLoader::new();
    for dir in &args.bindings {
        let count = loader
            .add_binding_directory(dir)
            .with_context(|| format!("unable to scan {}", dir.display()))?;
        info!("{}: {} bindings", dir.display(), count);
    }

    let mut ctx = Context::new(args.config());
    ctx.set_board(&args.board);
    for overlay in &args.overlays {
        ctx.add_overlay(overlay);
    }

    let mut diagnostics = ctx.parse();
    resolve_types(&mut ctx, &mut loader);
    diagnostics.extend(lint(&mut ctx));

    for diagnostic in &diagnostics {
        print(diagnostic);
    }
    if args.tree {
        print!("{}", ctx.dump());
    }

    Ok(diagnostics.iter().any(Diagnostic::is_error))
}

fn main() -> Result<()> {
    let args = Args::parse();

    TermLogger::init(
        args.log_level(),
        simplelog::Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    )
    .context("unable to set up logging")?;

    if run(&args)? {
        process::exit(1);
    }
    Ok(())
}
