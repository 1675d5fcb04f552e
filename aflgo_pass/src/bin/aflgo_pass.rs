//! Runs the pass over a module in json form.

use std::{fs, path::PathBuf, process};

use aflgo_bolts::{Error, SimpleStderrLogger};
use aflgo_pass::{AflGoPass, EnvConfig, Module, PassOptions, PassReport};
use clap::Parser;

/// Directed fuzzing instrumentation for a single module
#[derive(Parser, Debug)]
#[command(name = "aflgo-pass", version, about)]
struct Cli {
    /// Input file containing the target lines of code
    #[arg(long, value_name = "FILE", conflicts_with = "distance")]
    targets: Option<PathBuf>,

    /// Distance file containing the distance of each basic block to the provided targets
    #[arg(long, value_name = "FILE")]
    distance: Option<PathBuf>,

    /// Output directory where Ftargets.txt, Fnames.txt, BBnames.txt and BBcalls.txt are generated
    #[arg(long, value_name = "DIR")]
    outdir: Option<PathBuf>,

    /// Event file with `path:line:event` automaton events
    #[arg(long, value_name = "FILE")]
    revents: Option<PathBuf>,

    /// Event file with `path:line:proposition` protocol events
    #[arg(long, value_name = "FILE")]
    pevents: Option<PathBuf>,

    /// Seed for site locations and ratio gates, taken from the clock if unset
    #[arg(long)]
    seed: Option<u64>,

    /// Log more
    #[arg(short, long)]
    verbose: bool,

    /// Where to write the transformed module, defaults to overwriting the input
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// The module to transform
    #[arg(value_name = "MODULE")]
    module: PathBuf,
}

impl Cli {
    fn options(&self) -> PassOptions {
        PassOptions {
            targets: self.targets.clone(),
            distance: self.distance.clone(),
            outdir: self.outdir.clone(),
            revents: self.revents.clone(),
            pevents: self.pevents.clone(),
        }
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    let env = EnvConfig::from_env()?;
    let mut pass = match cli.seed {
        Some(seed) => AflGoPass::with_seed(cli.options(), env, seed),
        None => AflGoPass::new(cli.options(), env),
    };

    let mut module = Module::from_json(&fs::read_to_string(&cli.module)?)?;
    match pass.run_on_module(&mut module)? {
        PassReport::Preprocessed(stats) => log::debug!("{stats:?}"),
        PassReport::Instrumented(stats) => log::debug!("{stats:?}"),
    }

    let output = cli.output.as_ref().unwrap_or(&cli.module);
    fs::write(output, module.to_json()?)?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if SimpleStderrLogger::set_logger().is_ok() {
        log::set_max_level(if cli.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        });
    }

    if let Err(err) = run(&cli) {
        eprintln!("aflgo-pass: {err}");
        process::exit(1);
    }
}
