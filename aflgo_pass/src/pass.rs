//! The module pass: picks the mode, then records or instruments every function.

use std::io::IsTerminal;

use aflgo_bolts::{
    rands::{Rand, RandomSeed, StdRand},
    Error,
};

use crate::{
    abi::{declare_coverage_globals, declare_monitor_globals},
    builder::{IrBuilder, IrWriter},
    config::{EnvConfig, PassOptions},
    coverage::{draw_cur_loc, insert_coverage_probe},
    distance::{decide, insert_distance_probe, DistanceDecision},
    ir::Module,
    location::{block_location, is_blacklisted},
    mode::Mode,
    monitor::{self, MonitorStats},
    preprocess::{preprocess, Artifacts, PreprocessStats},
};

/// Totals of an instrumentation run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstrumentationStats {
    /// Blocks that got a coverage probe
    pub inst_blocks: usize,
    /// Blocks that also got a distance probe
    pub distance_blocks: usize,
    /// Blocks left alone in selective mode
    pub skipped_blocks: usize,
    /// Monitor probes
    pub monitor: MonitorStats,
}

/// What a run did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PassReport {
    /// Preprocessing wrote its artifacts
    Preprocessed(PreprocessStats),
    /// Probes were inserted
    Instrumented(InstrumentationStats),
}

/// The directed fuzzing instrumentation pass
#[derive(Debug)]
pub struct AflGoPass<R = StdRand> {
    options: PassOptions,
    env: EnvConfig,
    rand: R,
}

impl AflGoPass<StdRand> {
    /// A pass seeded from the clock
    #[must_use]
    pub fn new(options: PassOptions, env: EnvConfig) -> Self {
        Self::with_rand(options, env, StdRand::new())
    }

    /// A pass with reproducible site locations and gates
    #[must_use]
    pub fn with_seed(options: PassOptions, env: EnvConfig, seed: u64) -> Self {
        Self::with_rand(options, env, StdRand::with_seed(seed))
    }
}

impl<R> AflGoPass<R>
where
    R: Rand,
{
    /// A pass drawing from `rand`
    #[must_use]
    pub fn with_rand(options: PassOptions, env: EnvConfig, rand: R) -> Self {
        Self { options, env, rand }
    }

    /// The environment settings in effect
    #[must_use]
    pub fn env(&self) -> &EnvConfig {
        &self.env
    }

    fn be_quiet(&self) -> bool {
        self.env.quiet || !std::io::stderr().is_terminal()
    }

    fn banner(&self, mode: &Mode) {
        if self.be_quiet() {
            return;
        }
        match mode {
            Mode::Coverage => log::info!("afl-llvm-pass {}", env!("CARGO_PKG_VERSION")),
            mode => log::info!(
                "aflgo-llvm-pass (yeah!) {} ({mode} mode)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }

    fn summary(&self, stats: &InstrumentationStats) {
        if self.be_quiet() {
            return;
        }
        if stats.inst_blocks == 0 {
            log::warn!("No instrumentation targets found.");
        } else {
            log::info!(
                "Instrumented {} locations ({} mode, ratio {}%, dist. ratio {}%).",
                stats.inst_blocks,
                self.env.hardening,
                self.env.inst_ratio,
                self.env.dinst_ratio
            );
        }
    }

    /// Runs the pass over `module`.
    ///
    /// Every fatal condition is reported before the module is touched.
    pub fn run_on_module(&mut self, module: &mut Module) -> Result<PassReport, Error> {
        let mode = Mode::select(&self.options)?;
        self.banner(&mode);

        if let Mode::Preprocessing { outdir, targets } = &mode {
            let mut artifacts = Artifacts::create(outdir)?;
            let stats = preprocess(
                &mut module.symbols,
                &mut module.functions,
                targets,
                &mut artifacts,
            )?;
            log::debug!(
                "Recorded {} functions ({} with targets), {} blocks, {} calls",
                stats.functions,
                stats.target_functions,
                stats.named_blocks,
                stats.call_edges
            );
            return Ok(PassReport::Preprocessed(stats));
        }

        let stats = self.instrument(module, &mode);
        self.summary(&stats);
        Ok(PassReport::Instrumented(stats))
    }

    fn instrument(&mut self, module: &mut Module, mode: &Mode) -> InstrumentationStats {
        let mut stats = InstrumentationStats::default();
        let Module {
            symbols, functions, ..
        } = module;
        let pointer_width = symbols.pointer_width;

        declare_coverage_globals(symbols);
        let monitor_tables = match mode {
            Mode::Distance { monitor, .. } if monitor.is_active() => {
                declare_monitor_globals(symbols);
                Some(monitor)
            }
            _ => None,
        };

        for func in functions.iter_mut() {
            if func.is_declaration() || is_blacklisted(&func.name) {
                continue;
            }
            for block in 0..func.blocks.len() {
                let loc = block_location(&func.blocks[block]);

                let decision = match mode {
                    Mode::Distance { distances, .. } => decide(
                        distances,
                        loc.as_ref(),
                        self.env.selective,
                        self.env.dinst_ratio,
                        &mut self.rand,
                    ),
                    _ => DistanceDecision::CoverageOnly,
                };
                if decision == DistanceDecision::Skip {
                    stats.skipped_blocks += 1;
                    continue;
                }

                if let Some(tables) = monitor_tables {
                    monitor::instrument_block(symbols, func, block, tables, &mut stats.monitor);
                }

                if !self.rand.percent(self.env.inst_ratio) {
                    continue;
                }
                let cur_loc = draw_cur_loc(&mut self.rand);

                let mut irb = IrBuilder::at_first_insertion_point(symbols, func, block);
                irb.set_nosanitize(true);
                let map_ptr = insert_coverage_probe(&mut irb, cur_loc);
                if let (DistanceDecision::Probe(_), Some(loc)) = (decision, &loc) {
                    insert_distance_probe(&mut irb, map_ptr, &loc.to_string(), pointer_width);
                    stats.distance_blocks += 1;
                }
                stats.inst_blocks += 1;
            }
        }
        stats
    }
}
