//! Preprocessing: names blocks after their source location and records what
//! the offline distance computation needs.
//!
//! Artifacts, all appended to inside the output directory:
//!
//! * `BBnames.txt`: one renamed block (`file:line:`) per line
//! * `BBcalls.txt`: `block,callee` for every direct call
//! * `Fnames.txt`: functions with at least one named block
//! * `Ftargets.txt`: the subset of those containing a target
//! * `dot-files/cfg.<function>.dot`: the CFG of every function in `Fnames.txt`

use std::{
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

use aflgo_bolts::{
    fs::{create_dir_if_missing, open_append},
    Error,
};

use crate::{
    cfg::ControlFlowGraph,
    ir::{Function, SymbolTable},
    location::{instruction_location, is_blacklisted, LocationId},
    tables::TargetList,
};

/// Block names
pub const BB_NAMES_FILE: &str = "BBnames.txt";
/// Call edges
pub const BB_CALLS_FILE: &str = "BBcalls.txt";
/// Function names
pub const F_NAMES_FILE: &str = "Fnames.txt";
/// Target functions
pub const F_TARGETS_FILE: &str = "Ftargets.txt";
/// Sub-directory for the CFGs
pub const DOT_FILES_DIR: &str = "dot-files";

/// What preprocessing learned about one function
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionRecord {
    /// The function
    pub name: String,
    /// New names of the named blocks, in block order
    pub block_names: Vec<String>,
    /// `(block, callee)` pairs; the block part is empty for unnamed blocks
    pub calls: Vec<(String, String)>,
    /// Whether any block holds a target location
    pub is_target: bool,
}

impl FunctionRecord {
    /// Whether the function is worth listing at all
    #[must_use]
    pub fn has_named_blocks(&self) -> bool {
        !self.block_names.is_empty()
    }
}

/// Totals of a preprocessing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreprocessStats {
    /// Functions written to `Fnames.txt`
    pub functions: usize,
    /// Functions written to `Ftargets.txt`
    pub target_functions: usize,
    /// Blocks written to `BBnames.txt`
    pub named_blocks: usize,
    /// Lines written to `BBcalls.txt`
    pub call_edges: usize,
}

/// Renames the blocks of `func` and collects its record.
///
/// Blacklisted functions are left untouched and yield `None`.
#[cfg_attr(not(feature = "profiling"), allow(unused_variables))]
pub fn scan_function(
    symbols: &mut SymbolTable,
    func: &mut Function,
    targets: &TargetList,
) -> Option<FunctionRecord> {
    if is_blacklisted(&func.name) {
        return None;
    }
    let mut record = FunctionRecord {
        name: func.name.clone(),
        ..FunctionRecord::default()
    };

    for index in 0..func.blocks.len() {
        let bb = &func.blocks[index];
        let mut bb_loc: Option<LocationId> = None;
        let mut callees = vec![];
        for inst in &bb.instructions {
            if let Some(loc) = instruction_location(inst) {
                if !record.is_target && targets.contains(&loc) {
                    record.is_target = true;
                }
                bb_loc.get_or_insert(loc);
            }
            if let Some(callee) = inst.called_function() {
                if !is_blacklisted(callee) {
                    callees.push(callee.to_string());
                }
            }
        }

        let bb_name = bb_loc.as_ref().map(ToString::to_string).unwrap_or_default();
        record
            .calls
            .extend(callees.into_iter().map(|callee| (bb_name.clone(), callee)));

        if let Some(loc) = bb_loc {
            let label = loc.block_label();
            func.blocks[index].name = Some(label.clone());
            record.block_names.push(label);

            #[cfg(feature = "profiling")]
            {
                use crate::{
                    abi::LLVM_PROFILING_CALL,
                    builder::{IrBuilder, IrWriter},
                    ir::Type,
                };

                let mut irb = IrBuilder::before_terminator(symbols, func, index);
                irb.declare_function(LLVM_PROFILING_CALL, Type::Void, &[Type::Ptr]);
                let name = irb.global_string(&bb_name);
                irb.insert_call(LLVM_PROFILING_CALL, vec![name]);
            }
        }
    }

    Some(record)
}

/// The artifact files of one output directory
#[derive(Debug)]
pub struct Artifacts {
    bbnames: BufWriter<File>,
    bbcalls: BufWriter<File>,
    fnames: BufWriter<File>,
    ftargets: BufWriter<File>,
    dot_dir: PathBuf,
}

impl Artifacts {
    /// Opens the artifact files in `outdir` and creates the `dot-files` directory.
    pub fn create<P: AsRef<Path>>(outdir: P) -> Result<Self, Error> {
        let outdir = outdir.as_ref();
        let bbnames = open_append(outdir.join(BB_NAMES_FILE))?;
        let bbcalls = open_append(outdir.join(BB_CALLS_FILE))?;
        let fnames = open_append(outdir.join(F_NAMES_FILE))?;
        let ftargets = open_append(outdir.join(F_TARGETS_FILE))?;
        let dot_dir = outdir.join(DOT_FILES_DIR);
        create_dir_if_missing(&dot_dir)?;
        Ok(Self {
            bbnames,
            bbcalls,
            fnames,
            ftargets,
            dot_dir,
        })
    }

    /// Where the CFG of `function` goes
    #[must_use]
    pub fn dot_path(&self, function: &str) -> PathBuf {
        self.dot_dir.join(format!("cfg.{function}.dot"))
    }

    /// Appends one function's record, plus its CFG if it has named blocks.
    pub fn write(
        &mut self,
        record: &FunctionRecord,
        cfg: &ControlFlowGraph,
        stats: &mut PreprocessStats,
    ) -> Result<(), Error> {
        for (block, callee) in &record.calls {
            writeln!(self.bbcalls, "{block},{callee}")?;
        }
        stats.call_edges += record.calls.len();
        for name in &record.block_names {
            writeln!(self.bbnames, "{name}")?;
        }
        stats.named_blocks += record.block_names.len();

        if !record.has_named_blocks() {
            return Ok(());
        }

        let dot_path = self.dot_path(&record.name);
        match File::create(&dot_path) {
            Ok(file) => cfg.write_dot(&mut BufWriter::new(file))?,
            Err(err) => log::warn!("Skipping CFG {}: {err}", dot_path.display()),
        }

        if record.is_target {
            writeln!(self.ftargets, "{}", record.name)?;
            stats.target_functions += 1;
        }
        writeln!(self.fnames, "{}", record.name)?;
        stats.functions += 1;
        Ok(())
    }

    /// Flushes all list files.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.bbnames.flush()?;
        self.bbcalls.flush()?;
        self.fnames.flush()?;
        self.ftargets.flush()?;
        Ok(())
    }
}

/// Scans every function, renames its blocks and writes the artifacts.
pub fn preprocess(
    symbols: &mut SymbolTable,
    functions: &mut [Function],
    targets: &TargetList,
    artifacts: &mut Artifacts,
) -> Result<PreprocessStats, Error> {
    let mut stats = PreprocessStats::default();
    for func in functions.iter_mut().filter(|f| !f.is_declaration()) {
        let Some(record) = scan_function(symbols, func, targets) else {
            log::debug!("Skipping blacklisted function {}", func.name);
            continue;
        };
        let cfg = ControlFlowGraph::from_function(func);
        artifacts.write(&record, &cfg, &mut stats)?;
    }
    artifacts.flush()?;
    Ok(stats)
}
