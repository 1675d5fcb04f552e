//! What a run does, decided once from the options before anything is touched.

use core::fmt::{self, Display};
use std::path::PathBuf;

use aflgo_bolts::Error;

use crate::{
    config::PassOptions,
    tables::{AutomatonEvents, DistanceTable, PropositionEvents, TargetList},
};

/// The LTL monitor tables active on top of distance instrumentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MonitorTables {
    /// Automaton events, if the file was given and could be opened
    pub automaton: Option<AutomatonEvents>,
    /// Protocol propositions, if the file was given and could be opened
    pub protocol: Option<PropositionEvents>,
}

impl MonitorTables {
    /// Whether any monitor sub-mode is on
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.automaton.is_some() || self.protocol.is_some()
    }
}

/// The mode of a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    /// Record block names, call edges, target functions and CFGs
    Preprocessing {
        /// Where the artifacts go
        outdir: PathBuf,
        /// The fuzzing targets
        targets: TargetList,
    },
    /// Coverage plus distance probes, optionally with monitor probes
    Distance {
        /// Block distances
        distances: DistanceTable,
        /// Monitor sub-modes
        monitor: MonitorTables,
    },
    /// Coverage probes only
    Coverage,
}

impl Mode {
    /// Picks the mode for `options` and loads the tables it needs.
    ///
    /// Fails if both targets and distances are given, if preprocessing has
    /// no output directory, or if an input file that the mode depends on
    /// cannot be read.
    pub fn select(options: &PassOptions) -> Result<Self, Error> {
        match (&options.targets, &options.distance) {
            (Some(_), Some(_)) => Err(Error::illegal_argument(
                "Cannot specify both '-targets' and '-distance'!",
            )),
            (Some(targets), None) => {
                let outdir = options.outdir.clone().ok_or_else(|| {
                    Error::illegal_argument("Provide output directory '-outdir <directory>'")
                })?;
                Ok(Mode::Preprocessing {
                    outdir,
                    targets: TargetList::from_file(targets)?,
                })
            }
            (None, Some(distance)) => {
                let distances = DistanceTable::from_file(distance).map_err(|err| match err {
                    Error::File(io) => Error::illegal_argument(format!(
                        "Unable to find {}: {io}",
                        distance.display()
                    )),
                    err => err,
                })?;
                let automaton = match &options.revents {
                    Some(path) => AutomatonEvents::open_optional(path)?,
                    None => None,
                };
                let protocol = match &options.pevents {
                    Some(path) => PropositionEvents::open_optional(path)?,
                    None => None,
                };
                Ok(Mode::Distance {
                    distances,
                    monitor: MonitorTables {
                        automaton,
                        protocol,
                    },
                })
            }
            (None, None) => Ok(Mode::Coverage),
        }
    }

    /// Whether this run only records and never instruments
    #[must_use]
    pub fn is_preprocessing(&self) -> bool {
        matches!(self, Mode::Preprocessing { .. })
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Mode::Preprocessing { .. } => "preprocessing",
            Mode::Distance { .. } => "distance instrumentation",
            Mode::Coverage => "coverage",
        })
    }
}
